//! Deferred work queued on filters.
//!
//! Every filter owns a FIFO of tasks. A filter enters the session's global
//! queue only when it goes from "nothing scheduled" to "something
//! scheduled", so at most one worker runs a given filter at a time.
//!
//! ```text
//!   post_task(F, t) ──► F.tasks: [t0 t1 t] ─┐ (first task only)
//!                                           ▼
//!   global queue: [F  G  H] ──► worker: pop F, run t0, F back if tasks left
//! ```

use crate::error::Error;
use crate::filter::node::FilterNode;
use crate::filter::{EventTarget, FilterContext, FilterEvent};
use crate::pid::{Pid, PidInstance};
use crate::props::PropertyValue;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::trace;

/// Closure queued with [`FilterContext::post_task`]; returns whether to run again.
pub(crate) type TaskFn = Box<dyn FnMut(&mut FilterContext<'_>) -> bool + Send>;

/// What a task does.
pub(crate) enum TaskKind {
    /// Call `process`.
    Process,
    /// Link a new output pid of the filter.
    PidInit(Pid),
    /// Connect an upstream pid to the filter.
    Connect(Pid),
    /// Release one of the filter's inputs.
    Disconnect(PidInstance),
    /// Deliver an event.
    Event { event: FilterEvent, target: EventTarget },
    /// A filter this one feeds failed to set up.
    SetupErrorNotify { failed: String, error: Error },
    /// Tear the filter down.
    Remove,
    /// Apply a new argument value.
    UpdateArg { name: String, value: PropertyValue },
    /// Closure posted by the filter itself.
    Custom { name: String, f: TaskFn },
}

impl TaskKind {
    pub(crate) fn name(&self) -> &str {
        match self {
            TaskKind::Process => "process",
            TaskKind::PidInit(_) => "pid_init",
            TaskKind::Connect(_) => "pid_connect",
            TaskKind::Disconnect(_) => "pid_disconnect",
            TaskKind::Event { .. } => "event",
            TaskKind::SetupErrorNotify { .. } => "setup_error",
            TaskKind::Remove => "remove",
            TaskKind::UpdateArg { .. } => "update_arg",
            TaskKind::Custom { name, .. } => name,
        }
    }
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A queued task.
#[derive(Debug)]
pub(crate) struct Task {
    pub(crate) kind: TaskKind,
    /// Not run before this instant.
    pub(crate) not_before: Option<Instant>,
}

impl Task {
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|at| at <= now)
    }
}

/// Per filter task FIFO.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    pub(crate) queue: VecDeque<Task>,
    /// The filter sits in the global queue or is being run.
    pub(crate) scheduled: bool,
}

impl FilterNode {
    /// Queue a task on this filter; returns `false` when the filter is gone.
    pub(crate) fn post_task(self: &Arc<Self>, kind: TaskKind) -> bool {
        self.post_task_at(kind, None)
    }

    pub(crate) fn post_task_at(self: &Arc<Self>, kind: TaskKind, not_before: Option<Instant>) -> bool {
        let Some(session) = self.session.upgrade() else {
            trace!(filter = %self.name(), task = %kind.name(), "session gone, task dropped");
            return false;
        };
        if self.is_finalized() {
            trace!(filter = %self.name(), task = %kind.name(), "filter finalized, task dropped");
            return false;
        }
        session.pending_tasks.fetch_add(1, Ordering::AcqRel);
        let schedule = {
            let mut tasks = self.tasks();
            tasks.queue.push_back(Task { kind, not_before });
            !std::mem::replace(&mut tasks.scheduled, true)
        };
        if schedule {
            session.schedule(Arc::clone(self));
        }
        true
    }

    /// Queue a process task unless one is already queued.
    ///
    /// After the run status is set, the last process task leaves the
    /// counter non zero and this becomes a no-op.
    pub(crate) fn post_process_task(self: &Arc<Self>) {
        if self.process_task_queued.fetch_add(1, Ordering::AcqRel) == 0 {
            self.post_task(TaskKind::Process);
        }
    }

    /// Settle the coalescing counter after a process task; returns whether
    /// the task must run again.
    pub(crate) fn finish_process_task(&self, requeue: bool) -> bool {
        if requeue {
            self.process_task_queued.store(1, Ordering::Release);
            return true;
        }
        match self
            .process_task_queued
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => false,
            Err(_) => {
                // a process request arrived while running
                self.process_task_queued.store(1, Ordering::Release);
                true
            }
        }
    }
}
