//! Worker loop and task execution.
//!
//! Workers pull filter tokens from the global queue and run the head task
//! of that filter. A requeued task goes back to the filter's own queue; a
//! filter with tasks left re-enters the global queue behind the others.
//!
//! ```text
//!   worker ─► recv F ─► pop due task ─► run ─► Done         ─► pending_tasks -= 1
//!                                         └──► Requeue(at)  ─► F.tasks.push_back
//!                       F.tasks non empty ─► global queue.push(F)
//! ```
//!
//! A run ends once no task is pending anywhere, or on abort.

use super::SessionInner;
use super::link;
use super::task::{Task, TaskKind};
use crate::error::Error;
use crate::filter::node::FilterNode;
use crate::filter::{EventTarget, FilterEvent, ProcessStatus};
use crate::observability::span_task;
use kanal::ReceiveErrorTimeout;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// What happens to a task after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    /// The task is finished.
    Done,
    /// Run the task again, not before the given instant.
    Requeue(Option<Instant>),
}

/// Run tasks until the session is idle or aborted.
pub(crate) fn run_worker(session: &Arc<SessionInner>, index: usize) {
    debug!(worker = index, "worker started");
    let max_sleep = session.config().max_sleep;
    while !session.is_idle() && !session.is_aborted() {
        match session.queue_rx.recv_timeout(max_sleep) {
            Ok(node) => execute(session, node),
            Err(ReceiveErrorTimeout::Timeout) => continue,
            Err(_) => break,
        }
    }
    debug!(worker = index, "worker stopped");
}

/// Run one task of `node`.
pub(crate) fn execute(session: &Arc<SessionInner>, node: Arc<FilterNode>) {
    if node.is_finalized() {
        discard_tasks(session, &node);
        return;
    }

    let now = Instant::now();
    let next = {
        let mut tasks = node.tasks();
        match tasks.queue.iter().position(|t| t.is_due(now)) {
            Some(pos) => tasks.queue.remove(pos).map(Ok),
            None => {
                let wake = tasks.queue.iter().filter_map(|t| t.not_before).min();
                if wake.is_none() {
                    tasks.scheduled = false;
                }
                wake.map(Err)
            }
        }
    };
    let mut task = match next {
        Some(Ok(task)) => task,
        Some(Err(wake)) => {
            // only delayed tasks left: the filter stays scheduled so its tasks
            // keep their order. Without other work, spinning on the queue would
            // burn a core; max_sleep caps how late newly posted work is seen.
            let idle = session.queue_rx.is_empty();
            session.schedule(node);
            if idle {
                let wait = wake.saturating_duration_since(now).min(session.config().max_sleep);
                std::thread::sleep(wait);
            }
            return;
        }
        None => return,
    };

    let span = session
        .config()
        .tracing
        .task_spans
        .then(|| span_task(node.name(), task.kind.name()).entered());
    let started = Instant::now();
    let outcome = run_task(session, &node, &mut task);
    let elapsed = started.elapsed();
    drop(span);

    node.metrics.record_task(elapsed);
    node.nb_tasks_done.fetch_add(1, Ordering::Relaxed);
    trace!(filter = %node.name(), task = %task.kind.name(), ?outcome, elapsed_us = elapsed.as_micros() as u64, "task done");

    let reschedule = {
        let mut tasks = node.tasks();
        if let TaskOutcome::Requeue(not_before) = outcome {
            task.not_before = not_before;
            tasks.queue.push_back(task);
        }
        let more = !tasks.queue.is_empty();
        if !more {
            tasks.scheduled = false;
        }
        more
    };
    if outcome == TaskOutcome::Done {
        session.pending_tasks.fetch_sub(1, Ordering::AcqRel);
    }
    if reschedule {
        session.schedule(node);
    }
    crate::observability::record_queue_depth(session.queue_rx.len());
}

fn discard_tasks(session: &SessionInner, node: &FilterNode) {
    let dropped = {
        let mut tasks = node.tasks();
        tasks.scheduled = false;
        let dropped: Vec<Task> = tasks.queue.drain(..).collect();
        dropped
    };
    for task in &dropped {
        match &task.kind {
            TaskKind::Connect(pid) => {
                pid.connection_done();
            }
            TaskKind::Disconnect(input) => {
                input.detach();
                input.output().remove_destination(input);
            }
            _ => {}
        }
    }
    if !dropped.is_empty() {
        trace!(filter = %node.name(), count = dropped.len(), "tasks of a finalized filter dropped");
        session.pending_tasks.fetch_sub(dropped.len(), Ordering::AcqRel);
    }
}

fn run_task(session: &Arc<SessionInner>, node: &Arc<FilterNode>, task: &mut Task) -> TaskOutcome {
    match &mut task.kind {
        TaskKind::Process => process_task(session, node),
        TaskKind::PidInit(pid) => {
            link::pid_init(session, node, pid);
            TaskOutcome::Done
        }
        TaskKind::Connect(pid) => {
            link::connect(session, node, pid);
            TaskOutcome::Done
        }
        TaskKind::Disconnect(input) => {
            link::disconnect(session, node, input);
            TaskOutcome::Done
        }
        TaskKind::Event { event, target } => {
            event_task(session, node, event, target);
            TaskOutcome::Done
        }
        TaskKind::SetupErrorNotify { failed, error } => {
            let handled = node
                .with_filter(session, |f, ctx| f.on_setup_error(ctx, failed, error))
                .unwrap_or(false);
            if !handled {
                warn!(filter = %node.name(), failed = %failed, %error, "downstream filter failed to set up");
            }
            TaskOutcome::Done
        }
        TaskKind::Remove => {
            if link::remove(session, node) {
                TaskOutcome::Done
            } else {
                TaskOutcome::Requeue(None)
            }
        }
        TaskKind::UpdateArg { name, value } => {
            let result = node.with_filter(session, |f, ctx| f.update_arg(ctx, name, value));
            match result {
                Some(Ok(())) => {
                    debug!(filter = %node.name(), arg = %name, %value, "argument updated");
                    node.args
                        .write()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .set(name, value.clone());
                }
                Some(Err(e)) => warn!(filter = %node.name(), arg = %name, error = %e, "argument update refused"),
                None => {}
            }
            TaskOutcome::Done
        }
        TaskKind::Custom { f, .. } => {
            let again = node.with_filter(session, |_, ctx| f(ctx)).unwrap_or(false);
            if again {
                TaskOutcome::Requeue(None)
            } else {
                TaskOutcome::Done
            }
        }
    }
}

// ============================================================================
// Process
// ============================================================================

fn process_task(session: &Arc<SessionInner>, node: &Arc<FilterNode>) -> TaskOutcome {
    if session.run_status().is_some() {
        trace!(filter = %node.name(), "run status set, process skipped");
        return TaskOutcome::Done;
    }
    let requeue = if node.is_removed() || node.is_finalized() {
        None
    } else if node.has_pending_connections() {
        trace!(filter = %node.name(), "pid connections pending, process skipped");
        None
    } else if node.all_outputs_blocked() {
        trace!(filter = %node.name(), "all outputs blocked, process skipped");
        None
    } else {
        run_process(session, node)
    };
    // once a status is set the coalescing counter stays armed: no new
    // process task is posted and the session drains
    if session.run_status().is_some() {
        return TaskOutcome::Done;
    }
    if node.finish_process_task(requeue.is_some()) {
        TaskOutcome::Requeue(requeue.flatten())
    } else {
        TaskOutcome::Done
    }
}

/// Call `process`; returns `Some(not_before)` when it must run again.
fn run_process(session: &Arc<SessionInner>, node: &Arc<FilterNode>) -> Option<Option<Instant>> {
    for input in node.inputs() {
        let Some(props) = input.pending_reconfigure() else {
            continue;
        };
        debug!(filter = %node.name(), pid = %input.name(), "reconfiguring input");
        input.set_configured_props(props);
        if let Some(Err(e)) = node.with_filter(session, |f, ctx| f.configure_pid(ctx, &input, false)) {
            warn!(filter = %node.name(), pid = %input.name(), error = %e, "input reconfiguration failed");
            link::setup_failure(session, node, e);
            return None;
        }
    }

    node.nb_process_calls.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    let result = node.with_filter(session, |f, ctx| f.process(ctx))?;
    node.process_time_us
        .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);

    let status = match result {
        Ok(status) => status,
        Err(Error::Eos) => ProcessStatus::Eos,
        Err(e) => {
            error!(filter = %node.name(), error = %e, "process failed");
            session.set_run_status(e, Some(node.name()));
            return None;
        }
    };

    if status == ProcessStatus::Eos {
        trace!(filter = %node.name(), "filter reached end of stream");
        for pid in node.outputs() {
            pid.set_eos();
        }
        return None;
    }
    if session.run_status().is_some() {
        return None;
    }
    if let Some(delay) = node.take_reschedule() {
        return Some(Some(Instant::now() + delay));
    }
    if node.pending_packets.load(Ordering::Acquire) > 0 {
        return Some(None);
    }
    if node.is_source() && !node.all_outputs_blocked() {
        let outputs = node.outputs();
        if !outputs.is_empty() && !outputs.iter().all(|p| p.is_eos()) {
            return Some(None);
        }
    }
    None
}

// ============================================================================
// Events
// ============================================================================

fn event_task(session: &Arc<SessionInner>, node: &Arc<FilterNode>, event: &FilterEvent, target: &EventTarget) {
    let cancelled = node
        .with_filter(session, |f, ctx| f.process_event(ctx, event, target))
        .unwrap_or(true);
    if cancelled {
        trace!(filter = %node.name(), event = %event.name(), "event cancelled");
        return;
    }
    if target.is_upstream() {
        for input in node.inputs() {
            input.send_event(event.clone());
        }
    } else {
        for pid in node.outputs() {
            pid.send_event(event.clone());
        }
    }
}
