//! Runtime state of a loaded filter.

use super::FilterId;
use super::args::FilterArgs;
use super::context::FilterContext;
use super::register::FilterRegister;
use super::traits::Filter;
use crate::observability::FilterMetrics;
use crate::packet::{PacketPool, PoolStats};
use crate::pid::{Pid, PidInstance, PidStatistics};
use crate::session::SessionInner;
use crate::session::task::TaskQueue;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

/// A filter instance as seen by the session.
///
/// The filter's own state lives in `imp`; everything else is engine
/// bookkeeping shared between worker threads.
pub(crate) struct FilterNode {
    pub(crate) id: FilterId,
    pub(crate) register: Arc<FilterRegister>,
    pub(crate) session: Weak<SessionInner>,
    name: String,
    pub(crate) pool: Arc<PacketPool>,
    pub(crate) imp: Mutex<Option<Box<dyn Filter>>>,
    pub(crate) args: RwLock<FilterArgs>,
    pub(crate) tasks: Mutex<TaskQueue>,
    pub(crate) inputs: RwLock<Vec<PidInstance>>,
    pub(crate) outputs: RwLock<Vec<Pid>>,
    /// Packets queued on all inputs.
    pub(crate) pending_packets: AtomicU32,
    /// Output pids currently blocked.
    pub(crate) would_block: AtomicU32,
    pub(crate) out_pid_connection_pending: AtomicU32,
    pub(crate) in_pid_connection_pending: AtomicU32,
    /// Coalescing counter: a process task is queued while non zero.
    pub(crate) process_task_queued: AtomicU32,
    pub(crate) removed: AtomicBool,
    pub(crate) finalized: AtomicBool,
    /// Reschedule delay asked by the filter, in microseconds (0 = none).
    pub(crate) schedule_next_us: AtomicU64,
    /// Instantiated by the graph resolver.
    pub(crate) dynamic: bool,
    /// Only filter this one's output pids may connect to.
    pub(crate) target: Option<Weak<FilterNode>>,
    pub(crate) cloned_from: Option<Weak<FilterNode>>,
    /// Filter notified when this one fails to set up.
    pub(crate) setup_error_target: Mutex<Option<Weak<FilterNode>>>,
    pub(crate) metrics: FilterMetrics,
    pub(crate) nb_tasks_done: AtomicU64,
    pub(crate) nb_process_calls: AtomicU64,
    pub(crate) process_time_us: AtomicU64,
}

/// Creation parameters of a [`FilterNode`].
pub(crate) struct NodeSetup {
    pub(crate) id: FilterId,
    pub(crate) register: Arc<FilterRegister>,
    pub(crate) args: FilterArgs,
    pub(crate) max_reservoir: usize,
    pub(crate) dynamic: bool,
    pub(crate) target: Option<Weak<FilterNode>>,
    pub(crate) cloned_from: Option<Weak<FilterNode>>,
}

impl FilterNode {
    pub(crate) fn new(session: &Arc<SessionInner>, setup: NodeSetup, imp: Box<dyn Filter>) -> Arc<Self> {
        let name = setup.register.name().to_string();
        Arc::new(Self {
            id: setup.id,
            session: Arc::downgrade(session),
            pool: Arc::new(PacketPool::new(name.clone(), setup.max_reservoir)),
            metrics: FilterMetrics::new(&name),
            register: setup.register,
            name,
            imp: Mutex::new(Some(imp)),
            args: RwLock::new(setup.args),
            tasks: Mutex::new(TaskQueue::default()),
            inputs: RwLock::new(Vec::new()),
            outputs: RwLock::new(Vec::new()),
            pending_packets: AtomicU32::new(0),
            would_block: AtomicU32::new(0),
            out_pid_connection_pending: AtomicU32::new(0),
            in_pid_connection_pending: AtomicU32::new(0),
            process_task_queued: AtomicU32::new(0),
            removed: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            schedule_next_us: AtomicU64::new(0),
            dynamic: setup.dynamic,
            target: setup.target,
            cloned_from: setup.cloned_from,
            setup_error_target: Mutex::new(None),
            nb_tasks_done: AtomicU64::new(0),
            nb_process_calls: AtomicU64::new(0),
            process_time_us: AtomicU64::new(0),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Filter id given with `FID`.
    pub(crate) fn fid(&self) -> Option<String> {
        self.args().fid().map(str::to_string)
    }

    pub(crate) fn args(&self) -> std::sync::RwLockReadGuard<'_, FilterArgs> {
        self.args.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn inputs(&self) -> Vec<PidInstance> {
        self.inputs.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn outputs(&self) -> Vec<Pid> {
        self.outputs.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn num_inputs(&self) -> usize {
        self.inputs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn num_outputs(&self) -> usize {
        self.outputs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn tasks(&self) -> MutexGuard<'_, TaskQueue> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn target(&self) -> Option<Arc<FilterNode>> {
        self.target.as_ref()?.upgrade()
    }

    pub(crate) fn cloned_from(&self) -> Option<Arc<FilterNode>> {
        self.cloned_from.as_ref()?.upgrade()
    }

    pub(crate) fn setup_error_target(&self) -> Option<Arc<FilterNode>> {
        self.setup_error_target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()?
            .upgrade()
    }

    pub(crate) fn set_setup_error_target(&self, node: &Arc<FilterNode>) {
        *self.setup_error_target.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(node));
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Take an input slot for a connection about to be posted.
    pub(crate) fn try_reserve_input(&self) -> bool {
        let slots = self.register.max_extra_pids() as usize + 1;
        let inputs = self.num_inputs();
        self.in_pid_connection_pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (inputs + (pending as usize) < slots).then_some(pending + 1)
            })
            .is_ok()
    }

    /// Whether every input slot is taken.
    pub(crate) fn inputs_full(&self) -> bool {
        let taken = self.num_inputs() + self.in_pid_connection_pending.load(Ordering::Acquire) as usize;
        taken > self.register.max_extra_pids() as usize
    }

    /// Whether the filter produces without inputs.
    pub(crate) fn is_source(&self) -> bool {
        self.num_inputs() == 0 && !self.register.declares_inputs()
    }

    /// Whether an output exists and every output is blocked.
    pub(crate) fn all_outputs_blocked(&self) -> bool {
        let outputs = self.num_outputs();
        outputs > 0 && self.would_block.load(Ordering::Acquire) as usize >= outputs
    }

    pub(crate) fn has_pending_connections(&self) -> bool {
        self.in_pid_connection_pending.load(Ordering::Acquire) > 0
            || self.out_pid_connection_pending.load(Ordering::Acquire) > 0
    }

    /// Take the reschedule delay asked with `ask_rt_reschedule`.
    pub(crate) fn take_reschedule(&self) -> Option<Duration> {
        match self.schedule_next_us.swap(0, Ordering::AcqRel) {
            0 => None,
            us => Some(Duration::from_micros(us)),
        }
    }

    /// Run a callback of the filter's private state.
    ///
    /// Returns `None` once the state was released.
    pub(crate) fn with_filter<R>(
        self: &Arc<Self>,
        session: &Arc<SessionInner>,
        f: impl FnOnce(&mut dyn Filter, &mut FilterContext<'_>) -> R,
    ) -> Option<R> {
        let mut imp = self.imp.lock().unwrap_or_else(PoisonError::into_inner);
        let filter = imp.as_mut()?;
        let mut ctx = FilterContext::new(self, session);
        Some(f(filter.as_mut(), &mut ctx))
    }

    pub(crate) fn statistics(&self) -> FilterStatistics {
        FilterStatistics {
            id: self.id,
            name: self.name.clone(),
            fid: self.fid(),
            dynamic: self.dynamic,
            removed: self.is_removed(),
            nb_tasks_done: self.nb_tasks_done.load(Ordering::Relaxed),
            nb_process_calls: self.nb_process_calls.load(Ordering::Relaxed),
            process_time: Duration::from_micros(self.process_time_us.load(Ordering::Relaxed)),
            pending_packets: self.pending_packets.load(Ordering::Acquire),
            would_block: self.would_block.load(Ordering::Acquire),
            pool: self.pool.stats(),
            inputs: self.inputs().iter().map(PidInstance::statistics).collect(),
            outputs: self.outputs().iter().map(Pid::statistics).collect(),
        }
    }
}

impl fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dynamic", &self.dynamic)
            .field("removed", &self.is_removed())
            .finish_non_exhaustive()
    }
}

/// Snapshot of a filter's counters.
#[derive(Debug, Clone)]
pub struct FilterStatistics {
    /// Session id.
    pub id: FilterId,
    /// Register name.
    pub name: String,
    /// Id given with `FID`.
    pub fid: Option<String>,
    /// Inserted by the graph resolver.
    pub dynamic: bool,
    /// Removal requested.
    pub removed: bool,
    /// Tasks executed.
    pub nb_tasks_done: u64,
    /// Calls to `process`.
    pub nb_process_calls: u64,
    /// Time spent in `process`.
    pub process_time: Duration,
    /// Packets queued on the inputs.
    pub pending_packets: u32,
    /// Blocked outputs.
    pub would_block: u32,
    /// Packet reservoir counters.
    pub pool: PoolStats,
    /// Per input statistics.
    pub inputs: Vec<PidStatistics>,
    /// Per output statistics.
    pub outputs: Vec<PidStatistics>,
}
