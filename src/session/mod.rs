//! The filter session.
//!
//! A [`Session`] owns the filter registry, the loaded filters and the
//! global task queue. Loading filters only queues their first tasks;
//! [`Session::run`] executes tasks on the worker pool until nothing is left.
//!
//! ```text
//!   register(FilterRegister) ─► registry
//!   load_filter("src:FID=1") ─► FilterNode ─► initialize ─► process task
//!
//!   run():  caller thread ─┐
//!           worker 1 ──────┼─► global queue ─► filter tasks
//!           worker N ──────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use filtergraph::prelude::*;
//!
//! let session = Session::new(SessionConfig::new().with_threads(2));
//! session.register(source_register());
//! session.register(sink_register());
//! session.load_filter("source:count=10")?;
//! session.load_filter("sink")?;
//! session.run()?;
//! ```

pub mod config;
pub mod events;
pub(crate) mod link;
pub(crate) mod scheduler;
pub(crate) mod task;

pub use config::SessionConfig;
pub use events::{EventReceiver, EventSender, SessionEvent};

use crate::error::{Error, Result};
use crate::filter::args::{parse_value, split_description};
use crate::filter::node::{FilterNode, NodeSetup};
use crate::filter::{EventTarget, FilterArgs, FilterEvent, FilterId, FilterRegister, FilterStatistics};
use crate::observability::{init_metrics, instrument_session, span_filter};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use task::TaskKind;
use tracing::{debug, error, info, warn};

// ============================================================================
// Shared state
// ============================================================================

/// State shared by the session handle, the workers and the filters.
pub(crate) struct SessionInner {
    config: SessionConfig,
    registry: RwLock<Vec<Arc<FilterRegister>>>,
    filters: RwLock<Vec<Arc<FilterNode>>>,
    pub(crate) queue_tx: kanal::Sender<Arc<FilterNode>>,
    pub(crate) queue_rx: kanal::Receiver<Arc<FilterNode>>,
    /// Tasks queued on all filters, running ones included.
    pub(crate) pending_tasks: AtomicUsize,
    run_status: Mutex<Option<Error>>,
    aborted: AtomicBool,
    next_filter_id: AtomicU64,
    pub(crate) events: EventSender,
}

impl SessionInner {
    fn new(config: SessionConfig) -> Self {
        let (queue_tx, queue_rx) = kanal::unbounded();
        Self {
            events: EventSender::new(config.event_capacity),
            config,
            registry: RwLock::new(Vec::new()),
            filters: RwLock::new(Vec::new()),
            queue_tx,
            queue_rx,
            pending_tasks: AtomicUsize::new(0),
            run_status: Mutex::new(None),
            aborted: AtomicBool::new(false),
            next_filter_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Put a filter with tasks in the global queue.
    pub(crate) fn schedule(&self, node: Arc<FilterNode>) {
        if self.queue_tx.send(node).is_err() {
            error!("task queue closed, filter not scheduled");
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.pending_tasks.load(Ordering::Acquire) == 0
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Record a fatal status; only the first one is kept.
    pub(crate) fn set_run_status(&self, status: Error, filter: Option<&str>) {
        let mut current = self.run_status.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_some() {
            debug!(status = %status, "run status already set, ignored");
            return;
        }
        if status != Error::Eos {
            warn!(status = %status, filter = filter.unwrap_or("session"), "session run status set");
            self.events.send_error(status.to_string(), filter.map(str::to_string));
        }
        *current = Some(status);
    }

    pub(crate) fn run_status(&self) -> Option<Error> {
        self.run_status.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn registry(&self) -> Vec<Arc<FilterRegister>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn find_register(&self, name: &str) -> Option<Arc<FilterRegister>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.name() == name)
            .cloned()
    }

    pub(crate) fn filters(&self) -> Vec<Arc<FilterNode>> {
        self.filters.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn find_filter(&self, id: FilterId) -> Result<Arc<FilterNode>> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or_else(|| Error::InvalidParameter(format!("no filter {id} in the session")))
    }

    /// Load a filter from `regname[:args]`. With `target`, its pids only
    /// connect to that filter.
    pub(crate) fn load_filter_for(self: &Arc<Self>, description: &str, target: Option<&Arc<FilterNode>>) -> Result<FilterId> {
        let (name, args) = split_description(description);
        let register = self
            .find_register(name)
            .ok_or_else(|| Error::FilterNotFound(name.to_string()))?;
        let args = FilterArgs::parse(&register, args)?;
        let node = self.create_node(register, args, false, target.map(Arc::downgrade), None)?;
        Ok(node.id)
    }

    /// Build and initialize a filter, then add it to the session.
    pub(crate) fn create_node(
        self: &Arc<Self>,
        register: Arc<FilterRegister>,
        args: FilterArgs,
        dynamic: bool,
        target: Option<Weak<FilterNode>>,
        cloned_from: Option<Weak<FilterNode>>,
    ) -> Result<Arc<FilterNode>> {
        let _span = self
            .config
            .tracing
            .filter_spans
            .then(|| span_filter(register.name(), dynamic).entered());

        let imp = register.instantiate(&args).map_err(|e| Error::SetupFailed {
            filter: register.name().to_string(),
            reason: e.to_string(),
        })?;
        let id = FilterId(self.next_filter_id.fetch_add(1, Ordering::Relaxed));
        let setup = NodeSetup {
            id,
            register: Arc::clone(&register),
            args,
            max_reservoir: self.config.max_reservoir,
            dynamic,
            target,
            cloned_from,
        };
        let node = FilterNode::new(self, setup, imp);

        let init = node
            .with_filter(self, |f, ctx| f.initialize(ctx))
            .unwrap_or(Ok(()));
        if let Err(e) = init {
            warn!(filter = %register.name(), %id, error = %e, "filter initialization failed");
            node.removed.store(true, Ordering::Release);
            node.finalized.store(true, Ordering::Release);
            for pid in node.outputs() {
                pid.remove();
            }
            drop(node.imp.lock().unwrap_or_else(PoisonError::into_inner).take());
            let reason = e.to_string();
            self.events.send(SessionEvent::SetupFailed {
                filter: register.name().to_string(),
                reason: reason.clone(),
            });
            return Err(Error::SetupFailed {
                filter: register.name().to_string(),
                reason,
            });
        }

        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&node));
        info!(filter = %register.name(), %id, dynamic, "filter loaded");
        self.events.send(SessionEvent::FilterLoaded {
            id,
            name: register.name().to_string(),
            dynamic,
        });
        if !register.declares_inputs() {
            node.post_process_task();
        }
        Ok(node)
    }

    /// New instance of `node` with the same register and arguments.
    pub(crate) fn clone_node(self: &Arc<Self>, node: &Arc<FilterNode>) -> Result<Arc<FilterNode>> {
        let args = node.args().clone();
        self.create_node(
            Arc::clone(&node.register),
            args,
            node.dynamic,
            node.target.clone(),
            Some(Arc::downgrade(node)),
        )
    }

    pub(crate) fn remove_node(&self, node: &Arc<FilterNode>) {
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|n| !Arc::ptr_eq(n, node));
    }
}

// ============================================================================
// Session
// ============================================================================

/// Summary of a loaded filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterInfo {
    /// Session id.
    pub id: FilterId,
    /// Register name.
    pub name: String,
    /// Id given with `FID`.
    pub fid: Option<String>,
    /// Inserted by the graph resolver.
    pub dynamic: bool,
}

/// An established pid connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Producing filter.
    pub source: FilterId,
    /// Register name of the producer.
    pub source_name: String,
    /// Pid name.
    pub pid: String,
    /// Consuming filter.
    pub destination: FilterId,
    /// Register name of the consumer.
    pub destination_name: String,
}

/// A filter session.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session.
    pub fn new(config: SessionConfig) -> Self {
        init_metrics();
        debug!(threads = config.threads, use_locks = config.use_locks, "session created");
        Self {
            inner: Arc::new(SessionInner::new(config)),
        }
    }

    /// Configuration of the session.
    pub fn config(&self) -> &SessionConfig {
        self.inner.config()
    }

    /// Add a filter type; a register with the same name is replaced.
    pub fn register(&self, register: FilterRegister) {
        let mut registry = self.inner.registry.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = registry.iter().position(|r| r.name() == register.name()) {
            warn!(filter = %register.name(), "filter register replaced");
            registry.remove(pos);
        }
        debug!(filter = %register.name(), "filter registered");
        registry.push(Arc::new(register));
    }

    /// Names of the registered filter types.
    pub fn registers(&self) -> Vec<String> {
        self.inner.registry().iter().map(|r| r.name().to_string()).collect()
    }

    /// Load a filter from a `regname[:args]` description.
    pub fn load_filter(&self, description: &str) -> Result<FilterId> {
        self.inner.load_filter_for(description, None)
    }

    /// Number of loaded filters, dynamic ones included.
    pub fn filter_count(&self) -> usize {
        self.inner.filters.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Loaded filters.
    pub fn filters(&self) -> Vec<FilterInfo> {
        self.inner
            .filters()
            .iter()
            .map(|n| FilterInfo {
                id: n.id,
                name: n.name().to_string(),
                fid: n.fid(),
                dynamic: n.dynamic,
            })
            .collect()
    }

    /// Run tasks until none is left or the session is aborted.
    ///
    /// Returns the first fatal status reported during the run, if any. An
    /// end of stream status is a normal completion.
    pub fn run(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.is_aborted() {
            return Err(Error::Aborted);
        }
        let workers = inner.config.worker_count();
        let _span = inner.config.tracing.session_spans.then(|| instrument_session(workers));
        info!(workers, filters = self.filter_count(), "session run started");

        std::thread::scope(|scope| {
            for index in 1..workers {
                let session = Arc::clone(inner);
                let spawned = std::thread::Builder::new()
                    .name(format!("filtergraph-worker-{index}"))
                    .spawn_scoped(scope, move || scheduler::run_worker(&session, index));
                if let Err(e) = spawned {
                    warn!(worker = index, error = %e, "cannot spawn worker thread");
                }
            }
            scheduler::run_worker(inner, 0);
        });

        let status = inner.run_status();
        info!(status = ?status, filters = self.filter_count(), "session run finished");
        inner.events.send(SessionEvent::Finished);
        match status {
            None | Some(Error::Eos) => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Stop running as soon as possible; tasks left are not executed.
    pub fn abort(&self) {
        info!("session aborted");
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.set_run_status(Error::Aborted, None);
    }

    /// Fatal status of the session, if any.
    pub fn run_status(&self) -> Option<Error> {
        self.inner.run_status()
    }

    /// Request the removal of a filter. Filters left without input and
    /// upstream filters left without consumer are removed as well.
    pub fn remove_filter(&self, id: FilterId) -> Result<()> {
        let node = self.inner.find_filter(id)?;
        link::post_remove(&node);
        Ok(())
    }

    /// Established connections.
    pub fn connections(&self) -> Vec<Connection> {
        let mut connections = Vec::new();
        for node in self.inner.filters() {
            for pid in node.outputs() {
                for dst in pid.destinations().iter() {
                    let Some(consumer) = dst.consumer() else {
                        continue;
                    };
                    connections.push(Connection {
                        source: node.id,
                        source_name: node.name().to_string(),
                        pid: pid.name(),
                        destination: consumer.id,
                        destination_name: consumer.name().to_string(),
                    });
                }
            }
        }
        connections
    }

    /// Subscribe to session events.
    pub fn events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Change an updatable argument of a loaded filter.
    ///
    /// The value is checked now and applied before the filter's next
    /// callback.
    pub fn update_filter_arg(&self, id: FilterId, name: &str, value: &str) -> Result<()> {
        let node = self.inner.find_filter(id)?;
        let desc = node
            .register
            .arg(name)
            .ok_or_else(|| Error::invalid_argument(name, format!("not an argument of {}", node.name())))?;
        if !desc.updatable {
            return Err(Error::invalid_argument(name, "argument cannot be updated"));
        }
        let value = parse_value(desc, value)?;
        let name = name.to_string();
        if !node.post_task(TaskKind::UpdateArg { name, value }) {
            return Err(Error::InvalidParameter(format!("filter {id} is gone")));
        }
        Ok(())
    }

    /// Deliver an event to a filter; it travels upstream from there.
    pub fn send_event(&self, id: FilterId, event: FilterEvent) -> Result<()> {
        let node = self.inner.find_filter(id)?;
        if !node.post_task(TaskKind::Event {
            event,
            target: EventTarget::Filter,
        }) {
            return Err(Error::InvalidParameter(format!("filter {id} is gone")));
        }
        Ok(())
    }

    /// Counters of every loaded filter.
    pub fn statistics(&self) -> Vec<FilterStatistics> {
        self.inner.filters().iter().map(|n| n.statistics()).collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("filters", &self.filter_count())
            .field("pending_tasks", &self.inner.pending_tasks.load(Ordering::Relaxed))
            .field("run_status", &self.run_status())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let inner = &self.inner;
        let filters = std::mem::take(&mut *inner.filters.write().unwrap_or_else(PoisonError::into_inner));
        debug!(filters = filters.len(), "session teardown");
        for node in &filters {
            if !node.is_finalized() {
                node.with_filter(inner, |f, ctx| f.finalize(ctx));
                node.finalized.store(true, Ordering::Release);
            }
            drop(node.imp.lock().unwrap_or_else(PoisonError::into_inner).take());
            node.tasks().queue.clear();
        }
        // pids and their destinations point at each other
        for node in &filters {
            for pid in node.outputs() {
                pid.clear_destinations();
            }
            node.outputs.write().unwrap_or_else(PoisonError::into_inner).clear();
            node.inputs.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
        while let Ok(Some(_)) = inner.queue_rx.try_recv() {}
    }
}
