//! Context handed to every filter callback.

use super::FilterId;
use super::args::FilterArgs;
use super::node::FilterNode;
use crate::error::{Error, Result};
use crate::packet::PoolStats;
use crate::pid::{Pid, PidInstance};
use crate::props::PropertyValue;
use crate::session::SessionInner;
use crate::session::task::TaskKind;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::debug;

/// The filter's handle on the session during a callback.
pub struct FilterContext<'a> {
    node: &'a Arc<FilterNode>,
    session: &'a Arc<SessionInner>,
}

impl<'a> FilterContext<'a> {
    pub(crate) fn new(node: &'a Arc<FilterNode>, session: &'a Arc<SessionInner>) -> Self {
        Self { node, session }
    }

    /// Register name of the filter.
    pub fn name(&self) -> &str {
        self.node.name()
    }

    /// Session id of the filter.
    pub fn id(&self) -> FilterId {
        self.node.id
    }

    /// Id given with `FID`.
    pub fn fid(&self) -> Option<String> {
        self.node.fid()
    }

    /// Snapshot of the filter arguments.
    pub fn args(&self) -> FilterArgs {
        self.node.args().clone()
    }

    /// Current value of one argument.
    pub fn arg(&self, name: &str) -> Option<PropertyValue> {
        self.node.args().get(name).cloned()
    }

    // ========================================================================
    // Pids
    // ========================================================================

    /// Connected inputs, in connection order.
    pub fn inputs(&self) -> Vec<PidInstance> {
        self.node.inputs()
    }

    /// Input by index.
    pub fn input(&self, index: usize) -> Option<PidInstance> {
        self.node
            .inputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Number of connected inputs.
    pub fn num_inputs(&self) -> usize {
        self.node.num_inputs()
    }

    /// Output pids, in creation order.
    pub fn outputs(&self) -> Vec<Pid> {
        self.node.outputs()
    }

    /// Output by index.
    pub fn output(&self, index: usize) -> Option<Pid> {
        self.node
            .outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Number of output pids.
    pub fn num_outputs(&self) -> usize {
        self.node.num_outputs()
    }

    /// Create an output pid.
    ///
    /// The pid is linked once the current callback returns, so properties
    /// set right after creation are taken into account. Packets sent before
    /// linking completes are held back and delivered afterwards.
    pub fn new_pid(&mut self, name: impl Into<String>) -> Result<Pid> {
        if self.node.is_removed() {
            return Err(Error::InvalidParameter("filter is being removed".into()));
        }
        let config = self.session.config();
        let pid = Pid::new(
            self.node,
            name,
            config.max_buffer_units,
            config.max_buffer_time.as_micros() as u64,
        );
        self.node
            .outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pid.clone());
        pid.connection_started();
        debug!(filter = %self.name(), pid = %pid.name(), "new output pid");
        self.node.post_task(TaskKind::PidInit(pid.clone()));
        Ok(pid)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Ask for the process callback to run again.
    pub fn post_process(&self) {
        self.node.post_process_task();
    }

    /// Queue a closure on this filter. It runs like any other callback of
    /// the filter and is queued again while it returns `true`.
    pub fn post_task<F>(&self, name: impl Into<String>, f: F)
    where
        F: FnMut(&mut FilterContext<'_>) -> bool + Send + 'static,
    {
        self.node.post_task(TaskKind::Custom {
            name: name.into(),
            f: Box::new(f),
        });
    }

    /// Ask for `process` to be called again no sooner than `delay`.
    pub fn ask_rt_reschedule(&self, delay: Duration) {
        let us = (delay.as_micros() as u64).max(1);
        self.node.schedule_next_us.store(us, Ordering::Release);
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Report a fatal status for the session; the first one is kept.
    pub fn set_run_status(&self, error: Error) {
        self.session.set_run_status(error, Some(self.name()));
    }

    /// Report that this filter cannot work; it is removed after the
    /// filter feeding it is notified.
    pub fn setup_failure(&self, error: Error) {
        crate::session::link::setup_failure(self.session, self.node, error);
    }

    /// Remove this filter from the session.
    pub fn remove_self(&self) {
        crate::session::link::post_remove(self.node);
    }

    /// Load a source filter from a description; its pids only connect to
    /// this filter.
    pub fn connect_source(&self, description: &str) -> Result<FilterId> {
        self.session.load_filter_for(description, Some(self.node))
    }

    /// Packet reservoir counters of this filter.
    pub fn pool_stats(&self) -> PoolStats {
        self.node.pool.stats()
    }
}

impl fmt::Debug for FilterContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterContext")
            .field("filter", &self.node.name())
            .field("id", &self.node.id)
            .finish_non_exhaustive()
    }
}
