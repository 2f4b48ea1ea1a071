//! Session configuration.

use crate::observability::TracingConfig;
use crate::packet::pool::DEFAULT_MAX_RESERVOIR;
use std::time::Duration;

/// Configuration of a [`Session`](super::Session).
///
/// ```rust,ignore
/// let config = SessionConfig::new()
///     .with_threads(3)
///     .with_max_buffer_units(16)
///     .with_max_chain_length(4);
/// let session = Session::new(config);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Worker threads besides the thread calling `run`.
    pub threads: usize,
    /// With `false`, everything runs cooperatively on the calling thread.
    pub use_locks: bool,
    /// Default queued units threshold of new pids (0 = unlimited).
    pub max_buffer_units: u32,
    /// Default buffered duration threshold of new pids (zero = unlimited).
    pub max_buffer_time: Duration,
    /// Longest chain of filters the resolver may insert.
    pub max_chain_length: usize,
    /// Buffers kept per filter packet reservoir.
    pub max_reservoir: usize,
    /// Span creation.
    pub tracing: TracingConfig,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
    /// Longest a worker waits for a task before checking for completion.
    pub max_sleep: Duration,
}

impl SessionConfig {
    /// Defaults: no extra thread, 8 units / 1s pid buffering, chains of up
    /// to 6 filters.
    pub fn new() -> Self {
        Self {
            threads: 0,
            use_locks: true,
            max_buffer_units: 8,
            max_buffer_time: Duration::from_secs(1),
            max_chain_length: 6,
            max_reservoir: DEFAULT_MAX_RESERVOIR,
            tracing: TracingConfig::default(),
            event_capacity: 256,
            max_sleep: Duration::from_millis(10),
        }
    }

    /// Set the number of extra worker threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Run cooperatively on the caller only when `false`.
    pub fn with_use_locks(mut self, use_locks: bool) -> Self {
        self.use_locks = use_locks;
        self
    }

    /// Set the default queued units threshold.
    pub fn with_max_buffer_units(mut self, units: u32) -> Self {
        self.max_buffer_units = units;
        self
    }

    /// Set the default buffered duration threshold.
    pub fn with_max_buffer_time(mut self, time: Duration) -> Self {
        self.max_buffer_time = time;
        self
    }

    /// Set the longest resolved chain.
    pub fn with_max_chain_length(mut self, length: usize) -> Self {
        self.max_chain_length = length;
        self
    }

    /// Set the packet reservoir size of each filter.
    pub fn with_max_reservoir(mut self, buffers: usize) -> Self {
        self.max_reservoir = buffers;
        self
    }

    /// Set the span configuration.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the longest idle wait of a worker.
    pub fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    /// Threads executing tasks, the caller included.
    pub(crate) fn worker_count(&self) -> usize {
        if self.use_locks { self.threads + 1 } else { 1 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_buffer_units, 8);
        assert_eq!(config.max_buffer_time, Duration::from_secs(1));
        assert_eq!(config.worker_count(), 1);
    }

    #[test]
    fn test_no_locks_runs_on_caller() {
        let config = SessionConfig::new().with_threads(4);
        assert_eq!(config.worker_count(), 5);
        assert_eq!(config.with_use_locks(false).worker_count(), 1);
    }
}
