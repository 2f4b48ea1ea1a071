//! Metrics collection using metrics-rs.

use metrics::{Counter, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether metrics have been described.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Packets sent on output pids.
pub const PACKETS_SENT: &str = "filtergraph_packets_sent_total";
/// Payload bytes sent on output pids.
pub const BYTES_SENT: &str = "filtergraph_bytes_sent_total";
/// Packets dropped by consumers.
pub const PACKETS_DROPPED: &str = "filtergraph_packets_dropped_total";
/// Tasks run by the scheduler.
pub const TASKS_EXECUTED: &str = "filtergraph_tasks_executed_total";
/// Time spent in one task.
pub const TASK_TIME_NS: &str = "filtergraph_task_time_ns";
/// Filters waiting in the global task queue.
pub const QUEUE_DEPTH: &str = "filtergraph_queue_depth";
/// Output pids currently blocked by back-pressure.
pub const BLOCKED_PIDS: &str = "filtergraph_blocked_pids";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times.
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(PACKETS_SENT, Unit::Count, "Packets sent on output pids");
    metrics::describe_counter!(BYTES_SENT, Unit::Bytes, "Payload bytes sent on output pids");
    metrics::describe_counter!(PACKETS_DROPPED, Unit::Count, "Packets dropped by consumers");
    metrics::describe_counter!(TASKS_EXECUTED, Unit::Count, "Tasks run by the scheduler");
    metrics::describe_histogram!(TASK_TIME_NS, Unit::Nanoseconds, "Time spent in a single task");
    metrics::describe_gauge!(QUEUE_DEPTH, Unit::Count, "Filters waiting in the global task queue");
    metrics::describe_gauge!(BLOCKED_PIDS, Unit::Count, "Output pids blocked by back-pressure");
}

/// Record the length of the global task queue.
#[inline]
pub fn record_queue_depth(depth: usize) {
    gauge!(QUEUE_DEPTH).set(depth as f64);
}

/// Per filter task metrics, labelled with the register name.
#[derive(Clone)]
pub struct FilterMetrics {
    filter: String,
    tasks: Counter,
    task_time: Histogram,
}

impl FilterMetrics {
    /// Create the collector of a filter.
    pub fn new(filter: &str) -> Self {
        Self {
            filter: filter.to_string(),
            tasks: counter!(TASKS_EXECUTED, "filter" => filter.to_string()),
            task_time: histogram!(TASK_TIME_NS, "filter" => filter.to_string()),
        }
    }

    /// Record one executed task.
    #[inline]
    pub fn record_task(&self, duration: Duration) {
        self.tasks.increment(1);
        self.task_time.record(duration.as_nanos() as f64);
    }

    /// Filter label.
    pub fn filter(&self) -> &str {
        &self.filter
    }
}

impl std::fmt::Debug for FilterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterMetrics")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
