//! Observability features: metrics and tracing.
//!
//! - **Metrics**: counters, gauges and histograms via `metrics-rs`
//! - **Tracing**: structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `filtergraph_packets_sent_total` | Counter | `filter` | Packets sent on output pids |
//! | `filtergraph_bytes_sent_total` | Counter | `filter` | Payload bytes sent |
//! | `filtergraph_packets_dropped_total` | Counter | `filter` | Packets dropped by consumers |
//! | `filtergraph_tasks_executed_total` | Counter | `filter` | Tasks run |
//! | `filtergraph_task_time_ns` | Histogram | `filter` | Time per task |
//! | `filtergraph_queue_depth` | Gauge | | Filters waiting for a worker |
//! | `filtergraph_blocked_pids` | Gauge | | Output pids blocked by back-pressure |
//!
//! Nothing is exported unless the application installs a recorder.
//!
//! ## Tracing
//!
//! A session emits a span per run, per filter load and, when
//! [`TracingConfig::task_spans`] is set, per task.

mod metrics;
mod tracing_support;

pub use self::metrics::{
    BLOCKED_PIDS, BYTES_SENT, FilterMetrics, PACKETS_DROPPED, PACKETS_SENT, QUEUE_DEPTH, TASK_TIME_NS,
    TASKS_EXECUTED, init_metrics, record_queue_depth,
};
pub use self::tracing_support::{TracingConfig, instrument_session, span_filter, span_session, span_task};
