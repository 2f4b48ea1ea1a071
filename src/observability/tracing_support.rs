//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

/// Configuration for tracing behavior.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether to create a span around a session run.
    pub session_spans: bool,
    /// Whether to create spans for filter setup.
    pub filter_spans: bool,
    /// Whether to create a span around every task.
    pub task_spans: bool,
    /// Default span level.
    pub level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            session_spans: true,
            filter_spans: true,
            // one span per task is expensive
            task_spans: false,
            level: Level::INFO,
        }
    }
}

impl TracingConfig {
    /// All spans enabled.
    pub fn all() -> Self {
        Self {
            session_spans: true,
            filter_spans: true,
            task_spans: true,
            level: Level::DEBUG,
        }
    }

    /// Session spans only.
    pub fn minimal() -> Self {
        Self {
            session_spans: true,
            filter_spans: false,
            task_spans: false,
            level: Level::INFO,
        }
    }

    /// No spans.
    pub fn none() -> Self {
        Self {
            session_spans: false,
            filter_spans: false,
            task_spans: false,
            level: Level::INFO,
        }
    }
}

/// Create a span for a session run.
///
/// ```rust,ignore
/// let _guard = span_session(4).entered();
/// ```
#[inline]
pub fn span_session(workers: usize) -> Span {
    span!(Level::INFO, "session", workers = workers)
}

/// Create a span for loading a filter.
#[inline]
pub fn span_filter(filter: &str, dynamic: bool) -> Span {
    span!(Level::DEBUG, "filter", filter = %filter, dynamic = dynamic)
}

/// Create a span for one task.
#[inline]
pub fn span_task(filter: &str, task: &str) -> Span {
    span!(Level::TRACE, "task", filter = %filter, task = %task)
}

/// Enter a session span.
pub fn instrument_session(workers: usize) -> tracing::span::EnteredSpan {
    span_session(workers).entered()
}
