//! Events travelling along pids.

use crate::pid::{Pid, PidInstance};
use std::fmt;

/// An event sent between filters.
///
/// Events sent with [`PidInstance::send_event`] travel upstream toward the
/// producers; events sent with [`Pid::send_event`] travel downstream. A
/// filter receiving an event that it does not cancel in
/// [`Filter::process_event`](super::Filter::process_event) forwards it in
/// the same direction.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterEvent {
    /// Start or restart playback.
    Play {
        /// Start position in seconds.
        start: f64,
        /// Playback speed (1.0 is normal).
        speed: f64,
    },
    /// Stop playback; consumers stop receiving packets.
    Stop,
    /// Pause playback.
    Pause,
    /// Resume after a pause.
    Resume,
    /// Seek the source to a byte position.
    SourceSeek {
        /// Byte position.
        position: u64,
    },
    /// Ask for larger or smaller buffering on a pid.
    BufferRequirement {
        /// Queued units threshold (0 = unlimited).
        max_units: u32,
        /// Buffered duration threshold in microseconds (0 = unlimited).
        max_duration_us: u64,
        /// Apply to the pid only, do not forward upstream.
        pid_only: bool,
    },
    /// Info properties changed.
    InfoUpdate,
    /// Application specific event.
    Custom(String),
}

impl FilterEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            FilterEvent::Play { .. } => "play",
            FilterEvent::Stop => "stop",
            FilterEvent::Pause => "pause",
            FilterEvent::Resume => "resume",
            FilterEvent::SourceSeek { .. } => "source_seek",
            FilterEvent::BufferRequirement { .. } => "buffer_req",
            FilterEvent::InfoUpdate => "info_update",
            FilterEvent::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for FilterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterEvent::Play { start, speed } => write!(f, "play from {start}s at {speed}x"),
            FilterEvent::SourceSeek { position } => write!(f, "source seek to {position}"),
            FilterEvent::BufferRequirement {
                max_units,
                max_duration_us,
                ..
            } => write!(f, "buffer requirement {max_units} units / {max_duration_us}us"),
            FilterEvent::Custom(name) => write!(f, "custom event '{name}'"),
            other => f.write_str(other.name()),
        }
    }
}

/// Where an event reached the filter handling it.
#[derive(Debug, Clone)]
pub enum EventTarget {
    /// On one of the filter's inputs, travelling downstream.
    Input(PidInstance),
    /// On one of the filter's outputs, travelling upstream.
    Output(Pid),
    /// Sent to the filter itself by the session; forwarded upstream.
    Filter,
}

impl EventTarget {
    /// Whether the event travels toward the producers.
    pub fn is_upstream(&self) -> bool {
        !matches!(self, EventTarget::Input(_))
    }
}
