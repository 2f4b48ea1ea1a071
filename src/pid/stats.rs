//! Pid statistics.

use std::time::Duration;

/// Snapshot of a pid's flow counters.
///
/// Returned by [`Pid::statistics`](super::Pid::statistics) for the
/// producer side and [`PidInstance::statistics`](super::PidInstance::statistics)
/// for one consumer edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PidStatistics {
    /// Pid name.
    pub name: String,
    /// Connected destinations (producer side) or 1 (consumer side).
    pub destinations: usize,
    /// The edge has been detached.
    pub disconnected: bool,
    /// Queued packet units (max over destinations on the producer side).
    pub nb_buffer_units: u32,
    /// Queued duration in microseconds.
    pub buffer_time_us: u64,
    /// Unit threshold for back-pressure (0 = unlimited).
    pub max_buffer_units: u32,
    /// Duration threshold for back-pressure in microseconds (0 = unlimited).
    pub max_buffer_time_us: u64,
    /// Whether the producer is currently blocked.
    pub would_block: bool,
    /// Times the pid switched to blocked.
    pub nb_blocked: u64,
    /// Packets sent (producer) or processed (consumer).
    pub nb_packets: u64,
    /// Payload bytes sent or processed.
    pub nb_bytes: u64,
    /// Random access points sent or processed.
    pub nb_saps: u64,
    /// Smallest packet duration observed, in pid timescale.
    pub min_pck_duration: u32,
    /// Fragments aggregated by reassembly (consumer side).
    pub nb_reassembled: u64,
    /// Time between the first and the last processed packet (consumer side).
    pub active_time: Duration,
    /// End of stream was signaled.
    pub eos: bool,
}
