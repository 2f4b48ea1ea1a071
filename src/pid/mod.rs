//! Pids: output ports and their per-consumer input endpoints.
//!
//! A [`Pid`] is created by a filter on its output side. Once the session has
//! connected it, every packet sent on it is fanned out to one
//! [`PidInstance`] per consuming filter. Each instance owns its own FIFO of
//! packet instances, so consumers read the same shared payload at their own
//! pace.
//!
//! ```text
//!                       ┌──► PidInstance (decoder)  queue: [p3 p2 p1]
//!  Pid (demuxer.video) ─┤
//!                       └──► PidInstance (inspect)  queue: [p3]
//!
//!  would_block = max over instances of (units >= max_units || time >= max_time)
//! ```
//!
//! # Flow control
//!
//! Queued unit count and buffered duration are tracked per instance.
//! The pid blocks as soon as one destination reaches a threshold and
//! unblocks when every destination is back below both. The transitions
//! adjust the owning filter's block counter and re-post its process task.

mod input;
mod output;
mod reassembly;
mod stats;

pub use input::PidInstance;
pub use output::Pid;
pub use stats::PidStatistics;

use crate::packet::Packet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// One queued reference to a packet, owned by a single destination.
pub(crate) struct PacketInstance {
    pub(crate) packet: Packet,
    pub(crate) duration_us: u64,
    /// Counts toward the destination's queued units.
    pub(crate) unit: bool,
}

impl PacketInstance {
    pub(crate) fn new(packet: Packet, duration_us: u64, unit: bool) -> Self {
        packet.pool().instance_created();
        Self {
            packet,
            duration_us,
            unit,
        }
    }
}

impl Drop for PacketInstance {
    fn drop(&mut self) {
        self.packet.pool().instance_released();
    }
}

pub(crate) fn saturating_sub_u32(counter: &AtomicU32, value: u32) -> u32 {
    let prev = counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(value)))
        .unwrap_or_else(|v| v);
    prev.saturating_sub(value)
}

pub(crate) fn saturating_sub_u64(counter: &AtomicU64, value: u64) -> u64 {
    let prev = counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(value)))
        .unwrap_or_else(|v| v);
    prev.saturating_sub(value)
}

/// Duration of a packet in microseconds, from its pid timescale.
pub(crate) fn packet_duration_us(packet: &Packet) -> u64 {
    let timescale = packet
        .pid_properties()
        .map(|p| p.timescale())
        .filter(|t| *t > 0)
        .unwrap_or(1000);
    u64::from(packet.duration()) * 1_000_000 / u64::from(timescale)
}
