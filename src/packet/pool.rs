//! Per-filter packet reservoirs.
//!
//! Every filter owns one [`PacketPool`]. Packets created on the filter's
//! output pids draw from it, and whichever thread releases the last
//! reference gives the memory back to it, never to the consumer's pool.
//!
//! # Reservoirs
//!
//! | Reservoir | Holds | Reuse policy |
//! |-----------|-------|--------------|
//! | `alloc` | owned payload buffers | closest fit (smallest capacity >= request) |
//! | `shared` | shells of packets wrapping external memory | counted, destructor run on release |
//! | `instance` | per-destination packet instances | counted |
//!
//! Owned buffers are kept for reuse instead of being freed, up to
//! `max_reservoir` buffers.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of buffers kept in the alloc reservoir.
pub const DEFAULT_MAX_RESERVOIR: usize = 32;

/// Statistics about pool usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently waiting in the alloc reservoir.
    pub reservoir_len: usize,
    /// Owned buffers freshly allocated.
    pub fresh_allocs: u64,
    /// Owned buffers served from the reservoir.
    pub reused_allocs: u64,
    /// Owned buffers given back to the reservoir.
    pub returned_buffers: u64,
    /// Shared packets created.
    pub shared_created: u64,
    /// Reference packets created.
    pub refs_created: u64,
    /// Packets currently alive (built or sent, not yet destroyed).
    pub live_packets: usize,
    /// Packet instances currently queued or in reassembly.
    pub live_instances: usize,
    /// Packet instances created since the pool started.
    pub instances_created: u64,
}

#[derive(Default)]
struct PoolCounters {
    fresh_allocs: AtomicU64,
    reused_allocs: AtomicU64,
    returned_buffers: AtomicU64,
    shared_created: AtomicU64,
    refs_created: AtomicU64,
    live_packets: AtomicUsize,
    live_instances: AtomicUsize,
    instances_created: AtomicU64,
}

/// Reservoirs of one filter.
pub struct PacketPool {
    owner: String,
    alloc: Mutex<Vec<Vec<u8>>>,
    max_reservoir: usize,
    counters: PoolCounters,
}

impl PacketPool {
    /// Create a pool for the named filter.
    pub fn new(owner: impl Into<String>, max_reservoir: usize) -> Self {
        Self {
            owner: owner.into(),
            alloc: Mutex::new(Vec::new()),
            max_reservoir,
            counters: PoolCounters::default(),
        }
    }

    /// Name of the owning filter.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Get a buffer of exactly `size` bytes of length, reusing the reservoir
    /// buffer with the smallest capacity able to hold it.
    pub fn acquire(&self, size: usize) -> Result<Vec<u8>> {
        let reused = {
            let mut reservoir = self.reservoir();
            let best = reservoir
                .iter()
                .enumerate()
                .filter(|(_, b)| b.capacity() >= size)
                .min_by_key(|(_, b)| b.capacity())
                .map(|(i, _)| i);
            best.map(|i| reservoir.swap_remove(i))
        };

        let mut buf = match reused {
            Some(buf) => {
                self.counters.reused_allocs.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                let mut buf = Vec::new();
                buf.try_reserve_exact(size).map_err(|_| Error::OutOfMemory)?;
                self.counters.fresh_allocs.fetch_add(1, Ordering::Relaxed);
                buf
            }
        };
        buf.clear();
        buf.resize(size, 0);
        Ok(buf)
    }

    /// Give an owned buffer back for reuse.
    pub fn release(&self, buf: Vec<u8>) {
        if buf.capacity() == 0 {
            return;
        }
        let mut reservoir = self.reservoir();
        if reservoir.len() < self.max_reservoir {
            reservoir.push(buf);
            self.counters.returned_buffers.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of the pool statistics.
    pub fn stats(&self) -> PoolStats {
        let c = &self.counters;
        PoolStats {
            reservoir_len: self.reservoir().len(),
            fresh_allocs: c.fresh_allocs.load(Ordering::Relaxed),
            reused_allocs: c.reused_allocs.load(Ordering::Relaxed),
            returned_buffers: c.returned_buffers.load(Ordering::Relaxed),
            shared_created: c.shared_created.load(Ordering::Relaxed),
            refs_created: c.refs_created.load(Ordering::Relaxed),
            live_packets: c.live_packets.load(Ordering::Relaxed),
            live_instances: c.live_instances.load(Ordering::Relaxed),
            instances_created: c.instances_created.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn packet_created(&self) {
        self.counters.live_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn packet_destroyed(&self) {
        self.counters.live_packets.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn shared_created(&self) {
        self.counters.shared_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ref_created(&self) {
        self.counters.refs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn instance_created(&self) {
        self.counters.instances_created.fetch_add(1, Ordering::Relaxed);
        self.counters.live_instances.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn instance_released(&self) {
        self.counters.live_instances.fetch_sub(1, Ordering::Relaxed);
    }

    fn reservoir(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.alloc.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool")
            .field("owner", &self.owner)
            .field("max_reservoir", &self.max_reservoir)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closest_fit() {
        let pool = PacketPool::new("test", 8);
        pool.release(Vec::with_capacity(1000));
        pool.release(Vec::with_capacity(100));
        pool.release(Vec::with_capacity(300));

        let buf = pool.acquire(150).unwrap();
        assert_eq!(buf.len(), 150);
        assert!(buf.capacity() >= 300 && buf.capacity() < 1000);

        let stats = pool.stats();
        assert_eq!(stats.reused_allocs, 1);
        assert_eq!(stats.reservoir_len, 2);
    }

    #[test]
    fn test_fresh_allocation_when_nothing_fits() {
        let pool = PacketPool::new("test", 8);
        pool.release(Vec::with_capacity(16));
        let buf = pool.acquire(64).unwrap();
        assert_eq!(buf.len(), 64);
        let stats = pool.stats();
        assert_eq!(stats.fresh_allocs, 1);
        assert_eq!(stats.reservoir_len, 1);
    }

    #[test]
    fn test_reservoir_is_bounded() {
        let pool = PacketPool::new("test", 2);
        for _ in 0..5 {
            pool.release(Vec::with_capacity(8));
        }
        assert_eq!(pool.stats().reservoir_len, 2);
        assert_eq!(pool.stats().returned_buffers, 2);
    }

    #[test]
    fn test_reused_buffer_is_zeroed() {
        let pool = PacketPool::new("test", 2);
        let mut buf = pool.acquire(4).unwrap();
        buf.copy_from_slice(&[1, 2, 3, 4]);
        pool.release(buf);
        let buf = pool.acquire(4).unwrap();
        assert_eq!(buf, vec![0; 4]);
    }
}
