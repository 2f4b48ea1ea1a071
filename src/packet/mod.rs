//! Packets: reference-counted payload, timing and property snapshots.
//!
//! A packet is created on an output pid ([`Pid::new_alloc`],
//! [`Pid::new_shared`], [`Pid::new_ref`]) as a [`PacketBuilder`], filled,
//! then sent. Sending freezes it into a [`Packet`], a cheap handle over an
//! `Arc`: cloning is a reference, dropping is an unreference, and the last
//! reference hands the payload back to the producer's [`PacketPool`].
//!
//! ```text
//!  PacketBuilder ──send──► Packet (Arc) ──┬──► PacketInstance (dest A queue)
//!                                         └──► PacketInstance (dest B queue)
//!                                                   │ drop_packet
//!                                  last ref ──► PacketPool::release (producer)
//! ```
//!
//! [`Pid::new_alloc`]: crate::pid::Pid::new_alloc
//! [`Pid::new_shared`]: crate::pid::Pid::new_shared
//! [`Pid::new_ref`]: crate::pid::Pid::new_ref

mod builder;
mod info;
pub mod pool;

pub use builder::PacketBuilder;
pub use info::{Framing, PacketInfo, SapType};
pub use pool::{PacketPool, PoolStats};

use crate::props::{PropertyKey, PropertyMap, PropertyValue};
use bytes::Bytes;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

/// Callback run when a shared packet is destroyed; receives the wrapped memory.
pub type PacketDestructor = Box<dyn FnOnce(Bytes) + Send>;

pub(crate) enum Payload {
    Empty,
    Owned(Vec<u8>),
    Shared {
        data: Bytes,
        destructor: Mutex<Option<PacketDestructor>>,
    },
    Ref {
        source: Packet,
        range: Range<usize>,
    },
}

pub(crate) struct PacketInner {
    pub(crate) payload: Payload,
    pub(crate) info: PacketInfo,
    pub(crate) props: Option<PropertyMap>,
    pub(crate) pid_props: Option<Arc<PropertyMap>>,
    pub(crate) pid_props_changed: bool,
    pub(crate) pid_info_changed: bool,
    pub(crate) pid_eos: bool,
    pub(crate) pid_id: u64,
    pub(crate) pool: Arc<PacketPool>,
}

impl PacketInner {
    pub(crate) fn new(pool: &Arc<PacketPool>, pid_id: u64, payload: Payload) -> Self {
        pool.packet_created();
        Self {
            payload,
            info: PacketInfo::default(),
            props: None,
            pid_props: None,
            pid_props_changed: false,
            pid_info_changed: false,
            pid_eos: false,
            pid_id,
            pool: Arc::clone(pool),
        }
    }

    pub(crate) fn data(&self) -> &[u8] {
        match &self.payload {
            Payload::Empty => &[],
            Payload::Owned(buf) => buf,
            Payload::Shared { data, .. } => data,
            Payload::Ref { source, range } => &source.data()[range.clone()],
        }
    }
}

impl Drop for PacketInner {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.payload, Payload::Empty) {
            Payload::Owned(buf) => self.pool.release(buf),
            Payload::Shared { data, destructor } => {
                let destructor = destructor.into_inner().unwrap_or_else(PoisonError::into_inner);
                if let Some(destructor) = destructor {
                    destructor(data);
                }
            }
            Payload::Ref { .. } | Payload::Empty => {}
        }
        self.pool.packet_destroyed();
    }
}

/// A sent, immutable packet.
///
/// `Clone` adds a reference; dropping releases it.
#[derive(Clone)]
pub struct Packet {
    inner: Arc<PacketInner>,
}

impl Packet {
    pub(crate) fn from_inner(inner: PacketInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn inner(&self) -> &PacketInner {
        &self.inner
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        self.inner.data()
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timing and flags.
    pub fn info(&self) -> &PacketInfo {
        &self.inner.info
    }

    /// Decode timestamp.
    pub fn dts(&self) -> Option<u64> {
        self.inner.info.dts
    }

    /// Composition timestamp.
    pub fn cts(&self) -> Option<u64> {
        self.inner.info.cts
    }

    /// Duration in pid timescale.
    pub fn duration(&self) -> u32 {
        self.inner.info.duration
    }

    /// Access point type.
    pub fn sap(&self) -> SapType {
        self.inner.info.sap
    }

    /// Block framing.
    pub fn framing(&self) -> Framing {
        self.inner.info.framing
    }

    /// End of stream flag carried by the packet.
    pub fn is_eos(&self) -> bool {
        self.inner.info.eos
    }

    /// Corrupted flag.
    pub fn is_corrupted(&self) -> bool {
        self.inner.info.corrupted
    }

    /// Interlacing mode.
    pub fn interlaced(&self) -> u8 {
        self.inner.info.interlaced
    }

    /// Seek flag.
    pub fn is_seek(&self) -> bool {
        self.inner.info.seek
    }

    /// Byte offset in the source.
    pub fn byte_offset(&self) -> Option<u64> {
        self.inner.info.byte_offset
    }

    /// Carousel version.
    pub fn carousel_version(&self) -> u8 {
        self.inner.info.carousel_version
    }

    /// Packet-level property.
    pub fn property(&self, key: impl Into<PropertyKey>) -> Option<&PropertyValue> {
        self.inner.props.as_ref()?.get(&key.into())
    }

    /// Packet-level property by textual name.
    pub fn property_str(&self, name: &str) -> Option<&PropertyValue> {
        self.inner.props.as_ref()?.get_str(name)
    }

    /// All packet-level properties.
    pub fn properties(&self) -> Option<&PropertyMap> {
        self.inner.props.as_ref()
    }

    /// Property of the pid, as published when this packet was sent.
    pub fn pid_property(&self, key: impl Into<PropertyKey>) -> Option<&PropertyValue> {
        self.inner.pid_props.as_ref()?.get(&key.into())
    }

    /// Pid property map this packet was sent with.
    pub fn pid_properties(&self) -> Option<&Arc<PropertyMap>> {
        self.inner.pid_props.as_ref()
    }

    /// Whether the pid published a new property map with this packet.
    pub fn pid_props_changed(&self) -> bool {
        self.inner.pid_props_changed
    }

    /// Whether pid info properties changed since the previous packet.
    pub fn pid_info_changed(&self) -> bool {
        self.inner.pid_info_changed
    }

    /// Number of live references to this packet.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether this packet defers its payload to another packet.
    pub fn is_reference(&self) -> bool {
        matches!(self.inner.payload, Payload::Ref { .. })
    }

    /// The packet holding the memory this one points into, if any.
    pub fn referenced(&self) -> Option<&Packet> {
        match &self.inner.payload {
            Payload::Ref { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether the producer manages this packet's memory (shared or referenced).
    pub fn producer_owns_memory(&self) -> bool {
        matches!(self.inner.payload, Payload::Shared { .. } | Payload::Ref { .. })
    }

    /// Whether both handles point to the same packet.
    pub fn ptr_eq(&self, other: &Packet) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn is_pid_eos(&self) -> bool {
        self.inner.pid_eos
    }

    pub(crate) fn pool(&self) -> &Arc<PacketPool> {
        &self.inner.pool
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("dts", &self.dts())
            .field("cts", &self.cts())
            .field("duration", &self.duration())
            .field("framing", &self.framing())
            .field("refs", &self.ref_count())
            .finish_non_exhaustive()
    }
}
