//! The mutable, not yet sent form of a packet.

use super::{Framing, PacketInfo, PacketInner, Payload, SapType};
use crate::error::Result;
use crate::packet::Packet;
use crate::pid::Pid;
use crate::props::{PropertyKey, PropertyMap, PropertyValue};
use std::fmt;

/// A packet being built by its producer.
///
/// Obtained from [`Pid::new_alloc`], [`Pid::new_shared`] or
/// [`Pid::new_ref`]. Dropping a builder without sending it discards the
/// packet and gives its buffer back to the pool.
///
/// ```rust,ignore
/// let mut pck = pid.new_alloc(188)?;
/// pck.data_mut().unwrap().copy_from_slice(&ts_packet);
/// pck.set_dts(dts).set_cts(dts).set_sap(SapType::Sap1);
/// pck.send()?;
/// ```
pub struct PacketBuilder {
    pub(crate) pid: Pid,
    pub(crate) inner: PacketInner,
}

impl PacketBuilder {
    pub(crate) fn new(pid: Pid, inner: PacketInner) -> Self {
        Self { pid, inner }
    }

    /// Pid this packet will be sent on.
    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        self.inner.data()
    }

    /// Writable payload, only for packets owning their buffer.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.inner.payload {
            Payload::Owned(buf) => Some(buf.as_mut_slice()),
            _ => None,
        }
    }

    /// Allocated capacity of an owned buffer (may exceed the requested size).
    pub fn capacity(&self) -> usize {
        match &self.inner.payload {
            Payload::Owned(buf) => buf.capacity(),
            _ => self.data().len(),
        }
    }

    /// Shrink the payload. Owned buffers keep their capacity.
    pub fn truncate(&mut self, len: usize) -> &mut Self {
        match &mut self.inner.payload {
            Payload::Owned(buf) => buf.truncate(len),
            Payload::Shared { data, .. } => data.truncate(len),
            Payload::Ref { range, .. } => range.end = range.end.min(range.start + len),
            Payload::Empty => {}
        }
        self
    }

    /// Timing and flags.
    pub fn info(&self) -> &PacketInfo {
        &self.inner.info
    }

    /// Replace all timing and flags at once.
    pub fn set_info(&mut self, info: PacketInfo) -> &mut Self {
        self.inner.info = info;
        self
    }

    /// Set the decode timestamp.
    pub fn set_dts(&mut self, dts: u64) -> &mut Self {
        self.inner.info.dts = Some(dts);
        self
    }

    /// Set the composition timestamp.
    pub fn set_cts(&mut self, cts: u64) -> &mut Self {
        self.inner.info.cts = Some(cts);
        self
    }

    /// Set the duration in pid timescale.
    pub fn set_duration(&mut self, duration: u32) -> &mut Self {
        self.inner.info.duration = duration;
        self
    }

    /// Set the access point type.
    pub fn set_sap(&mut self, sap: SapType) -> &mut Self {
        self.inner.info.sap = sap;
        self
    }

    /// Set block framing markers.
    pub fn set_framing(&mut self, start: bool, end: bool) -> &mut Self {
        self.inner.info.framing = Framing { start, end };
        self
    }

    /// Flag the packet as the last one of the stream.
    pub fn set_eos(&mut self, eos: bool) -> &mut Self {
        self.inner.info.eos = eos;
        self
    }

    /// Flag the payload as corrupted.
    pub fn set_corrupted(&mut self, corrupted: bool) -> &mut Self {
        self.inner.info.corrupted = corrupted;
        self
    }

    /// Set the interlacing mode.
    pub fn set_interlaced(&mut self, mode: u8) -> &mut Self {
        self.inner.info.interlaced = mode;
        self
    }

    /// Set the seek flag.
    pub fn set_seek(&mut self, seek: bool) -> &mut Self {
        self.inner.info.seek = seek;
        self
    }

    /// Signal a timestamp discontinuity.
    pub fn set_clock_discontinuity(&mut self) -> &mut Self {
        self.inner.info.clock_discontinuity = true;
        self
    }

    /// Set the byte offset in the source.
    pub fn set_byte_offset(&mut self, offset: u64) -> &mut Self {
        self.inner.info.byte_offset = Some(offset);
        self
    }

    /// Set the carousel version.
    pub fn set_carousel_version(&mut self, version: u8) -> &mut Self {
        self.inner.info.carousel_version = version;
        self
    }

    /// Set a packet-level property.
    pub fn set_property(&mut self, key: impl Into<PropertyKey>, value: impl Into<PropertyValue>) -> &mut Self {
        self.inner.props.get_or_insert_with(PropertyMap::new).set(key, value);
        self
    }

    /// Get a packet-level property.
    pub fn property(&self, key: impl Into<PropertyKey>) -> Option<&PropertyValue> {
        self.inner.props.as_ref()?.get(&key.into())
    }

    /// Copy timing, flags and packet properties of another packet.
    ///
    /// Properties are merged by reference; ones already set are kept.
    pub fn copy_properties(&mut self, from: &Packet) -> &mut Self {
        self.inner.info = *from.info();
        if let Some(src) = from.properties() {
            self.inner.props.get_or_insert_with(PropertyMap::new).merge(src);
        }
        self
    }

    /// Send the packet on its pid.
    pub fn send(self) -> Result<()> {
        let pid = self.pid.clone();
        pid.send(self)
    }

    /// Drop the packet without sending it.
    pub fn discard(self) {}

    pub(crate) fn into_parts(self) -> (Pid, PacketInner) {
        (self.pid, self.inner)
    }
}

impl fmt::Debug for PacketBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuilder")
            .field("len", &self.data().len())
            .field("info", &self.inner.info)
            .finish_non_exhaustive()
    }
}
