//! Packet timing and framing information.

/// Stream access point type of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SapType {
    /// Not an access point.
    #[default]
    None,
    /// Closed GOP random access point, first in decode order is first in presentation.
    Sap1,
    /// Closed GOP random access point with leading pictures.
    Sap2,
    /// Open GOP random access point.
    Sap3,
    /// Gradual decoding refresh.
    Sap4,
}

impl SapType {
    /// Whether this packet is a random access point.
    pub fn is_sap(&self) -> bool {
        !matches!(self, SapType::None)
    }
}

/// Block framing markers.
///
/// A packet with both `start` and `end` is a complete unit. Fragments of a
/// larger unit carry `start` on the first piece and `end` on the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// First fragment of a block.
    pub start: bool,
    /// Last fragment of a block.
    pub end: bool,
}

impl Framing {
    /// Complete block.
    pub const FULL: Framing = Framing { start: true, end: true };
    /// First fragment.
    pub const START: Framing = Framing { start: true, end: false };
    /// Middle fragment.
    pub const MIDDLE: Framing = Framing { start: false, end: false };
    /// Last fragment.
    pub const END: Framing = Framing { start: false, end: true };

    /// Whether the packet carries a complete block.
    pub fn is_full(&self) -> bool {
        self.start && self.end
    }
}

impl Default for Framing {
    fn default() -> Self {
        Framing::FULL
    }
}

/// Timing and flags of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketInfo {
    /// Decode timestamp in pid timescale.
    pub dts: Option<u64>,
    /// Composition timestamp in pid timescale.
    pub cts: Option<u64>,
    /// Duration in pid timescale (0 when unknown).
    pub duration: u32,
    /// Access point type.
    pub sap: SapType,
    /// Block framing.
    pub framing: Framing,
    /// Last packet of the stream.
    pub eos: bool,
    /// Data is known to be corrupted.
    pub corrupted: bool,
    /// Interlacing mode (0 progressive, 1 top field first, 2 bottom field first).
    pub interlaced: u8,
    /// Packet is only needed to decode a seek target and must not be presented.
    pub seek: bool,
    /// Timestamps restart: duration is not derived from the previous packet.
    pub clock_discontinuity: bool,
    /// Byte offset of the payload in the source.
    pub byte_offset: Option<u64>,
    /// Carousel version of the data.
    pub carousel_version: u8,
}
