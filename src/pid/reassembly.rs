//! Reassembly of block fragments for consumers requiring complete blocks.

use super::PacketInstance;
use crate::error::Result;
use crate::packet::{Framing, Packet, PacketInner, Payload};
use crate::props::PropertyMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Pending fragments of one edge.
pub(crate) struct Reassembly {
    fragments: Vec<PacketInstance>,
    last_block_ended: bool,
    /// Used without full block mode, to count each block's duration once.
    pub(crate) first_block_started: bool,
    pub(crate) nb_reassembled: u64,
}

impl Reassembly {
    pub(crate) fn new() -> Self {
        Self {
            fragments: Vec::new(),
            last_block_ended: true,
            first_block_started: false,
            nb_reassembled: 0,
        }
    }

    /// Feed one packet; returns the instances ready to be queued.
    pub(crate) fn push(&mut self, packet: &Packet, duration_us: u64) -> Vec<PacketInstance> {
        let framing = packet.framing();
        let mut ready = Vec::new();

        if framing.start && !self.last_block_ended && !self.fragments.is_empty() {
            warn!(count = self.fragments.len(), "new block started before the previous one ended");
            self.flush_into(&mut ready);
        }

        if framing.is_full() {
            ready.push(PacketInstance::new(packet.clone(), duration_us, true));
            self.last_block_ended = true;
            return ready;
        }

        let fragment = if packet.producer_owns_memory() {
            match copy_owned(&[packet], framing) {
                Ok(copy) => copy,
                Err(e) => {
                    error!(error = %e, "failed to copy fragment");
                    return ready;
                }
            }
        } else {
            packet.clone()
        };
        self.fragments.push(PacketInstance::new(fragment, duration_us, true));

        if framing.end {
            self.flush_into(&mut ready);
            self.last_block_ended = true;
        } else {
            self.last_block_ended = false;
        }
        ready
    }

    /// Remove pending fragments without aggregating them.
    pub(crate) fn take_fragments(&mut self) -> Vec<PacketInstance> {
        self.last_block_ended = true;
        std::mem::take(&mut self.fragments)
    }

    fn flush_into(&mut self, ready: &mut Vec<PacketInstance>) {
        let fragments = std::mem::take(&mut self.fragments);
        let Some(first) = fragments.first() else {
            return;
        };
        let duration_us = first.duration_us;
        let packets: Vec<&Packet> = fragments.iter().map(|f| &f.packet).collect();
        match copy_owned(&packets, Framing::FULL) {
            Ok(block) => {
                self.nb_reassembled += fragments.len() as u64;
                ready.push(PacketInstance::new(block, duration_us, true));
            }
            Err(e) => error!(error = %e, count = fragments.len(), "failed to reassemble block"),
        }
    }
}

/// Copy `parts` into one packet owning its buffer, drawn from the
/// producer's pool.
///
/// Timing comes from the first part, properties of every part are merged,
/// and the byte offset is kept when the parts are contiguous.
fn copy_owned(parts: &[&Packet], framing: Framing) -> Result<Packet> {
    let first = parts[0];
    let last = parts[parts.len() - 1];
    let pool = Arc::clone(first.pool());

    let total = parts.iter().map(|p| p.len()).sum();
    let mut buf = pool.acquire(total)?;
    let mut offset = 0;
    for part in parts {
        buf[offset..offset + part.len()].copy_from_slice(part.data());
        offset += part.len();
    }

    let mut inner = PacketInner::new(&pool, first.inner().pid_id, Payload::Owned(buf));
    inner.info = *first.info();
    inner.info.framing = framing;
    inner.info.eos = last.is_eos();
    inner.info.byte_offset = contiguous_offset(parts);

    let mut props: Option<PropertyMap> = None;
    for part in parts {
        if let Some(src) = part.properties() {
            props.get_or_insert_with(PropertyMap::new).merge(src);
        }
    }
    inner.props = props;
    inner.pid_props = last.pid_properties().cloned();
    inner.pid_props_changed = parts.iter().any(|p| p.pid_props_changed());
    inner.pid_info_changed = parts.iter().any(|p| p.pid_info_changed());
    Ok(Packet::from_inner(inner))
}

fn contiguous_offset(parts: &[&Packet]) -> Option<u64> {
    let start = parts[0].byte_offset()?;
    let mut next = start;
    for part in parts {
        if part.byte_offset()? != next {
            return None;
        }
        next += part.len() as u64;
    }
    Some(start)
}
