//! Input side of a pid: one consumer's endpoint.

use super::reassembly::Reassembly;
use super::stats::PidStatistics;
use super::{PacketInstance, Pid, saturating_sub_u32, saturating_sub_u64};
use crate::filter::node::FilterNode;
use crate::filter::{EventTarget, FilterEvent};
use crate::observability::PACKETS_DROPPED;
use crate::packet::Packet;
use crate::props::{PropertyKey, PropertyMap, PropertyValue};
use crate::session::task::TaskKind;
use metrics::counter;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// A consumer's view of a connected pid.
///
/// Packets are read in send order with [`get_packet`](Self::get_packet) and
/// released with [`drop_packet`](Self::drop_packet).
#[derive(Clone)]
pub struct PidInstance {
    pub(crate) shared: Arc<InputShared>,
}

pub(crate) struct InputShared {
    id: u64,
    pid: Pid,
    consumer: Weak<FilterNode>,
    consumer_name: String,
    queue: Mutex<VecDeque<PacketInstance>>,
    reassembly: Mutex<Reassembly>,
    requires_full_block: AtomicBool,
    /// Map the consumer was last configured with.
    props: Mutex<Option<Arc<PropertyMap>>>,
    queued_units: AtomicU32,
    buffered_duration_us: AtomicU64,
    discard: AtomicBool,
    eos: AtomicBool,
    playing: AtomicBool,
    detached: AtomicBool,
    stats: Mutex<InputStats>,
}

#[derive(Default)]
struct InputStats {
    nb_processed: u64,
    nb_bytes: u64,
    nb_saps: u64,
    max_units: u32,
    first: Option<Instant>,
    last: Option<Instant>,
}

impl PidInstance {
    pub(crate) fn new(pid: &Pid, consumer: &Arc<FilterNode>, requires_full_block: bool) -> Self {
        Self {
            shared: Arc::new(InputShared {
                id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
                pid: pid.clone(),
                consumer: Arc::downgrade(consumer),
                consumer_name: consumer.name().to_string(),
                queue: Mutex::new(VecDeque::new()),
                reassembly: Mutex::new(Reassembly::new()),
                requires_full_block: AtomicBool::new(requires_full_block),
                props: Mutex::new(None),
                queued_units: AtomicU32::new(0),
                buffered_duration_us: AtomicU64::new(0),
                discard: AtomicBool::new(false),
                eos: AtomicBool::new(false),
                playing: AtomicBool::new(false),
                detached: AtomicBool::new(false),
                stats: Mutex::new(InputStats::default()),
            }),
        }
    }

    /// Unique id of this edge.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Name of the source pid.
    pub fn name(&self) -> String {
        self.shared.pid.name()
    }

    /// Name of the filter producing this pid.
    pub fn source_name(&self) -> &str {
        self.shared.pid.owner_name()
    }

    /// Name of the consuming filter.
    pub fn consumer_name(&self) -> &str {
        &self.shared.consumer_name
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Property of the configured map; info properties set on the source
    /// pid since take precedence.
    pub fn get_property(&self, key: impl Into<PropertyKey>) -> Option<PropertyValue> {
        let key = key.into();
        self.shared
            .pid
            .info_property(&key)
            .or_else(|| self.props().as_ref()?.get(&key).cloned())
    }

    /// Property of the configured map, by textual name.
    pub fn get_property_str(&self, name: &str) -> Option<PropertyValue> {
        self.get_property(PropertyKey::from_name(name))
    }

    /// Info property of the source pid, falling back to its properties.
    pub fn get_info(&self, key: impl Into<PropertyKey>) -> Option<PropertyValue> {
        self.shared.pid.get_info(key)
    }

    /// The property map this consumer is configured with.
    pub fn properties(&self) -> Option<Arc<PropertyMap>> {
        self.props().clone()
    }

    pub(crate) fn set_configured_props(&self, map: Option<Arc<PropertyMap>>) {
        *self.props() = map;
    }

    /// Map carried by the head packet when it differs from the configured one.
    pub(crate) fn pending_reconfigure(&self) -> Option<Option<Arc<PropertyMap>>> {
        let queue = self.queue();
        let head = queue.iter().find(|i| !i.packet.is_pid_eos())?;
        let head_props = head.packet.pid_properties();
        let configured = self.props();
        let same = match (head_props, configured.as_ref()) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        (!same).then(|| head_props.cloned())
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Head packet of the queue, without removing it.
    ///
    /// End of stream markers are consumed on the way and latch
    /// [`is_eos`](Self::is_eos). Returns `None` while the head packet was
    /// sent with a property map the filter has not been configured with.
    pub fn get_packet(&self) -> Option<Packet> {
        if self.is_detached() {
            return None;
        }
        let mut queue = self.queue();
        self.consume_eos_markers(&mut queue);
        let head = queue.front()?;
        let head_props = head.packet.pid_properties();
        let reconfigure = {
            let configured = self.props();
            match (head_props, configured.as_ref()) {
                (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
                (None, None) => false,
                _ => true,
            }
        };
        if reconfigure {
            drop(queue);
            trace!(pid = %self.name(), filter = %self.shared.consumer_name, "pid properties changed, reconfigure pending");
            if let Some(consumer) = self.consumer() {
                consumer.post_process_task();
            }
            return None;
        }
        self.shared.eos.store(false, Ordering::Release);
        Some(head.packet.clone())
    }

    /// Release the head packet.
    ///
    /// Dropping on an empty queue is a logged no-op.
    pub fn drop_packet(&self) {
        let instance = {
            let mut queue = self.queue();
            let Some(instance) = queue.pop_front() else {
                drop(queue);
                warn!(pid = %self.name(), filter = %self.shared.consumer_name, "drop_packet on an empty queue");
                return;
            };
            self.account_removed(&instance);
            instance
        };

        if instance.packet.is_pid_eos() {
            self.shared.eos.store(true, Ordering::Release);
        } else {
            let mut stats = self.stats();
            let now = Instant::now();
            stats.nb_processed += 1;
            stats.nb_bytes += instance.packet.len() as u64;
            if instance.packet.sap().is_sap() {
                stats.nb_saps += 1;
            }
            stats.first.get_or_insert(now);
            stats.last = Some(now);
        }
        counter!(PACKETS_DROPPED, "filter" => self.consumer_name().to_string()).increment(1);
        if let Some(consumer) = self.consumer() {
            saturating_sub_u32(&consumer.pending_packets, 1);
        }
        drop(instance);
        self.shared.pid.update_flow();
    }

    /// Whether end of stream was reached and no packet is left.
    pub fn is_eos(&self) -> bool {
        let mut queue = self.queue();
        self.consume_eos_markers(&mut queue);
        queue.is_empty() && self.shared.eos.load(Ordering::Acquire)
    }

    /// Whether packets are waiting in the queue.
    pub fn has_pending(&self) -> bool {
        !self.queue().is_empty()
    }

    /// Number of queued packet units.
    pub fn queued(&self) -> u32 {
        self.shared.queued_units.load(Ordering::Acquire)
    }

    /// Require complete blocks: fragments are reassembled before queuing.
    ///
    /// Turning the mode off queues pending fragments as they are.
    pub fn set_framing_mode(&self, requires_full_block: bool) {
        let prev = self.shared.requires_full_block.swap(requires_full_block, Ordering::AcqRel);
        if prev && !requires_full_block {
            let fragments = self.reassembly().take_fragments();
            for fragment in fragments {
                self.enqueue(fragment);
            }
        }
    }

    /// Whether a play event was sent and not stopped since.
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Drop every queued packet and ignore future ones until `false` is set.
    pub fn set_discard(&self, discard: bool) {
        self.shared.discard.store(discard, Ordering::Release);
        if discard {
            self.flush();
        }
    }

    /// Send an upstream event to the producer of this pid.
    ///
    /// Play and stop only travel upstream on the first play and on the last
    /// stop among the pid's consumers. Stop flushes this edge and discards
    /// further packets until the next play.
    pub fn send_event(&self, event: FilterEvent) {
        let pid = &self.shared.pid;
        let forward = match &event {
            FilterEvent::Play { .. } => {
                let others_playing = self.others_playing();
                self.shared.discard.store(false, Ordering::Release);
                self.shared.eos.store(false, Ordering::Release);
                let was_playing = self.shared.playing.swap(true, Ordering::AcqRel);
                !was_playing && !others_playing
            }
            FilterEvent::Stop => {
                let was_playing = self.shared.playing.swap(false, Ordering::AcqRel);
                self.set_discard(true);
                was_playing && !self.others_playing()
            }
            FilterEvent::BufferRequirement {
                max_units,
                max_duration_us,
                pid_only,
            } => {
                pid.set_max_buffer(*max_units, *max_duration_us);
                !pid_only
            }
            _ => true,
        };
        if !forward {
            trace!(pid = %self.name(), event = %event.name(), "upstream event absorbed");
            return;
        }
        if let Some(producer) = pid.owner() {
            producer.post_task(TaskKind::Event {
                event,
                target: EventTarget::Output(pid.clone()),
            });
        }
    }

    /// Consumer side statistics.
    pub fn statistics(&self) -> PidStatistics {
        let (units, duration_us) = self.occupancy();
        let (max_units, max_time) = self.shared.pid.max_buffer();
        let nb_reassembled = self.reassembly().nb_reassembled;
        let stats = self.stats();
        PidStatistics {
            name: self.name(),
            destinations: 1,
            disconnected: self.is_detached(),
            nb_buffer_units: units,
            buffer_time_us: duration_us,
            max_buffer_units: max_units,
            max_buffer_time_us: max_time,
            would_block: self.shared.pid.would_block(),
            nb_packets: stats.nb_processed,
            nb_bytes: stats.nb_bytes,
            nb_saps: stats.nb_saps,
            nb_reassembled,
            active_time: match (stats.first, stats.last) {
                (Some(first), Some(last)) => last.duration_since(first),
                _ => Duration::ZERO,
            },
            eos: self.shared.eos.load(Ordering::Acquire),
            ..Default::default()
        }
    }

    /// Whether both handles refer to the same edge.
    pub fn ptr_eq(&self, other: &PidInstance) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // ========================================================================
    // Delivery, called by the producer
    // ========================================================================

    pub(crate) fn deliver(&self, packet: &Packet, duration_us: u64) {
        if self.shared.discard.load(Ordering::Acquire) || self.is_detached() {
            return;
        }
        if packet.is_pid_eos() {
            self.flush_fragments();
            self.enqueue(PacketInstance::new(packet.clone(), 0, false));
        } else if self.shared.requires_full_block.load(Ordering::Acquire) {
            let ready = self.reassembly().push(packet, duration_us);
            if ready.is_empty() {
                return;
            }
            for instance in ready {
                self.enqueue(instance);
            }
        } else {
            let framing = packet.framing();
            let counted = {
                let mut reassembly = self.reassembly();
                let counted = framing.start || (framing.end && !reassembly.first_block_started);
                if framing.start {
                    reassembly.first_block_started = true;
                }
                counted
            };
            let duration_us = if counted { duration_us } else { 0 };
            self.enqueue(PacketInstance::new(packet.clone(), duration_us, true));
        }
        if let Some(consumer) = self.consumer() {
            consumer.post_process_task();
        }
    }

    fn enqueue(&self, instance: PacketInstance) {
        let units = {
            let mut queue = self.queue();
            self.shared
                .buffered_duration_us
                .fetch_add(instance.duration_us, Ordering::AcqRel);
            if instance.unit {
                self.shared.queued_units.fetch_add(1, Ordering::AcqRel);
            }
            if !instance.packet.is_pid_eos() {
                self.shared.eos.store(false, Ordering::Release);
            }
            queue.push_back(instance);
            self.shared.queued_units.load(Ordering::Acquire)
        };
        let mut stats = self.stats();
        stats.max_units = stats.max_units.max(units);
        drop(stats);
        if let Some(consumer) = self.consumer() {
            consumer.pending_packets.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Remove every queued packet and fragment.
    pub(crate) fn flush(&self) {
        self.flush_fragments();
        let drained: Vec<PacketInstance> = {
            let mut queue = self.queue();
            let drained: Vec<_> = queue.drain(..).collect();
            for instance in &drained {
                self.account_removed(instance);
            }
            drained
        };
        if drained.is_empty() {
            return;
        }
        debug!(pid = %self.name(), filter = %self.shared.consumer_name, count = drained.len(), "flushing queued packets");
        if let Some(consumer) = self.consumer() {
            saturating_sub_u32(&consumer.pending_packets, drained.len() as u32);
        }
        drop(drained);
        self.shared.pid.update_flow();
    }

    fn flush_fragments(&self) {
        let fragments = self.reassembly().take_fragments();
        if !fragments.is_empty() {
            warn!(pid = %self.name(), count = fragments.len(), "discarding incomplete block");
        }
    }

    /// Mark the edge detached and drain it.
    pub(crate) fn detach(&self) {
        self.shared.detached.store(true, Ordering::Release);
        self.flush();
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.shared.detached.load(Ordering::Acquire)
    }

    pub(crate) fn occupancy(&self) -> (u32, u64) {
        (
            self.shared.queued_units.load(Ordering::Acquire),
            self.shared.buffered_duration_us.load(Ordering::Acquire),
        )
    }

    pub(crate) fn output(&self) -> &Pid {
        &self.shared.pid
    }

    pub(crate) fn consumer(&self) -> Option<Arc<FilterNode>> {
        self.shared.consumer.upgrade()
    }

    fn account_removed(&self, instance: &PacketInstance) {
        if instance.unit {
            saturating_sub_u32(&self.shared.queued_units, 1);
        }
        saturating_sub_u64(&self.shared.buffered_duration_us, instance.duration_us);
    }

    fn consume_eos_markers(&self, queue: &mut VecDeque<PacketInstance>) {
        let mut consumed = 0;
        while queue.front().is_some_and(|i| i.packet.is_pid_eos()) {
            if let Some(marker) = queue.pop_front() {
                self.account_removed(&marker);
                consumed += 1;
            }
        }
        if consumed > 0 {
            self.shared.eos.store(true, Ordering::Release);
            trace!(pid = %self.name(), filter = %self.shared.consumer_name, "end of stream reached");
            if let Some(consumer) = self.consumer() {
                saturating_sub_u32(&consumer.pending_packets, consumed);
            }
        }
    }

    fn others_playing(&self) -> bool {
        self.shared
            .pid
            .destinations()
            .iter()
            .any(|d| !d.ptr_eq(self) && d.is_playing())
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<PacketInstance>> {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reassembly(&self) -> MutexGuard<'_, Reassembly> {
        self.shared.reassembly.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn props(&self) -> MutexGuard<'_, Option<Arc<PropertyMap>>> {
        self.shared.props.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, InputStats> {
        self.shared.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PidInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PidInstance")
            .field("id", &self.shared.id)
            .field("pid", &self.name())
            .field("source", &self.source_name())
            .field("consumer", &self.shared.consumer_name)
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}
