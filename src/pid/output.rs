//! Output side of a pid.

use super::input::PidInstance;
use super::stats::PidStatistics;
use super::packet_duration_us;
use crate::error::{Error, Result};
use crate::filter::node::FilterNode;
use crate::filter::{EventTarget, FilterEvent, FilterId};
use crate::observability::{BLOCKED_PIDS, BYTES_SENT, PACKETS_SENT};
use crate::packet::{Packet, PacketBuilder, PacketDestructor, PacketInfo, PacketInner, PacketPool, Payload};
use crate::props::{PropertyKey, PropertyMap, PropertyValue};
use crate::session::task::TaskKind;
use bytes::Bytes;
use metrics::{counter, gauge};
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, Weak};
use tracing::{debug, trace, warn};

static NEXT_PID_ID: AtomicU64 = AtomicU64::new(1);

/// An output port of a filter.
///
/// `Pid` is a cheap handle; clones refer to the same port.
#[derive(Clone)]
pub struct Pid {
    pub(crate) shared: Arc<PidShared>,
}

pub(crate) struct PidShared {
    pub(crate) id: u64,
    pub(crate) owner: Weak<FilterNode>,
    pub(crate) owner_name: String,
    pub(crate) pool: Arc<PacketPool>,
    state: Mutex<PidState>,
    destinations: RwLock<Vec<PidInstance>>,
    flow: Mutex<FlowState>,
    discard: AtomicBool,
    removed: AtomicBool,
    /// Init and connect tasks still in flight for this pid.
    pending_connections: AtomicU32,
    /// Packets sent before the pid was connected; the lock also serializes dispatch.
    postponed: Mutex<Vec<Packet>>,
    blacklist: Mutex<Vec<String>>,
    /// Filters connected or being connected to this pid.
    assigned: Mutex<Vec<FilterId>>,
}

struct PidState {
    name: String,
    props: Option<Arc<PropertyMap>>,
    infos: PropertyMap,
    request_property_map: bool,
    props_changed: bool,
    info_changed: bool,
    duration_init: bool,
    last_dts: Option<u64>,
    last_cts: Option<u64>,
    min_pck_duration: u32,
    nb_packets: u64,
    nb_bytes: u64,
    nb_saps: u64,
    eos: bool,
}

struct FlowState {
    would_block: bool,
    max_units: u32,
    max_duration_us: u64,
    units: u32,
    duration_us: u64,
    nb_blocked: u64,
}

impl Pid {
    pub(crate) fn new(owner: &Arc<FilterNode>, name: impl Into<String>, max_units: u32, max_duration_us: u64) -> Self {
        let name = name.into();
        Self {
            shared: Arc::new(PidShared {
                id: NEXT_PID_ID.fetch_add(1, Ordering::Relaxed),
                owner: Arc::downgrade(owner),
                owner_name: owner.name().to_string(),
                pool: Arc::clone(&owner.pool),
                state: Mutex::new(PidState {
                    name,
                    props: None,
                    infos: PropertyMap::new(),
                    request_property_map: false,
                    props_changed: false,
                    info_changed: false,
                    duration_init: false,
                    last_dts: None,
                    last_cts: None,
                    min_pck_duration: 0,
                    nb_packets: 0,
                    nb_bytes: 0,
                    nb_saps: 0,
                    eos: false,
                }),
                destinations: RwLock::new(Vec::new()),
                flow: Mutex::new(FlowState {
                    would_block: false,
                    max_units,
                    max_duration_us,
                    units: 0,
                    duration_us: 0,
                    nb_blocked: 0,
                }),
                discard: AtomicBool::new(false),
                removed: AtomicBool::new(false),
                pending_connections: AtomicU32::new(0),
                postponed: Mutex::new(Vec::new()),
                blacklist: Mutex::new(Vec::new()),
                assigned: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Unique id of this pid within the process.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Pid name.
    pub fn name(&self) -> String {
        self.state().name.clone()
    }

    /// Rename the pid.
    pub fn set_name(&self, name: impl Into<String>) {
        self.state().name = name.into();
    }

    /// Name of the filter owning this pid.
    pub fn owner_name(&self) -> &str {
        &self.shared.owner_name
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Set a pid property.
    ///
    /// The first write after a packet was sent publishes a new map; packets
    /// already sent keep the map they were sent with.
    pub fn set_property(&self, key: impl Into<PropertyKey>, value: impl Into<PropertyValue>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        self.state().infos.remove(&key);
        self.write_props(|map| map.set(key, value))
    }

    /// Set a pid property by textual name.
    pub fn set_property_str(&self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        self.set_property(PropertyKey::from_name(name), value)
    }

    /// Remove a pid property.
    pub fn remove_property(&self, key: impl Into<PropertyKey>) -> Result<()> {
        let key = key.into();
        self.state().infos.remove(&key);
        self.write_props(|map| {
            map.remove(&key);
        })
    }

    /// Remove every pid property.
    pub fn reset_properties(&self) -> Result<()> {
        self.write_props(PropertyMap::clear)
    }

    /// Replace the pid properties with the configured properties of an input.
    pub fn copy_properties(&self, from: &PidInstance) -> Result<()> {
        let src = from.properties();
        self.write_props(|map| {
            map.clear();
            if let Some(src) = &src {
                map.merge(src);
            }
        })
    }

    /// Merge the configured properties of an input, keeping ones already set.
    pub fn merge_properties(&self, from: &PidInstance) -> Result<()> {
        match from.properties() {
            Some(src) => self.write_props(|map| map.merge(&src)),
            None => Ok(()),
        }
    }

    /// Set an info property.
    ///
    /// Info properties update the current properties in place: they never
    /// force a new map nor a reconfiguration, and `get_property` on the pid
    /// and on its consumers returns them at once. Packets keep the map they
    /// were sent with; the next packet carries the info changed flag.
    pub fn set_info(&self, key: impl Into<PropertyKey>, value: impl Into<PropertyValue>) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state();
        state.infos.set(key, value);
        state.info_changed = true;
        Ok(())
    }

    /// Current value of a pid property, info properties included.
    pub fn get_property(&self, key: impl Into<PropertyKey>) -> Option<PropertyValue> {
        self.get_info(key)
    }

    /// Current value of a pid property by textual name.
    pub fn get_property_str(&self, name: &str) -> Option<PropertyValue> {
        self.get_property(PropertyKey::from_name(name))
    }

    /// Info property, falling back to the regular properties.
    pub fn get_info(&self, key: impl Into<PropertyKey>) -> Option<PropertyValue> {
        let key = key.into();
        let state = self.state();
        state
            .infos
            .get(&key)
            .or_else(|| state.props.as_ref().and_then(|p| p.get(&key)))
            .cloned()
    }

    /// Snapshot of the current property map.
    ///
    /// Holding the snapshot forces the next write to copy the map.
    pub fn properties(&self) -> Option<Arc<PropertyMap>> {
        self.state().props.clone()
    }

    pub(crate) fn info_property(&self, key: &PropertyKey) -> Option<PropertyValue> {
        self.state().infos.get(key).cloned()
    }

    fn write_props<R>(&self, f: impl FnOnce(&mut PropertyMap) -> R) -> Result<R> {
        self.check_writable()?;
        let mut state = self.state();
        if state.request_property_map || state.props.is_none() {
            let mut map = PropertyMap::new();
            if let Some(previous) = &state.props {
                map.merge(previous);
            }
            state.props = Some(Arc::new(map));
            state.request_property_map = false;
            state.props_changed = true;
        }
        let props = state.props.get_or_insert_with(|| Arc::new(PropertyMap::new()));
        Ok(f(Arc::make_mut(props)))
    }

    fn check_writable(&self) -> Result<()> {
        if self.shared.removed.load(Ordering::Acquire) {
            warn!(pid = %self.name(), "write on a removed pid");
            return Err(Error::InvalidParameter("pid has been removed".into()));
        }
        Ok(())
    }

    // ========================================================================
    // Packet creation
    // ========================================================================

    /// Allocate a packet with an owned, zeroed payload of `size` bytes.
    ///
    /// Fails with [`Error::WouldBlock`] while the pid is blocked.
    pub fn new_alloc(&self, size: usize) -> Result<PacketBuilder> {
        self.check_alloc()?;
        let buf = self.shared.pool.acquire(size)?;
        let inner = PacketInner::new(&self.shared.pool, self.shared.id, Payload::Owned(buf));
        Ok(PacketBuilder::new(self.clone(), inner))
    }

    /// Wrap memory managed by the producer.
    ///
    /// `destructor` runs with the memory once the last reference is gone.
    /// Fails with [`Error::WouldBlock`] while the pid is blocked.
    pub fn new_shared(&self, data: impl Into<Bytes>, destructor: Option<PacketDestructor>) -> Result<PacketBuilder> {
        self.check_alloc()?;
        self.shared.pool.shared_created();
        let payload = Payload::Shared {
            data: data.into(),
            destructor: Mutex::new(destructor),
        };
        let inner = PacketInner::new(&self.shared.pool, self.shared.id, payload);
        Ok(PacketBuilder::new(self.clone(), inner))
    }

    /// Create a packet pointing into the payload of `source`.
    ///
    /// A reference to a reference points to the packet owning the memory.
    /// `range` is relative to `source` and defaults to its whole payload.
    pub fn new_ref(&self, source: &Packet, range: Option<Range<usize>>) -> Result<PacketBuilder> {
        self.check_writable()?;
        let range = range.unwrap_or(0..source.len());
        if range.start > range.end || range.end > source.len() {
            return Err(Error::InvalidParameter(format!(
                "range {range:?} outside a {} bytes packet",
                source.len()
            )));
        }
        let (canonical, range) = match source.inner().payload {
            Payload::Ref {
                source: ref canonical,
                range: ref base,
            } => (canonical.clone(), base.start + range.start..base.start + range.end),
            _ => (source.clone(), range),
        };
        self.shared.pool.ref_created();
        let mut inner = PacketInner::new(
            &self.shared.pool,
            self.shared.id,
            Payload::Ref {
                source: canonical,
                range,
            },
        );
        inner.info = *source.info();
        Ok(PacketBuilder::new(self.clone(), inner))
    }

    fn check_alloc(&self) -> Result<()> {
        self.check_writable()?;
        if self.would_block() {
            trace!(pid = %self.name(), "allocation refused, pid would block");
            return Err(Error::WouldBlock);
        }
        Ok(())
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Send a packet built on this pid.
    pub fn send(&self, builder: PacketBuilder) -> Result<()> {
        let (pid, mut inner) = builder.into_parts();
        if !Arc::ptr_eq(&pid.shared, &self.shared) {
            warn!(pid = %self.name(), other = %pid.name(), "packet sent on a pid it was not created on");
            return Err(Error::InvalidParameter("packet belongs to another pid".into()));
        }
        self.check_writable()?;
        if self.shared.discard.load(Ordering::Acquire) {
            trace!(pid = %self.name(), "pid discarding, packet dropped");
            return Ok(());
        }

        let len = inner.data().len();
        {
            let mut state = self.state();
            inner.pid_props = state.props.clone();
            inner.pid_props_changed = std::mem::take(&mut state.props_changed);
            inner.pid_info_changed = std::mem::take(&mut state.info_changed);
            state.request_property_map = true;
            normalize_timing(&mut state, &mut inner.info);
            state.nb_packets += 1;
            state.nb_bytes += len as u64;
            if inner.info.sap.is_sap() {
                state.nb_saps += 1;
            }
            state.eos = false;
        }
        counter!(PACKETS_SENT, "filter" => self.shared.owner_name.clone()).increment(1);
        counter!(BYTES_SENT, "filter" => self.shared.owner_name.clone()).increment(len as u64);

        self.forward(Packet::from_inner(inner));
        Ok(())
    }

    /// Signal end of stream to every destination.
    pub fn set_eos(&self) {
        {
            let mut state = self.state();
            if state.eos {
                return;
            }
            state.eos = true;
        }
        debug!(pid = %self.name(), "end of stream");
        let mut inner = PacketInner::new(&self.shared.pool, self.shared.id, Payload::Empty);
        inner.pid_eos = true;
        self.forward(Packet::from_inner(inner));
    }

    /// Whether end of stream was signaled and no packet was sent since.
    pub fn is_eos(&self) -> bool {
        self.state().eos
    }

    fn forward(&self, packet: Packet) {
        let mut postponed = self.postponed();
        if self.shared.pending_connections.load(Ordering::Acquire) > 0 {
            trace!(pid = %self.name(), "pid not connected yet, packet postponed");
            postponed.push(packet);
            return;
        }
        self.dispatch(&packet);
    }

    /// Fan a packet out to every destination. Called with the postponed lock held.
    fn dispatch(&self, packet: &Packet) {
        let duration_us = packet_duration_us(packet);
        {
            let destinations = self.destinations();
            if destinations.is_empty() {
                trace!(pid = %self.name(), "no destination, packet dropped");
                return;
            }
            for dst in destinations.iter() {
                dst.deliver(packet, duration_us);
            }
        }
        self.update_flow();
    }

    // ========================================================================
    // Flow control
    // ========================================================================

    /// Whether one of the destinations reached a buffering threshold.
    pub fn would_block(&self) -> bool {
        self.flow().would_block
    }

    /// Set the buffering thresholds; 0 disables a threshold.
    pub fn set_max_buffer(&self, max_units: u32, max_duration_us: u64) {
        {
            let mut flow = self.flow();
            flow.max_units = max_units;
            flow.max_duration_us = max_duration_us;
        }
        self.update_flow();
    }

    /// Buffering thresholds as `(units, microseconds)`.
    pub fn max_buffer(&self) -> (u32, u64) {
        let flow = self.flow();
        (flow.max_units, flow.max_duration_us)
    }

    /// Current occupancy as `(units, microseconds)`, max over destinations.
    pub fn buffer_occupancy(&self) -> (u32, u64) {
        let flow = self.flow();
        (flow.units, flow.duration_us)
    }

    /// Recompute occupancy and the blocked state from the destinations.
    ///
    /// The fold runs under the flow lock so the last updater stores the
    /// latest destination counters.
    pub(crate) fn update_flow(&self) {
        let owner = self.shared.owner.upgrade();
        let (unblocked, units, duration_us) = {
            let mut flow = self.flow();
            let (units, duration_us) = self
                .destinations()
                .iter()
                .filter(|d| !d.is_detached())
                .map(|d| d.occupancy())
                .fold((0, 0), |(u, t), (du, dt)| (u.max(du), t.max(dt)));
            flow.units = units;
            flow.duration_us = duration_us;
            let blocked = !self.shared.removed.load(Ordering::Acquire)
                && ((flow.max_units > 0 && units >= flow.max_units)
                    || (flow.max_duration_us > 0 && duration_us >= flow.max_duration_us));
            if blocked == flow.would_block {
                return;
            }
            flow.would_block = blocked;
            if let Some(owner) = &owner {
                if blocked {
                    flow.nb_blocked += 1;
                    owner.would_block.fetch_add(1, Ordering::AcqRel);
                } else {
                    super::saturating_sub_u32(&owner.would_block, 1);
                }
            }
            (!blocked, units, duration_us)
        };

        gauge!(BLOCKED_PIDS).increment(if unblocked { -1.0 } else { 1.0 });
        trace!(pid = %self.name(), units, duration_us, blocked = !unblocked, "pid flow changed");
        if unblocked {
            if let Some(owner) = owner {
                owner.post_process_task();
            }
        }
    }

    // ========================================================================
    // Events, statistics and teardown
    // ========================================================================

    /// Send a downstream event to every consumer of this pid.
    pub fn send_event(&self, event: FilterEvent) {
        for dst in self.destinations().iter() {
            if let Some(consumer) = dst.consumer() {
                consumer.post_task(TaskKind::Event {
                    event: event.clone(),
                    target: EventTarget::Input(dst.clone()),
                });
            }
        }
    }

    /// Number of connected destinations.
    pub fn num_destinations(&self) -> usize {
        self.destinations().len()
    }

    /// Producer side statistics.
    pub fn statistics(&self) -> PidStatistics {
        let destinations = self.num_destinations();
        let state = self.state();
        let flow = self.flow();
        PidStatistics {
            name: state.name.clone(),
            destinations,
            disconnected: self.shared.removed.load(Ordering::Acquire),
            nb_buffer_units: flow.units,
            buffer_time_us: flow.duration_us,
            max_buffer_units: flow.max_units,
            max_buffer_time_us: flow.max_duration_us,
            would_block: flow.would_block,
            nb_blocked: flow.nb_blocked,
            nb_packets: state.nb_packets,
            nb_bytes: state.nb_bytes,
            nb_saps: state.nb_saps,
            min_pck_duration: state.min_pck_duration,
            eos: state.eos,
            ..Default::default()
        }
    }

    /// Remove this pid: every consumer gets a disconnect and the pid
    /// leaves its filter's outputs.
    pub fn remove(&self) {
        if self.shared.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(pid = %self.name(), filter = %self.shared.owner_name, "removing pid");
        for dst in self.destinations().iter() {
            if let Some(consumer) = dst.consumer() {
                consumer.post_task(TaskKind::Disconnect(dst.clone()));
            }
        }
        if let Some(owner) = self.shared.owner.upgrade() {
            let was_blocked = std::mem::replace(&mut self.flow().would_block, false);
            if was_blocked {
                super::saturating_sub_u32(&owner.would_block, 1);
                gauge!(BLOCKED_PIDS).decrement(1.0);
            }
            owner
                .outputs
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|p| !p.ptr_eq(self));
        }
    }

    /// Whether the pid was removed.
    pub fn is_removed(&self) -> bool {
        self.shared.removed.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same pid.
    pub fn ptr_eq(&self, other: &Pid) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // ========================================================================
    // Session plumbing
    // ========================================================================

    pub(crate) fn owner(&self) -> Option<Arc<FilterNode>> {
        self.shared.owner.upgrade()
    }

    pub(crate) fn destinations(&self) -> RwLockReadGuard<'_, Vec<PidInstance>> {
        self.shared.destinations.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add_destination(&self, dst: PidInstance) {
        self.shared
            .destinations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dst);
    }

    /// Detach a destination; returns the number left.
    pub(crate) fn remove_destination(&self, dst: &PidInstance) -> usize {
        let left = {
            let mut destinations = self.shared.destinations.write().unwrap_or_else(PoisonError::into_inner);
            destinations.retain(|d| !d.ptr_eq(dst));
            destinations.len()
        };
        self.update_flow();
        left
    }

    /// Drop every destination without notifying the consumers.
    pub(crate) fn clear_destinations(&self) {
        let destinations = std::mem::take(
            &mut *self.shared.destinations.write().unwrap_or_else(PoisonError::into_inner),
        );
        for dst in &destinations {
            dst.detach();
        }
        self.postponed().clear();
    }

    /// Record a filter as a destination of this pid; `false` if it already was.
    pub(crate) fn assign(&self, filter: FilterId) -> bool {
        let mut assigned = self.shared.assigned.lock().unwrap_or_else(PoisonError::into_inner);
        if assigned.contains(&filter) {
            return false;
        }
        assigned.push(filter);
        true
    }

    pub(crate) fn unassign(&self, filter: FilterId) {
        self.shared
            .assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|f| *f != filter);
    }

    pub(crate) fn is_assigned(&self, filter: FilterId) -> bool {
        self.shared
            .assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&filter)
    }

    pub(crate) fn set_discard(&self, discard: bool) {
        self.shared.discard.store(discard, Ordering::Release);
    }

    /// A connection step (init or connect task) starts.
    pub(crate) fn connection_started(&self) {
        self.shared.pending_connections.fetch_add(1, Ordering::AcqRel);
        if let Some(owner) = self.owner() {
            owner.out_pid_connection_pending.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// A connection step finished. Postponed packets are flushed once the
    /// last one completes; returns whether the pid is now settled.
    pub(crate) fn connection_done(&self) -> bool {
        let owner = self.owner();
        let settled = {
            let mut postponed = self.postponed();
            let left = super::saturating_sub_u32(&self.shared.pending_connections, 1);
            if left == 0 {
                let packets = std::mem::take(&mut *postponed);
                if !packets.is_empty() {
                    debug!(pid = %self.name(), count = packets.len(), "flushing postponed packets");
                }
                for packet in &packets {
                    self.dispatch(packet);
                }
            }
            left == 0
        };
        if let Some(owner) = owner {
            super::saturating_sub_u32(&owner.out_pid_connection_pending, 1);
            if settled {
                owner.post_process_task();
            }
        }
        settled
    }

    pub(crate) fn has_pending_connections(&self) -> bool {
        self.shared.pending_connections.load(Ordering::Acquire) > 0
    }

    pub(crate) fn blacklist(&self, register: &str) {
        let mut list = self.shared.blacklist.lock().unwrap_or_else(PoisonError::into_inner);
        if !list.iter().any(|r| r == register) {
            list.push(register.to_string());
        }
    }

    pub(crate) fn blacklisted(&self) -> Vec<String> {
        self.shared.blacklist.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn state(&self) -> MutexGuard<'_, PidState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flow(&self) -> MutexGuard<'_, FlowState> {
        self.shared.flow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn postponed(&self) -> MutexGuard<'_, Vec<Packet>> {
        self.shared.postponed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fill in missing durations from timestamp deltas and track the minimum.
///
/// Only block starts carry timing; fragments are left alone.
fn normalize_timing(state: &mut PidState, info: &mut PacketInfo) {
    if !info.framing.start {
        return;
    }
    if !state.duration_init || info.clock_discontinuity {
        state.duration_init = true;
    } else if info.duration == 0 {
        let delta = match (info.dts, state.last_dts) {
            (Some(dts), Some(last)) if dts > last => Some(dts - last),
            _ => match (info.cts, state.last_cts) {
                (Some(cts), Some(last)) if cts != last => Some(cts.abs_diff(last)),
                _ => None,
            },
        };
        if let Some(delta) = delta {
            info.duration = u32::try_from(delta).unwrap_or(u32::MAX);
        }
    }
    if info.duration > 0 && (state.min_pck_duration == 0 || info.duration < state.min_pck_duration) {
        state.min_pck_duration = info.duration;
    }
    if info.dts.is_some() {
        state.last_dts = info.dts;
    }
    if info.cts.is_some() {
        state.last_cts = info.cts;
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pid")
            .field("id", &self.shared.id)
            .field("name", &self.name())
            .field("owner", &self.shared.owner_name)
            .finish_non_exhaustive()
    }
}
