//! Graph mutation: linking pids, inserting resolved chains, teardown.
//!
//! These run as tasks on the filter they concern:
//!
//! ```text
//!   new_pid ──► PidInit (producer) ──► direct match? ──► Connect (consumer) ──► configure_pid
//!                                  └─► resolve_chain ──► dynamic filters ──► Connect (first step)
//!
//!   remove_filter ──► Remove ──► detach inputs, remove outputs ──► Disconnect (consumers)
//! ```
//!
//! A pid counts one pending connection per init or connect step in flight;
//! packets sent meanwhile are held back and flushed once the count drops to
//! zero.

use super::SessionInner;
use super::events::SessionEvent;
use super::task::TaskKind;
use crate::caps::{ResolvedChain, caps_match, evaluate_link};
use crate::error::{Error, Result};
use crate::filter::FilterArgs;
use crate::filter::node::FilterNode;
use crate::pid::{Pid, PidInstance};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use tracing::{debug, info, trace, warn};

/// Upper bound on ancestry walks.
const MAX_WALK: usize = 256;

// ============================================================================
// Linking
// ============================================================================

/// Find destinations for a new (or refused) output pid of `producer`.
pub(crate) fn pid_init(session: &Arc<SessionInner>, producer: &Arc<FilterNode>, pid: &Pid) {
    if pid.is_removed() || producer.is_removed() {
        pid.connection_done();
        return;
    }
    let props = pid.properties().unwrap_or_default();
    let blacklist = pid.blacklisted();
    let (candidates, targeted) = match producer.target() {
        Some(target) => (vec![target], true),
        None => (session.filters(), false),
    };
    let eligible: Vec<Arc<FilterNode>> = candidates
        .into_iter()
        .filter(|cand| is_eligible(producer, pid, cand, &blacklist, targeted))
        .collect();

    let mut connected = 0;
    for cand in &eligible {
        if caps_match(&props, &cand.register, true).is_none() {
            continue;
        }
        let Some(dst) = reserve_destination(session, cand) else {
            trace!(pid = %pid.name(), filter = %cand.name(), "destination inputs full");
            continue;
        };
        post_connect(pid, &dst);
        connected += 1;
    }

    if connected == 0 {
        let registry = session.registry();
        let max_chain_length = session.config().max_chain_length;
        for cand in &eligible {
            if cand.inputs_full() && !cand.register.is_clonable() {
                continue;
            }
            let (state, chain) = evaluate_link(
                &props,
                &producer.register,
                &cand.register,
                &registry,
                &blacklist,
                max_chain_length,
            );
            trace!(pid = %pid.name(), filter = %cand.name(), %state, "link evaluated");
            let Some(chain) = chain else {
                continue;
            };
            let dst = if cand.inputs_full() {
                match session.clone_node(cand) {
                    Ok(clone) => clone,
                    Err(e) => {
                        warn!(filter = %cand.name(), error = %e, "cannot clone chain destination");
                        continue;
                    }
                }
            } else {
                Arc::clone(cand)
            };
            match instantiate_chain(session, &chain, &dst) {
                Ok(first) => {
                    info!(pid = %pid.name(), chain = ?chain.names(), destination = %dst.name(), "filter chain resolved");
                    session.events.send(SessionEvent::ChainResolved {
                        pid: pid.name(),
                        chain: chain.names().into_iter().map(str::to_string).collect(),
                        destination: dst.name().to_string(),
                    });
                    if first.try_reserve_input() {
                        post_connect(pid, &first);
                        connected += 1;
                    }
                }
                Err(e) => warn!(pid = %pid.name(), error = %e, "cannot instantiate filter chain"),
            }
        }
    }

    if connected == 0 && pid.num_destinations() == 0 {
        warn!(pid = %pid.name(), filter = %producer.name(), "no destination for pid, discarding its packets");
        pid.set_discard(true);
    } else {
        pid.set_discard(false);
    }
    pid.connection_done();
}

fn is_eligible(producer: &Arc<FilterNode>, pid: &Pid, cand: &Arc<FilterNode>, blacklist: &[String], targeted: bool) -> bool {
    if cand.is_removed() || cand.is_finalized() || Arc::ptr_eq(cand, producer) {
        return false;
    }
    if !cand.register.accepts_inputs() {
        return false;
    }
    if !targeted && (cand.dynamic || cand.register.name() == producer.register.name()) {
        return false;
    }
    if blacklist.iter().any(|b| b == cand.register.name()) || pid.is_assigned(cand.id) {
        return false;
    }
    if !source_ids_accept(cand, producer, pid) {
        trace!(pid = %pid.name(), filter = %cand.name(), "source id mismatch");
        return false;
    }
    if in_parent_chain(cand, producer) {
        trace!(pid = %pid.name(), filter = %cand.name(), "candidate is upstream of the pid");
        return false;
    }
    true
}

/// Take an input slot on `cand`, or on a clone of it when full.
fn reserve_destination(session: &Arc<SessionInner>, cand: &Arc<FilterNode>) -> Option<Arc<FilterNode>> {
    if cand.try_reserve_input() {
        return Some(Arc::clone(cand));
    }
    if !cand.register.is_clonable() {
        return None;
    }
    match session.clone_node(cand) {
        Ok(clone) => {
            clone.in_pid_connection_pending.fetch_add(1, Ordering::AcqRel);
            Some(clone)
        }
        Err(e) => {
            warn!(filter = %cand.name(), error = %e, "cannot clone filter");
            None
        }
    }
}

/// Post the connect task; the input slot of `dst` is already reserved.
fn post_connect(pid: &Pid, dst: &Arc<FilterNode>) {
    pid.assign(dst.id);
    pid.connection_started();
    debug!(pid = %pid.name(), filter = %dst.name(), "connecting pid");
    if !dst.post_task(TaskKind::Connect(pid.clone())) {
        crate::pid::saturating_sub_u32(&dst.in_pid_connection_pending, 1);
        pid.unassign(dst.id);
        pid.connection_done();
    }
}

fn repost_init(pid: &Pid) {
    let Some(producer) = pid.owner() else {
        return;
    };
    pid.connection_started();
    if !producer.post_task(TaskKind::PidInit(pid.clone())) {
        pid.connection_done();
    }
}

/// Instantiate the chain backwards from `dst`; returns its first filter.
fn instantiate_chain(session: &Arc<SessionInner>, chain: &ResolvedChain, dst: &Arc<FilterNode>) -> Result<Arc<FilterNode>> {
    let mut next = Arc::clone(dst);
    let mut created: Vec<Arc<FilterNode>> = Vec::with_capacity(chain.steps.len());
    for step in chain.steps.iter().rev() {
        let node = FilterArgs::parse(&step.register, "").and_then(|args| {
            session.create_node(Arc::clone(&step.register), args, true, Some(Arc::downgrade(&next)), None)
        });
        match node {
            Ok(node) => {
                created.push(Arc::clone(&node));
                next = node;
            }
            Err(e) => {
                for node in &created {
                    post_remove(node);
                }
                return Err(e);
            }
        }
    }
    Ok(next)
}

/// Connect `pid` to `node`, running the filter's `configure_pid`.
pub(crate) fn connect(session: &Arc<SessionInner>, node: &Arc<FilterNode>, pid: &Pid) {
    if node.is_removed() || pid.is_removed() {
        pid.unassign(node.id);
    } else {
        connect_input(session, node, pid);
    }
    crate::pid::saturating_sub_u32(&node.in_pid_connection_pending, 1);
    pid.connection_done();
    node.post_process_task();
}

fn connect_input(session: &Arc<SessionInner>, node: &Arc<FilterNode>, pid: &Pid) {
    let input = PidInstance::new(pid, node, node.register.needs_full_block());
    input.set_configured_props(pid.properties());
    node.inputs
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(input.clone());

    let result = node
        .with_filter(session, |f, ctx| f.configure_pid(ctx, &input, false))
        .unwrap_or_else(|| Err(Error::InvalidParameter("filter released".into())));

    let error = match result {
        Ok(()) => {
            pid.add_destination(input.clone());
            if let Some(producer) = pid.owner() {
                node.set_setup_error_target(&producer);
            }
            info!(pid = %pid.name(), source = %pid.owner_name(), destination = %node.name(), "pid connected");
            session.events.send(SessionEvent::PidConnected {
                pid: pid.name(),
                source: pid.owner_name().to_string(),
                destination: node.name().to_string(),
            });
            return;
        }
        Err(e) => e,
    };

    node.inputs
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|i| !i.ptr_eq(&input));
    input.detach();
    pid.unassign(node.id);

    match error {
        Error::RequiresNewInstance => match session.clone_node(node) {
            Ok(clone) => {
                debug!(pid = %pid.name(), filter = %node.name(), clone = %clone.id, "filter cloned for pid");
                clone.in_pid_connection_pending.fetch_add(1, Ordering::AcqRel);
                post_connect(pid, &clone);
            }
            Err(e) => {
                warn!(pid = %pid.name(), filter = %node.name(), error = %e, "cannot clone filter");
                pid.blacklist(node.register.name());
                repost_init(pid);
            }
        },
        Error::NotSupported(reason) => {
            debug!(pid = %pid.name(), filter = %node.name(), %reason, "pid refused, trying other destinations");
            pid.blacklist(node.register.name());
            repost_init(pid);
        }
        other => {
            warn!(pid = %pid.name(), filter = %node.name(), error = %other, "pid configuration failed");
            pid.blacklist(node.register.name());
            setup_failure(session, node, other);
            repost_init(pid);
        }
    }
}

/// Release `input` from `node` after its pid was removed.
pub(crate) fn disconnect(session: &Arc<SessionInner>, node: &Arc<FilterNode>, input: &PidInstance) {
    let known = node
        .inputs
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .any(|i| i.ptr_eq(input));
    if !known {
        return;
    }
    if let Some(Err(e)) = node.with_filter(session, |f, ctx| f.configure_pid(ctx, input, true)) {
        warn!(pid = %input.name(), filter = %node.name(), error = %e, "error releasing input");
    }
    detach_input(session, node, input);
    node.inputs
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|i| !i.ptr_eq(input));

    if node.num_inputs() == 0 && node.in_pid_connection_pending.load(Ordering::Acquire) == 0 {
        debug!(filter = %node.name(), "last input gone, removing filter");
        post_remove(node);
    }
}

fn detach_input(session: &SessionInner, node: &FilterNode, input: &PidInstance) {
    input.detach();
    let pid = input.output();
    pid.remove_destination(input);
    pid.unassign(node.id);
    debug!(pid = %pid.name(), source = %pid.owner_name(), destination = %node.name(), "pid disconnected");
    session.events.send(SessionEvent::PidDisconnected {
        pid: pid.name(),
        source: pid.owner_name().to_string(),
        destination: node.name().to_string(),
    });
}

// ============================================================================
// Teardown
// ============================================================================

/// Request removal of `node`; later requests are ignored.
pub(crate) fn post_remove(node: &Arc<FilterNode>) {
    if node.removed.swap(true, Ordering::AcqRel) {
        return;
    }
    debug!(filter = %node.name(), id = %node.id, "filter removal requested");
    node.post_task(TaskKind::Remove);
}

/// Report a setup failure of `node`, notify the filter feeding it and
/// remove it.
pub(crate) fn setup_failure(session: &Arc<SessionInner>, node: &Arc<FilterNode>, error: Error) {
    warn!(filter = %node.name(), %error, "filter setup failed");
    session.events.send(SessionEvent::SetupFailed {
        filter: node.name().to_string(),
        reason: error.to_string(),
    });
    if let Some(target) = node.setup_error_target() {
        target.post_task(TaskKind::SetupErrorNotify {
            failed: node.name().to_string(),
            error,
        });
    }
    post_remove(node);
}

/// Tear `node` down; returns `false` while it must wait for other tasks.
pub(crate) fn remove(session: &Arc<SessionInner>, node: &Arc<FilterNode>) -> bool {
    if !node.tasks().queue.is_empty() || node.has_pending_connections() {
        trace!(filter = %node.name(), "removal waiting for pending tasks");
        return false;
    }

    let inputs = std::mem::take(&mut *node.inputs.write().unwrap_or_else(PoisonError::into_inner));
    for input in &inputs {
        detach_input(session, node, input);
        let Some(producer) = input.output().owner() else {
            continue;
        };
        if !producer.is_removed() && producer.outputs().iter().all(|p| p.num_destinations() == 0) {
            debug!(filter = %producer.name(), "no consumer left, removing upstream filter");
            post_remove(&producer);
        }
    }
    for pid in node.outputs() {
        pid.remove();
    }

    node.with_filter(session, |f, ctx| f.finalize(ctx));
    node.finalized.store(true, Ordering::Release);
    drop(node.imp.lock().unwrap_or_else(PoisonError::into_inner).take());
    session.remove_node(node);
    info!(filter = %node.name(), id = %node.id, "filter removed");
    session.events.send(SessionEvent::FilterRemoved {
        id: node.id,
        name: node.name().to_string(),
    });
    true
}

// ============================================================================
// Graph queries
// ============================================================================

/// Whether `candidate` is `node`, the filter `node` was cloned from, or
/// upstream of either.
pub(crate) fn in_parent_chain(candidate: &Arc<FilterNode>, node: &Arc<FilterNode>) -> bool {
    let mut visited = Vec::new();
    let mut stack = vec![Arc::clone(node)];
    while let Some(current) = stack.pop() {
        if visited.contains(&current.id) || visited.len() >= MAX_WALK {
            continue;
        }
        visited.push(current.id);
        if Arc::ptr_eq(&current, candidate) {
            return true;
        }
        if let Some(origin) = current.cloned_from() {
            stack.push(origin);
        }
        for input in current.inputs() {
            if let Some(owner) = input.output().owner() {
                stack.push(owner);
            }
        }
    }
    false
}

/// Whether the `SID` list of `cand` accepts `pid`.
///
/// Entries are `fid` or `fid#pidname`, matched against the closest filter
/// with an id, walking up through filters inserted by the resolver.
fn source_ids_accept(cand: &FilterNode, producer: &Arc<FilterNode>, pid: &Pid) -> bool {
    let sids = cand.args().source_ids().to_vec();
    if sids.is_empty() {
        return true;
    }
    let Some(fid) = closest_fid(producer) else {
        return false;
    };
    let pid_name = pid.name();
    sids.iter().any(|sid| match sid.split_once('#') {
        Some((id, name)) => id == fid && name == pid_name,
        None => *sid == fid,
    })
}

fn closest_fid(node: &Arc<FilterNode>) -> Option<String> {
    let mut current = Arc::clone(node);
    for _ in 0..MAX_WALK {
        if let Some(fid) = current.fid() {
            return Some(fid);
        }
        if !current.dynamic {
            return None;
        }
        current = current.inputs().first()?.output().owner()?;
    }
    None
}
