//! Chain resolution through the filter registry.
//!
//! When no loaded filter accepts a pid directly, the session asks
//! [`resolve_chain`] for the shortest sequence of registered filters whose
//! capabilities bridge the pid to the wanted destination. The search is a
//! pure function over the registry: instantiating the chain is done by the
//! session afterwards.
//!
//! ```text
//!  pid {visual, raw} ──► Z (in raw / out h264) ──► Y (in visual, h264)
//! ```
//!
//! Chains are searched by increasing length (iterative deepening). Among
//! the chains of the shortest length, the highest cumulative match weight
//! wins; equal weights prefer the lower register priority.

use super::{apply_output_caps, caps_match};
use crate::filter::FilterRegister;
use crate::props::PropertyMap;
use std::fmt;
use std::sync::Arc;

/// One filter of a resolved chain.
#[derive(Clone)]
pub struct ChainStep {
    /// Register to instantiate.
    pub register: Arc<FilterRegister>,
    /// Capability bundle the step's input matched.
    pub bundle: usize,
}

impl fmt::Debug for ChainStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainStep")
            .field("register", &self.register.name())
            .field("bundle", &self.bundle)
            .finish()
    }
}

/// Result of a chain search.
#[derive(Debug, Clone)]
pub struct ResolvedChain {
    /// Filters to insert, from the pid toward the destination.
    pub steps: Vec<ChainStep>,
    /// Cumulative match weight, destination included.
    pub weight: u32,
}

impl ResolvedChain {
    /// Register names of the chain.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.register.name()).collect()
    }
}

/// State of a (pid, candidate filter) pair during linking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not examined yet.
    Unbound,
    /// Capabilities examined, decision pending.
    CapabilityChecked,
    /// The candidate accepts the pid as is.
    DirectConnect,
    /// A chain of registry filters bridges the pid to the candidate.
    ChainResolved,
    /// No way to connect.
    Rejected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Unbound => "unbound",
            LinkState::CapabilityChecked => "capability-checked",
            LinkState::DirectConnect => "direct",
            LinkState::ChainResolved => "chain",
            LinkState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Decide how a pid with `props`, produced by a `source` filter, can reach
/// a loaded `target`.
pub fn evaluate_link(
    props: &PropertyMap,
    source: &FilterRegister,
    target: &FilterRegister,
    registry: &[Arc<FilterRegister>],
    blacklist: &[String],
    max_chain_length: usize,
) -> (LinkState, Option<ResolvedChain>) {
    if caps_match(props, target, true).is_some() {
        return (LinkState::DirectConnect, None);
    }
    match resolve_chain(props, source, target, registry, blacklist, max_chain_length) {
        Some(chain) => (LinkState::ChainResolved, Some(chain)),
        None => (LinkState::Rejected, None),
    }
}

/// Find the shortest, heaviest chain of registry filters from a pid to
/// `target`.
///
/// Registers are skipped when they are the source or the target register,
/// explicit only, blacklisted, already part of the chain, or when they do
/// not declare both input and output capabilities.
pub fn resolve_chain(
    props: &PropertyMap,
    source: &FilterRegister,
    target: &FilterRegister,
    registry: &[Arc<FilterRegister>],
    blacklist: &[String],
    max_chain_length: usize,
) -> Option<ResolvedChain> {
    let candidates: Vec<&Arc<FilterRegister>> = registry
        .iter()
        .filter(|r| r.name() != source.name() && r.name() != target.name())
        .filter(|r| !r.is_explicit_only())
        .filter(|r| !blacklist.iter().any(|b| b == r.name()))
        .filter(|r| r.declares_inputs() && r.declares_outputs())
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let mut search = Search {
        candidates,
        target,
        best: None,
    };
    for depth in 1..=max_chain_length {
        let mut path = Vec::with_capacity(depth);
        search.explore(props, depth, 0, &mut path);
        if search.best.is_some() {
            break;
        }
    }
    search.best.map(|(chain, _)| chain)
}

struct Search<'a> {
    candidates: Vec<&'a Arc<FilterRegister>>,
    target: &'a FilterRegister,
    /// Best chain so far with its summed register priority.
    best: Option<(ResolvedChain, u32)>,
}

impl Search<'_> {
    fn explore(&mut self, props: &PropertyMap, depth: usize, weight: u32, path: &mut Vec<ChainStep>) {
        if path.len() == depth {
            let Some((_, last)) = caps_match(props, self.target, true) else {
                return;
            };
            let weight = weight + last;
            let priority = path.iter().map(|s| s.register.priority()).sum();
            let better = match &self.best {
                None => true,
                Some((best, best_priority)) => {
                    weight > best.weight || (weight == best.weight && priority < *best_priority)
                }
            };
            if better {
                let chain = ResolvedChain {
                    steps: path.clone(),
                    weight,
                };
                self.best = Some((chain, priority));
            }
            return;
        }

        for i in 0..self.candidates.len() {
            let register = self.candidates[i];
            if path.iter().any(|s| Arc::ptr_eq(&s.register, register)) {
                continue;
            }
            let Some((bundle, w)) = caps_match(props, register, false) else {
                continue;
            };
            let next = apply_output_caps(props, register, bundle);
            path.push(ChainStep {
                register: Arc::clone(register),
                bundle,
            });
            self.explore(&next, depth, weight + w, path);
            path.pop();
        }
    }
}
