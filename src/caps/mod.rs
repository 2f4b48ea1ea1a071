//! Capabilities: what a filter accepts and produces.
//!
//! A [`FilterRegister`](crate::filter::FilterRegister) declares its
//! capabilities as an ordered list of [`CapBundle`]s. A bundle groups the
//! properties that must hold together: a pid matches a bundle when every
//! input key of the bundle is satisfied by the pid's property map.
//!
//! ```text
//!  bundle 0: IN  stream_type = visual          bundle 1: IN  stream_type = audio
//!            IN  codec = raw | ...                       IN  codec = aac
//!            OUT codec = h264                            OUT codec = mp3
//! ```
//!
//! Within a bundle, several caps on the same key are alternatives. An
//! excluded cap requires the property to differ from its value, an optional
//! cap may be absent. Caps flagged [`CapFlags::STATIC`] apply to every
//! bundle of the register.

pub mod resolver;

pub use resolver::{ChainStep, LinkState, ResolvedChain, evaluate_link, resolve_chain};

use crate::filter::FilterRegister;
use crate::props::{PropertyKey, PropertyMap, PropertyValue};
use smallvec::SmallVec;
use std::ops::BitOr;

// ============================================================================
// Flags
// ============================================================================

/// Flags of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapFlags(u8);

impl CapFlags {
    /// No flag.
    pub const NONE: Self = Self(0);
    /// Applies to input pids.
    pub const INPUT: Self = Self(1 << 0);
    /// Applies to output pids.
    pub const OUTPUT: Self = Self(1 << 1);
    /// The property must differ from the value.
    pub const EXCLUDED: Self = Self(1 << 2);
    /// The property may be absent.
    pub const OPTIONAL: Self = Self(1 << 3);
    /// Shared by every bundle of the register.
    pub const STATIC: Self = Self(1 << 4);
    /// Only valid for an explicitly loaded instance, never for chain resolution.
    pub const LOADED_FILTER: Self = Self(1 << 5);
    /// Input and output.
    pub const IN_OUT: Self = Self(Self::INPUT.0 | Self::OUTPUT.0);

    /// Create empty flags.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Check if empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if contains a flag.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of flags.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for CapFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ============================================================================
// Capability and bundles
// ============================================================================

/// One capability: a property key, a value and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    /// Property key.
    pub key: PropertyKey,
    /// Value to compare with; strings accept `*` and `a|b` alternatives.
    pub value: PropertyValue,
    /// Flags.
    pub flags: CapFlags,
}

impl Capability {
    /// Create a capability.
    pub fn new(key: impl Into<PropertyKey>, value: impl Into<PropertyValue>, flags: CapFlags) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            flags,
        }
    }

    /// Whether the capability applies to inputs.
    pub fn is_input(&self) -> bool {
        self.flags.contains(CapFlags::INPUT)
    }

    /// Whether the capability applies to outputs.
    pub fn is_output(&self) -> bool {
        self.flags.contains(CapFlags::OUTPUT)
    }

    /// Whether the capability is an exclusion.
    pub fn is_excluded(&self) -> bool {
        self.flags.contains(CapFlags::EXCLUDED)
    }
}

/// A group of capabilities that must match together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapBundle {
    caps: SmallVec<[Capability; 6]>,
}

impl CapBundle {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input capability.
    pub fn input(self, key: impl Into<PropertyKey>, value: impl Into<PropertyValue>) -> Self {
        self.with(Capability::new(key, value, CapFlags::INPUT))
    }

    /// Add an output capability.
    pub fn output(self, key: impl Into<PropertyKey>, value: impl Into<PropertyValue>) -> Self {
        self.with(Capability::new(key, value, CapFlags::OUTPUT))
    }

    /// Add a capability valid for both inputs and outputs.
    pub fn in_out(self, key: impl Into<PropertyKey>, value: impl Into<PropertyValue>) -> Self {
        self.with(Capability::new(key, value, CapFlags::IN_OUT))
    }

    /// Add an input exclusion: the property must not equal `value`.
    pub fn exclude_input(self, key: impl Into<PropertyKey>, value: impl Into<PropertyValue>) -> Self {
        self.with(Capability::new(key, value, CapFlags::INPUT | CapFlags::EXCLUDED))
    }

    /// Add an optional input capability.
    pub fn optional_input(self, key: impl Into<PropertyKey>, value: impl Into<PropertyValue>) -> Self {
        self.with(Capability::new(key, value, CapFlags::INPUT | CapFlags::OPTIONAL))
    }

    /// Add any capability.
    pub fn with(mut self, cap: Capability) -> Self {
        self.caps.push(cap);
        self
    }

    /// Capabilities in declaration order.
    pub fn caps(&self) -> &[Capability] {
        &self.caps
    }

    /// Whether the bundle declares at least one input capability.
    pub fn has_inputs(&self) -> bool {
        self.caps.iter().any(Capability::is_input)
    }

    /// Whether the bundle declares at least one output capability.
    pub fn has_outputs(&self) -> bool {
        self.caps.iter().any(Capability::is_output)
    }
}

// ============================================================================
// Matching
// ============================================================================

/// Match a pid property map against a register's input capabilities.
///
/// Returns the first matching bundle and its weight, the number of input
/// keys the pid actually satisfied. A register without capabilities accepts
/// everything with weight 0. `loaded` is false during chain resolution,
/// where bundles flagged [`CapFlags::LOADED_FILTER`] never match.
pub fn caps_match(props: &PropertyMap, register: &FilterRegister, loaded: bool) -> Option<(usize, u32)> {
    let bundles = register.caps();
    if bundles.is_empty() {
        return Some((0, 0));
    }
    let statics: SmallVec<[&Capability; 4]> = bundles
        .iter()
        .flat_map(|b| b.caps())
        .filter(|c| c.flags.contains(CapFlags::STATIC))
        .collect();

    bundles
        .iter()
        .enumerate()
        .find_map(|(index, bundle)| bundle_match(props, bundle, &statics, loaded).map(|w| (index, w)))
}

fn bundle_match(props: &PropertyMap, bundle: &CapBundle, statics: &[&Capability], loaded: bool) -> Option<u32> {
    if !loaded && bundle.caps().iter().any(|c| c.flags.contains(CapFlags::LOADED_FILTER)) {
        return None;
    }
    // A bundle made of static caps only is not a bundle of its own.
    if !bundle
        .caps()
        .iter()
        .any(|c| c.is_input() && !c.flags.contains(CapFlags::STATIC))
    {
        return None;
    }
    let caps: SmallVec<[&Capability; 8]> = bundle
        .caps()
        .iter()
        .chain(statics.iter().copied().filter(|s| !bundle.caps().contains(*s)))
        .filter(|c| c.is_input())
        .collect();
    if caps.is_empty() {
        return None;
    }

    let mut weight = 0;
    let mut checked: SmallVec<[&PropertyKey; 8]> = SmallVec::new();
    for cap in &caps {
        if checked.contains(&&cap.key) {
            continue;
        }
        checked.push(&cap.key);
        let alternatives = caps.iter().filter(|c| c.key == cap.key);

        let Some(value) = props.get(&cap.key) else {
            let tolerated = alternatives
                .clone()
                .all(|c| c.flags.contains(CapFlags::OPTIONAL) || c.is_excluded());
            if tolerated {
                continue;
            }
            return None;
        };

        let mut accepted = false;
        let mut only_exclusions = true;
        for alt in alternatives {
            if alt.is_excluded() {
                if value.matches(&alt.value) {
                    return None;
                }
            } else {
                only_exclusions = false;
                if value.matches(&alt.value) {
                    accepted = true;
                }
            }
        }
        if accepted {
            weight += 1;
        } else if !only_exclusions {
            return None;
        }
    }
    Some(weight)
}

/// Properties a pid would carry after going through `bundle` of `register`.
///
/// Output capabilities override the input properties; an excluded output
/// cap leaves its key unknown. Among alternatives, the first value wins.
pub fn apply_output_caps(props: &PropertyMap, register: &FilterRegister, bundle: usize) -> PropertyMap {
    let mut out = props.clone();
    let bundles = register.caps();
    let statics = bundles
        .iter()
        .flat_map(|b| b.caps())
        .filter(|c| c.flags.contains(CapFlags::STATIC));
    let own = bundles.get(bundle).map(|b| b.caps()).unwrap_or_default();

    let mut applied: SmallVec<[&PropertyKey; 8]> = SmallVec::new();
    for cap in own.iter().chain(statics) {
        if !cap.is_output() || cap.is_input() || applied.contains(&&cap.key) {
            continue;
        }
        applied.push(&cap.key);
        if cap.is_excluded() {
            out.remove(&cap.key);
        } else {
            out.set(cap.key.clone(), pattern_value(&cap.value));
        }
    }
    out
}

/// Concrete value for a capability pattern: the first `|` alternative.
fn pattern_value(value: &PropertyValue) -> PropertyValue {
    match value {
        PropertyValue::String(s) => match s.split_once('|') {
            Some((first, _)) => PropertyValue::String(first.to_string()),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}
