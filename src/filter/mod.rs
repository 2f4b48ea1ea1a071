//! Filters: the processing stages of a session.
//!
//! A filter type is described by a [`FilterRegister`]: its name, declared
//! arguments, capability bundles and a constructor for the private state,
//! which implements [`Filter`]. Loading a filter from a description such as
//! `"encoder:rate=3"` parses the arguments against the register and builds
//! a new instance.
//!
//! ```text
//!   FilterRegister ──instantiate(args)──► Box<dyn Filter>
//!        │                                     │
//!        └──────────────┬──────────────────────┘
//!                       ▼
//!                  FilterNode (inputs, outputs, task queue, counters)
//! ```
//!
//! Each callback receives a [`FilterContext`] giving access to the
//! filter's pids and to the session.

pub mod args;
mod context;
mod events;
pub(crate) mod node;
mod register;
mod traits;

pub use args::FilterArgs;
pub use context::FilterContext;
pub use events::{EventTarget, FilterEvent};
pub use node::FilterStatistics;
pub use register::{ArgDescriptor, FilterConstructor, FilterRegister};
pub use traits::{Filter, ProcessStatus};

use std::fmt;

/// Session unique id of a loaded filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(pub(crate) u64);

impl FilterId {
    /// Numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}
