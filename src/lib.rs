//! # filtergraph
//!
//! A filter session engine: independently written processing stages
//! (filters) are wired into a directed graph, scheduled on a worker pool and
//! exchange reference counted packets with back-pressure.
//!
//! ## Features
//!
//! - **Capability driven linking**: output pids connect to the filters whose
//!   capability bundles accept their properties
//! - **Graph resolution**: missing conversion steps are found in the
//!   registry and inserted automatically
//! - **Zero-copy fan-out**: one packet, one reference per consumer
//! - **Back-pressure**: per destination unit and duration thresholds
//! - **Packet reservoirs**: per filter recycling of packets and buffers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use filtergraph::prelude::*;
//!
//! let session = Session::new(SessionConfig::new().with_threads(2));
//! session.register(FilterRegister::new("source", |_| Ok(Box::new(Source::default()))));
//! session.register(
//!     FilterRegister::new("sink", |_| Ok(Box::new(Sink::default())))
//!         .with_caps(CapBundle::new().input(codes::STREAM_TYPE, codes::stream_type::FILE)),
//! );
//! session.load_filter("source:count=100")?;
//! session.load_filter("sink")?;
//! session.run()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod caps;
pub mod error;
pub mod filter;
pub mod observability;
pub mod packet;
pub mod pid;
pub mod props;
pub mod session;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::caps::{CapBundle, CapFlags, Capability};
    pub use crate::error::{Error, Result};
    pub use crate::filter::{
        ArgDescriptor, EventTarget, Filter, FilterArgs, FilterContext, FilterEvent, FilterId, FilterRegister,
        ProcessStatus,
    };
    pub use crate::packet::{Framing, Packet, PacketBuilder, PacketInfo, SapType};
    pub use crate::pid::{Pid, PidInstance};
    pub use crate::props::{PropertyKey, PropertyMap, PropertyType, PropertyValue, codes};
    pub use crate::session::{Session, SessionConfig, SessionEvent};
}

pub use error::{Error, Result};
