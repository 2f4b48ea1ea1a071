//! Error types for filtergraph.

use thiserror::Error;

/// Result type alias using filtergraph's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for filter session operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A packet or buffer could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// The pid is blocked by back-pressure; retry once a consumer drops packets.
    #[error("pid would block")]
    WouldBlock,

    /// The API was used incorrectly (wrong pid, input used as output, ...).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A filter argument or property value could not be parsed.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// Argument or property name.
        name: String,
        /// Why the value was refused.
        reason: String,
    },

    /// The filter does not support the requested configuration.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Control signal: the filter must be cloned to accept another pid.
    #[error("filter requires a new instance")]
    RequiresNewInstance,

    /// No registered filter matches the given name.
    #[error("filter not found: {0}")]
    FilterNotFound(String),

    /// A filter failed to initialize or configure.
    #[error("setup of filter '{filter}' failed: {reason}")]
    SetupFailed {
        /// Filter name.
        filter: String,
        /// Failure reason.
        reason: String,
    },

    /// Generic failure reported by a filter.
    #[error("service error: {0}")]
    ServiceError(String),

    /// The session was aborted.
    #[error("session aborted")]
    Aborted,

    /// End of stream.
    #[error("end of stream")]
    Eos,

    /// Description string parse error.
    #[error("parse error: {0}")]
    Parse(String),

    /// I/O error reported by a filter.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Shorthand for an [`Error::InvalidArgument`].
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is the "clone me" control signal.
    pub fn is_new_instance_request(&self) -> bool {
        matches!(self, Error::RequiresNewInstance)
    }
}
