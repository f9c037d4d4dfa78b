//! # Error Taxonomy
//!
//! Every failure in the RPC substrate, the registry and the lock layer is one of
//! the variants of [`Error`]. Each variant has a stable wire name so that it can
//! travel inside an `{"error": {"name", "args"}}` response and be recognised on
//! the other side.

use serde_json::{json, Value};
use thiserror::Error;

use super::messages::WireError;

/// Peer identifier handed out by the directory service.
pub type PeerId = u64;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure: connect refused, reset, malformed or truncated message.
    #[error("communication error: {0}")]
    Communication(String),

    /// The remote side raised; name and arguments are preserved verbatim.
    #[error("remote {name}: {args}")]
    Remote { name: String, args: Value },

    /// Registry (or directory) operation on an unknown peer.
    #[error("no peer with id: '{0}'")]
    NotFound(PeerId),

    /// Directory lookup for a type nobody registered.
    #[error("no peer of type: '{0}'")]
    UnknownType(String),

    /// Programming-contract violation, e.g. releasing a lock that is not held.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The dispatcher's owner does not expose this operation.
    #[error("unknown method: '{0}'")]
    UnknownMethod(String),

    /// Positional parameters missing or of the wrong shape.
    #[error("invalid parameters for '{method}': {reason}")]
    InvalidParams { method: String, reason: String },

    /// Fortune database I/O failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn communication(reason: impl std::fmt::Display) -> Self {
        Error::Communication(reason.to_string())
    }

    pub fn protocol(reason: impl std::fmt::Display) -> Self {
        Error::Protocol(reason.to_string())
    }

    /// Name used for this error on the wire.
    pub fn name(&self) -> &str {
        match self {
            Error::Communication(_) => "CommunicationError",
            Error::Remote { name, .. } => name,
            Error::NotFound(_) | Error::UnknownType(_) => "NotFoundError",
            Error::Protocol(_) => "ProtocolError",
            Error::UnknownMethod(_) => "UnknownMethodError",
            Error::InvalidParams { .. } => "InvalidParamsError",
            Error::Storage(_) => "StorageError",
        }
    }

    /// Arguments carried on the wire alongside [`Error::name`].
    pub fn args(&self) -> Value {
        match self {
            Error::Remote { args, .. } => args.clone(),
            Error::NotFound(pid) => json!([pid]),
            Error::UnknownType(kind) => json!([kind]),
            Error::UnknownMethod(method) => json!([method]),
            other => json!([other.to_string()]),
        }
    }

    pub fn to_wire(&self) -> WireError {
        WireError {
            name: self.name().to_string(),
            args: self.args(),
        }
    }
}

impl From<WireError> for Error {
    fn from(error: WireError) -> Self {
        Error::Remote {
            name: error.name,
            args: error.args,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Communication(error.to_string())
    }
}

impl From<tokio_util::codec::LinesCodecError> for Error {
    fn from(error: tokio_util::codec::LinesCodecError) -> Self {
        Error::Communication(error.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Communication(format!("malformed message: {error}"))
    }
}
