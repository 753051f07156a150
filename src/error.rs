use crate::{interface::MethodKey, server::ServerState, types::ValueError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, io, net::SocketAddr};
use thiserror::Error;

/// The remote-call error kind.
///
/// Every transport, marshaling and dispatch failure surfaces as a
/// `RemoteError`, so callers can tell "the call did not go through" apart from
/// an error the remote implementation raised itself. Each remote method must
/// declare it among its failures (see [`MethodError`]).
#[derive(Serialize, Deserialize, Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("connecting to {address}: {message}")]
    Connect { address: String, message: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("handshake: {0}")]
    Handshake(String),

    #[error("marshaling: {0}")]
    Marshal(String),

    #[error("no method {0}")]
    UnknownMethod(MethodKey),

    #[error("arguments of {method}: {error}")]
    Arguments { method: MethodKey, error: ValueError },

    #[error("return value of {method}: {error}")]
    ReturnValue { method: MethodKey, error: ValueError },

    #[error("(BUG in service implementation) {0}")]
    Internal(String),
}

impl RemoteError {
    /// Failure kind name that remote methods declare.
    pub const KIND: &'static str = "RemoteError";

    pub(crate) fn transport(err: impl fmt::Display) -> Self {
        RemoteError::Transport(err.to_string())
    }

    /// Splits bincode failures into transport faults and marshaling faults.
    pub(crate) fn from_wire(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(io) => RemoteError::transport(io),
            other => RemoteError::Marshal(other.to_string()),
        }
    }
}

/// Error type of a remote method.
///
/// `KINDS` lists the failure kinds the method declares, mirroring a checked
/// `throws` clause. A method is only remote-callable when
/// [`RemoteError::KIND`] is among them. Values cross the wire with bincode and
/// are handed back to the caller unchanged.
pub trait MethodError: Serialize + DeserializeOwned + fmt::Display + Send + 'static {
    const KINDS: &'static [&'static str];
}

impl MethodError for RemoteError {
    const KINDS: &'static [&'static str] = &[RemoteError::KIND];
}

/// A lifecycle method was called in the wrong state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("server state transition {from} -> {to} refused, server is {current}")]
pub struct IllegalState {
    pub current: ServerState,
    pub from: ServerState,
    pub to: ServerState,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{interface} is not a remote interface: {reason}")]
    Interface { interface: String, reason: String },

    #[error("invalid server configuration: {0}")]
    Config(String),

    #[error(transparent)]
    IllegalState(#[from] IllegalState),

    #[error("skeleton has no bound address")]
    NotBound,

    #[error("binding {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for failures raised while constructing a skeleton or stub.
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::Interface { .. } | Error::Config(_))
    }
}
