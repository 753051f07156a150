//! The wire protocol: one call envelope and one reply envelope per TCP connection.
//!
//! After connecting, each side writes and flushes a four byte preamble before
//! reading the peer's, so neither end blocks waiting for the other to speak
//! first. Envelopes are then exchanged as length-prefixed bincode frames.

pub mod client;
pub mod server;

use crate::{
    error::{MethodError, RemoteError},
    interface::MethodKey,
    types::Value,
};
use async_bincode::{tokio::AsyncBincodeStream, AsyncDestination};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::any::type_name;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream},
    net::TcpStream,
};

/// Written by both ends before any envelope.
pub(crate) const PREAMBLE: [u8; 4] = *b"RMI\x01";

/// A framed connection reading `R` and writing `W`.
pub(crate) type Framed<R, W> = AsyncBincodeStream<BufStream<TcpStream>, R, W, AsyncDestination>;

/// One remote invocation: method key plus argument values, in order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    pub method: MethodKey,
    pub args: Vec<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ReplyEnvelope {
    Return(Value),
    Fault(Fault),
}

impl From<Result<Value, Fault>> for ReplyEnvelope {
    fn from(result: Result<Value, Fault>) -> Self {
        match result {
            Ok(value) => ReplyEnvelope::Return(value),
            Err(fault) => ReplyEnvelope::Fault(fault),
        }
    }
}

/// Why a call produced no return value.
#[derive(Serialize, Deserialize, Error, Debug, Clone, PartialEq)]
pub enum Fault {
    /// The implementation returned an error of its own.
    #[error("raised {0}")]
    Application(ApplicationError),

    /// The call failed in transport or dispatch.
    #[error(transparent)]
    Remote(RemoteError),
}

impl Fault {
    /// Captures an implementation's error for the reply.
    pub(crate) fn application<E: MethodError>(raised: &E) -> Self {
        match bincode::serialize(raised) {
            Ok(payload) => Fault::Application(ApplicationError {
                type_name: type_name::<E>().to_owned(),
                message: raised.to_string(),
                payload,
            }),
            Err(e) => Fault::Remote(RemoteError::Marshal(format!(
                "encoding {}: {e}",
                type_name::<E>()
            ))),
        }
    }
}

/// An error raised by a service implementation, carried verbatim to the caller.
#[derive(Serialize, Deserialize, Error, Debug, Clone, PartialEq, Eq)]
#[error("{type_name}: {message}")]
pub struct ApplicationError {
    type_name: String,
    message: String,
    payload: Vec<u8>,
}

impl ApplicationError {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Rebuilds the original error value.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, RemoteError> {
        bincode::deserialize(&self.payload).map_err(|e| {
            RemoteError::Marshal(format!(
                "decoding {} as {}: {e}",
                self.type_name,
                type_name::<E>()
            ))
        })
    }
}

/// Writes our preamble, flushes it, then checks the peer's.
pub(crate) async fn handshake<S>(stream: &mut S) -> Result<(), RemoteError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&PREAMBLE).await.map_err(RemoteError::transport)?;
    stream.flush().await.map_err(RemoteError::transport)?;

    let mut peer = [0u8; PREAMBLE.len()];
    stream
        .read_exact(&mut peer)
        .await
        .map_err(RemoteError::transport)?;
    if peer != PREAMBLE {
        return Err(RemoteError::Handshake(format!(
            "unexpected preamble {peer:02x?}"
        )));
    }
    Ok(())
}
