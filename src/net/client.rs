use super::{handshake, CallEnvelope, Fault, Framed, ReplyEnvelope};
use crate::{
    error::{MethodError, RemoteError},
    interface::MethodKey,
    types::{Arguments, Decode},
};
use async_bincode::tokio::AsyncBincodeStream;
use futures::{SinkExt, StreamExt};
use std::{fmt, net::SocketAddr, sync::Arc};
use tokio::{io::BufStream, net::TcpStream};
use tracing::debug;

/// Connection details of a remote skeleton, and the call routine every stub
/// forwards to.
///
/// Two clients are equal when they name the same interface at the same
/// address. Each call opens its own connection, so a client may be cloned and
/// used from several tasks at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Client {
    interface: Arc<str>,
    address: SocketAddr,
}

impl Client {
    pub fn new(interface: impl Into<Arc<str>>, address: SocketAddr) -> Self {
        Self {
            interface: interface.into(),
            address,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    async fn connect(&self) -> Result<Framed<ReplyEnvelope, CallEnvelope>, RemoteError> {
        let sock = TcpStream::connect(self.address)
            .await
            .map_err(|e| RemoteError::Connect {
                address: self.address.to_string(),
                message: e.to_string(),
            })?;
        let mut sock = BufStream::new(sock);
        handshake(&mut sock).await?;
        let sock = AsyncBincodeStream::<_, ReplyEnvelope, CallEnvelope, _>::from(sock).for_async();
        Ok(sock)
    }

    /// Sends one envelope on a fresh connection and waits for its reply.
    pub async fn exchange(&self, call: CallEnvelope) -> Result<ReplyEnvelope, RemoteError> {
        let mut sock = self.connect().await?;
        sock.send(call).await.map_err(RemoteError::from_wire)?;
        sock.next()
            .await
            .ok_or_else(|| RemoteError::Transport("connection closed before the reply".to_owned()))?
            .map_err(RemoteError::from_wire)
    }

    /// Calls `name` with `args` and converts the reply.
    ///
    /// An error raised by the remote implementation is rebuilt as `E`; any
    /// other failure becomes `E::from(RemoteError)`.
    pub async fn call<A, R, E>(&self, name: &str, args: A) -> Result<R, E>
    where
        A: Arguments,
        R: Decode,
        E: MethodError + From<RemoteError>,
    {
        let method = MethodKey::new(name, A::types());
        let args = args.encode_all().map_err(|error| RemoteError::Arguments {
            method: method.clone(),
            error,
        })?;
        debug!(address = %self.address, %method, "calling remote method");

        let call = CallEnvelope {
            method: method.clone(),
            args,
        };
        match self.exchange(call).await? {
            ReplyEnvelope::Return(value) => R::decode(value)
                .map_err(|error| RemoteError::ReturnValue { method, error }.into()),
            ReplyEnvelope::Fault(Fault::Application(raised)) => {
                Err(raised.decode::<E>().unwrap_or_else(E::from))
            }
            ReplyEnvelope::Fault(Fault::Remote(error)) => Err(error.into()),
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}[host: {}, port: {}]",
            self.interface,
            self.address.ip(),
            self.address.port()
        )
    }
}
