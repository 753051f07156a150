use super::{handshake, CallEnvelope, Fault, ReplyEnvelope};
use crate::{
    dispatcher::DispatchTable,
    error::RemoteError,
    interface::MethodKey,
    server::{EventSender, ServerEvent, ServiceError},
};
use async_bincode::tokio::AsyncBincodeStream;
use futures::{FutureExt, SinkExt, StreamExt};
use std::{any::Any, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};
use tokio::{io::BufStream, net::TcpStream};
use tracing::debug;

/// Runs one request/reply cycle on an accepted connection.
///
/// Every failure is reported as a service error and ends the cycle; the
/// connection is closed when the stream is dropped on return.
pub(crate) async fn serve<S>(
    socket: TcpStream,
    peer: SocketAddr,
    target: Arc<S>,
    table: Arc<DispatchTable<S>>,
    events: EventSender,
) where
    S: ?Sized + Send + Sync + 'static,
{
    let report = |method: Option<MethodKey>, fault: Fault| {
        events.send(ServerEvent::ServiceError(ServiceError {
            peer,
            method,
            fault,
        }))
    };

    let mut sock = BufStream::new(socket);
    if let Err(e) = handshake(&mut sock).await {
        return report(None, Fault::Remote(e));
    }
    let mut sock = AsyncBincodeStream::<_, CallEnvelope, ReplyEnvelope, _>::from(sock).for_async();

    let CallEnvelope { method, args } = match sock.next().await {
        Some(Ok(call)) => call,
        Some(Err(e)) => return report(None, Fault::Remote(RemoteError::from_wire(e))),
        None => {
            let closed = RemoteError::Transport("connection closed before a call arrived".to_owned());
            return report(None, Fault::Remote(closed));
        }
    };
    debug!(%peer, %method, "dispatching call");

    let result = AssertUnwindSafe(table.call(target, &method, args))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(Fault::Remote(RemoteError::Internal(panic_message(&*panic))))
        });
    if let Err(fault) = &result {
        report(Some(method.clone()), fault.clone());
    }

    if let Err(e) = sock.send(ReplyEnvelope::from(result)).await {
        report(Some(method), Fault::Remote(RemoteError::from_wire(e)));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "implementation panicked".to_owned()
    }
}
