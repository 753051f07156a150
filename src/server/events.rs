//! Lifecycle and error notifications, delivered in order on one thread.

use crate::{interface::MethodKey, net::Fault};
use std::{
    fmt, io,
    net::SocketAddr,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
    thread,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// The accept loop ended on an error it could not recover from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("accepting on {address}: {message}")]
pub struct ListenError {
    pub address: SocketAddr,
    pub kind: io::ErrorKind,
    pub message: String,
}

impl ListenError {
    pub(crate) fn new(address: SocketAddr, err: &io::Error) -> Self {
        Self {
            address,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// One connection failed to complete its call.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceError {
    pub peer: SocketAddr,
    /// The method being called, if the call envelope was read.
    pub method: Option<MethodKey>,
    pub fault: Fault,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "calling {method} from {}: {}", self.peer, self.fault),
            None => write!(f, "serving {}: {}", self.peer, self.fault),
        }
    }
}

impl std::error::Error for ServiceError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The accept loop has exited and every worker has finished.
    Stopped(Option<ListenError>),
    ListenError(ListenError),
    ServiceError(ServiceError),
}

/// Callbacks a service owner overrides to react to server events.
///
/// All hooks run on the server's event thread, one at a time, in the order the
/// events were raised. A hook that panics is logged and does not stop delivery
/// of later events.
pub trait ServerHooks: Send + Sync + 'static {
    /// The server has fully stopped. `cause` is set when the accept loop died
    /// on its own rather than through [`Skeleton::stop`](crate::Skeleton::stop).
    fn on_stopped(&self, cause: Option<&ListenError>) {
        match cause {
            Some(cause) => warn!(%cause, "server stopped"),
            None => info!("server stopped"),
        }
    }

    /// The accept loop failed. Returns whether the owner intends to resume the
    /// server, which it does by calling [`Skeleton::start`](crate::Skeleton::start).
    fn on_listen_error(&self, error: &ListenError) -> bool {
        error!(%error, "listen error");
        false
    }

    fn on_service_error(&self, error: &ServiceError) {
        warn!(%error, "service error");
    }
}

/// Hooks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ServerHooks for DefaultHooks {}

/// Enqueues events for the notifier; cheap to clone into every worker.
#[derive(Debug, Clone)]
pub struct EventSender(UnboundedSender<ServerEvent>);

impl EventSender {
    pub(crate) fn send(&self, event: ServerEvent) {
        if let Err(mpsc::error::SendError(event)) = self.0.send(event) {
            debug!(?event, "event notifier is gone, dropping event");
        }
    }
}

pub(crate) fn channel() -> (EventSender, UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender(tx), rx)
}

/// Per-server event queue and the thread draining it.
///
/// Events may be sent before [`EventNotifier::init`]; they are held in the
/// queue and delivered once the hooks are installed.
pub(crate) struct EventNotifier {
    sender: EventSender,
    receiver: Mutex<Option<UnboundedReceiver<ServerEvent>>>,
}

impl EventNotifier {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub(crate) fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Starts the delivery thread. Only the first call has any effect.
    pub(crate) fn init(&self, hooks: Arc<dyn ServerHooks>) -> io::Result<()> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut receiver) = receiver else {
            debug!("event notifier already initialized");
            return Ok(());
        };

        thread::Builder::new()
            .name("rmi-events".to_owned())
            .spawn(move || {
                while let Some(event) = receiver.blocking_recv() {
                    deliver(&*hooks, event);
                }
                debug!("event notifier exiting");
            })?;
        Ok(())
    }
}

fn deliver(hooks: &dyn ServerHooks, event: ServerEvent) {
    let delivered = catch_unwind(AssertUnwindSafe(|| match &event {
        ServerEvent::Stopped(cause) => hooks.on_stopped(cause.as_ref()),
        ServerEvent::ListenError(error) => {
            if hooks.on_listen_error(error) {
                info!("listen error hook asked to resume; waiting for an explicit start");
            }
        }
        ServerEvent::ServiceError(error) => hooks.on_service_error(error),
    }));
    if delivered.is_err() {
        error!(?event, "server hook panicked");
    }
}
