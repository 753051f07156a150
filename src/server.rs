//! The server side: a [`Skeleton`] serves one implementation of a remote
//! interface over TCP.

pub(crate) mod events;
mod lifecycle;
mod listener;
mod pool;

pub(crate) use events::EventSender;
pub use events::{DefaultHooks, ListenError, ServerEvent, ServerHooks, ServiceError};
pub use lifecycle::ServerState;

use crate::{
    config::ServerConfig,
    dispatcher::DispatchTable,
    error::Error,
    interface::{RemoteInterface, ServiceDescriptor},
};
use events::EventNotifier;
use lifecycle::Lifecycle;
use listener::Listener;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::info;

/// Serves `server` to remote stubs.
///
/// Construction verifies that `S` is remote-callable and installs the event
/// hooks; nothing is bound until [`Skeleton::start`]. A stopped skeleton can be
/// started again, which binds a fresh socket (on the previously bound address
/// unless one was configured) and a fresh worker pool.
pub struct Skeleton<S: ?Sized + RemoteInterface> {
    descriptor: ServiceDescriptor,
    config: ServerConfig,
    server: Arc<S>,
    table: Arc<DispatchTable<S>>,
    notifier: EventNotifier,
    listener: Mutex<Listener<S>>,
    // Read without touching `listener`, which `stop` holds while the socket closes.
    status: Mutex<Status>,
}

struct Status {
    state: Arc<Lifecycle>,
    address: Option<SocketAddr>,
}

impl<S: ?Sized + RemoteInterface> Skeleton<S> {
    /// Serves on an OS-assigned port with default settings.
    pub fn new(server: Arc<S>) -> Result<Self, Error> {
        Self::with_config(ServerConfig::default(), server)
    }

    pub fn with_address(address: SocketAddr, server: Arc<S>) -> Result<Self, Error> {
        Self::with_config(ServerConfig::default().with_address(address), server)
    }

    pub fn with_config(config: ServerConfig, server: Arc<S>) -> Result<Self, Error> {
        Self::with_hooks(config, server, Arc::new(DefaultHooks))
    }

    pub fn with_hooks(
        config: ServerConfig,
        server: Arc<S>,
        hooks: Arc<dyn ServerHooks>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let (descriptor, table) = S::interface().into_parts();
        descriptor.verify()?;

        let notifier = EventNotifier::new();
        notifier.init(hooks)?;
        let table = Arc::new(table);
        let listener = Listener::new(config.clone(), server.clone(), table.clone(), notifier.sender());
        let status = Status {
            state: listener.lifecycle(),
            address: None,
        };
        Ok(Self {
            descriptor,
            config,
            server,
            table,
            notifier,
            listener: Mutex::new(listener),
            status: Mutex::new(status),
        })
    }

    fn listener(&self) -> MutexGuard<'_, Listener<S>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds the socket and creates the worker pool without accepting yet.
    pub fn initialize(&self) -> Result<(), Error> {
        let mut listener = self.listener();
        listener.initialize()?;
        self.status().address = listener.address();
        Ok(())
    }

    /// Starts accepting connections, initializing first if needed. Returns as
    /// soon as the accept thread is running.
    pub fn start(&self) -> Result<(), Error> {
        let mut listener = self.listener();
        if listener.state() == ServerState::Stopped {
            let mut config = self.config.clone();
            config.address = config.address.or(listener.address());
            info!(interface = self.descriptor.name(), address = ?config.address, "restarting");
            *listener = Listener::new(
                config,
                self.server.clone(),
                self.table.clone(),
                self.notifier.sender(),
            );
            *self.status() = Status {
                state: listener.lifecycle(),
                address: None,
            };
        }
        if listener.state() == ServerState::Created {
            listener.initialize()?;
            self.status().address = listener.address();
        }
        listener.start()
    }

    /// Stops accepting connections. In-flight calls are given the configured
    /// grace period; [`ServerHooks::on_stopped`] runs once they are done.
    /// Stopping a stopped skeleton does nothing.
    pub fn stop(&self) -> Result<(), Error> {
        Ok(self.listener().stop()?)
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    pub fn state(&self) -> ServerState {
        self.status().state.current()
    }

    /// The address the socket is bound to, once initialized.
    pub fn bound_address(&self) -> Option<SocketAddr> {
        self.status().address
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
