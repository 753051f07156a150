use super::{
    events::{EventSender, ListenError, ServerEvent},
    lifecycle::{Lifecycle, ServerState},
    pool::WorkerPool,
};
use crate::{
    config::ServerConfig,
    dispatcher::DispatchTable,
    error::{Error, IllegalState},
    net::server::serve,
};
use std::{
    future::poll_fn,
    io,
    net::SocketAddr,
    sync::{mpsc, Arc},
    task::{Context, Poll},
    thread,
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::oneshot,
    time::sleep,
};
use tracing::{debug, error, info, warn};

/// How long `stop` waits for the accept loop to close the socket.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long workers still running after the grace period get before the pool
/// is torn down.
const FORCED_SHUTDOWN: Duration = Duration::from_millis(100);

/// Pause after an accept failure that is likely to repeat at once, such as
/// running out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Source of inbound connections for the accept loop.
pub(crate) trait Incoming: Send + 'static {
    fn poll_incoming(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>>;
}

impl Incoming for TcpListener {
    fn poll_incoming(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>> {
        self.poll_accept(cx)
    }
}

/// Owns the listening socket, the worker pool and the accept thread of one
/// server incarnation.
pub(crate) struct Listener<S: ?Sized> {
    state: Arc<Lifecycle>,
    config: ServerConfig,
    target: Arc<S>,
    table: Arc<DispatchTable<S>>,
    events: EventSender,
    address: Option<SocketAddr>,
    bound: Option<Bound>,
    running: Option<Running>,
}

/// Resources created by `initialize` and handed to the accept thread by `start`.
struct Bound {
    incoming: Box<dyn Incoming>,
    pool: WorkerPool,
}

struct Running {
    shutdown: oneshot::Sender<()>,
    released: mpsc::Receiver<()>,
}

impl<S> Listener<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn new(
        config: ServerConfig,
        target: Arc<S>,
        table: Arc<DispatchTable<S>>,
        events: EventSender,
    ) -> Self {
        Self {
            state: Arc::new(Lifecycle::new()),
            config,
            target,
            table,
            events,
            address: None,
            bound: None,
            running: None,
        }
    }

    pub(crate) fn state(&self) -> ServerState {
        self.state.current()
    }

    pub(crate) fn lifecycle(&self) -> Arc<Lifecycle> {
        self.state.clone()
    }

    pub(crate) fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Binds the socket and creates the worker pool: `CREATED -> INITIALIZED`.
    pub(crate) fn initialize(&mut self) -> Result<(), Error> {
        self.initialize_with(|socket| socket)
    }

    /// Like `initialize`, with the bound socket wrapped by `wrap` before the
    /// accept loop sees it.
    pub(crate) fn initialize_with<I: Incoming>(
        &mut self,
        wrap: impl FnOnce(TcpListener) -> I,
    ) -> Result<(), Error> {
        let current = self.state.current();
        if current != ServerState::Created {
            return Err(IllegalState {
                current,
                from: ServerState::Created,
                to: ServerState::Initialized,
            }
            .into());
        }

        let requested = self.config.bind_address();
        let pool = WorkerPool::new(self.config.pool_size)?;
        let socket = bind(&pool, requested, self.config.backlog).map_err(|source| Error::Bind {
            address: requested,
            source,
        })?;
        let address = socket.local_addr()?;

        self.state
            .transition(ServerState::Created, ServerState::Initialized)?;
        info!(%address, pool_size = self.config.pool_size, "listener initialized");
        self.address = Some(address);
        self.bound = Some(Bound {
            incoming: Box::new(wrap(socket)),
            pool,
        });
        Ok(())
    }

    /// Spawns the accept thread and returns: `INITIALIZED -> RUNNING`.
    pub(crate) fn start(&mut self) -> Result<(), Error> {
        let refused = IllegalState {
            current: self.state.current(),
            from: ServerState::Initialized,
            to: ServerState::Running,
        };
        let (Some(bound), Some(address)) = (self.bound.take(), self.address) else {
            return Err(refused.into());
        };
        if let Err(refused) = self
            .state
            .transition(ServerState::Initialized, ServerState::Running)
        {
            self.bound = Some(bound);
            return Err(refused.into());
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let (released_tx, released) = mpsc::sync_channel(1);
        let accept = AcceptLoop {
            incoming: bound.incoming,
            address,
            target: self.target.clone(),
            table: self.table.clone(),
            events: self.events.clone(),
        };
        let pool = bound.pool;
        let state = self.state.clone();
        let events = self.events.clone();
        let grace = self.config.shutdown_grace();

        let spawned = thread::Builder::new()
            .name("rmi-listener".to_owned())
            .spawn(move || {
                let cause = pool.handle().block_on(accept.run(&pool, shutdown_rx));
                _ = released_tx.send(());

                if let Some(error) = &cause {
                    // Fails only if `stop` got there first.
                    _ = state.transition(ServerState::Running, ServerState::Stopped);
                    events.send(ServerEvent::ListenError(error.clone()));
                }
                if !pool.handle().block_on(pool.quiesce(grace)) {
                    warn!(%address, ?grace, "workers still busy after the grace period");
                }
                pool.shutdown(FORCED_SHUTDOWN);
                info!(%address, "listener stopped");
                events.send(ServerEvent::Stopped(cause));
            });

        match spawned {
            Ok(_) => {
                info!(%address, "listener running");
                self.running = Some(Running { shutdown, released });
                Ok(())
            }
            Err(e) => {
                _ = self
                    .state
                    .transition(ServerState::Running, ServerState::Stopped);
                Err(e.into())
            }
        }
    }

    /// Closes the socket and lets in-flight calls finish: `RUNNING -> STOPPED`.
    ///
    /// Returns once the socket is closed; the pool drains in the background and
    /// `STOPPED` is emitted when it is idle. A no-op when already stopped.
    pub(crate) fn stop(&mut self) -> Result<(), IllegalState> {
        if let Err(refused) = self
            .state
            .transition(ServerState::Running, ServerState::Stopped)
        {
            return match refused.current {
                ServerState::Stopped => Ok(()),
                _ => Err(refused),
            };
        }

        if let Some(Running { shutdown, released }) = self.running.take() {
            _ = shutdown.send(());
            if released.recv_timeout(RELEASE_TIMEOUT).is_err() {
                warn!(address = ?self.address, "accept loop did not release the socket in time");
            }
        }
        Ok(())
    }
}

impl<S: ?Sized> Drop for Listener<S> {
    fn drop(&mut self) {
        if self.state.current() == ServerState::Running {
            if let Some(Running { shutdown, .. }) = self.running.take() {
                _ = self.state.transition(ServerState::Running, ServerState::Stopped);
                _ = shutdown.send(());
            }
        }
    }
}

fn bind(pool: &WorkerPool, address: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    // Registering the socket needs the pool's reactor.
    let _runtime = pool.handle().enter();
    let socket = match address {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(address)?;
    socket.listen(backlog)
}

/// What an accept failure means for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// The pending connection went away; accept the next one.
    Connection,
    /// Out of descriptors, buffers or memory. Pause, then accept again.
    Backoff,
    /// The socket itself is unusable.
    Socket,
}

fn classify(err: &io::Error) -> AcceptFailure {
    if let Some(failure) = classify_errno(err) {
        return failure;
    }
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => AcceptFailure::Connection,
        io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported => AcceptFailure::Socket,
        _ => AcceptFailure::Backoff,
    }
}

#[cfg(unix)]
fn classify_errno(err: &io::Error) -> Option<AcceptFailure> {
    match err.raw_os_error()? {
        libc::EBADF | libc::EINVAL | libc::ENOTSOCK | libc::EOPNOTSUPP | libc::EFAULT => {
            Some(AcceptFailure::Socket)
        }
        libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM => Some(AcceptFailure::Backoff),
        _ => None,
    }
}

#[cfg(not(unix))]
fn classify_errno(_: &io::Error) -> Option<AcceptFailure> {
    None
}

struct AcceptLoop<S: ?Sized> {
    incoming: Box<dyn Incoming>,
    address: SocketAddr,
    target: Arc<S>,
    table: Arc<DispatchTable<S>>,
    events: EventSender,
}

impl<S> AcceptLoop<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    /// Accepts until told to shut down or the socket fails. The socket is
    /// closed on return; a fatal accept error is returned as the cause.
    async fn run(mut self, pool: &WorkerPool, mut shutdown: oneshot::Receiver<()>) -> Option<ListenError> {
        let address = self.address;
        loop {
            let slot = tokio::select! {
                biased;
                _ = &mut shutdown => return None,
                slot = pool.reserve() => match slot {
                    Some(slot) => slot,
                    None => return None,
                },
            };

            let accepted = tokio::select! {
                biased;
                _ = &mut shutdown => return None,
                accepted = poll_fn(|cx| self.incoming.poll_incoming(cx)) => accepted,
            };
            let (socket, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => match classify(&e) {
                    AcceptFailure::Connection => {
                        warn!(%address, error = %e, "accept failed, continuing");
                        continue;
                    }
                    AcceptFailure::Backoff => {
                        warn!(%address, error = %e, backoff = ?ACCEPT_BACKOFF, "accept failed, backing off");
                        drop(slot);
                        let interrupted = tokio::select! {
                            biased;
                            _ = &mut shutdown => true,
                            _ = sleep(ACCEPT_BACKOFF) => false,
                        };
                        if interrupted {
                            return None;
                        }
                        continue;
                    }
                    AcceptFailure::Socket => {
                        error!(%address, error = %e, "accept loop failed");
                        return Some(ListenError::new(address, &e));
                    }
                },
            };

            debug!(%peer, "accepted connection");
            let job = serve(
                socket,
                peer,
                self.target.clone(),
                self.table.clone(),
                self.events.clone(),
            );
            pool.run(slot, job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::RemoteError, interface::Interface, net::PREAMBLE, server::events};
    use std::{
        io::{Read, Write},
        net::TcpStream,
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Nothing;

    fn listener(config: ServerConfig) -> (Listener<Nothing>, UnboundedReceiver<ServerEvent>) {
        let (_, table) = Interface::<Nothing>::builder("Nothing")
            .method("ping", |_: Arc<Nothing>, (): ()| async move { Ok::<_, RemoteError>(()) })
            .build()
            .into_parts();
        let (sender, receiver) = events::channel();
        let listener = Listener::new(config, Arc::new(Nothing), Arc::new(table), sender);
        (listener, receiver)
    }

    fn loopback() -> ServerConfig {
        ServerConfig::default().with_address("127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn initialize_binds_an_os_assigned_port() {
        let (mut listener, _events) = listener(loopback());
        assert_eq!(listener.address(), None);
        listener.initialize().unwrap();
        assert_eq!(listener.state(), ServerState::Initialized);
        assert_ne!(listener.address().unwrap().port(), 0);

        let err = listener.initialize().unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
    }

    #[test]
    fn start_requires_initialize() {
        let (mut listener, _events) = listener(loopback());
        let err = listener.start().unwrap_err();
        assert!(matches!(
            err,
            Error::IllegalState(IllegalState { current: ServerState::Created, .. })
        ));
        assert_eq!(listener.state(), ServerState::Created);
    }

    #[test]
    fn stop_closes_the_socket_then_reports_once() {
        let (mut listener, mut events) = listener(loopback());
        listener.initialize().unwrap();
        listener.start().unwrap();
        let address = listener.address().unwrap();
        TcpStream::connect(address).unwrap();

        listener.stop().unwrap();
        assert_eq!(listener.state(), ServerState::Stopped);
        assert!(TcpStream::connect(address).is_err());
        listener.stop().unwrap();

        let mut stopped = 0;
        while let Some(event) = events.blocking_recv() {
            match event {
                ServerEvent::Stopped(cause) => {
                    assert_eq!(cause, None);
                    stopped += 1;
                    break;
                }
                // The bare connect above never sent a preamble.
                ServerEvent::ServiceError(_) => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(stopped, 1);
    }

    #[test]
    fn stop_before_start_is_refused() {
        let (mut listener, _events) = listener(loopback());
        listener.initialize().unwrap();
        let err = listener.stop().unwrap_err();
        assert_eq!(err.current, ServerState::Initialized);
    }

    #[test]
    fn busy_addresses_fail_to_bind() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig::default().with_address(taken.local_addr().unwrap());
        let (mut listener, _events) = listener(config);
        let err = listener.initialize().unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
        assert_eq!(listener.state(), ServerState::Created);
    }

    #[cfg(unix)]
    #[test]
    fn accept_failures_are_classified_by_cause() {
        let os = io::Error::from_raw_os_error;
        assert_eq!(classify(&os(libc::EMFILE)), AcceptFailure::Backoff);
        assert_eq!(classify(&os(libc::ENFILE)), AcceptFailure::Backoff);
        assert_eq!(classify(&os(libc::ENOBUFS)), AcceptFailure::Backoff);
        assert_eq!(classify(&os(libc::ECONNABORTED)), AcceptFailure::Connection);
        assert_eq!(classify(&os(libc::EBADF)), AcceptFailure::Socket);
        assert_eq!(classify(&os(libc::ENOTSOCK)), AcceptFailure::Socket);
        assert_eq!(classify(&io::ErrorKind::Interrupted.into()), AcceptFailure::Connection);
        assert_eq!(classify(&io::Error::new(io::ErrorKind::Other, "odd")), AcceptFailure::Backoff);
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_does_not_stop_the_listener() {
        let (mut listener, mut events) = listener(loopback());
        let faults = [libc::EMFILE, libc::ENFILE, libc::ECONNABORTED, libc::EMFILE];
        listener
            .initialize_with(|socket| Faulty::new(socket, faults))
            .unwrap();
        listener.start().unwrap();
        let address = listener.address().unwrap();

        // Accepted once the faults have been worked through.
        let mut stream = TcpStream::connect(address).unwrap();
        let mut greeting = [0; 4];
        stream.read_exact(&mut greeting).unwrap();
        assert_eq!(greeting, PREAMBLE);
        stream.write_all(b"XXXX").unwrap();
        drop(stream);
        assert_eq!(listener.state(), ServerState::Running);

        listener.stop().unwrap();
        loop {
            match events.blocking_recv() {
                Some(ServerEvent::Stopped(cause)) => {
                    assert_eq!(cause, None);
                    break;
                }
                Some(ServerEvent::ServiceError(_)) => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn a_broken_socket_stops_the_listener() {
        let (mut listener, mut events) = listener(loopback());
        listener
            .initialize_with(|socket| Faulty::new(socket, [libc::EMFILE, libc::EBADF]))
            .unwrap();
        listener.start().unwrap();
        let address = listener.address().unwrap();

        let Some(ServerEvent::ListenError(error)) = events.blocking_recv() else {
            panic!("expected a listen error first");
        };
        assert_eq!(error.address, address);
        assert_eq!(
            events.blocking_recv(),
            Some(ServerEvent::Stopped(Some(error.clone())))
        );
        assert_eq!(listener.state(), ServerState::Stopped);
        assert!(TcpStream::connect(address).is_err());

        // Already stopped by the accept thread.
        listener.stop().unwrap();
        assert!(matches!(listener.start(), Err(Error::IllegalState(_))));
    }
}

/// Fails the first accepts with the given OS errors, then accepts for real.
#[cfg(test)]
pub(super) struct Faulty {
    socket: TcpListener,
    faults: std::collections::VecDeque<i32>,
}

#[cfg(test)]
impl Faulty {
    pub(super) fn new(socket: TcpListener, faults: impl IntoIterator<Item = i32>) -> Self {
        Self {
            socket,
            faults: faults.into_iter().collect(),
        }
    }
}

#[cfg(test)]
impl Incoming for Faulty {
    fn poll_incoming(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>> {
        match self.faults.pop_front() {
            Some(code) => Poll::Ready(Err(io::Error::from_raw_os_error(code))),
            None => self.socket.poll_accept(cx),
        }
    }
}
