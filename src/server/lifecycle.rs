use crate::error::IllegalState;
use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

/// Lifecycle of a listener: `CREATED -> INITIALIZED -> RUNNING -> STOPPED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerState {
    Created,
    Initialized,
    Running,
    Stopped,
}

impl ServerState {
    /// The only state this one may move to.
    pub fn successor(self) -> Option<ServerState> {
        match self {
            ServerState::Created => Some(ServerState::Initialized),
            ServerState::Initialized => Some(ServerState::Running),
            ServerState::Running => Some(ServerState::Stopped),
            ServerState::Stopped => None,
        }
    }

    fn from_repr(repr: u8) -> Self {
        match repr {
            0 => ServerState::Created,
            1 => ServerState::Initialized,
            2 => ServerState::Running,
            _ => ServerState::Stopped,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ServerState::Created => "CREATED",
            ServerState::Initialized => "INITIALIZED",
            ServerState::Running => "RUNNING",
            ServerState::Stopped => "STOPPED",
        })
    }
}

/// Shared, atomically guarded [`ServerState`].
#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ServerState::Created as u8))
    }

    pub(crate) fn current(&self) -> ServerState {
        ServerState::from_repr(self.0.load(Ordering::Acquire))
    }

    /// Moves `from -> to` if the state is currently `from` and `to` is its
    /// successor. On failure the state is left unchanged.
    pub(crate) fn transition(&self, from: ServerState, to: ServerState) -> Result<(), IllegalState> {
        let refused = |current| IllegalState { current, from, to };
        if from.successor() != Some(to) {
            return Err(refused(self.current()));
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(drop)
            .map_err(|current| refused(ServerState::from_repr(current)))
    }
}
