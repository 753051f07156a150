//! Bind configuration for a [`Skeleton`](crate::Skeleton).
//!
//! Loading the configuration is up to the caller; every field has a default so
//! a partial document deserializes cleanly.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

/// Port used by [`ServerConfig::well_known`].
pub const DEFAULT_PORT: u16 = 8888;

/// Maximum number of pending connections queued by the listening socket.
pub const DEFAULT_BACKLOG: u32 = 20;

/// Number of connections served at once.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// How long `stop` lets in-flight calls finish before the pool is shut down.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on. `None` binds an OS-assigned port on every
    /// interface.
    pub address: Option<SocketAddr>,
    pub backlog: u32,
    pub pool_size: usize,
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            backlog: DEFAULT_BACKLOG,
            pool_size: DEFAULT_POOL_SIZE,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    /// Listens on [`DEFAULT_PORT`] on every interface.
    pub fn well_known() -> Self {
        Self::default().with_address(SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)))
    }

    pub fn with_address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Address the listener binds when none is configured.
    pub(crate) fn bind_address(&self) -> SocketAddr {
        self.address
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.pool_size == 0 {
            return Err(Error::Config("pool_size must be at least 1".to_owned()));
        }
        if self.backlog == 0 {
            return Err(Error::Config("backlog must be at least 1".to_owned()));
        }
        Ok(())
    }
}
