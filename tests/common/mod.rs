#![allow(dead_code)]

use rmi::{
    remote_interface, BoxFuture, ListenError, MethodError, RemoteError, ServerConfig, ServerEvent,
    ServerHooks, ServiceError, Skeleton,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, Once},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    time::timeout,
};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum FileError {
    #[error("no such file: {0}")]
    NotFound(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl MethodError for FileError {
    const KINDS: &'static [&'static str] = &["NotFound", RemoteError::KIND];
}

remote_interface! {
    /// A toy file service.
    pub trait FileServer as FileServerStub {
        fn size(&self, path: String) -> Result<i64, FileError>;
        fn echo(&self, tag: i64, payload: String) -> Result<String, RemoteError>;
        fn nap(&self, millis: u64) -> Result<(), RemoteError>;
    }
}

/// Every file is 999 bytes, except `/missing` which does not exist.
pub struct Files;

impl FileServer for Files {
    fn size(&self, path: String) -> BoxFuture<'_, Result<i64, FileError>> {
        Box::pin(async move {
            if path == "/missing" {
                Err(FileError::NotFound(path))
            } else {
                Ok(999)
            }
        })
    }

    fn echo(&self, tag: i64, payload: String) -> BoxFuture<'_, Result<String, RemoteError>> {
        Box::pin(async move { Ok(format!("{tag}:{payload}")) })
    }

    fn nap(&self, millis: u64) -> BoxFuture<'_, Result<(), RemoteError>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(())
        })
    }
}

/// Forwards every hook invocation to a channel.
pub struct RecordingHooks(UnboundedSender<ServerEvent>);

impl RecordingHooks {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = unbounded_channel();
        (Arc::new(Self(tx)), rx)
    }
}

impl ServerHooks for RecordingHooks {
    fn on_stopped(&self, cause: Option<&ListenError>) {
        _ = self.0.send(ServerEvent::Stopped(cause.cloned()));
    }

    fn on_listen_error(&self, error: &ListenError) -> bool {
        _ = self.0.send(ServerEvent::ListenError(error.clone()));
        false
    }

    fn on_service_error(&self, error: &ServiceError) {
        _ = self.0.send(ServerEvent::ServiceError(error.clone()));
    }
}

pub fn loopback() -> ServerConfig {
    ServerConfig::default().with_address("127.0.0.1:0".parse().unwrap())
}

/// A started file server on loopback and the events it raises.
pub fn serve_files(config: ServerConfig) -> (Skeleton<dyn FileServer>, UnboundedReceiver<ServerEvent>) {
    init_tracing();
    let (hooks, events) = RecordingHooks::new();
    let skeleton = Skeleton::<dyn FileServer>::with_hooks(config, Arc::new(Files), hooks).unwrap();
    skeleton.start().unwrap();
    (skeleton, events)
}

pub async fn next_event(events: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}
