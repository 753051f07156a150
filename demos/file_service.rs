use rmi::{remote_interface, stub, BoxFuture, MethodError, RemoteError, ServerConfig, Skeleton};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize, Error)]
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
    pub trait FileServer as FileServerStub {
        fn size(&self, path: String) -> Result<i64, FileError>;
    }
}

struct Files;

impl FileServer for Files {
    fn size(&self, path: String) -> BoxFuture<'_, Result<i64, FileError>> {
        Box::pin(async move {
            match path.as_str() {
                "/missing" => Err(FileError::NotFound(path)),
                _ => Ok(999),
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let address: SocketAddr = "127.0.0.1:0".parse()?;
    let skeleton = Skeleton::<dyn FileServer>::with_config(
        ServerConfig::default().with_address(address),
        Arc::new(Files),
    )?;
    skeleton.start()?;

    let files: FileServerStub = stub::from_skeleton(&skeleton)?;
    println!("{files}");
    println!("size(/x) = {}", files.size("/x".to_owned()).await?);
    match files.size("/missing".to_owned()).await {
        Err(e) => println!("size(/missing) failed: {e}"),
        Ok(n) => println!("size(/missing) = {n}?"),
    }

    skeleton.stop()?;
    match files.size("/x".to_owned()).await {
        Err(FileError::Remote(e)) => println!("after stop: {e}"),
        other => println!("after stop: {other:?}"),
    }
    Ok(())
}
