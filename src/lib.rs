//! Remote method invocation over TCP.
//!
//! A [`Skeleton`] serves one implementation of a remote interface; a stub
//! created with [`stub::bind`] or [`stub::from_skeleton`] implements the same
//! interface by sending each call to the skeleton. Every call uses its own
//! connection carrying exactly one call envelope and one reply envelope.
//!
//! ```ignore
//! rmi::remote_interface! {
//!     pub trait FileServer as FileServerStub {
//!         fn size(&self, path: String) -> Result<i64, rmi::RemoteError>;
//!     }
//! }
//!
//! let skeleton = Skeleton::<dyn FileServer>::new(Arc::new(Files))?;
//! skeleton.start()?;
//! let files: FileServerStub = rmi::stub::from_skeleton(&skeleton)?;
//! assert_eq!(files.size("/x".to_owned()).await?, 999);
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod interface;
mod macros;
pub mod net;
pub mod server;
pub mod stub;
pub mod types;

pub use config::ServerConfig;
pub use error::{Error, IllegalState, MethodError, RemoteError};
pub use futures::future::BoxFuture;
pub use interface::{Interface, InterfaceBuilder, MethodKey, RemoteInterface, ServiceDescriptor};
pub use net::{client::Client, ApplicationError, Fault};
pub use server::{
    DefaultHooks, ListenError, ServerEvent, ServerHooks, ServerState, ServiceError, Skeleton,
};
pub use stub::Stub;
pub use types::{Decode, Encode, Type, Typed, Value, ValueError};
