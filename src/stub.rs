//! Client-side adapters for remote interfaces.
//!
//! Stub types are generated by [`remote_interface!`](crate::remote_interface);
//! the functions here create them from an address or from a running
//! [`Skeleton`].

use crate::{
    error::Error,
    interface::RemoteInterface,
    net::client::Client,
    server::Skeleton,
};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};
use tokio::net::lookup_host;

/// A local stand-in for a remote implementation of `Self::Interface`.
pub trait Stub: Sized {
    type Interface: ?Sized + RemoteInterface;

    fn from_client(client: Client) -> Self;

    fn client(&self) -> &Client;
}

/// Creates a stub calling the skeleton at `address`.
///
/// Fails if the interface is not remote-callable. No connection is made until
/// the first call.
pub fn bind<T: Stub>(address: SocketAddr) -> Result<T, Error> {
    let descriptor = <T::Interface as RemoteInterface>::descriptor();
    descriptor.verify()?;
    Ok(T::from_client(Client::new(descriptor.name(), address)))
}

/// Creates a stub for a skeleton's bound address.
///
/// A skeleton listening on every interface is reached through loopback.
pub fn from_skeleton<T: Stub>(skeleton: &Skeleton<T::Interface>) -> Result<T, Error> {
    let mut address = skeleton.bound_address().ok_or(Error::NotBound)?;
    if address.ip().is_unspecified() {
        address.set_ip(match address.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        });
    }
    bind(address)
}

/// Creates a stub reaching a skeleton's port through `host`.
pub async fn from_skeleton_with_host<T: Stub>(
    skeleton: &Skeleton<T::Interface>,
    host: &str,
) -> Result<T, Error> {
    let port = skeleton.bound_address().ok_or(Error::NotBound)?.port();
    let address = lookup_host((host, port)).await?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{host} has no address"))
    })?;
    bind(address)
}
