//! Service descriptors and the `RemoteInterface` contract.

use crate::{
    dispatcher::DispatchTable,
    error::{Error, MethodError, RemoteError},
    types::{Arguments, Encode, Type},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, future::Future, sync::Arc};

/// Identifies one remote method: its name plus its parameter types, so
/// overloads resolve to different handlers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodKey {
    pub name: String,
    pub params: Vec<Type>,
}

impl MethodKey {
    pub fn new(name: impl Into<String>, params: Vec<Type>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub key: MethodKey,
    pub returns: Type,
    /// Failure kinds the method declares.
    pub raises: Vec<String>,
}

impl MethodDescriptor {
    pub fn declares_remote_error(&self) -> bool {
        self.raises.iter().any(|kind| kind == RemoteError::KIND)
    }
}

/// The method signatures of one service interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, methods: Vec<MethodDescriptor>) -> Self {
        Self {
            name: name.into(),
            methods,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// Checks that the interface is remote-callable: every method declares
    /// [`RemoteError`] and no two methods share a key.
    pub fn verify(&self) -> Result<(), Error> {
        let mut seen = BTreeSet::new();
        for method in &self.methods {
            if !method.declares_remote_error() {
                return Err(self.reject(format!(
                    "method {} does not declare {}",
                    method.key,
                    RemoteError::KIND
                )));
            }
            if !seen.insert(&method.key) {
                return Err(self.reject(format!("method {} is declared twice", method.key)));
            }
        }
        Ok(())
    }

    fn reject(&self, reason: String) -> Error {
        Error::Interface {
            interface: self.name.clone(),
            reason,
        }
    }
}

/// A service interface that can be served by a [`Skeleton`](crate::Skeleton).
///
/// Implemented for the trait object of the interface (`dyn FileServer`), usually
/// by [`remote_interface!`](crate::remote_interface).
pub trait RemoteInterface: Send + Sync + 'static {
    fn interface() -> Interface<Self>;

    fn descriptor() -> ServiceDescriptor {
        Self::interface().descriptor
    }
}

/// Descriptor and dispatch table of an interface, built together.
pub struct Interface<S: ?Sized> {
    descriptor: ServiceDescriptor,
    table: DispatchTable<S>,
}

impl<S> Interface<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder<S> {
        InterfaceBuilder {
            name: name.into(),
            methods: Vec::new(),
            table: DispatchTable::default(),
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn table(&self) -> &DispatchTable<S> {
        &self.table
    }

    pub(crate) fn into_parts(self) -> (ServiceDescriptor, DispatchTable<S>) {
        (self.descriptor, self.table)
    }
}

pub struct InterfaceBuilder<S: ?Sized> {
    name: String,
    methods: Vec<MethodDescriptor>,
    table: DispatchTable<S>,
}

impl<S> InterfaceBuilder<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    /// Registers a method. The key is `name` plus `A`'s parameter types, so the
    /// same name may be registered again with different arguments.
    pub fn method<A, R, E, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        A: Arguments + Send + 'static,
        R: Encode + Send + 'static,
        E: MethodError,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let key = MethodKey::new(name, A::types());
        self.methods.push(MethodDescriptor {
            key: key.clone(),
            returns: R::rpc_type(),
            raises: E::KINDS.iter().map(|kind| (*kind).to_owned()).collect(),
        });
        self.table.add(key, handler);
        self
    }

    pub fn build(self) -> Interface<S> {
        Interface {
            descriptor: ServiceDescriptor::new(self.name, self.methods),
            table: self.table,
        }
    }
}
