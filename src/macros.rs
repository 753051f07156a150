/// Declares a remote interface.
///
/// ```ignore
/// remote_interface! {
///     pub trait FileServer as FileServerStub {
///         fn size(&self, path: String) -> Result<i64, FileError>;
///     }
/// }
/// ```
///
/// expands to
///
/// - the trait itself, each method returning a boxed future;
/// - a [`RemoteInterface`](crate::RemoteInterface) impl for `dyn FileServer`,
///   so a [`Skeleton<dyn FileServer>`](crate::Skeleton) can serve any
///   implementation;
/// - `FileServerStub`, a [`Stub`](crate::Stub) implementing the trait by
///   forwarding every call to the remote skeleton. Stubs compare, hash and
///   print by interface and address without touching the network.
///
/// Every error type must implement [`MethodError`](crate::MethodError) and
/// `From<RemoteError>`.
#[macro_export]
macro_rules! remote_interface {
    (
        $(#[$attr:meta])*
        $vis:vis trait $name:ident as $stub:ident {
            $(
                $(#[$mattr:meta])*
                fn $method:ident(&self $(, $arg:ident : $ty:ty)*) -> Result<$ret:ty, $err:ty>;
            )*
        }
    ) => {
        $(#[$attr])*
        $vis trait $name: ::std::marker::Send + ::std::marker::Sync + 'static {
            $(
                $(#[$mattr])*
                fn $method(&self $(, $arg: $ty)*)
                    -> $crate::BoxFuture<'_, ::std::result::Result<$ret, $err>>;
            )*
        }

        impl $crate::RemoteInterface for dyn $name {
            fn interface() -> $crate::Interface<Self> {
                $crate::Interface::builder(stringify!($name))
                    $(
                        .method(
                            stringify!($method),
                            |target: ::std::sync::Arc<Self>, ($($arg,)*): ($($ty,)*)| async move {
                                target.$method($($arg),*).await
                            },
                        )
                    )*
                    .build()
            }
        }

        #[doc = concat!("Client stub for [`", stringify!($name), "`].")]
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        $vis struct $stub {
            client: $crate::Client,
        }

        impl $crate::Stub for $stub {
            type Interface = dyn $name;

            fn from_client(client: $crate::Client) -> Self {
                Self { client }
            }

            fn client(&self) -> &$crate::Client {
                &self.client
            }
        }

        impl ::std::fmt::Display for $stub {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(&self.client, f)
            }
        }

        impl $name for $stub {
            $(
                fn $method(&self $(, $arg: $ty)*)
                    -> $crate::BoxFuture<'_, ::std::result::Result<$ret, $err>>
                {
                    ::std::boxed::Box::pin(
                        self.client
                            .call::<_, $ret, $err>(stringify!($method), ($($arg,)*)),
                    )
                }
            )*
        }
    };
}

/// Lets serde types cross the wire as opaque values, tagged with their type
/// name and checked against it when decoded.
#[macro_export]
macro_rules! opaque_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Typed for $ty {
                fn rpc_type() -> $crate::Type {
                    $crate::Type::opaque(stringify!($ty))
                }
            }

            impl $crate::Encode for $ty {
                fn encode(val: Self) -> ::std::result::Result<$crate::Value, $crate::ValueError> {
                    $crate::types::encode_opaque(stringify!($ty), &val)
                }
            }

            impl $crate::Decode for $ty {
                fn decode(val: $crate::Value) -> ::std::result::Result<Self, $crate::ValueError> {
                    $crate::types::decode_opaque(stringify!($ty), val)
                }
            }
        )+
    };
}
