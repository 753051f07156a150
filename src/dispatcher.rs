use crate::{
    error::{MethodError, RemoteError},
    interface::MethodKey,
    net::Fault,
    types::{Arguments, Encode, Value},
};
use futures::future::{ready, BoxFuture};
use std::{collections::BTreeMap, future::Future, marker::PhantomData, sync::Arc};

/// Maps [`MethodKey`]s to handlers invoking a method on a service of type `S`.
///
/// Built once by an [`InterfaceBuilder`](crate::interface::InterfaceBuilder) and
/// never mutated afterwards, so workers share it without locking.
pub struct DispatchTable<S: ?Sized> {
    handlers: BTreeMap<MethodKey, Arc<dyn DynamicHandler<S>>>,
}

impl<S: ?Sized> Default for DispatchTable<S> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<S> DispatchTable<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn add<A, R, E, F, Fut>(&mut self, key: MethodKey, handler: F)
    where
        A: Arguments + Send + 'static,
        R: Encode + Send + 'static,
        E: MethodError,
        F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let typed = TypedHandler {
            handler,
            key: key.clone(),
            _signature: PhantomData,
        };
        self.handlers.insert(key, Arc::new(typed));
    }

    pub fn contains(&self, key: &MethodKey) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invokes the method named by `key` on `target`.
    ///
    /// Unknown keys and ill-typed arguments come back as [`Fault::Remote`]; an
    /// error returned by the implementation comes back as
    /// [`Fault::Application`].
    pub(crate) async fn call(&self, target: Arc<S>, key: &MethodKey, args: Vec<Value>) -> CallResult {
        let handler = self
            .handlers
            .get(key)
            .ok_or_else(|| Fault::Remote(RemoteError::UnknownMethod(key.clone())))?;
        handler.call(target, args).await
    }
}

pub(crate) type CallResult = Result<Value, Fault>;

struct TypedHandler<F, A, R, E> {
    handler: F,
    key: MethodKey,
    _signature: PhantomData<fn(A) -> Result<R, E>>,
}

/// A type-erased handler, so handlers of any signature share one table.
trait DynamicHandler<S: ?Sized>: Send + Sync {
    fn call(&self, target: Arc<S>, args: Vec<Value>) -> BoxFuture<'static, CallResult>;
}

impl<S, F, A, R, E, Fut> DynamicHandler<S> for TypedHandler<F, A, R, E>
where
    S: ?Sized + Send + Sync + 'static,
    A: Arguments + Send + 'static,
    R: Encode + Send + 'static,
    E: MethodError,
    F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    fn call(&self, target: Arc<S>, args: Vec<Value>) -> BoxFuture<'static, CallResult> {
        // Type check & decode the given arguments
        let args = match A::decode_all(args) {
            Ok(args) => args,
            Err(error) => {
                let fault = Fault::Remote(RemoteError::Arguments {
                    method: self.key.clone(),
                    error,
                });
                return Box::pin(ready(Err(fault)));
            }
        };
        let invocation = (self.handler)(target, args);
        let key = self.key.clone();
        Box::pin(async move {
            match invocation.await {
                // Type check & encode the returned value
                Ok(retval) => R::encode(retval).map_err(|error| {
                    Fault::Remote(RemoteError::ReturnValue { method: key, error })
                }),
                Err(raised) => Err(Fault::application(&raised)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{interface::Interface, types::Type};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
    enum CounterError {
        #[error("counter overflow")]
        Overflow,
        #[error(transparent)]
        Remote(#[from] RemoteError),
    }

    impl MethodError for CounterError {
        const KINDS: &'static [&'static str] = &["Overflow", RemoteError::KIND];
    }

    struct Counter {
        base: i64,
    }

    fn table() -> DispatchTable<Counter> {
        let interface = Interface::builder("Counter")
            .method("add", |c: Arc<Counter>, (n,): (i64,)| async move {
                c.base.checked_add(n).ok_or(CounterError::Overflow)
            })
            .method("add", |c: Arc<Counter>, (s,): (String,)| async move {
                Ok::<_, CounterError>(format!("{}{s}", c.base))
            })
            .build();
        interface.into_parts().1
    }

    fn add_int() -> MethodKey {
        MethodKey::new("add", vec![Type::Int])
    }

    #[tokio::test]
    async fn overloads_dispatch_by_parameter_types() {
        let table = table();
        let target = Arc::new(Counter { base: 40 });
        assert_eq!(table.len(), 2);

        let n = table.call(target.clone(), &add_int(), vec![Value::Int(2)]).await;
        assert_eq!(n.unwrap(), Value::Int(42));

        let key = MethodKey::new("add", vec![Type::String]);
        let s = table.call(target, &key, vec![Value::from("!")]).await;
        assert_eq!(s.unwrap(), Value::from("40!"));
    }

    #[tokio::test]
    async fn unknown_key_is_a_remote_fault() {
        let table = table();
        let key = MethodKey::new("sub", vec![Type::Int]);
        let err = table
            .call(Arc::new(Counter { base: 0 }), &key, vec![Value::Int(1)])
            .await
            .unwrap_err();
        assert_eq!(err, Fault::Remote(RemoteError::UnknownMethod(key)));
    }

    #[tokio::test]
    async fn ill_typed_arguments_are_rejected_before_invocation() {
        let table = table();
        let err = table
            .call(Arc::new(Counter { base: 0 }), &add_int(), vec![Value::from("2")])
            .await
            .unwrap_err();
        assert!(matches!(err, Fault::Remote(RemoteError::Arguments { .. })));
    }

    #[tokio::test]
    async fn implementation_errors_pass_through() {
        let table = table();
        let err = table
            .call(Arc::new(Counter { base: i64::MAX }), &add_int(), vec![Value::Int(1)])
            .await
            .unwrap_err();
        let raised = match err {
            Fault::Application(raised) => raised,
            other => panic!("expected an application fault, got {other:?}"),
        };
        assert_eq!(raised.message(), "counter overflow");
        assert_eq!(raised.decode::<CounterError>().unwrap(), CounterError::Overflow);
    }
}
