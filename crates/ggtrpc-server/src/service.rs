//! Named services and their method tables.
//!
//! The server dispatches purely on byte payloads: a [`Method`] owns an
//! adapter closure that decodes the argument with the connection's codec,
//! invokes the typed handler and encodes the reply. [`ServiceBuilder`]
//! generates those adapters, so a service definition stays close to the
//! handlers themselves:
//!
//! ```
//! use ggtrpc_server::Service;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { num1: i32, num2: i32 }
//!
//! struct Foo;
//!
//! let service = Service::build(Foo)
//!     .method("Sum", |_foo: Arc<Foo>, args: Args| async move {
//!         Ok::<_, String>(args.num1 + args.num2)
//!     })
//!     .finish();
//! assert_eq!(service.name(), "Foo");
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use ggtrpc_common::{Codec, Result, RpcError};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>;
type Handler = Box<dyn Fn(Codec, Vec<u8>) -> HandlerFuture + Send + Sync>;

/// One registered method: its name, its byte-level adapter and a running
/// invocation counter.
pub struct Method {
    name: String,
    calls: AtomicU64,
    handler: Handler,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many times this method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Decodes the argument, runs the handler and encodes the reply.
    pub(crate) fn invoke(&self, codec: Codec, argv: Vec<u8>) -> HandlerFuture {
        self.calls.fetch_add(1, Ordering::Relaxed);
        (self.handler)(codec, argv)
    }
}

/// A named collection of methods sharing one receiver.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<Method>>,
}

impl Service {
    /// Starts building a service around `receiver`. The service name defaults
    /// to the receiver's unqualified type name; override it with
    /// [`ServiceBuilder::name`].
    pub fn build<T: Send + Sync + 'static>(receiver: T) -> ServiceBuilder<T> {
        ServiceBuilder {
            receiver: Arc::new(receiver),
            name: short_type_name::<T>().to_string(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<Arc<Method>> {
        self.methods.get(name).cloned()
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<Method>> {
        self.methods.values()
    }
}

/// Builder collecting typed handlers into a [`Service`].
pub struct ServiceBuilder<T> {
    receiver: Arc<T>,
    name: String,
    methods: HashMap<String, Arc<Method>>,
}

impl<T: Send + Sync + 'static> ServiceBuilder<T> {
    /// Overrides the derived service name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a method.
    ///
    /// Any handler whose argument deserializes and whose reply serializes is
    /// admissible; the error type only needs a `Display` form, which is what
    /// travels back in the response header. Registering a name twice keeps
    /// the later handler.
    pub fn method<A, R, E, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let receiver = Arc::clone(&self.receiver);
        let handler = Arc::new(handler);
        let adapter: Handler = Box::new(move |codec, argv| {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let args: A = codec.decode(&argv)?;
                match (*handler)(receiver, args).await {
                    Ok(reply) => codec.encode(&reply),
                    Err(err) => Err(RpcError::Handler(err.to_string())),
                }
            })
        });
        self.methods.insert(
            name.to_string(),
            Arc::new(Method {
                name: name.to_string(),
                calls: AtomicU64::new(0),
                handler: adapter,
            }),
        );
        self
    }

    pub fn finish(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct SumArgs {
        num1: i32,
        num2: i32,
    }

    struct Foo;

    fn foo_service() -> Service {
        Service::build(Foo)
            .method("Sum", |_foo: Arc<Foo>, args: SumArgs| async move {
                Ok::<_, String>(args.num1 + args.num2)
            })
            .method("Fail", |_foo: Arc<Foo>, _args: i32| async move {
                Err::<i32, _>("always broken".to_string())
            })
            .finish()
    }

    #[test]
    fn derives_service_name_from_receiver() {
        assert_eq!(foo_service().name(), "Foo");
        let renamed = Service::build(Foo).name("Arith").finish();
        assert_eq!(renamed.name(), "Arith");
    }

    #[test]
    fn unknown_method_is_absent() {
        let service = foo_service();
        assert!(service.method("Sum").is_some());
        assert!(service.method("sum").is_none());
    }

    #[tokio::test]
    async fn invoke_decodes_and_counts() {
        let service = foo_service();
        let method = service.method("Sum").unwrap();
        let codec = Codec::Postcard;

        let argv = codec.encode(&SumArgs { num1: 1, num2: 2 }).unwrap();
        let reply = method.invoke(codec, argv).await.unwrap();
        assert_eq!(codec.decode::<i32>(&reply).unwrap(), 3);
        assert_eq!(method.num_calls(), 1);

        let argv = codec.encode(&SumArgs { num1: 4, num2: 5 }).unwrap();
        let reply = method.invoke(codec, argv).await.unwrap();
        assert_eq!(codec.decode::<i32>(&reply).unwrap(), 9);
        assert_eq!(method.num_calls(), 2);
    }

    #[tokio::test]
    async fn handler_error_surfaces_as_text() {
        let service = foo_service();
        let method = service.method("Fail").unwrap();
        let codec = Codec::Json;

        let argv = codec.encode(&0i32).unwrap();
        let err = method.invoke(codec, argv).await.unwrap_err();
        assert_eq!(err.to_string(), "always broken");
    }

    #[tokio::test]
    async fn bad_argument_bytes_fail_decode() {
        let service = foo_service();
        let method = service.method("Sum").unwrap();

        let err = method
            .invoke(Codec::Json, b"not json".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::JsonSerialization(_)));
    }
}
