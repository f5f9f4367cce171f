//! GGT RPC Server
//!
//! This crate provides the server half of GGT RPC: a reflective-style
//! service registry built from typed handler closures, the accept and serve
//! loops, per-request handle timeouts, and the HTTP `CONNECT` entry point.
//!
//! # Example
//!
//! ```no_run
//! use ggtrpc_server::{Server, Service};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { num1: i32, num2: i32 }
//!
//! struct Foo;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Arc::new(Server::new());
//!     let service = Service::build(Foo)
//!         .method("Sum", |_foo: Arc<Foo>, args: Args| async move {
//!             Ok::<_, String>(args.num1 + args.num2)
//!         })
//!         .finish();
//!     server.register(service).unwrap();
//!
//!     let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
//!     server.accept(listener).await;
//! }
//! ```

pub mod http_server;
pub mod server;
pub mod service;

pub use server::Server;
pub use service::{Method, Service, ServiceBuilder};

use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::net::TcpListener;

use ggtrpc_common::Result;

/// Process-wide default server backing the free-function entry points.
static DEFAULT_SERVER: Lazy<Arc<Server>> = Lazy::new(|| Arc::new(Server::new()));

/// The default server instance.
pub fn default_server() -> Arc<Server> {
    Arc::clone(&DEFAULT_SERVER)
}

/// Registers a service with the default server.
pub fn register(service: Service) -> Result<()> {
    DEFAULT_SERVER.register(service)
}

/// Accepts connections on the default server.
pub async fn accept(listener: TcpListener) {
    default_server().accept(listener).await
}

/// Serves the HTTP entry point on the default server.
pub async fn serve_http(listener: TcpListener) {
    default_server().serve_http(listener).await
}
