//! GGT RPC Registry
//!
//! A minimal directory service: RPC servers announce themselves with
//! periodic heartbeats and clients fetch the alive-address list over HTTP.
//! The registry only lists addresses; it does not route calls.
//!
//! # Example
//!
//! ```no_run
//! use ggtrpc_registry::{heartbeat, Registry};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:9999").await.unwrap();
//!     let registry = Arc::new(Registry::default());
//!     tokio::spawn(registry.run(listener));
//!
//!     tokio::spawn(heartbeat(
//!         "http://127.0.0.1:9999/_ggt-rpc_/ggt-registry".to_string(),
//!         "127.0.0.1:7000".to_string(),
//!         Duration::ZERO,
//!     ));
//! }
//! ```

pub mod heartbeat;
pub mod registry;

pub use heartbeat::heartbeat;
pub use registry::{
    Registry, DEFAULT_REGISTRY_PATH, DEFAULT_TIMEOUT, SERVER_HEADER, SERVER_LIST_HEADER,
};
