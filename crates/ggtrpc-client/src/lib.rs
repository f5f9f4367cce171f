//! GGT RPC Client
//!
//! The client multiplexes any number of concurrent calls over one
//! connection: requests carry a client-chosen sequence number, a single
//! background task demultiplexes responses back to their callers, and both
//! connection establishment and individual calls can be bounded by
//! deadlines.
//!
//! # Example
//!
//! ```no_run
//! use ggtrpc_client::dial;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { num1: i32, num2: i32 }
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = dial("127.0.0.1:7000", None).await.unwrap();
//!     let reply: i32 = client
//!         .call("Foo.Sum", &Args { num1: 1, num2: 2 })
//!         .await
//!         .unwrap();
//!     assert_eq!(reply, 3);
//! }
//! ```

pub mod client;
pub mod dial;

pub use client::{Call, Client};
pub use dial::{dial, dial_http, dial_with, xdial};

#[cfg(unix)]
pub use dial::dial_unix;
