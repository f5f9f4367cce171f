//! Core protocol types: the per-call [`Header`], the handshake [`Options`],
//! and the [`RpcError`] enum shared by every crate in the workspace.

pub mod error;
pub mod header;

pub use error::{Result, RpcError};
pub use header::{
    Header, Options, CONNECTED_STATUS, DEFAULT_DEBUG_PATH, DEFAULT_RPC_PATH, MAGIC_NUMBER,
};
