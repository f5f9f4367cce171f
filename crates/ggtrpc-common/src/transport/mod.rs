//! Codec selection and wire framing.
//!
//! The transport layer is deliberately stream-agnostic: TCP sockets, Unix
//! sockets and hijacked HTTP connections all satisfy [`Connection`] and are
//! split into boxed halves so the serve and receive loops can share one
//! implementation.

pub mod codec;
pub mod framing;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::Codec;
pub use framing::{
    recv_message, recv_options, send_message, send_options, write_frame, MAX_MESSAGE_SIZE,
};

/// A bidirectional byte stream the RPC protocol can run over.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Connection for T {}

/// Owned, type-erased read half of a split [`Connection`].
pub type ConnReader = Box<dyn AsyncRead + Send + Unpin>;

/// Owned, type-erased write half of a split [`Connection`].
pub type ConnWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Splits a connection into independently owned halves.
///
/// The reader is consumed by the single per-connection read loop; the writer
/// goes behind the sender lock.
pub fn split_conn(conn: impl Connection) -> (ConnReader, ConnWriter) {
    let (reader, writer) = tokio::io::split(conn);
    (Box::new(reader), Box::new(writer))
}
