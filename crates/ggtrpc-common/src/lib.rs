//! GGT RPC Common Types and Transport
//!
//! This crate provides the shared protocol and wire infrastructure used by
//! every component of the GGT RPC system:
//!
//! - **Protocol layer**: the request/response [`Header`], the connection
//!   handshake [`Options`], and the [`RpcError`] type
//! - **Transport layer**: codec selection and length-prefixed framing over
//!   any bidirectional byte stream
//!
//! # Wire format
//!
//! Every connection opens with a single length-prefixed JSON option frame
//! carrying the magic number, the codec key and the timeouts. All traffic
//! after the handshake is a stream of frames, each a codec-encoded `Header`
//! followed by a codec-encoded body, both length-prefixed.
//!
//! # Example
//!
//! ```
//! use ggtrpc_common::{Codec, Header, Options};
//!
//! let options = Options::default();
//! let codec = Codec::from_kind(&options.codec_type).unwrap();
//!
//! let header = Header {
//!     service_method: "Foo.Sum".to_string(),
//!     seq: 1,
//!     error: String::new(),
//! };
//! let bytes = codec.encode(&header).unwrap();
//! let decoded: Header = codec.decode(&bytes).unwrap();
//! assert_eq!(header, decoded);
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::{Header, Options, Result, RpcError, MAGIC_NUMBER};
pub use transport::Codec;
