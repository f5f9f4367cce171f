use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::Result;

/// String keys codecs are selected by in the option handshake.
pub mod kind {
    /// Compact binary encoding, the default.
    pub const POSTCARD: &str = "application/postcard";
    /// Human-readable encoding, mostly useful for debugging.
    pub const JSON: &str = "application/json";
}

/// Body and header codec negotiated per connection.
///
/// The enum allows for future extensibility; both ends resolve the option
/// frame's string key through [`Codec::from_kind`] and an unknown key rejects
/// the handshake. Framing is not the codec's concern: every encoded value is
/// length-prefixed by the transport, so the encodings do not need to be
/// self-delimiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Postcard,
    Json,
}

impl Codec {
    /// Resolves a codec from its option-frame key.
    pub fn from_kind(kind: &str) -> Option<Codec> {
        match kind {
            kind::POSTCARD => Some(Codec::Postcard),
            kind::JSON => Some(Codec::Json),
            _ => None,
        }
    }

    /// The option-frame key for this codec.
    pub fn kind(&self) -> &'static str {
        match self {
            Codec::Postcard => kind::POSTCARD,
            Codec::Json => kind::JSON,
        }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Postcard => Ok(postcard::to_allocvec(value)?),
            Codec::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::Postcard => Ok(postcard::from_bytes(data)?),
            Codec::Json => Ok(serde_json::from_slice(data)?),
        }
    }

    /// Placeholder body sent when no useful reply exists: parse failures,
    /// resolution failures, handler errors and handler timeouts.
    pub fn invalid_body(&self) -> Vec<u8> {
        self.encode(&()).unwrap_or_default()
    }
}
