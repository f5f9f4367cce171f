use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::transport::codec::kind;

/// Marks the opening option frame of every GGT RPC connection.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Path the RPC server answers `CONNECT` requests on.
pub const DEFAULT_RPC_PATH: &str = "/_ggt-rpc_";

/// Path of the plain-text diagnostics page.
pub const DEFAULT_DEBUG_PATH: &str = "/_ggt-rpc_/debug";

/// Status expected by the client in the `CONNECT` response line.
pub const CONNECTED_STATUS: &str = "200 Connected to GGT RPC";

/// Frame header preceding every request and response body.
///
/// `seq` is chosen by the client and echoed by the server so responses can be
/// matched to outstanding calls in any order. `error` is empty on success;
/// when non-empty the body is a placeholder and must not be decoded as a
/// reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub service_method: String,
    pub seq: u64,
    pub error: String,
}

/// Connection handshake, sent once by the client as length-prefixed JSON so
/// the server can decode it before a codec has been negotiated.
///
/// Timeouts travel as integer nanoseconds; zero means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub magic_number: u32,
    pub codec_type: String,
    #[serde(with = "duration_nanos")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_nanos")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: kind::POSTCARD.to_string(),
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    /// Fills in defaults for an optional, possibly partial set of options.
    ///
    /// The magic number is always reset to the canonical constant and an
    /// empty codec key falls back to the default codec.
    pub fn normalize(options: Option<Options>) -> Options {
        let mut options = options.unwrap_or_default();
        options.magic_number = MAGIC_NUMBER;
        if options.codec_type.is_empty() {
            options.codec_type = kind::POSTCARD.to_string();
        }
        options
    }
}

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
