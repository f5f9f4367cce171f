use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    /// Returned by client operations once the connection was closed locally
    /// or torn down by a transport failure.
    #[error("connection is shut down")]
    Shutdown,

    #[error("rpc client: connect timeout")]
    ConnectTimeout,

    /// A synchronous call abandoned by its deadline.
    #[error("rpc client: call failed: {0}")]
    CallFailed(String),

    #[error("rpc client err: wrong format '{0}', expect protocol@addr")]
    AddressFormat(String),

    #[error("invalid codec type {0}")]
    InvalidCodec(String),

    #[error("invalid magic number {0:#x}")]
    InvalidMagic(u32),

    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormedServiceMethod(String),

    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    #[error("rpc: service already defined: {0}")]
    DuplicateService(String),

    /// Error text produced by a service method, or carried back to the
    /// client in a response header. Displayed verbatim.
    #[error("{0}")]
    Handler(String),

    /// Reply bytes arrived but could not be decoded into the caller's type.
    #[error("reading body: {0}")]
    ReadBody(String),

    #[error("Frame too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;
