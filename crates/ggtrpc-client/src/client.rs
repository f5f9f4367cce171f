//! The client engine: the outstanding-call table, the single receive loop
//! per connection, and the call entry points.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::debug;

use ggtrpc_common::transport::{framing, split_conn, ConnReader, ConnWriter, Connection};
use ggtrpc_common::{Codec, Header, Options, Result, RpcError};

/// Completion payload delivered to an outstanding call: raw reply bytes on
/// success, or the error that ended the call.
type Completion = std::result::Result<Vec<u8>, RpcError>;

struct Pending {
    tx: oneshot::Sender<Completion>,
}

struct CallTable {
    /// Next sequence number; strictly monotonic, starting at 1.
    seq: u64,
    pending: HashMap<u64, Pending>,
    /// The user called `close`.
    closing: bool,
    /// The receive loop tore the connection down.
    shutdown: bool,
}

struct ClientInner {
    codec: Codec,
    /// Linearizes request frames.
    sending: AsyncMutex<ConnWriter>,
    calls: Mutex<CallTable>,
}

/// An RPC client. Cheap to clone; any number of calls may be outstanding on
/// one connection and clones share it.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

/// Handle to one in-flight call, returned by [`Client::go_call`].
///
/// Dropping the handle before completion removes the call from the
/// outstanding table; a reply that arrives later is drained and discarded.
pub struct Call<R> {
    seq: u64,
    service_method: String,
    rx: oneshot::Receiver<Completion>,
    client: Arc<ClientInner>,
    _reply: PhantomData<fn() -> R>,
}

impl Client {
    /// Builds a client over an established connection: resolves the codec,
    /// sends the option frame and spawns the receive loop.
    ///
    /// Most callers want [`crate::dial`] instead; this constructor is the
    /// seam for pre-connected or upgraded streams.
    pub async fn with_conn(conn: impl Connection, options: &Options) -> Result<Client> {
        let codec = Codec::from_kind(&options.codec_type)
            .ok_or_else(|| RpcError::InvalidCodec(options.codec_type.clone()))?;
        let (reader, mut writer) = split_conn(conn);
        framing::send_options(&mut writer, options).await?;
        let inner = Arc::new(ClientInner {
            codec,
            sending: AsyncMutex::new(writer),
            calls: Mutex::new(CallTable {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        });
        tokio::spawn(receive(Arc::clone(&inner), reader));
        Ok(Client { inner })
    }

    /// Whether the client can still issue calls.
    pub fn is_available(&self) -> bool {
        let calls = self.inner.calls.lock().unwrap();
        !calls.closing && !calls.shutdown
    }

    /// Closes the connection. Outstanding calls fail once the receive loop
    /// notices the shutdown. Repeated closes return [`RpcError::Shutdown`].
    pub async fn close(&self) -> Result<()> {
        {
            let mut calls = self.inner.calls.lock().unwrap();
            if calls.closing {
                return Err(RpcError::Shutdown);
            }
            calls.closing = true;
        }
        let mut writer = self.inner.sending.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    /// Issues a call without waiting for its completion. Errors, including
    /// a shut-down client and write failures, surface when the returned
    /// handle is awaited.
    pub async fn go_call<A, R>(&self, service_method: &str, args: &A) -> Call<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let (tx, rx) = oneshot::channel();
        let seq = match self.inner.codec.encode(args) {
            Ok(argv) => self.send(service_method, argv, tx).await,
            Err(err) => {
                let _ = tx.send(Err(err));
                0
            }
        };
        Call {
            seq,
            service_method: service_method.to_string(),
            rx,
            client: Arc::clone(&self.inner),
            _reply: PhantomData,
        }
    }

    /// Invokes the named method and waits for it to complete.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.go_call(service_method, args).await.done().await
    }

    /// Like [`Client::call`], but gives up after `timeout`. On expiry the
    /// call is removed from the outstanding table and the server's eventual
    /// reply is discarded; the server-side handler is not cancelled.
    pub async fn call_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let call = self.go_call(service_method, args).await;
        match tokio::time::timeout(timeout, call.done()).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::CallFailed("deadline has elapsed".to_string())),
        }
    }

    /// Registers the call and writes its request frame, all under the send
    /// lock. Returns the assigned sequence number, or 0 when registration
    /// failed (the completion carries the error).
    async fn send(
        &self,
        service_method: &str,
        argv: Vec<u8>,
        tx: oneshot::Sender<Completion>,
    ) -> u64 {
        let inner = &self.inner;
        let mut writer = inner.sending.lock().await;

        let seq = {
            let mut calls = inner.calls.lock().unwrap();
            if calls.closing || calls.shutdown {
                drop(calls);
                let _ = tx.send(Err(RpcError::Shutdown));
                return 0;
            }
            let seq = calls.seq;
            calls.pending.insert(seq, Pending { tx });
            calls.seq += 1;
            seq
        };

        let header = Header {
            service_method: service_method.to_string(),
            seq,
            error: String::new(),
        };
        if let Err(err) = framing::write_frame(&mut *writer, inner.codec, &header, &argv).await {
            // the entry may be gone already: a partial write can elicit a
            // response the receive loop has consumed
            if let Some(pending) = remove_call(inner, seq) {
                let _ = pending.tx.send(Err(err));
            }
        }
        seq
    }
}

impl<R: DeserializeOwned> Call<R> {
    /// Sequence number assigned to this call (0 if registration failed).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Waits for the reply and decodes it.
    pub async fn done(mut self) -> Result<R> {
        match (&mut self.rx).await {
            Ok(Ok(bytes)) => self
                .client
                .codec
                .decode(&bytes)
                .map_err(|err| RpcError::ReadBody(err.to_string())),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(RpcError::Shutdown),
        }
    }
}

impl<R> Drop for Call<R> {
    fn drop(&mut self) {
        // no-op after normal completion; deregisters an abandoned call
        remove_call(&self.client, self.seq);
    }
}

fn remove_call(inner: &ClientInner, seq: u64) -> Option<Pending> {
    inner.calls.lock().unwrap().pending.remove(&seq)
}

/// Fails every outstanding call with the connection error and marks the
/// client shut down. Takes the send lock first, then the table lock; this is
/// the only place both are held.
async fn terminate_calls(inner: &ClientInner, cause: RpcError) {
    let _sending = inner.sending.lock().await;
    let mut calls = inner.calls.lock().unwrap();
    calls.shutdown = true;
    let message = cause.to_string();
    for (_, pending) in calls.pending.drain() {
        let _ = pending.tx.send(Err(RpcError::Connection(message.clone())));
    }
}

/// The per-connection receive loop: demultiplexes responses by sequence
/// number into the outstanding-call table. Runs until the first read error,
/// then terminates every pending call.
async fn receive(inner: Arc<ClientInner>, mut reader: ConnReader) {
    let cause = loop {
        let header: Header = match framing::recv_message(&mut reader).await {
            Ok(bytes) => match inner.codec.decode(&bytes) {
                Ok(header) => header,
                Err(err) => break err,
            },
            Err(err) => break err,
        };
        // the body frame is always consumed, which keeps the stream aligned
        // and doubles as the drain for untracked or failed calls
        let body = match framing::recv_message(&mut reader).await {
            Ok(bytes) => bytes,
            Err(err) => break err,
        };
        match remove_call(&inner, header.seq) {
            // a partially failed write leaves no entry; drop the body
            None => {}
            Some(pending) => {
                let completion = if header.error.is_empty() {
                    Ok(body)
                } else {
                    Err(RpcError::Handler(header.error))
                };
                let _ = pending.tx.send(completion);
            }
        }
    };
    debug!("Receive loop ended: {}", cause);
    terminate_calls(&inner, cause).await;
}
