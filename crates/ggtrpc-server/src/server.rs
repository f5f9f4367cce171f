//! The RPC server: accept loops, the per-connection serve loop and request
//! handling with the per-request timeout.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use ggtrpc_common::transport::{framing, split_conn, ConnReader, ConnWriter, Connection};
use ggtrpc_common::{Codec, Header, Options, Result, RpcError, MAGIC_NUMBER};

use crate::service::{Method, Service};

/// An RPC server. One instance holds the service table and serves any number
/// of listeners and connections concurrently.
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

/// One parsed, resolved request, ready to be handled.
struct Request {
    header: Header,
    body: Vec<u8>,
    method: Arc<Method>,
}

/// Outcome of a failed request read. A fatal error tears the connection
/// down; an invalid request is answered with an error response and the
/// serve loop keeps reading.
enum ReadError {
    Fatal(RpcError),
    Invalid { header: Header, cause: RpcError },
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Server {
        Server {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Publishes a service. Fails if a service with the same name is already
    /// registered.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        let name = service.name().to_string();
        if services.contains_key(&name) {
            return Err(RpcError::DuplicateService(name));
        }
        info!("Registered service {}", name);
        services.insert(name, Arc::new(service));
        Ok(())
    }

    /// Resolves `"Service.Method"`, splitting on the last dot.
    pub fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, Arc<Method>)> {
        let dot = service_method
            .rfind('.')
            .ok_or_else(|| RpcError::IllFormedServiceMethod(service_method.to_string()))?;
        let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);
        let service = self
            .services
            .read()
            .unwrap()
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        let method = service
            .method(method_name)
            .ok_or_else(|| RpcError::MethodNotFound(method_name.to_string()))?;
        Ok((service, method))
    }

    /// Snapshot of every service, its methods and their call counts, sorted
    /// by name. Used by the diagnostics page.
    pub fn services_snapshot(&self) -> Vec<(String, Vec<(String, u64)>)> {
        let services = self.services.read().unwrap();
        let mut snapshot: Vec<_> = services
            .values()
            .map(|service| {
                let mut methods: Vec<_> = service
                    .methods()
                    .map(|method| (method.name().to_string(), method.num_calls()))
                    .collect();
                methods.sort();
                (service.name().to_string(), methods)
            })
            .collect();
        snapshot.sort();
        snapshot
    }

    /// Accepts connections until the listener fails, serving each on its own
    /// task.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Connection established from {}", peer);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.serve_conn(stream).await });
                }
                Err(err) => {
                    error!("Accept error: {}", err);
                    return;
                }
            }
        }
    }

    /// Unix-socket variant of [`Server::accept`].
    #[cfg(unix)]
    pub async fn accept_unix(self: Arc<Self>, listener: tokio::net::UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.serve_conn(stream).await });
                }
                Err(err) => {
                    error!("Accept error: {}", err);
                    return;
                }
            }
        }
    }

    /// Serves one connection: option handshake, then the request loop.
    /// Returns when the client hangs up; the connection closes on drop.
    pub async fn serve_conn(self: Arc<Self>, conn: impl Connection) {
        let (mut reader, writer) = split_conn(conn);
        let options = match framing::recv_options(&mut reader).await {
            Ok(options) => options,
            Err(err) => {
                warn!("Option frame error: {}", err);
                return;
            }
        };
        if options.magic_number != MAGIC_NUMBER {
            warn!(
                "{}",
                RpcError::InvalidMagic(options.magic_number)
            );
            return;
        }
        let Some(codec) = Codec::from_kind(&options.codec_type) else {
            warn!("{}", RpcError::InvalidCodec(options.codec_type.clone()));
            return;
        };
        self.serve_codec(reader, writer, codec, options).await;
    }

    async fn serve_codec(
        self: Arc<Self>,
        mut reader: ConnReader,
        writer: ConnWriter,
        codec: Codec,
        options: Options,
    ) {
        let sending = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();
        loop {
            match self.read_request(&mut reader, codec).await {
                Ok(request) => {
                    handlers.spawn(handle_request(
                        request,
                        Arc::clone(&sending),
                        codec,
                        options.handle_timeout,
                    ));
                }
                Err(ReadError::Invalid { mut header, cause }) => {
                    header.error = cause.to_string();
                    send_response(&sending, codec, &header, codec.invalid_body()).await;
                }
                Err(ReadError::Fatal(err)) => {
                    if !is_disconnect(&err) {
                        error!("Read request error: {}", err);
                    }
                    break;
                }
            }
        }
        // wait for in-flight handlers before the write half drops
        while handlers.join_next().await.is_some() {}
    }

    /// Reads one header+body frame and resolves the target method. The body
    /// is consumed even when resolution fails, keeping the stream aligned
    /// for the next request.
    async fn read_request(
        &self,
        reader: &mut ConnReader,
        codec: Codec,
    ) -> std::result::Result<Request, ReadError> {
        let header_bytes = framing::recv_message(reader)
            .await
            .map_err(ReadError::Fatal)?;
        let header: Header = codec.decode(&header_bytes).map_err(ReadError::Fatal)?;
        let body = framing::recv_message(reader).await.map_err(ReadError::Fatal)?;
        match self.find_service(&header.service_method) {
            Ok((_service, method)) => Ok(Request {
                header,
                body,
                method,
            }),
            Err(cause) => Err(ReadError::Invalid { header, cause }),
        }
    }
}

/// Runs one request: the method invocation goes to its own task and, with a
/// non-zero timeout, races a timer. Exactly one branch sends the response; a
/// timed-out invocation keeps running detached and its result is discarded.
async fn handle_request(
    request: Request,
    sending: Arc<Mutex<ConnWriter>>,
    codec: Codec,
    timeout: Duration,
) {
    let Request {
        mut header,
        body,
        method,
    } = request;

    let mut invocation = tokio::spawn(async move { method.invoke(codec, body).await });

    let finished = if timeout.is_zero() {
        invocation.await
    } else {
        tokio::select! {
            finished = &mut invocation => finished,
            _ = tokio::time::sleep(timeout) => {
                header.error = format!(
                    "rpc server: request handle timeout: expect within {:?}",
                    timeout
                );
                send_response(&sending, codec, &header, codec.invalid_body()).await;
                return;
            }
        }
    };

    match finished {
        Ok(Ok(reply)) => {
            header.error.clear();
            send_response(&sending, codec, &header, reply).await;
        }
        Ok(Err(err)) => {
            header.error = err.to_string();
            send_response(&sending, codec, &header, codec.invalid_body()).await;
        }
        Err(join_err) => {
            header.error = format!("rpc server: handler aborted: {}", join_err);
            send_response(&sending, codec, &header, codec.invalid_body()).await;
        }
    }
}

async fn send_response(
    sending: &Mutex<ConnWriter>,
    codec: Codec,
    header: &Header,
    body: Vec<u8>,
) {
    let mut writer = sending.lock().await;
    if let Err(err) = framing::write_frame(&mut *writer, codec, header, &body).await {
        error!("Write response error: {}", err);
    }
}

fn is_disconnect(err: &RpcError) -> bool {
    matches!(
        err,
        RpcError::Io(io_err) if matches!(
            io_err.kind(),
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct SumArgs {
        num1: i32,
        num2: i32,
    }

    struct Foo;

    fn foo_service() -> Service {
        Service::build(Foo)
            .method("Sum", |_foo: Arc<Foo>, args: SumArgs| async move {
                Ok::<_, String>(args.num1 + args.num2)
            })
            .finish()
    }

    #[test]
    fn duplicate_registration_fails() {
        let server = Server::new();
        server.register(foo_service()).unwrap();
        let err = server.register(foo_service()).unwrap_err();
        assert_eq!(err.to_string(), "rpc: service already defined: Foo");
    }

    #[test]
    fn find_service_errors_are_distinct() {
        let server = Server::new();
        server.register(foo_service()).unwrap();

        assert!(server.find_service("Foo.Sum").is_ok());
        assert!(matches!(
            server.find_service("FooSum"),
            Err(RpcError::IllFormedServiceMethod(_))
        ));
        assert!(matches!(
            server.find_service("Bar.Sum"),
            Err(RpcError::ServiceNotFound(_))
        ));
        assert!(matches!(
            server.find_service("Foo.Mul"),
            Err(RpcError::MethodNotFound(_))
        ));
    }

    #[tokio::test]
    async fn serves_requests_over_a_raw_stream() {
        let server = Arc::new(Server::new());
        server.register(foo_service()).unwrap();

        let (mut conn, server_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(Arc::clone(&server).serve_conn(server_side));

        let codec = Codec::Postcard;
        framing::send_options(&mut conn, &Options::default())
            .await
            .unwrap();

        let header = Header {
            service_method: "Foo.Sum".to_string(),
            seq: 7,
            error: String::new(),
        };
        let body = codec.encode(&SumArgs { num1: 1, num2: 2 }).unwrap();
        framing::write_frame(&mut conn, codec, &header, &body)
            .await
            .unwrap();

        let reply_header: Header = codec
            .decode(&framing::recv_message(&mut conn).await.unwrap())
            .unwrap();
        assert_eq!(reply_header.seq, 7);
        assert_eq!(reply_header.service_method, "Foo.Sum");
        assert!(reply_header.error.is_empty());
        let reply: i32 = codec
            .decode(&framing::recv_message(&mut conn).await.unwrap())
            .unwrap();
        assert_eq!(reply, 3);
    }

    #[tokio::test]
    async fn unknown_service_gets_error_response_and_connection_survives() {
        let server = Arc::new(Server::new());
        server.register(foo_service()).unwrap();

        let (mut conn, server_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(Arc::clone(&server).serve_conn(server_side));

        let codec = Codec::Postcard;
        framing::send_options(&mut conn, &Options::default())
            .await
            .unwrap();

        let header = Header {
            service_method: "Nope.Sum".to_string(),
            seq: 1,
            error: String::new(),
        };
        let body = codec.encode(&SumArgs { num1: 0, num2: 0 }).unwrap();
        framing::write_frame(&mut conn, codec, &header, &body)
            .await
            .unwrap();

        let reply_header: Header = codec
            .decode(&framing::recv_message(&mut conn).await.unwrap())
            .unwrap();
        assert!(reply_header.error.contains("can't find service Nope"));
        framing::recv_message(&mut conn).await.unwrap(); // drain sentinel body

        // the same connection still serves valid requests
        let header = Header {
            service_method: "Foo.Sum".to_string(),
            seq: 2,
            error: String::new(),
        };
        let body = codec.encode(&SumArgs { num1: 2, num2: 3 }).unwrap();
        framing::write_frame(&mut conn, codec, &header, &body)
            .await
            .unwrap();
        let reply_header: Header = codec
            .decode(&framing::recv_message(&mut conn).await.unwrap())
            .unwrap();
        assert!(reply_header.error.is_empty());
        let reply: i32 = codec
            .decode(&framing::recv_message(&mut conn).await.unwrap())
            .unwrap();
        assert_eq!(reply, 5);
    }

    #[tokio::test]
    async fn wrong_magic_number_closes_the_connection() {
        let server = Arc::new(Server::new());
        let (mut conn, server_side) = tokio::io::duplex(1024);
        let handle = tokio::spawn(Arc::clone(&server).serve_conn(server_side));

        let options = Options {
            magic_number: 0x1234,
            ..Options::default()
        };
        framing::send_options(&mut conn, &options).await.unwrap();

        handle.await.unwrap();
        let err = framing::recv_message(&mut conn).await.unwrap_err();
        assert!(matches!(err, RpcError::Io(_)));
    }
}
