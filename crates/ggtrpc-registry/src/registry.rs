//! The registry service: a map of server addresses refreshed by heartbeats,
//! served over HTTP.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use ggtrpc_common::Result;

/// Path the registry is served on.
pub const DEFAULT_REGISTRY_PATH: &str = "/_ggt-rpc_/ggt-registry";

/// Request header carrying the heartbeating server's address.
pub const SERVER_HEADER: &str = "X-GGT-RPC-SERVER";

/// Response header carrying the comma-separated alive addresses.
pub const SERVER_LIST_HEADER: &str = "X-GGT-RPC-SERVER-LIST";

/// How long a server stays listed without a fresh heartbeat.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Address directory with liveness expiry.
///
/// `POST` with [`SERVER_HEADER`] inserts or refreshes an entry; `GET` prunes
/// expired entries and reports the remainder in [`SERVER_LIST_HEADER`].
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Registry {
    /// A registry whose entries expire after `timeout`; zero means entries
    /// never expire.
    pub fn new(timeout: Duration) -> Registry {
        Registry {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts or refreshes a server entry.
    pub fn put_server(&self, addr: &str) {
        let mut servers = self.servers.lock().unwrap();
        servers.insert(addr.to_string(), Instant::now());
    }

    /// Prunes expired entries and returns the sorted alive addresses.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        let now = Instant::now();
        let timeout = self.timeout;
        servers.retain(|_, heartbeat| timeout.is_zero() || *heartbeat + timeout > now);
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// Serves the registry over HTTP until the listener fails.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("Registry listening on {}", listener.local_addr()?);
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let registry = Arc::clone(&self);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let registry = Arc::clone(&registry);
                    async move { registry.handle(req) }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving registry connection: {}", err);
                }
            });
        }
    }

    fn handle(
        self: Arc<Self>,
        req: Request<Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        if req.uri().path() != DEFAULT_REGISTRY_PATH {
            return Ok(status_response(StatusCode::NOT_FOUND));
        }
        let response = if req.method() == Method::GET {
            let list = self.alive_servers().join(",");
            match Response::builder()
                .header(SERVER_LIST_HEADER, list)
                .body(Full::new(Bytes::new()))
            {
                Ok(response) => response,
                Err(err) => {
                    error!("Failed to build server list response: {}", err);
                    status_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        } else if req.method() == Method::POST {
            match req
                .headers()
                .get(SERVER_HEADER)
                .and_then(|value| value.to_str().ok())
            {
                Some(addr) if !addr.is_empty() => {
                    debug!("Heartbeat from {}", addr);
                    self.put_server(addr);
                    status_response(StatusCode::OK)
                }
                _ => status_response(StatusCode::INTERNAL_SERVER_ERROR),
            }
        } else {
            status_response(StatusCode::METHOD_NOT_ALLOWED)
        };
        Ok(response)
    }
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("static response")
}
