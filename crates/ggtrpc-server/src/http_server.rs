//! HTTP entry point for the RPC server.
//!
//! Clients tunnel into the binary protocol with a `CONNECT` request; after
//! the `200 Connected` status line the stream is hijacked and handed to the
//! normal serve loop. The exchange is handled directly on the TCP stream;
//! an HTTP library cannot give the raw socket back with the verbatim status
//! line the protocol promises. A plain-text diagnostics page is served next
//! to the RPC path.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use ggtrpc_common::protocol::{CONNECTED_STATUS, DEFAULT_DEBUG_PATH, DEFAULT_RPC_PATH};
use ggtrpc_common::{Result, RpcError};

use crate::server::Server;

/// Upper bound on an HTTP request head.
const MAX_HEAD_SIZE: usize = 8 * 1024;

impl Server {
    /// Accepts HTTP connections, upgrading `CONNECT` requests on
    /// [`DEFAULT_RPC_PATH`] into RPC connections and answering
    /// [`DEFAULT_DEBUG_PATH`] with diagnostics.
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("HTTP connection from {}", peer);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_http_conn(stream).await {
                            warn!("HTTP connection error: {}", err);
                        }
                    });
                }
                Err(err) => {
                    error!("Accept error: {}", err);
                    return;
                }
            }
        }
    }

    async fn handle_http_conn(self: Arc<Self>, mut stream: TcpStream) -> Result<()> {
        let head = read_head(&mut stream).await?;
        let request_line = head.lines().next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();

        if method == "CONNECT" && path == DEFAULT_RPC_PATH {
            stream
                .write_all(format!("HTTP/1.0 {}\n\n", CONNECTED_STATUS).as_bytes())
                .await?;
            stream.flush().await?;
            self.serve_conn(stream).await;
        } else if method == "GET" && path == DEFAULT_DEBUG_PATH {
            let body = self.debug_page();
            let response = format!(
                "HTTP/1.0 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await?;
            stream.flush().await?;
        } else {
            stream
                .write_all(
                    b"HTTP/1.0 405 Method Not Allowed\r\n\
                      Content-Type: text/plain; charset=utf-8\r\n\r\n\
                      405 must CONNECT\n",
                )
                .await?;
            stream.flush().await?;
        }
        Ok(())
    }

    fn debug_page(&self) -> String {
        let mut page = String::from("ggt-rpc services\n\n");
        for (service, methods) in self.services_snapshot() {
            for (method, calls) in methods {
                page.push_str(&format!("{}.{}: {} calls\n", service, method, calls));
            }
        }
        page
    }
}

/// Reads the request head byte by byte so no bytes of the tunneled protocol
/// are consumed from the stream.
async fn read_head(stream: &mut TcpStream) -> Result<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            break;
        }
        if head.len() > MAX_HEAD_SIZE {
            return Err(RpcError::Connection("request head too large".to_string()));
        }
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}
