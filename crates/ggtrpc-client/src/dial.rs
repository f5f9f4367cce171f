//! Connection establishment: plain TCP, Unix sockets, the HTTP `CONNECT`
//! upgrade, and the `protocol@addr` dispatcher.

use std::future::Future;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use ggtrpc_common::protocol::{CONNECTED_STATUS, DEFAULT_RPC_PATH};
use ggtrpc_common::transport::Connection;
use ggtrpc_common::{Options, Result, RpcError};

use crate::client::Client;

/// Connects to an RPC server over TCP.
pub async fn dial(address: &str, options: Option<Options>) -> Result<Client> {
    dial_with(
        |conn, options| async move { Client::with_conn(conn, &options).await },
        address,
        options,
    )
    .await
}

/// Connects over TCP with an injectable client constructor.
///
/// Both the TCP connect and the construction are bounded by the options'
/// connect timeout (zero = unbounded); a construction overrunning the budget
/// is aborted so the connection drops.
pub async fn dial_with<F, Fut>(
    factory: F,
    address: &str,
    options: Option<Options>,
) -> Result<Client>
where
    F: FnOnce(TcpStream, Options) -> Fut,
    Fut: Future<Output = Result<Client>> + Send + 'static,
{
    let options = Options::normalize(options);
    let budget = options.connect_timeout;
    let conn = if budget.is_zero() {
        TcpStream::connect(address).await?
    } else {
        match timeout(budget, TcpStream::connect(address)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(RpcError::ConnectTimeout),
        }
    };
    construct_client(conn, options, factory).await
}

/// Connects to an RPC server over a Unix socket.
#[cfg(unix)]
pub async fn dial_unix(path: &str, options: Option<Options>) -> Result<Client> {
    let options = Options::normalize(options);
    let budget = options.connect_timeout;
    let connect = tokio::net::UnixStream::connect(path);
    let conn = if budget.is_zero() {
        connect.await?
    } else {
        match timeout(budget, connect).await {
            Ok(conn) => conn?,
            Err(_) => return Err(RpcError::ConnectTimeout),
        }
    };
    construct_client(conn, options, |conn, options| async move {
        Client::with_conn(conn, &options).await
    })
    .await
}

/// Connects to an RPC server listening behind its HTTP entry point.
pub async fn dial_http(address: &str, options: Option<Options>) -> Result<Client> {
    dial_with(
        |conn, options| async move {
            let conn = http_connect(conn).await?;
            Client::with_conn(conn, &options).await
        },
        address,
        options,
    )
    .await
}

/// Dials an address of the form `protocol@addr`, e.g. `tcp@127.0.0.1:7000`,
/// `unix@/tmp/rpc.sock` or `http@127.0.0.1:7001`. Unknown protocols fall
/// back to TCP.
pub async fn xdial(rpc_addr: &str, options: Option<Options>) -> Result<Client> {
    let mut parts = rpc_addr.splitn(2, '@');
    let (protocol, address) = match (parts.next(), parts.next()) {
        (Some(protocol), Some(address))
            if !protocol.is_empty() && !address.is_empty() && !address.contains('@') =>
        {
            (protocol, address)
        }
        _ => return Err(RpcError::AddressFormat(rpc_addr.to_string())),
    };
    match protocol {
        "http" => dial_http(address, options).await,
        #[cfg(unix)]
        "unix" => dial_unix(address, options).await,
        _ => dial(address, options).await,
    }
}

/// Races client construction against the connect timeout. On expiry the
/// construction task is aborted, dropping (and so closing) the connection.
async fn construct_client<C, F, Fut>(conn: C, options: Options, factory: F) -> Result<Client>
where
    C: Connection,
    F: FnOnce(C, Options) -> Fut,
    Fut: Future<Output = Result<Client>> + Send + 'static,
{
    let budget = options.connect_timeout;
    let mut construction = tokio::spawn(factory(conn, options));
    if budget.is_zero() {
        return match construction.await {
            Ok(result) => result,
            Err(join_err) => Err(RpcError::Connection(join_err.to_string())),
        };
    }
    match timeout(budget, &mut construction).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(RpcError::Connection(join_err.to_string())),
        Err(_) => {
            construction.abort();
            Err(RpcError::ConnectTimeout)
        }
    }
}

/// Performs the `CONNECT` exchange on a fresh connection, returning the
/// stream positioned at the start of the RPC protocol.
async fn http_connect<C: Connection>(mut conn: C) -> Result<C> {
    conn.write_all(format!("CONNECT {} HTTP/1.0\r\n\r\n", DEFAULT_RPC_PATH).as_bytes())
        .await?;
    conn.flush().await?;

    // read the response head one byte at a time so no RPC bytes are consumed
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = conn.read(&mut byte).await?;
        if n == 0 {
            return Err(RpcError::Connection(
                "connection closed during CONNECT handshake".to_string(),
            ));
        }
        head.push(byte[0]);
        if head.ends_with(b"\n\n") || head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() > 4096 {
            return Err(RpcError::Connection(
                "oversized CONNECT response".to_string(),
            ));
        }
    }
    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    if !status_line.contains(CONNECTED_STATUS) {
        return Err(RpcError::Connection(format!(
            "unexpected CONNECT response: {}",
            status_line
        )));
    }
    Ok(conn)
}
