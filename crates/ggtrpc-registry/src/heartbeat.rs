//! Client-side liveness reporting for registered servers.

use std::time::Duration;

use tracing::{error, info};

use ggtrpc_common::{Result, RpcError};

use crate::registry::{DEFAULT_TIMEOUT, SERVER_HEADER};

/// Keeps a server's registry entry alive: one immediate heartbeat, then one
/// per period. A zero period defaults to the registry timeout minus a
/// minute, so an entry is refreshed before it can expire.
///
/// Returns after the first failed send. Callers typically spawn this, which
/// is why the addresses are taken by value.
pub async fn heartbeat(registry: String, addr: String, period: Duration) {
    let period = if period.is_zero() {
        DEFAULT_TIMEOUT - Duration::from_secs(60)
    } else {
        period
    };
    let client = reqwest::Client::new();
    if let Err(err) = send_heartbeat(&client, &registry, &addr).await {
        error!("Heartbeat to {} failed: {}", registry, err);
        return;
    }
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // the first tick completes immediately
    loop {
        ticker.tick().await;
        if let Err(err) = send_heartbeat(&client, &registry, &addr).await {
            error!("Heartbeat to {} failed: {}", registry, err);
            return;
        }
    }
}

async fn send_heartbeat(client: &reqwest::Client, registry: &str, addr: &str) -> Result<()> {
    info!("{} sending heartbeat to registry {}", addr, registry);
    client
        .post(registry)
        .header(SERVER_HEADER, addr)
        .send()
        .await
        .map_err(|err| RpcError::Connection(err.to_string()))?;
    Ok(())
}
