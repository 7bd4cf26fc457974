//! Orchestrator hub: owns the blackboard, routes events to websocket rooms and
//! serves the HTTP and JSON-RPC surfaces.

pub mod api;
pub mod blackboard;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod rooms;

use config::Config;
use error::HubError;
use hub::HubState;
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

pub fn parse_addr(addr: &str) -> Result<SocketAddr, HubError> {
    let parsed: SocketAddr = addr.parse().map_err(|err: std::net::AddrParseError| HubError::InvalidAddr {
        addr: addr.to_string(),
        reason: err.to_string(),
    })?;
    if !parsed.ip().is_loopback() {
        return Err(HubError::NonLoopback(addr.to_string()));
    }
    Ok(parsed)
}

/// Start the background loops and serve until `shutdown` resolves.
pub async fn serve(
    config: Config,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), HubError> {
    serve_hub(Arc::new(HubState::new(config)), listener, shutdown).await
}

/// Serve an existing hub. On `shutdown` every socket is closed and the
/// background loops stop; the blackboard stays with the caller.
pub async fn serve_hub(
    hub: Arc<HubState>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), HubError> {
    let addr = listener.local_addr().map_err(HubError::Bind)?;
    let background = [hub.clone().start_stale_reaper(), hub.clone().start_dispatch()];
    hub.announce("Service started.").await;
    info!(event = "hub_start", addr = %addr);

    let closing = hub.clone();
    let result = axum::serve(
        listener,
        api::router(hub).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        closing.shutdown().await;
    })
    .await
    .map_err(HubError::Serve);

    for task in background.into_iter().flatten() {
        task.abort();
    }
    info!(event = "hub_stop", addr = %addr);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_addresses_only() {
        assert!(parse_addr("127.0.0.1:8000").is_ok());
        assert!(matches!(
            parse_addr("0.0.0.0:8000"),
            Err(HubError::NonLoopback(_))
        ));
        assert!(matches!(
            parse_addr("localhost"),
            Err(HubError::InvalidAddr { .. })
        ));
    }
}
