//! Listener setup.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::ServiceExt;
use axum::extract::Request;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::normalize_path::NormalizePathLayer;

use crate::analytics::Analytics;
use crate::config::RelayConfig;
use crate::queue::Queue;
use crate::web::{self, AppState};

/// Open the queue store and start serving.
///
/// Returns the bound address (useful when the port is 0) and the server task.
pub async fn start(config: RelayConfig) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let queue = Queue::open(&config.db_path)
        .with_context(|| format!("opening queue store {}", config.db_path))?;
    if config.ua_id.is_none() {
        tracing::info!("UA_ID not set, analytics disabled");
    }
    if config.byoo_consumer_key.is_empty() {
        tracing::warn!("BYOO_CONSUMERKEY not set, BYOO logins will fail at the provider");
    }
    let analytics = Analytics::new(config.ua_id.clone());
    start_with_state(Arc::new(AppState {
        config,
        queue,
        analytics,
    }))
    .await
}

/// Start serving with prebuilt state.
pub async fn start_with_state(
    state: Arc<AppState>,
) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let listen_addr = state.config.listen_addr();
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    let addr = listener.local_addr()?;
    // Path rewrites have to happen before the router picks a route.
    let app = ServiceBuilder::new()
        .layer(NormalizePathLayer::trim_trailing_slash())
        .map_request(web::canonical_route)
        .service(web::router(state));

    let handle = tokio::spawn(async move {
        axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
            .await
            .context("HTTP server failed")
    });
    Ok((addr, handle))
}

/// Serve until the server task exits.
pub async fn run(config: RelayConfig) -> Result<()> {
    let static_dir = config.static_dir.clone();
    let (addr, handle) = start(config).await?;
    tracing::info!(%addr, static_dir = %static_dir.display(), "deploy relay listening");
    handle.await.context("server task panicked")?
}
