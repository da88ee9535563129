use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::router::build_router;
use super::state::AppState;

/// Serve the admin REST API until the token is cancelled.
pub async fn run_http_server(
    state: Arc<AppState>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "admin HTTP server listening");

    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("admin HTTP server stopped");
    Ok(())
}
