pub mod routes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::registry::PoolRegistry;

use self::routes::{
    deposit_handler, health_handler, latest_root_handler, nullifier_handler, path_handler,
    root_known_handler, AppState,
};

/// Read-only proof-input API over every registered pool.
pub fn router(registry: Arc<PoolRegistry>) -> Router {
    let state = AppState { registry };
    Router::new()
        .route("/health", get(health_handler))
        .route("/pool/{address}/root/latest", get(latest_root_handler))
        .route("/pool/{address}/root/{root}/known", get(root_known_handler))
        .route("/pool/{address}/path/{leaf_index}", get(path_handler))
        .route("/pool/{address}/nullifier/{hash}", get(nullifier_handler))
        .route("/pool/{address}/deposit/{commitment}", get(deposit_handler))
        .with_state(state)
}

/// Bind `addr` and serve the API until `shutdown` resolves.
///
/// Returns the server task and the bound address (useful with port 0).
pub async fn start_server<F>(
    registry: Arc<PoolRegistry>,
    addr: SocketAddr,
    shutdown: F,
) -> Result<(JoinHandle<()>, SocketAddr), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    let app = router(registry);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!("http server stopped: {e}");
        }
    });

    Ok((handle, bound_addr))
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind listener: {0}")]
    Bind(#[from] std::io::Error),
}
