//! Reference endpoint for chunkferry uploads.
//!
//! Accepts the multipart chunk posts and offset queries sent by the client
//! and reassembles files under a root directory.

pub mod error;
pub mod path;
pub mod routes;
pub mod storage;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use error::EndpointError;
pub use routes::AppState;
pub use storage::UploadStore;

/// Path the upload handler is mounted on.
pub const UPLOAD_ROUTE: &str = "/upload";

/// Default request body limit: 64 MiB, enough for any sane chunk size.
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route(UPLOAD_ROUTE, post(routes::upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, route = UPLOAD_ROUTE, "endpoint listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("endpoint stopped");
    Ok(())
}
