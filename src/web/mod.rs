//! Web server module
//!
//! The axum request adapter in front of the session pool: top-level
//! service routes plus the `/api` surface, with permissive CORS.

pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::AppState;

/// Build the complete axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::root_router(state.clone()))
        .nest("/api", routes::api_router(state))
        .layer(cors)
}

/// Start the web server on the given port. Blocks until the listener dies.
pub async fn start_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
