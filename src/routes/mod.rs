//! Route modules for the transfer server

pub mod health;
pub mod tasks;
pub mod xfer;

use axum::{extract::DefaultBodyLimit, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/health", axum::routing::get(health::health_check))
        .nest("/xfer", xfer::router())
        .nest("/task", tasks::router())
        .layer(DefaultBodyLimit::max(state.config().server.max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
