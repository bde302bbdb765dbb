pub mod reply;
pub mod status;

use crate::state::AppState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

/// The full relay API; browsers on any origin may call it
pub fn configure(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(reply::routes(state.clone()))
        .merge(status::routes(state))
        .layer(cors)
}
