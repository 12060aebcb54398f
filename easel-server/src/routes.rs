use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use easel_core::Loader;

use crate::handlers;
use crate::state::AppState;

pub fn create_router<L: Loader + 'static>(state: Arc<AppState<L>>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/images/generations", post(handlers::generate_image::<L>))
        .route("/v1/images/latest.png", get(handlers::latest_image::<L>))
        .with_state(state)
}
