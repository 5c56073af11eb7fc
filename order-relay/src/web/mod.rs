//! Web server module for receiving orders.
//!
//! The server only validates that an order is a non-empty JSON object and
//! hands it to the publisher; it answers once the broker has it.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::queue::Broker;

pub use handlers::{health, submit_order, AppState, HealthResponse, OrderResponse};

/// Build the HTTP router.
pub fn router<B: Broker>(state: AppState<B>) -> Router {
    Router::new()
        .route("/health", get(health::<B>))
        .route("/orders", post(submit_order::<B>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
