//! Order endpoint handlers.
//!
//! `POST /orders` does three things:
//! 1. Check the body is a JSON-typed, non-empty JSON object
//! 2. Relay the raw bytes to the order queue
//! 3. Answer once the broker has the message
//!
//! Broker error details are logged here and never returned to the client.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::RelayError;
use crate::queue::{Broker, OrderPayload, Publisher};
use crate::Config;

/// Shared application state.
pub struct AppState<B: Broker> {
    pub config: Arc<Config>,
    pub publisher: Publisher<B>,
}

impl<B: Broker> AppState<B> {
    pub fn new(config: Config, publisher: Publisher<B>) -> Self {
        Self {
            config: Arc::new(config),
            publisher,
        }
    }
}

impl<B: Broker> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            publisher: self.publisher.clone(),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub port: u16,
}

/// Health check endpoint. Does not touch the broker.
pub async fn health<B: Broker>(State(state): State<AppState<B>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        port: state.config.port,
    })
}

// =============================================================================
// Orders
// =============================================================================

/// Order accepted response.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub message: &'static str,
}

/// Order submission endpoint.
pub async fn submit_order<B: Broker>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<OrderResponse>), RelayError> {
    if !is_json_content_type(&headers) {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        warn!(content_type = %content_type, "order_rejected_content_type");
        return Err(RelayError::invalid("content type is not JSON"));
    }

    let order = match OrderPayload::from_body(&body) {
        Ok(order) => order,
        Err(e) => {
            warn!(body_length = body.len(), error = %e, "order_rejected");
            return Err(e);
        }
    };

    info!(
        body_length = order.len(),
        field_count = order.field_count(),
        "order_received"
    );

    match state.publisher.relay(order).await {
        Ok(ack) => {
            info!(confirmed = ack.confirmed, "order_enqueued");
            Ok((
                StatusCode::CREATED,
                Json(OrderResponse {
                    message: "Order received",
                }),
            ))
        }
        Err(e) => {
            error!(kind = e.kind(), error = %e, "order_publish_failed");
            Err(e)
        }
    }
}

/// `application/json`, optionally with parameters, or any `+json` type.
fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(value) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let mime = value.split(';').next().unwrap_or("").trim();
    let mime = mime.to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}
