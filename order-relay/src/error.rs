//! Relay error taxonomy and its HTTP mapping.
//!
//! Broker failures carry the underlying error for server-side logging only;
//! the response body holds a short fixed message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Why an order could not be relayed.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Empty, null, non-object or malformed order body.
    #[error("invalid order body: {reason}")]
    InvalidInput { reason: &'static str },

    /// No connection to the broker could be established.
    #[error("broker unavailable: {0:#}")]
    BrokerUnavailable(anyhow::Error),

    /// Channel creation, confirm mode or queue declaration failed.
    #[error("channel setup failed: {0:#}")]
    ChannelSetupFailed(anyhow::Error),

    /// The message could not be published on an established channel.
    #[error("publish failed: {0:#}")]
    PublishFailed(anyhow::Error),
}

impl RelayError {
    pub fn invalid(reason: &'static str) -> Self {
        RelayError::InvalidInput { reason }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            RelayError::BrokerUnavailable(_)
            | RelayError::ChannelSetupFailed(_)
            | RelayError::PublishFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the client.
    pub fn public_message(&self) -> &'static str {
        match self {
            RelayError::InvalidInput { .. } => "Order body is required",
            RelayError::BrokerUnavailable(_) => "Error connecting to RabbitMQ",
            RelayError::ChannelSetupFailed(_) => "Error creating channel",
            RelayError::PublishFailed(_) => "Failed to place order",
        }
    }

    /// Short label used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidInput { .. } => "invalid_input",
            RelayError::BrokerUnavailable(_) => "broker_unavailable",
            RelayError::ChannelSetupFailed(_) => "channel_setup_failed",
            RelayError::PublishFailed(_) => "publish_failed",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.public_message(),
            }),
        )
            .into_response()
    }
}
