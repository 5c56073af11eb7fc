//! Order Relay - HTTP-to-RabbitMQ order forwarding.
//!
//! Accepts order documents over HTTP and hands them, unmodified, to a
//! RabbitMQ queue for downstream consumers.
//!
//! ## Architecture
//!
//! ```text
//! Client → POST /orders → Publisher (shared connection, channel pool) → order_queue
//! ```

pub mod config;
pub mod error;
pub mod queue;
pub mod resilience;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use error::RelayError;
pub use queue::{LapinBroker, OrderPayload, Publisher, PublisherSettings, ORDER_QUEUE};
pub use web::{router, AppState};
