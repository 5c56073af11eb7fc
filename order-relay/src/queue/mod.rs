//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The opaque order payload and queue declaration types
//! - A broker abstraction with a lapin-backed implementation
//! - The pooled publisher that relays orders
//!
//! ## Flow
//!
//! ```text
//! HTTP handler → Publisher::relay → channel checkout → declare order_queue → publish → checkin
//! ```

pub mod broker;
pub mod publisher;
pub mod types;

pub use broker::{Broker, BrokerChannel, BrokerConnection, LapinBroker};
pub use publisher::{Publisher, PublisherSettings};
pub use types::{Ack, OrderPayload, QueueSpec, ORDER_QUEUE};
