//! Resilience primitives for the broker connection.
//!
//! # Data Flow
//! ```text
//! Reconnect needed:
//!     → circuit_breaker.rs (fail fast while the broker is known to be down)
//!     → backoff.rs (spacing between bounded connect attempts)
//!     → circuit_breaker.rs (record the outcome of the cycle)
//! ```
//!
//! Publishes are never retried; only connection establishment is.

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::Backoff;
pub use circuit_breaker::{Attempt, BreakerState, CircuitBreaker};
