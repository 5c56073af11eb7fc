//! Configuration module for environment variable parsing.
//!
//! All settings come from the process environment (a `.env` file is loaded by
//! the binary in development). Unparseable values fall back to their defaults
//! with a warning.

use std::env;
use std::str::FromStr;

use tracing::warn;

use crate::queue::ORDER_QUEUE;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// AMQP connection URI of the broker
    pub rabbitmq_url: String,

    /// Port for the web server to listen on
    pub port: u16,

    /// Target queue for order messages
    pub order_queue: String,

    /// Whether the queue survives broker restarts (and messages are persistent)
    pub order_queue_durable: bool,

    /// Wait for the broker to acknowledge each publish before answering
    pub publisher_confirms: bool,

    /// Maximum number of channels checked out at the same time
    pub channel_pool_size: usize,

    /// Connect attempts per reconnect cycle
    pub connect_attempts: u32,

    /// Backoff between connect attempts in milliseconds (base, max)
    pub connect_backoff_ms: (u64, u64),

    /// Consecutive failed reconnect cycles before the breaker opens
    pub breaker_failure_threshold: u32,

    /// How long the breaker stays open before letting a trial connect through
    pub breaker_cooldown_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            rabbitmq_url: env::var("RABBITMQ_CONNECTION_STRING")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "amqp://localhost".to_string()),

            port: parse_or("PORT", 3000),

            order_queue: env::var("ORDER_QUEUE")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| ORDER_QUEUE.to_string()),

            order_queue_durable: parse_bool("ORDER_QUEUE_DURABLE", false),

            publisher_confirms: parse_bool("PUBLISHER_CONFIRMS", true),

            channel_pool_size: parse_or("CHANNEL_POOL_SIZE", 8).max(1),

            connect_attempts: parse_or("BROKER_CONNECT_ATTEMPTS", 3).max(1),

            connect_backoff_ms: parse_range("BROKER_BACKOFF_RANGE_MS", (100, 2000)),

            breaker_failure_threshold: parse_or("BREAKER_FAILURE_THRESHOLD", 5).max(1),

            breaker_cooldown_ms: parse_or("BREAKER_COOLDOWN_MS", 30_000),
        }
    }

    /// Host and port of the broker, without credentials, for logging.
    pub fn broker_endpoint(&self) -> String {
        match url::Url::parse(&self.rabbitmq_url) {
            Ok(u) => format!(
                "{}:{}",
                u.host_str().unwrap_or("unknown"),
                u.port().unwrap_or(5672)
            ),
            Err(_) => "unparseable".to_string(),
        }
    }
}

/// Parse a single value, warning and falling back to `default` when invalid.
fn parse_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(env_var = name, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a boolean flag. Accepts true/false, 1/0, yes/no, on/off.
fn parse_bool(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}

/// Parse a comma-separated range like "100,2000" into a tuple.
fn parse_range(name: &str, default: (u64, u64)) -> (u64, u64) {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 2 {
        warn!(env_var = name, value = %raw, "Invalid range format, using default");
        return default;
    }

    let min = parts[0].trim().parse::<u64>();
    let max = parts[1].trim().parse::<u64>();

    match (min, max) {
        (Ok(min), Ok(max)) if min <= max => (min, max),
        _ => {
            warn!(env_var = name, value = %raw, "Invalid range values, using default");
            default
        }
    }
}
