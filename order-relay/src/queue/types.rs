//! Message types for the order queue.
//!
//! The relay never interprets order fields: an [`OrderPayload`] is the raw
//! request body, checked once to be a non-empty JSON object.

use crate::error::RelayError;

/// Default queue name for order messages.
pub const ORDER_QUEUE: &str = "order_queue";

/// An order document as received from the client.
///
/// Holds the exact bytes of the request body so the message body on the
/// queue is byte-for-byte what the client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPayload {
    bytes: Vec<u8>,
    field_count: usize,
}

impl OrderPayload {
    /// Validate and wrap a request body.
    ///
    /// Rejects empty bodies, malformed JSON, `null`, non-object values and
    /// `{}`.
    pub fn from_body(body: &[u8]) -> Result<Self, RelayError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(RelayError::invalid("empty body"));
        }

        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|_| RelayError::invalid("malformed JSON"))?;

        match value {
            serde_json::Value::Object(map) if !map.is_empty() => Ok(Self {
                bytes: body.to_vec(),
                field_count: map.len(),
            }),
            serde_json::Value::Object(_) => Err(RelayError::invalid("empty object")),
            serde_json::Value::Null => Err(RelayError::invalid("null body")),
            _ => Err(RelayError::invalid("body is not a JSON object")),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of top-level keys, for logging.
    pub fn field_count(&self) -> usize {
        self.field_count
    }
}

/// Target queue and its declaration properties.
///
/// Redeclaring a queue with identical properties is a no-op on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, durable: bool) -> Self {
        Self {
            name: name.into(),
            durable,
        }
    }
}

impl Default for QueueSpec {
    fn default() -> Self {
        Self::new(ORDER_QUEUE, false)
    }
}

/// Acknowledgement that an order was handed to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// True when the broker confirmed the publish, false when it was only sent
    pub confirmed: bool,
}
