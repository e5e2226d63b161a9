//! Error types for queue transports and the adapter.

use thiserror::Error;

/// Errors raised by a [`QueueTransport`](crate::QueueTransport) or the
/// [`QueueAdapter`](crate::QueueAdapter).
#[derive(Debug, Error)]
pub enum QueueError {
    /// A topic or subscription with this name already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// `topic` or `subscription`
        kind: &'static str,
        /// Name of the existing resource
        name: String,
    },

    /// The topic does not exist.
    #[error("topic '{0}' not found")]
    TopicNotFound(String),

    /// The subscription does not exist.
    #[error("subscription '{0}' not found")]
    SubscriptionNotFound(String),

    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,

    /// The delivery stream ended while the adapter was still running.
    #[error("delivery stream for subscription '{0}' ended unexpectedly")]
    StreamEnded(String),

    /// Queue properties could not be parsed.
    #[error("invalid queue property '{key}': {reason}")]
    InvalidProperty {
        /// Offending key
        key: String,
        /// What is wrong with the value
        reason: String,
    },

    /// Message envelope could not be encoded or decoded.
    #[error("message codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// NATS connection error.
    #[error("NATS connection error: {0}")]
    NatsConnect(#[from] async_nats::ConnectError),

    /// NATS publish error.
    #[error("NATS publish error: {0}")]
    NatsPublish(#[from] async_nats::PublishError),

    /// Any other NATS client failure.
    #[error("NATS {operation} error: {message}")]
    Nats {
        /// Client operation that failed
        operation: &'static str,
        /// Error reported by the client
        message: String,
    },
}

impl QueueError {
    /// Returns `true` if the resource already existed.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Wraps this error as a core transport error for `topic`.
    #[must_use]
    pub fn into_transport_error(self, topic: &str) -> script_executor_core::Error {
        script_executor_core::Error::TransportError {
            topic: topic.to_string(),
            message: self.to_string(),
            source: Some(Box::new(self)),
        }
    }
}
