//! Transport envelope wrapping every message on the queue.
//!
//! The envelope is JSON: `{"key": .., "data": [bytes], "headers": {"data":
//! {"name": [bytes]}}}`. `data` holds the request or response body.

use crate::QueueError;
use script_executor_core::{InboundRequest, MessageHeaders};
use serde::{Deserialize, Serialize};

/// A message as carried by the transport.
///
/// # Examples
///
/// ```
/// use script_executor_core::{MessageHeaders, RequestId};
/// use script_executor_queue::QueueMessage;
///
/// let headers = MessageHeaders::for_request(RequestId::from_bits(0, 1), "replies");
/// let message = QueueMessage::new("script-1", b"{}".to_vec(), headers);
///
/// let decoded = QueueMessage::decode(&message.encode().unwrap()).unwrap();
/// let request = decoded.into_inbound().unwrap();
/// assert_eq!(request.response_topic, "replies");
/// assert_eq!(request.body, b"{}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Partitioning key, the script id on responses
    #[serde(default)]
    pub key: String,
    /// Message body
    pub data: Vec<u8>,
    /// Binary headers
    #[serde(default)]
    pub headers: MessageHeaders,
}

impl QueueMessage {
    /// Creates an envelope.
    #[must_use]
    pub fn new(key: impl Into<String>, data: Vec<u8>, headers: MessageHeaders) -> Self {
        Self {
            key: key.into(),
            data,
            headers,
        }
    }

    /// Serializes the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Codec`] if `bytes` is not a valid envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, QueueError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Converts the envelope into a request for the processor.
    ///
    /// # Errors
    ///
    /// Returns [`script_executor_core::Error::InvalidMessage`] if the
    /// `requestId` or `responseTopic` header is missing or malformed.
    pub fn into_inbound(self) -> script_executor_core::Result<InboundRequest> {
        InboundRequest::from_parts(self.headers, self.data)
    }
}
