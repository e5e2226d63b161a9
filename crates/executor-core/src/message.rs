//! Message headers and the decoded inbound request envelope.

use crate::{Error, RequestId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header carrying the 16-byte request identifier.
pub const REQUEST_ID_HEADER: &str = "requestId";

/// Header carrying the UTF-8 name of the reply topic.
pub const RESPONSE_TOPIC_HEADER: &str = "responseTopic";

/// Binary message headers, passed through unchanged to the response.
///
/// Serializes as `{"data": {"<name>": [<bytes>...]}}`.
///
/// # Examples
///
/// ```
/// use script_executor_core::{MessageHeaders, RequestId};
///
/// let request_id = RequestId::from_bits(0, 42);
/// let headers = MessageHeaders::for_request(request_id, "js_eval.responses.node-1");
///
/// assert_eq!(headers.request_id().unwrap(), request_id);
/// assert_eq!(headers.response_topic().unwrap(), "js_eval.responses.node-1");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeaders {
    /// Raw header values keyed by name
    #[serde(default)]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl MessageHeaders {
    /// Creates an empty header set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: BTreeMap::new(),
        }
    }

    /// Creates headers carrying a request id and reply topic.
    #[must_use]
    pub fn for_request(request_id: RequestId, response_topic: &str) -> Self {
        let mut headers = Self::new();
        headers.insert(REQUEST_ID_HEADER, request_id.as_bytes().to_vec());
        headers.insert(RESPONSE_TOPIC_HEADER, response_topic.as_bytes().to_vec());
        headers
    }

    /// Sets a header, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: Vec<u8>) {
        self.data.insert(name.into(), value);
    }

    /// Returns the raw value of a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.data.get(name).map(Vec::as_slice)
    }

    /// Parses the `requestId` header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the header is missing or is not
    /// 16 bytes long.
    pub fn request_id(&self) -> Result<RequestId> {
        let raw = self
            .get(REQUEST_ID_HEADER)
            .ok_or_else(|| Error::invalid_message("missing requestId header"))?;
        RequestId::from_slice(raw)
    }

    /// Parses the `responseTopic` header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the header is missing, empty or
    /// not valid UTF-8.
    pub fn response_topic(&self) -> Result<String> {
        let raw = self
            .get(RESPONSE_TOPIC_HEADER)
            .ok_or_else(|| Error::invalid_message("missing responseTopic header"))?;
        let topic = std::str::from_utf8(raw)
            .map_err(|e| Error::invalid_message(format!("responseTopic is not UTF-8: {e}")))?;
        if topic.is_empty() {
            return Err(Error::invalid_message("responseTopic header is empty"));
        }
        Ok(topic.to_string())
    }
}

/// A request taken off the queue, ready for the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    /// Caller-generated correlation id
    pub request_id: RequestId,
    /// Where the response must be published
    pub response_topic: String,
    /// Pass-through headers, echoed on the response
    pub headers: MessageHeaders,
    /// Raw JSON request body
    pub body: Vec<u8>,
}

impl InboundRequest {
    /// Builds a request from transport headers and body, extracting the
    /// correlation id and reply topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if either required header is
    /// missing or malformed.
    pub fn from_parts(headers: MessageHeaders, body: Vec<u8>) -> Result<Self> {
        Ok(Self {
            request_id: headers.request_id()?,
            response_topic: headers.response_topic()?,
            headers,
            body,
        })
    }
}
