//! Response delivery trait.

use crate::{MessageHeaders, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Publishes responses to a caller-chosen topic.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use script_executor_core::traits::ResponseProducer;
/// use script_executor_core::{MessageHeaders, Result};
/// use std::sync::Mutex;
///
/// #[derive(Default)]
/// struct Recorder {
///     sent: Mutex<Vec<(String, String)>>,
/// }
///
/// #[async_trait]
/// impl ResponseProducer for Recorder {
///     async fn send(
///         &self,
///         topic: &str,
///         key: &str,
///         _payload: Vec<u8>,
///         _headers: &MessageHeaders,
///     ) -> Result<()> {
///         self.sent.lock().unwrap().push((topic.to_string(), key.to_string()));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ResponseProducer: Send + Sync {
    /// Publishes `payload` to `topic` under the partitioning `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportError`](crate::Error::TransportError) if
    /// the topic cannot be provisioned or the message cannot be published.
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: &MessageHeaders,
    ) -> Result<()>;
}

#[async_trait]
impl<T: ResponseProducer + ?Sized> ResponseProducer for Arc<T> {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: &MessageHeaders,
    ) -> Result<()> {
        (**self).send(topic, key, payload, headers).await
    }
}
