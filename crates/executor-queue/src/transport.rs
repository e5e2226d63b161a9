//! Message transport abstraction.
//!
//! Models a publish/subscribe broker with named topics and named
//! subscriptions attached to them. Every subscription receives its own copy
//! of each message published to its topic after the subscription was
//! created.

use crate::{QueueError, QueueProperties};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A message handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-assigned id used to acknowledge the delivery
    pub id: String,
    /// Raw message bytes
    pub payload: Vec<u8>,
}

/// A publish/subscribe message broker.
///
/// Implementations must be usable from many tasks at once.
#[async_trait]
pub trait QueueTransport: Send + Sync + 'static {
    /// Lists existing topic names.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be queried.
    async fn list_topics(&self) -> Result<Vec<String>, QueueError>;

    /// Lists existing subscription names.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be queried.
    async fn list_subscriptions(&self) -> Result<Vec<String>, QueueError>;

    /// Creates a topic.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AlreadyExists`] if the topic exists.
    async fn create_topic(&self, name: &str, properties: &QueueProperties) -> Result<(), QueueError>;

    /// Creates a subscription on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AlreadyExists`] if the subscription exists and
    /// [`QueueError::TopicNotFound`] if the topic does not.
    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        properties: &QueueProperties,
    ) -> Result<(), QueueError>;

    /// Starts consuming a subscription.
    ///
    /// The stream ends when the transport is closed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SubscriptionNotFound`] if the subscription does
    /// not exist.
    async fn subscribe(
        &self,
        subscription: &str,
    ) -> Result<BoxStream<'static, Delivery>, QueueError>;

    /// Acknowledges a delivery so it is not redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SubscriptionNotFound`] if the subscription does
    /// not exist.
    async fn ack(&self, subscription: &str, delivery_id: &str) -> Result<(), QueueError>;

    /// Publishes a message to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TopicNotFound`] if the topic does not exist
    /// and [`QueueError::Closed`] after [`close`](Self::close).
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), QueueError>;

    /// Flushes pending messages and disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if pending messages cannot be flushed.
    async fn close(&self) -> Result<(), QueueError>;
}
