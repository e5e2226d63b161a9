//! In-process message broker.
//!
//! Keeps topics, subscriptions and unacknowledged deliveries in memory.
//! Messages published before a consumer subscribes are held in the
//! subscription backlog and handed over on [`subscribe`](QueueTransport::subscribe).
//! Used by the test suites and for local loopback runs.
//!
//! Memory use is bounded: the publish history keeps the most recent
//! [`InMemoryTransport::PUBLISHED_HISTORY`] payloads and a backlog drops its
//! oldest delivery once it holds [`InMemoryTransport::MAX_BACKLOG`].

use crate::transport::{Delivery, QueueTransport};
use crate::{QueueError, QueueProperties};
use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{TrySendError, UnboundedSender, unbounded};
use futures::stream::BoxStream;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Subscription {
    topic: String,
    backlog: VecDeque<Delivery>,
    unacked: HashMap<String, Vec<u8>>,
    sender: Option<UnboundedSender<Delivery>>,
}

#[derive(Debug, Default)]
struct Broker {
    topics: BTreeSet<String>,
    subscriptions: BTreeMap<String, Subscription>,
    published: VecDeque<(String, Vec<u8>)>,
    next_delivery: u64,
    closed: bool,
}

/// Transport backed by process memory.
///
/// # Examples
///
/// ```
/// use futures::StreamExt;
/// use script_executor_queue::{InMemoryTransport, QueueProperties, QueueTransport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let transport = InMemoryTransport::new();
/// let props = QueueProperties::default();
/// transport.create_topic("jobs", &props).await.unwrap();
/// transport.create_subscription("jobs", "jobs", &props).await.unwrap();
///
/// transport.publish("jobs", b"hello".to_vec()).await.unwrap();
///
/// let mut deliveries = transport.subscribe("jobs").await.unwrap();
/// let delivery = deliveries.next().await.unwrap();
/// assert_eq!(delivery.payload, b"hello");
/// transport.ack("jobs", &delivery.id).await.unwrap();
/// assert_eq!(transport.unacked_count("jobs"), 0);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    broker: Mutex<Broker>,
}

impl InMemoryTransport {
    /// Number of most recent payloads kept for [`published`](Self::published).
    pub const PUBLISHED_HISTORY: usize = 1024;

    /// Deliveries held per subscription while no consumer is attached.
    pub const MAX_BACKLOG: usize = 10_000;

    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Broker> {
        self.broker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the payloads published to `topic` that are still in the
    /// publish history, oldest first.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Returns the number of deliveries not yet acknowledged on a
    /// subscription, zero if it does not exist.
    #[must_use]
    pub fn unacked_count(&self, subscription: &str) -> usize {
        self.lock()
            .subscriptions
            .get(subscription)
            .map_or(0, |s| s.unacked.len())
    }

    /// Returns existing topic names, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.lock().topics.iter().cloned().collect()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn list_topics(&self) -> Result<Vec<String>, QueueError> {
        Ok(self.topics())
    }

    async fn list_subscriptions(&self) -> Result<Vec<String>, QueueError> {
        Ok(self.lock().subscriptions.keys().cloned().collect())
    }

    async fn create_topic(&self, name: &str, _properties: &QueueProperties) -> Result<(), QueueError> {
        let mut broker = self.lock();
        if broker.closed {
            return Err(QueueError::Closed);
        }
        if !broker.topics.insert(name.to_string()) {
            return Err(QueueError::AlreadyExists {
                kind: "topic",
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        _properties: &QueueProperties,
    ) -> Result<(), QueueError> {
        let mut broker = self.lock();
        if broker.closed {
            return Err(QueueError::Closed);
        }
        if broker.subscriptions.contains_key(name) {
            return Err(QueueError::AlreadyExists {
                kind: "subscription",
                name: name.to_string(),
            });
        }
        if !broker.topics.contains(topic) {
            return Err(QueueError::TopicNotFound(topic.to_string()));
        }
        broker.subscriptions.insert(
            name.to_string(),
            Subscription {
                topic: topic.to_string(),
                backlog: VecDeque::new(),
                unacked: HashMap::new(),
                sender: None,
            },
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        subscription: &str,
    ) -> Result<BoxStream<'static, Delivery>, QueueError> {
        let mut broker = self.lock();
        if broker.closed {
            return Err(QueueError::Closed);
        }
        let sub = broker
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| QueueError::SubscriptionNotFound(subscription.to_string()))?;

        let (sender, receiver) = unbounded();
        while let Some(delivery) = sub.backlog.pop_front() {
            // The receiver is alive, this cannot fail.
            let _ = sender.unbounded_send(delivery);
        }
        sub.sender = Some(sender);
        Ok(receiver.boxed())
    }

    async fn ack(&self, subscription: &str, delivery_id: &str) -> Result<(), QueueError> {
        let mut broker = self.lock();
        let sub = broker
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| QueueError::SubscriptionNotFound(subscription.to_string()))?;
        sub.unacked.remove(delivery_id);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        let mut broker = self.lock();
        if broker.closed {
            return Err(QueueError::Closed);
        }
        if !broker.topics.contains(topic) {
            return Err(QueueError::TopicNotFound(topic.to_string()));
        }

        let Broker {
            subscriptions,
            published,
            next_delivery,
            ..
        } = &mut *broker;

        for (name, sub) in subscriptions.iter_mut().filter(|(_, s)| s.topic == topic) {
            *next_delivery += 1;
            let delivery = Delivery {
                id: next_delivery.to_string(),
                payload: payload.clone(),
            };
            sub.unacked.insert(delivery.id.clone(), payload.clone());

            let undelivered = match &sub.sender {
                Some(sender) => sender.unbounded_send(delivery).err().map(TrySendError::into_inner),
                None => Some(delivery),
            };
            if let Some(delivery) = undelivered {
                sub.sender = None;
                if sub.backlog.len() >= Self::MAX_BACKLOG
                    && let Some(dropped) = sub.backlog.pop_front()
                {
                    sub.unacked.remove(&dropped.id);
                    tracing::warn!(
                        subscription = %name,
                        delivery = %dropped.id,
                        "Backlog full, dropping the oldest delivery"
                    );
                }
                sub.backlog.push_back(delivery);
            }
        }
        if published.len() >= Self::PUBLISHED_HISTORY {
            published.pop_front();
        }
        published.push_back((topic.to_string(), payload));
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        let mut broker = self.lock();
        broker.closed = true;
        for sub in broker.subscriptions.values_mut() {
            sub.sender = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn transport_with(topic: &str, subscriptions: &[&str]) -> InMemoryTransport {
        let transport = InMemoryTransport::new();
        let props = QueueProperties::default();
        transport.create_topic(topic, &props).await.unwrap();
        for sub in subscriptions {
            transport.create_subscription(sub, topic, &props).await.unwrap();
        }
        transport
    }

    #[tokio::test]
    async fn test_duplicate_topic_is_rejected() {
        let transport = transport_with("t", &[]).await;
        let err = transport
            .create_topic("t", &QueueProperties::default())
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_subscription_needs_topic() {
        let transport = InMemoryTransport::new();
        let err = transport
            .create_subscription("s", "missing", &QueueProperties::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::TopicNotFound(_)));
    }

    #[tokio::test]
    async fn test_publish_to_unknown_topic() {
        let transport = InMemoryTransport::new();
        let err = transport.publish("nowhere", vec![1]).await.unwrap_err();
        assert!(matches!(err, QueueError::TopicNotFound(_)));
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscription() {
        let transport = transport_with("t", &["a", "b"]).await;
        transport.publish("t", vec![7]).await.unwrap();

        let mut a = transport.subscribe("a").await.unwrap();
        let mut b = transport.subscribe("b").await.unwrap();
        assert_eq!(a.next().await.unwrap().payload, vec![7]);
        assert_eq!(b.next().await.unwrap().payload, vec![7]);
        assert_eq!(transport.published("t"), vec![vec![7]]);
    }

    #[tokio::test]
    async fn test_live_delivery_and_ack() {
        let transport = transport_with("t", &["s"]).await;
        let mut stream = transport.subscribe("s").await.unwrap();

        transport.publish("t", vec![1]).await.unwrap();
        transport.publish("t", vec![2]).await.unwrap();
        assert_eq!(transport.unacked_count("s"), 2);

        let first = stream.next().await.unwrap();
        assert_eq!(first.payload, vec![1]);
        transport.ack("s", &first.id).await.unwrap();
        assert_eq!(transport.unacked_count("s"), 1);
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let transport = transport_with("t", &["s"]).await;
        let mut stream = transport.subscribe("s").await.unwrap();

        transport.close().await.unwrap();
        assert!(stream.next().await.is_none());
        assert!(matches!(
            transport.publish("t", vec![1]).await,
            Err(QueueError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_dropped_consumer_keeps_messages() {
        let transport = transport_with("t", &["s"]).await;
        drop(transport.subscribe("s").await.unwrap());

        transport.publish("t", vec![9]).await.unwrap();
        let mut stream = transport.subscribe("s").await.unwrap();
        assert_eq!(stream.next().await.unwrap().payload, vec![9]);
    }

    #[tokio::test]
    async fn test_publish_history_is_bounded() {
        let transport = transport_with("t", &[]).await;
        let total = InMemoryTransport::PUBLISHED_HISTORY + 5;
        for n in 0..total {
            let payload = u32::try_from(n).unwrap().to_be_bytes().to_vec();
            transport.publish("t", payload).await.unwrap();
        }

        let history = transport.published("t");
        assert_eq!(history.len(), InMemoryTransport::PUBLISHED_HISTORY);
        assert_eq!(history[0], 5_u32.to_be_bytes().to_vec());
    }

    #[tokio::test]
    async fn test_unconsumed_backlog_is_bounded() {
        let transport = transport_with("t", &["idle"]).await;
        for n in 0..InMemoryTransport::MAX_BACKLOG + 3 {
            let payload = u32::try_from(n).unwrap().to_be_bytes().to_vec();
            transport.publish("t", payload).await.unwrap();
        }
        assert_eq!(transport.unacked_count("idle"), InMemoryTransport::MAX_BACKLOG);

        let mut stream = transport.subscribe("idle").await.unwrap();
        assert_eq!(stream.next().await.unwrap().payload, 3_u32.to_be_bytes().to_vec());
    }
}
