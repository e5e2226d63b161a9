//! NATS transport.
//!
//! Core NATS has no persistent topics: a topic is a subject and a
//! subscription is a queue group on that subject, so several workers
//! sharing a subscription name split the load. Provisioning only records
//! the names and acknowledgement is a no-op.
//!
//! A non-empty project id namespaces every subject as `<project>.<topic>`,
//! so several deployments can share one NATS server.

use crate::transport::{Delivery, QueueTransport};
use crate::{QueueError, QueueProperties};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Names {
    topics: BTreeSet<String>,
    /// Subscription name to subject
    subscriptions: BTreeMap<String, String>,
}

/// Transport publishing and consuming through a NATS server.
#[derive(Debug)]
pub struct NatsTransport {
    client: async_nats::Client,
    subject_prefix: String,
    names: Mutex<Names>,
    next_delivery: Arc<AtomicU64>,
}

/// Maps a topic name to its NATS subject.
fn subject_for(prefix: &str, topic: &str) -> String {
    if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{prefix}.{topic}")
    }
}

impl NatsTransport {
    /// Connects to the NATS server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NatsConnect`] if the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = async_nats::ConnectOptions::new()
            .name("script-executor")
            .connect(url)
            .await?;
        tracing::info!(url, "Connected to NATS");
        Ok(Self {
            client,
            subject_prefix: String::new(),
            names: Mutex::new(Names::default()),
            next_delivery: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Namespaces all subjects under `project_id`. An empty id leaves
    /// topic names as they are.
    #[must_use]
    pub fn with_project_id(mut self, project_id: &str) -> Self {
        self.subject_prefix = project_id.trim().trim_matches('.').to_string();
        self
    }

    /// Returns the NATS subject used for `topic`.
    #[must_use]
    pub fn subject(&self, topic: &str) -> String {
        subject_for(&self.subject_prefix, topic)
    }

    fn names(&self) -> MutexGuard<'_, Names> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl QueueTransport for NatsTransport {
    async fn list_topics(&self) -> Result<Vec<String>, QueueError> {
        Ok(self.names().topics.iter().cloned().collect())
    }

    async fn list_subscriptions(&self) -> Result<Vec<String>, QueueError> {
        Ok(self.names().subscriptions.keys().cloned().collect())
    }

    async fn create_topic(&self, name: &str, properties: &QueueProperties) -> Result<(), QueueError> {
        if !self.names().topics.insert(name.to_string()) {
            return Err(QueueError::AlreadyExists {
                kind: "topic",
                name: name.to_string(),
            });
        }
        if let Some(retention) = properties.message_retention() {
            tracing::debug!(
                topic = name,
                retention_secs = retention.as_secs(),
                "Core NATS does not retain messages, ignoring retention"
            );
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        _properties: &QueueProperties,
    ) -> Result<(), QueueError> {
        let mut names = self.names();
        if names.subscriptions.contains_key(name) {
            return Err(QueueError::AlreadyExists {
                kind: "subscription",
                name: name.to_string(),
            });
        }
        names
            .subscriptions
            .insert(name.to_string(), topic.to_string());
        Ok(())
    }

    async fn subscribe(
        &self,
        subscription: &str,
    ) -> Result<BoxStream<'static, Delivery>, QueueError> {
        let topic = self
            .names()
            .subscriptions
            .get(subscription)
            .cloned()
            .ok_or_else(|| QueueError::SubscriptionNotFound(subscription.to_string()))?;
        let subject = self.subject(&topic);
        tracing::debug!(subscription, %subject, "Subscribing");

        let subscriber = self
            .client
            .queue_subscribe(subject, subscription.to_string())
            .await
            .map_err(|e| QueueError::Nats {
                operation: "subscribe",
                message: e.to_string(),
            })?;

        let counter = Arc::clone(&self.next_delivery);
        Ok(subscriber
            .map(move |message| Delivery {
                id: counter.fetch_add(1, Ordering::Relaxed).to_string(),
                payload: message.payload.to_vec(),
            })
            .boxed())
    }

    async fn ack(&self, _subscription: &str, _delivery_id: &str) -> Result<(), QueueError> {
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), QueueError> {
        self.client
            .publish(self.subject(topic), Bytes::from(payload))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.client.flush().await.map_err(|e| QueueError::Nats {
            operation: "flush",
            message: e.to_string(),
        })?;
        self.client.drain().await.map_err(|e| QueueError::Nats {
            operation: "drain",
            message: e.to_string(),
        })
    }
}
