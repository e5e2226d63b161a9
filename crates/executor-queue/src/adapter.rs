//! Queue adapter: request consumption and response publication.
//!
//! The adapter owns the worker's side of the broker. On startup it makes
//! sure the request topic and a subscription of the same name exist. While
//! running it decodes each delivery, hands the request to a
//! [`RequestHandler`] on its own task and acknowledges the delivery right
//! away. Responses go out through its [`ResponseProducer`] implementation,
//! which provisions reply topics on first use.
//!
//! # Examples
//!
//! ```no_run
//! use script_executor_core::WorkerConfig;
//! use script_executor_core::traits::RequestHandler;
//! use script_executor_queue::{InMemoryTransport, QueueAdapter};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(handler: Arc<impl RequestHandler + 'static>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = WorkerConfig::default();
//! let adapter = QueueAdapter::new(Arc::new(InMemoryTransport::new()), &config)?;
//! adapter.init().await?;
//!
//! let shutdown = CancellationToken::new();
//! adapter.run(handler, shutdown.clone()).await?;
//! adapter.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::transport::{Delivery, QueueTransport};
use crate::{QueueError, QueueMessage, QueueProperties};
use async_trait::async_trait;
use futures::StreamExt;
use script_executor_core::traits::{RequestHandler, ResponseProducer};
use script_executor_core::{MessageHeaders, WorkerConfig};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Connects a [`QueueTransport`] to a request handler.
pub struct QueueAdapter<T: QueueTransport + ?Sized> {
    transport: Arc<T>,
    request_topic: String,
    properties: QueueProperties,
    known_topics: Mutex<HashSet<String>>,
    known_subscriptions: Mutex<HashSet<String>>,
    in_flight: TaskTracker,
    close_timeout: Duration,
}

impl<T: QueueTransport + ?Sized> std::fmt::Debug for QueueAdapter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueAdapter")
            .field("request_topic", &self.request_topic)
            .field("properties", &self.properties)
            .field("in_flight", &self.in_flight.len())
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}

fn locked(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: QueueTransport + ?Sized> QueueAdapter<T> {
    /// Creates an adapter for the configured request topic.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidProperty`] if `queue.queue_properties`
    /// cannot be parsed.
    pub fn new(transport: Arc<T>, config: &WorkerConfig) -> Result<Self, QueueError> {
        let properties = QueueProperties::parse(&config.queue.queue_properties)?;
        Ok(Self {
            transport,
            request_topic: config.request_topic.clone(),
            properties,
            known_topics: Mutex::new(HashSet::new()),
            known_subscriptions: Mutex::new(HashSet::new()),
            in_flight: TaskTracker::new(),
            close_timeout: config.queue.close_timeout(),
        })
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the topic requests are consumed from.
    #[must_use]
    pub fn request_topic(&self) -> &str {
        &self.request_topic
    }

    /// Returns the properties applied to provisioned topics.
    #[must_use]
    pub const fn properties(&self) -> &QueueProperties {
        &self.properties
    }

    /// Returns the number of requests still being handled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Discovers existing resources and provisions the request topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be queried or the topic or
    /// subscription cannot be created for a reason other than already
    /// existing.
    pub async fn init(&self) -> Result<(), QueueError> {
        let topics = self.transport.list_topics().await?;
        tracing::debug!("Existing topics: {topics:?}");
        let subscriptions = self.transport.list_subscriptions().await?;
        tracing::debug!("Existing subscriptions: {subscriptions:?}");

        locked(&self.known_topics).extend(topics);
        locked(&self.known_subscriptions).extend(subscriptions);

        self.ensure_topic(&self.request_topic).await?;
        tracing::info!(
            topic = %self.request_topic,
            properties = self.properties.len(),
            "Queue adapter initialized"
        );
        Ok(())
    }

    /// Creates `topic` and a subscription of the same name unless they are
    /// already known.
    async fn ensure_topic(&self, topic: &str) -> Result<(), QueueError> {
        if !locked(&self.known_topics).contains(topic) {
            match self.transport.create_topic(topic, &self.properties).await {
                Ok(()) => tracing::info!("Created new topic: [{topic}]"),
                Err(err) if err.is_already_exists() => {
                    tracing::info!("[{topic}] Topic already exists.");
                }
                Err(err) => {
                    tracing::error!("Failed to create topic: [{topic}]: {err}");
                    return Err(err);
                }
            }
            locked(&self.known_topics).insert(topic.to_string());
        }

        if !locked(&self.known_subscriptions).contains(topic) {
            match self
                .transport
                .create_subscription(topic, topic, &self.properties)
                .await
            {
                Ok(()) => tracing::info!("Created new subscription: [{topic}]"),
                Err(err) if err.is_already_exists() => {
                    tracing::info!("[{topic}] Subscription already exists.");
                }
                Err(err) => {
                    tracing::error!("Failed to create subscription: [{topic}]: {err}");
                    return Err(err);
                }
            }
            locked(&self.known_subscriptions).insert(topic.to_string());
        }
        Ok(())
    }

    /// Consumes the request subscription until `shutdown` fires.
    ///
    /// Each decoded request is handled on its own task; the delivery is
    /// acknowledged as soon as the task is started.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be opened, and
    /// [`QueueError::StreamEnded`] if the delivery stream ends before
    /// shutdown was requested.
    pub async fn run<H>(&self, handler: Arc<H>, shutdown: CancellationToken) -> Result<(), QueueError>
    where
        H: RequestHandler + 'static,
    {
        let mut deliveries = self.transport.subscribe(&self.request_topic).await?;
        tracing::info!(topic = %self.request_topic, "Consuming requests");

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, stopping consumption");
                    return Ok(());
                }
                next = deliveries.next() => match next {
                    Some(delivery) => self.dispatch(&handler, delivery).await,
                    None if shutdown.is_cancelled() => return Ok(()),
                    None => return Err(QueueError::StreamEnded(self.request_topic.clone())),
                },
            }
        }
    }

    async fn dispatch<H>(&self, handler: &Arc<H>, delivery: Delivery)
    where
        H: RequestHandler + 'static,
    {
        let Delivery { id, payload } = delivery;

        match QueueMessage::decode(&payload)
            .map_err(|e| e.to_string())
            .and_then(|message| message.into_inbound().map_err(|e| e.to_string()))
        {
            Ok(request) => {
                tracing::trace!(request_id = %request.request_id, "Received request");
                let handler = Arc::clone(handler);
                self.in_flight.spawn(async move { handler.handle(request).await });
            }
            Err(reason) => tracing::error!(delivery = %id, "Failed to decode message: {reason}"),
        }

        if let Err(err) = self.transport.ack(&self.request_topic, &id).await {
            tracing::warn!(delivery = %id, "Failed to acknowledge message: {err}");
        }
    }

    /// Waits for in-flight requests and closes the transport, giving up
    /// after `queue.close_timeout_ms`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if closing fails before the timeout.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.in_flight.close();
        let closing = async {
            self.in_flight.wait().await;
            self.transport.close().await
        };

        match tokio::time::timeout(self.close_timeout, closing).await {
            Ok(result) => {
                tracing::info!("Queue adapter closed");
                result
            }
            Err(_) => {
                tracing::warn!(
                    in_flight = self.in_flight.len(),
                    "Queue adapter did not close within {}ms, abandoning",
                    self.close_timeout.as_millis()
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<T: QueueTransport + ?Sized> ResponseProducer for QueueAdapter<T> {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: &MessageHeaders,
    ) -> script_executor_core::Result<()> {
        self.ensure_topic(topic)
            .await
            .map_err(|e| e.into_transport_error(topic))?;

        let bytes = QueueMessage::new(key, payload, headers.clone())
            .encode()
            .map_err(|e| e.into_transport_error(topic))?;

        self.transport
            .publish(topic, bytes)
            .await
            .map_err(|e| e.into_transport_error(topic))
    }
}
