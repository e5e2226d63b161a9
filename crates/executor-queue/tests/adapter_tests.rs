//! Queue adapter behaviour over the in-memory transport.

use async_trait::async_trait;
use futures::StreamExt;
use script_executor_core::traits::{RequestHandler, ResponseProducer};
use script_executor_core::{InboundRequest, MessageHeaders, RequestId, WorkerConfig};
use script_executor_queue::{
    InMemoryTransport, QueueAdapter, QueueError, QueueMessage, QueueProperties, QueueTransport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const REQUESTS: &str = "js_eval.requests";

#[derive(Default)]
struct RecordingHandler {
    received: Mutex<Vec<InboundRequest>>,
    notify: Notify,
}

impl RecordingHandler {
    fn received(&self) -> Vec<InboundRequest> {
        self.received.lock().unwrap().clone()
    }

    async fn wait_for(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.received.lock().unwrap().len() < count {
                self.notify.notified().await;
            }
        })
        .await
        .expect("handler was not called in time");
    }
}

#[async_trait]
impl RequestHandler for RecordingHandler {
    async fn handle(&self, request: InboundRequest) {
        self.received.lock().unwrap().push(request);
        self.notify.notify_one();
    }
}

fn adapter(transport: &Arc<InMemoryTransport>) -> Arc<QueueAdapter<InMemoryTransport>> {
    Arc::new(QueueAdapter::new(Arc::clone(transport), &WorkerConfig::default()).unwrap())
}

fn request_message(id: RequestId, reply: &str, body: &[u8]) -> Vec<u8> {
    QueueMessage::new("", body.to_vec(), MessageHeaders::for_request(id, reply))
        .encode()
        .unwrap()
}

#[tokio::test]
async fn test_init_provisions_request_topic() {
    let transport = Arc::new(InMemoryTransport::new());
    let adapter = adapter(&transport);

    adapter.init().await.unwrap();

    assert_eq!(transport.topics(), vec![REQUESTS.to_string()]);
    assert_eq!(
        transport.list_subscriptions().await.unwrap(),
        vec![REQUESTS.to_string()]
    );
}

#[tokio::test]
async fn test_init_tolerates_existing_resources() {
    let transport = Arc::new(InMemoryTransport::new());
    let props = QueueProperties::default();
    transport.create_topic(REQUESTS, &props).await.unwrap();
    transport
        .create_subscription(REQUESTS, REQUESTS, &props)
        .await
        .unwrap();

    adapter(&transport).init().await.unwrap();
    // A second worker on the same broker discovers nothing new either.
    adapter(&transport).init().await.unwrap();
    assert_eq!(transport.topics().len(), 1);
}

#[tokio::test]
async fn test_rejects_bad_properties() {
    let mut config = WorkerConfig::default();
    config.queue.queue_properties = "ackDeadlineInSec:soon".to_string();
    let result = QueueAdapter::new(Arc::new(InMemoryTransport::new()), &config);
    assert!(matches!(result, Err(QueueError::InvalidProperty { .. })));
}

#[tokio::test]
async fn test_run_dispatches_and_acks() {
    let transport = Arc::new(InMemoryTransport::new());
    let adapter = adapter(&transport);
    adapter.init().await.unwrap();

    let handler = Arc::new(RecordingHandler::default());
    let shutdown = CancellationToken::new();
    let worker = {
        let adapter = Arc::clone(&adapter);
        let handler = Arc::clone(&handler);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { adapter.run(handler, shutdown).await })
    };

    let id = RequestId::from_bits(7, -7);
    transport
        .publish(REQUESTS, request_message(id, "replies", br#"{"releaseRequest":{}}"#))
        .await
        .unwrap();
    handler.wait_for(1).await;

    let received = handler.received();
    assert_eq!(received[0].request_id, id);
    assert_eq!(received[0].response_topic, "replies");
    assert_eq!(received[0].body, br#"{"releaseRequest":{}}"#);

    shutdown.cancel();
    worker.await.unwrap().unwrap();
    assert_eq!(transport.unacked_count(REQUESTS), 0);
}

#[tokio::test]
async fn test_undecodable_message_is_acked_and_skipped() {
    let transport = Arc::new(InMemoryTransport::new());
    let adapter = adapter(&transport);
    adapter.init().await.unwrap();

    // Garbage first, then a message without headers, then a valid one.
    transport.publish(REQUESTS, b"not json".to_vec()).await.unwrap();
    transport
        .publish(REQUESTS, QueueMessage::new("", vec![], MessageHeaders::new()).encode().unwrap())
        .await
        .unwrap();
    transport
        .publish(REQUESTS, request_message(RequestId::new_v4(), "r", b"{}"))
        .await
        .unwrap();

    let handler = Arc::new(RecordingHandler::default());
    let shutdown = CancellationToken::new();
    let worker = {
        let adapter = Arc::clone(&adapter);
        let handler = Arc::clone(&handler);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { adapter.run(handler, shutdown).await })
    };

    handler.wait_for(1).await;
    shutdown.cancel();
    worker.await.unwrap().unwrap();

    assert_eq!(handler.received().len(), 1);
    assert_eq!(transport.unacked_count(REQUESTS), 0);
}

#[tokio::test]
async fn test_stream_end_is_an_error() {
    let transport = Arc::new(InMemoryTransport::new());
    let adapter = adapter(&transport);
    adapter.init().await.unwrap();

    let handler = Arc::new(RecordingHandler::default());
    let worker = {
        let adapter = Arc::clone(&adapter);
        tokio::spawn(async move { adapter.run(handler, CancellationToken::new()).await })
    };

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    // Closing the broker underneath a running adapter ends its stream.
    transport.close().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(QueueError::StreamEnded(_))));
}

#[tokio::test]
async fn test_send_provisions_reply_topic() {
    let transport = Arc::new(InMemoryTransport::new());
    let adapter = adapter(&transport);
    adapter.init().await.unwrap();

    let headers = MessageHeaders::for_request(RequestId::from_bits(1, 2), "replies.node-1");
    adapter
        .send("replies.node-1", "script-key", b"{\"ok\":true}".to_vec(), &headers)
        .await
        .unwrap();

    let published = transport.published("replies.node-1");
    assert_eq!(published.len(), 1);
    let message = QueueMessage::decode(&published[0]).unwrap();
    assert_eq!(message.key, "script-key");
    assert_eq!(message.data, b"{\"ok\":true}");
    assert_eq!(message.headers, headers);

    // The reply subscription received its copy.
    let mut replies = transport.subscribe("replies.node-1").await.unwrap();
    assert!(replies.next().await.is_some());
}

#[tokio::test]
async fn test_send_after_close_is_transport_error() {
    let transport = Arc::new(InMemoryTransport::new());
    let adapter = adapter(&transport);
    adapter.init().await.unwrap();
    adapter.close().await.unwrap();

    let err = adapter
        .send(REQUESTS, "k", vec![], &MessageHeaders::new())
        .await
        .unwrap_err();
    assert!(err.is_transport_error());
}
