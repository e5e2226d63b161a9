//! Inbound request handling trait.

use crate::InboundRequest;
use async_trait::async_trait;
use std::sync::Arc;

/// Consumes requests taken off the queue.
///
/// `handle` owns the whole request lifecycle, response included. It has no
/// error channel: failures are reported to the caller through the response
/// or logged.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Processes one request to completion.
    async fn handle(&self, request: InboundRequest);
}

#[async_trait]
impl<T: RequestHandler + ?Sized> RequestHandler for Arc<T> {
    async fn handle(&self, request: InboundRequest) {
        (**self).handle(request).await;
    }
}
