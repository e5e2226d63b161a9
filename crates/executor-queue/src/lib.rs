//! Queue side of the remote script executor.
//!
//! # Architecture
//!
//! - [`QueueTransport`] abstracts a publish/subscribe broker with topics,
//!   subscriptions and acknowledgements
//! - [`InMemoryTransport`] and [`NatsTransport`] implement it
//! - [`QueueMessage`] is the JSON envelope carried on every topic
//! - [`QueueAdapter`] consumes the request topic, drives a
//!   [`RequestHandler`](script_executor_core::traits::RequestHandler) and
//!   publishes responses as a
//!   [`ResponseProducer`](script_executor_core::traits::ResponseProducer)

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

mod adapter;
mod envelope;
mod error;
mod memory;
mod nats;
mod properties;
mod transport;

pub use adapter::QueueAdapter;
pub use envelope::QueueMessage;
pub use error::QueueError;
pub use memory::InMemoryTransport;
pub use nats::NatsTransport;
pub use properties::{ACK_DEADLINE_KEY, MESSAGE_RETENTION_KEY, QueueProperties};
pub use transport::{Delivery, QueueTransport};
