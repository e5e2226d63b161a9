//! Core traits connecting the worker's components.
//!
//! # Module Structure
//!
//! - `executor` - Script compilation and sandboxed execution
//! - `handler` - Consumption of decoded inbound requests
//! - `producer` - Delivery of responses to a reply topic
//!
//! The queue adapter drives a [`RequestHandler`], the request processor
//! implements it on top of a [`ScriptExecutor`] and answers through a
//! [`ResponseProducer`].

mod executor;
mod handler;
mod producer;

pub use executor::ScriptExecutor;
pub use handler::RequestHandler;
pub use producer::ResponseProducer;
