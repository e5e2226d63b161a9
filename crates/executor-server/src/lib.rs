//! Remote script execution worker.
//!
//! Ties the script sandbox and the queue adapter together through the
//! [`RequestProcessor`], and provides the pieces of the `script-executor`
//! binary: command-line parsing, logging setup, signal handling and worker
//! assembly.
//!
//! # Architecture
//!
//! ```text
//! QueueAdapter --InboundRequest--> RequestProcessor --compile/execute--> ScriptSandbox
//!      ^                                  |
//!      +-------- ResponseProducer --------+
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

pub mod cli;
pub mod logging;
pub mod processor;
pub mod shutdown;
pub mod telemetry;
pub mod worker;

pub use processor::RequestProcessor;
