//! Core types, traits, and errors for the remote script executor.
//!
//! This crate provides the foundational types shared by the sandbox, the
//! queue adapter and the request processor.
//!
//! # Architecture
//!
//! The core consists of:
//! - Strong identifier types (`ScriptId`, `RequestId`) with lossless
//!   conversion to and from two signed 64-bit halves
//! - The wire protocol (`ScriptRequest`, `RemoteResponse`, `ErrorCode`)
//! - Error hierarchy (`Error` for infrastructure, `ScriptError` for scripts)
//! - Worker configuration with TOML loading and environment overrides
//! - Core traits for script execution, request handling and response delivery

#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]

mod error;
mod message;
mod types;

pub mod config;
pub mod protocol;
pub mod stats;
pub mod traits;

pub use config::{LogFormat, LoggingConfig, QueueConfig, ScriptConfig, TransportKind, WorkerConfig};
pub use error::{Error, Result, ScriptError};
pub use message::{InboundRequest, MessageHeaders, REQUEST_ID_HEADER, RESPONSE_TOPIC_HEADER};
pub use protocol::{ErrorCode, RemoteResponse, ScriptRequest};
pub use types::{RequestId, ScriptId};
