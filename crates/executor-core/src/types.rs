//! Strong identifier types for the remote script executor.
//!
//! Both identifiers are 128-bit UUIDs. On the wire they travel as two signed
//! 64-bit halves (most significant first), in headers as 16 raw bytes. The
//! conversions here are lossless in both directions.
//!
//! # Examples
//!
//! ```
//! use script_executor_core::{RequestId, ScriptId};
//!
//! let script = ScriptId::from_bits(0, 1);
//! assert_eq!(script.to_string(), "00000000-0000-0000-0000-000000000001");
//!
//! let request = RequestId::from_bits(-1, i64::MIN);
//! assert_eq!(request.to_bits(), (-1, i64::MIN));
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a logical script (newtype over [`Uuid`]).
///
/// Correlates compile, invoke and release requests and keys the script
/// cache. Assigned by the caller and never changed.
///
/// # Examples
///
/// ```
/// use script_executor_core::ScriptId;
///
/// let id: ScriptId = "00000000-0000-0000-0000-000000000001".parse().unwrap();
/// assert_eq!(id.to_bits(), (0, 1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptId(Uuid);

impl ScriptId {
    /// Wraps an existing UUID.
    #[inline]
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Builds an identifier from its most and least significant halves.
    #[inline]
    #[must_use]
    pub const fn from_bits(msb: i64, lsb: i64) -> Self {
        Self(Uuid::from_u64_pair(msb.cast_unsigned(), lsb.cast_unsigned()))
    }

    /// Splits the identifier into its most and least significant halves.
    #[inline]
    #[must_use]
    pub const fn to_bits(&self) -> (i64, i64) {
        let (msb, lsb) = self.0.as_u64_pair();
        (msb.cast_signed(), lsb.cast_signed())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScriptId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::invalid_message(format!("invalid script id '{s}': {e}")))
    }
}

impl From<Uuid> for ScriptId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier of a single request (newtype over [`Uuid`]).
///
/// Generated by the caller for every message and echoed back in the
/// response so the caller can correlate the two.
///
/// # Examples
///
/// ```
/// use script_executor_core::RequestId;
///
/// let bytes = [0u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 7];
/// let id = RequestId::from_slice(&bytes).unwrap();
/// assert_eq!(id.to_bits(), (0, 7));
///
/// assert!(RequestId::from_slice(&[1, 2, 3]).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a fresh random request identifier.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[inline]
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Builds an identifier from its most and least significant halves.
    #[inline]
    #[must_use]
    pub const fn from_bits(msb: i64, lsb: i64) -> Self {
        Self(Uuid::from_u64_pair(msb.cast_unsigned(), lsb.cast_unsigned()))
    }

    /// Splits the identifier into its most and least significant halves.
    #[inline]
    #[must_use]
    pub const fn to_bits(&self) -> (i64, i64) {
        let (msb, lsb) = self.0.as_u64_pair();
        (msb.cast_signed(), lsb.cast_signed())
    }

    /// Parses the 16-byte binary form carried in the `requestId` header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the buffer is not exactly
    /// 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Uuid::from_slice(bytes).map(Self).map_err(|e| {
            Error::invalid_message(format!(
                "requestId header must be 16 bytes, got {}: {e}",
                bytes.len()
            ))
        })
    }

    /// Returns the 16-byte binary form.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
