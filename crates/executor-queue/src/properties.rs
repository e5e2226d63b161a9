//! Topic and subscription properties.
//!
//! Properties are configured as a single string of `key:value` pairs joined
//! by `;`, for example `ackDeadlineInSec:30;messageRetentionInSec:604800`.

use crate::QueueError;
use std::collections::BTreeMap;
use std::time::Duration;

/// Key of the acknowledgement deadline, in seconds.
pub const ACK_DEADLINE_KEY: &str = "ackDeadlineInSec";

/// Key of the message retention period, in seconds.
pub const MESSAGE_RETENTION_KEY: &str = "messageRetentionInSec";

/// Parsed queue properties.
///
/// # Examples
///
/// ```
/// use script_executor_queue::QueueProperties;
/// use std::time::Duration;
///
/// let props = QueueProperties::parse("ackDeadlineInSec:30;messageRetentionInSec:604800;").unwrap();
/// assert_eq!(props.ack_deadline(), Some(Duration::from_secs(30)));
/// assert_eq!(props.message_retention(), Some(Duration::from_secs(604_800)));
///
/// // Values may contain ':'; only the first one separates key and value.
/// let props = QueueProperties::parse("endpoint:http://localhost:8085").unwrap();
/// assert_eq!(props.get("endpoint"), Some("http://localhost:8085"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueProperties {
    values: BTreeMap<String, String>,
}

impl QueueProperties {
    /// Parses a `key:value;key:value` string.
    ///
    /// Empty pairs are skipped and a pair without `:` gets an empty value.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidProperty`] if a key is empty or a
    /// duration property is not a whole number of seconds.
    pub fn parse(raw: &str) -> Result<Self, QueueError> {
        let mut values = BTreeMap::new();
        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once(':').unwrap_or((pair, ""));
            let key = key.trim();
            if key.is_empty() {
                return Err(QueueError::InvalidProperty {
                    key: pair.to_string(),
                    reason: "empty key".to_string(),
                });
            }
            values.insert(key.to_string(), value.trim().to_string());
        }

        let props = Self { values };
        for key in [ACK_DEADLINE_KEY, MESSAGE_RETENTION_KEY] {
            props.seconds(key)?;
        }
        Ok(props)
    }

    /// Returns a raw property value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no property is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns how long a delivery may stay unacknowledged.
    #[must_use]
    pub fn ack_deadline(&self) -> Option<Duration> {
        self.seconds(ACK_DEADLINE_KEY).ok().flatten()
    }

    /// Returns how long unconsumed messages are retained.
    #[must_use]
    pub fn message_retention(&self) -> Option<Duration> {
        self.seconds(MESSAGE_RETENTION_KEY).ok().flatten()
    }

    fn seconds(&self, key: &str) -> Result<Option<Duration>, QueueError> {
        self.get(key)
            .map(|value| {
                value
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| QueueError::InvalidProperty {
                        key: key.to_string(),
                        reason: format!("'{value}' is not a number of seconds: {e}"),
                    })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string() {
        let props = QueueProperties::parse("").unwrap();
        assert!(props.is_empty());
        assert_eq!(props.ack_deadline(), None);
    }

    #[test]
    fn test_skips_empty_pairs() {
        let props = QueueProperties::parse(";;ackDeadlineInSec:10;;").unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props.ack_deadline(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_pair_without_delimiter() {
        let props = QueueProperties::parse("flag").unwrap();
        assert_eq!(props.get("flag"), Some(""));
    }

    #[test]
    fn test_rejects_bad_duration() {
        let err = QueueProperties::parse("messageRetentionInSec:week").unwrap_err();
        assert!(matches!(err, QueueError::InvalidProperty { ref key, .. } if key == MESSAGE_RETENTION_KEY));
    }

    #[test]
    fn test_rejects_empty_key() {
        assert!(QueueProperties::parse(":30").is_err());
    }

    #[test]
    fn test_last_value_wins() {
        let props = QueueProperties::parse("ackDeadlineInSec:10;ackDeadlineInSec:20").unwrap();
        assert_eq!(props.ack_deadline(), Some(Duration::from_secs(20)));
    }
}
