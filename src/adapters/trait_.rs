//! Target adapter trait definition
//!
//! Defines the standard interface that all target-system adapters must
//! follow, and the error taxonomy the executor uses to decide whether a
//! failed write is worth retrying.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Current state of a record in a target system.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetState {
    /// Field name/value pairs the target currently holds
    pub fields: BTreeMap<String, JsonValue>,
    /// Last-modified timestamp reported by the target, if it has one
    pub last_modified: Option<DateTime<Utc>>,
}

impl TargetState {
    pub fn new(fields: BTreeMap<String, JsonValue>) -> Self {
        Self {
            fields,
            last_modified: None,
        }
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }
}

/// Adapter error taxonomy for structured error handling during sync operations
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterError {
    /// Authentication/authorization failure; never retried
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },
    /// Rate limited by the target with optional retry-after hint; retried
    #[error("Rate limited by target (retry after: {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    /// Transient/retryable error (timeout, 5xx, connection reset)
    #[error("Transient error: {message}")]
    Transient { message: String },
    /// Permanent/non-retryable error (validation rejected by target, 4xx)
    #[error("Permanent error: {message}")]
    Permanent { message: String },
}

impl AdapterError {
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        AdapterError::Unauthorized {
            message: message.into(),
        }
    }

    pub fn rate_limited(retry_after_secs: Option<u64>) -> Self {
        AdapterError::RateLimited { retry_after_secs }
    }

    pub fn transient<S: Into<String>>(message: S) -> Self {
        AdapterError::Transient {
            message: message.into(),
        }
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        AdapterError::Permanent {
            message: message.into(),
        }
    }

    /// Whether the executor may retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::Transient { .. } | AdapterError::RateLimited { .. }
        )
    }

    /// Classify an upstream HTTP status into the taxonomy.
    pub fn from_status(status: u16, body: Option<String>, retry_after: Option<u64>) -> Self {
        let detail = body.unwrap_or_default();
        match status {
            429 => AdapterError::rate_limited(retry_after),
            401 | 403 => AdapterError::unauthorized(format!("HTTP {}: {}", status, detail)),
            s if (400..500).contains(&s) => {
                AdapterError::permanent(format!("HTTP {}: {}", status, detail))
            }
            s => AdapterError::transient(format!("HTTP {}: {}", status, detail)),
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            AdapterError::transient(format!("Network error: {}", error))
        } else if error.is_decode() {
            AdapterError::transient(format!("Malformed response: {}", error))
        } else {
            AdapterError::permanent(format!("Request error: {}", error))
        }
    }
}

#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// Stable slug identifying the target system (e.g. "netsuite", "shopify").
    fn slug(&self) -> &'static str;

    /// Fetch the current state of a record in the target system.
    /// Returns `Ok(None)` when the target has no corresponding record.
    async fn fetch(
        &self,
        tenant_id: Uuid,
        external_id: &str,
    ) -> Result<Option<TargetState>, AdapterError>;

    /// Write the given fields to a record in the target system.
    /// Must be idempotent when retried with the same record and fields.
    async fn write(
        &self,
        tenant_id: Uuid,
        external_id: &str,
        fields: &BTreeMap<String, JsonValue>,
    ) -> Result<(), AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            AdapterError::from_status(429, None, Some(30)),
            AdapterError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));
        assert!(matches!(
            AdapterError::from_status(401, None, None),
            AdapterError::Unauthorized { .. }
        ));
        assert!(matches!(
            AdapterError::from_status(422, Some("bad sku".into()), None),
            AdapterError::Permanent { .. }
        ));
        assert!(matches!(
            AdapterError::from_status(503, None, None),
            AdapterError::Transient { .. }
        ));
    }

    #[test]
    fn test_retryability() {
        assert!(AdapterError::rate_limited(None).is_retryable());
        assert!(AdapterError::transient("timeout").is_retryable());
        assert!(!AdapterError::permanent("validation rejected").is_retryable());
        assert!(!AdapterError::unauthorized("expired token").is_retryable());
    }
}
