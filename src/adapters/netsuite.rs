//! NetSuite adapter implementation
//!
//! ERP adapter speaking the SuiteTalk REST record API. Records are addressed
//! by external id under the inventory item resource; writes are PATCHes of
//! the changed fields only, which NetSuite applies idempotently.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::adapters::trait_::{AdapterError, TargetAdapter, TargetState};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// NetSuite ERP adapter
#[derive(Clone)]
pub struct NetSuiteAdapter {
    http: reqwest::Client,
    api_base: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct NetSuiteRecord {
    #[serde(default)]
    fields: BTreeMap<String, JsonValue>,
    #[serde(rename = "lastModifiedDate")]
    last_modified: Option<DateTime<Utc>>,
}

impl NetSuiteAdapter {
    /// Create a new NetSuite adapter for the given API base and access token.
    pub fn new(api_base: &str, token: String) -> Result<Self, url::ParseError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Ok(Self {
            http,
            api_base: Url::parse(api_base)?,
            token,
        })
    }

    fn record_url(&self, external_id: &str) -> Result<Url, AdapterError> {
        self.api_base
            .join(&format!("record/v1/inventoryItem/{}", external_id))
            .map_err(|e| AdapterError::permanent(format!("Invalid record URL: {}", e)))
    }
}

fn retry_after_seconds(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

#[async_trait]
impl TargetAdapter for NetSuiteAdapter {
    fn slug(&self) -> &'static str {
        "netsuite"
    }

    async fn fetch(
        &self,
        tenant_id: Uuid,
        external_id: &str,
    ) -> Result<Option<TargetState>, AdapterError> {
        let url = self.record_url(external_id)?;

        debug!(tenant_id = %tenant_id, external_id, "Fetching NetSuite record");

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(AdapterError::from)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let retry_after = retry_after_seconds(&response);
            let body = response.text().await.ok();
            return Err(AdapterError::from_status(status.as_u16(), body, retry_after));
        }

        let record: NetSuiteRecord = response.json().await.map_err(AdapterError::from)?;

        let mut state = TargetState::new(record.fields);
        if let Some(last_modified) = record.last_modified {
            state = state.with_last_modified(last_modified);
        }

        Ok(Some(state))
    }

    async fn write(
        &self,
        tenant_id: Uuid,
        external_id: &str,
        fields: &BTreeMap<String, JsonValue>,
    ) -> Result<(), AdapterError> {
        let url = self.record_url(external_id)?;

        debug!(
            tenant_id = %tenant_id,
            external_id,
            field_count = fields.len(),
            "Writing NetSuite record"
        );

        let response = self
            .http
            .patch(url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "fields": fields }))
            .send()
            .await
            .map_err(AdapterError::from)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_seconds(&response);
            let body = response.text().await.ok();
            return Err(AdapterError::from_status(status.as_u16(), body, retry_after));
        }

        Ok(())
    }
}
