//! Shopify adapter implementation
//!
//! Storefront adapter speaking the Shopify Admin REST API. Products are
//! addressed by external id; writes PUT the changed fields, which Shopify
//! applies idempotently for the same payload.

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
const API_VERSION: &str = "2024-01";

/// Shopify storefront adapter
#[derive(Clone)]
pub struct ShopifyAdapter {
    http: reqwest::Client,
    api_base: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ShopifyProductEnvelope {
    product: ShopifyProduct,
}

#[derive(Debug, Deserialize)]
struct ShopifyProduct {
    #[serde(default)]
    fields: BTreeMap<String, JsonValue>,
    updated_at: Option<DateTime<Utc>>,
}

impl ShopifyAdapter {
    /// Create a new Shopify adapter for the given store base URL and access token.
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

    fn product_url(&self, external_id: &str) -> Result<Url, AdapterError> {
        self.api_base
            .join(&format!(
                "admin/api/{}/products/{}.json",
                API_VERSION, external_id
            ))
            .map_err(|e| AdapterError::permanent(format!("Invalid product URL: {}", e)))
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
impl TargetAdapter for ShopifyAdapter {
    fn slug(&self) -> &'static str {
        "shopify"
    }

    async fn fetch(
        &self,
        tenant_id: Uuid,
        external_id: &str,
    ) -> Result<Option<TargetState>, AdapterError> {
        let url = self.product_url(external_id)?;

        debug!(tenant_id = %tenant_id, external_id, "Fetching Shopify product");

        let response = self
            .http
            .get(url)
            .header("X-Shopify-Access-Token", &self.token)
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

        let envelope: ShopifyProductEnvelope = response.json().await.map_err(AdapterError::from)?;

        let mut state = TargetState::new(envelope.product.fields);
        if let Some(updated_at) = envelope.product.updated_at {
            state = state.with_last_modified(updated_at);
        }

        Ok(Some(state))
    }

    async fn write(
        &self,
        tenant_id: Uuid,
        external_id: &str,
        fields: &BTreeMap<String, JsonValue>,
    ) -> Result<(), AdapterError> {
        let url = self.product_url(external_id)?;

        debug!(
            tenant_id = %tenant_id,
            external_id,
            field_count = fields.len(),
            "Writing Shopify product"
        );

        let response = self
            .http
            .put(url)
            .header("X-Shopify-Access-Token", &self.token)
            .json(&serde_json::json!({ "product": { "fields": fields } }))
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
