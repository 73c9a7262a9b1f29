//! Keepa product-data API client.
//!
//! Defines the [`CatalogApi`] trait used by the search pipeline and the
//! [`KeepaClient`] implementation that talks to Keepa over HTTPS.
//!
//! # Resources
//!
//! | Resource | Query parameters |
//! |----------|------------------|
//! | `GET /token` | `key`, `domain` |
//! | `GET /search` | `key`, `domain`, `type=product`, `term` |
//! | `GET /product` | `key`, `domain`, `asin` (comma-joined), `buybox=1` |
//!
//! # Failure handling
//!
//! Keepa reports failures two ways, and both become
//! [`ScoutError::UpstreamPrecondition`]:
//!
//! - a non-2xx status → `"Keepa search HTTP 429"`
//! - a 2xx body with an `error` field → `"Keepa search error: {...}"`
//!
//! A body that is not valid JSON is treated as an empty object. No request is
//! ever retried.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::KeepaConfig;
use crate::error::{Result, ScoutError};
use crate::models::{KeepaProductResponse, KeepaSearchResponse, RawProduct};

/// Upper bound on identifiers sent to a single product lookup.
pub const MAX_PRODUCT_BATCH: usize = 40;

/// The external catalog the search pipeline reads from.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Token bucket status, returned verbatim.
    async fn token_status(&self) -> Result<Value>;

    /// Keyword search returning catalog identifiers in relevance order.
    async fn search_asins(&self, term: &str) -> Result<Vec<String>>;

    /// Product detail lookup with buy-box data for a batch of identifiers.
    async fn fetch_products(&self, asins: &[String]) -> Result<Vec<RawProduct>>;
}

/// HTTP client for the Keepa REST API.
#[derive(Clone)]
pub struct KeepaClient {
    http: reqwest::Client,
    base_url: String,
    key: String,
    domain: String,
}

impl KeepaClient {
    pub fn new(config: &KeepaConfig, key: String) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            http: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key,
            domain: config.domain.trim().to_string(),
        })
    }

    /// Build a client from configuration, resolving the key from the environment.
    pub fn from_config(config: &KeepaConfig) -> anyhow::Result<Self> {
        let key = config.resolve_api_key()?;
        Self::new(config, key)
    }

    /// Issue one GET and apply the shared status / embedded-error checks.
    ///
    /// `stage` names the resource in error messages and logs.
    async fn get_json(
        &self,
        stage: &str,
        resource: &str,
        params: &[(&str, &str)],
    ) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, resource);
        let mut query: Vec<(&str, &str)> =
            vec![("key", self.key.as_str()), ("domain", self.domain.as_str())];
        query.extend_from_slice(params);

        let resp = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| ScoutError::Internal(format!("Keepa {} request failed: {}", stage, e)))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let body: Value =
            serde_json::from_str(&text).unwrap_or_else(|_| Value::Object(Default::default()));

        check_response(stage, status.as_u16(), status.is_success(), body)
    }
}

/// Map a Keepa response to the payload or an upstream error.
fn check_response(stage: &str, status: u16, success: bool, body: Value) -> Result<Value> {
    if !success {
        tracing::error!(stage, status, body = %body, "Keepa HTTP failure");
        return Err(ScoutError::UpstreamPrecondition(format!(
            "Keepa {} HTTP {}",
            stage, status
        )));
    }
    match body.get("error") {
        Some(err) if !is_falsy(err) => {
            tracing::error!(stage, error = %err, "Keepa error payload");
            Err(ScoutError::UpstreamPrecondition(format!(
                "Keepa {} error: {}",
                stage, err
            )))
        }
        _ => Ok(body),
    }
}

/// `error: null`, `false`, `0` or `""` do not signal a failure.
fn is_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[async_trait]
impl CatalogApi for KeepaClient {
    async fn token_status(&self) -> Result<Value> {
        self.get_json("token", "token", &[]).await
    }

    async fn search_asins(&self, term: &str) -> Result<Vec<String>> {
        let body = self
            .get_json("search", "search", &[("type", "product"), ("term", term)])
            .await?;
        let parsed: KeepaSearchResponse = serde_json::from_value(body)?;

        let mut asins = Vec::new();
        for value in parsed.asin_list.unwrap_or_default() {
            match value {
                Value::String(asin) => asins.push(asin),
                other => tracing::warn!(value = %other, "skipping non-string ASIN"),
            }
        }
        Ok(asins)
    }

    async fn fetch_products(&self, asins: &[String]) -> Result<Vec<RawProduct>> {
        let batch = &asins[..asins.len().min(MAX_PRODUCT_BATCH)];
        let joined = batch.join(",");
        let body = self
            .get_json("product", "product", &[("asin", joined.as_str()), ("buybox", "1")])
            .await?;
        let parsed: KeepaProductResponse = serde_json::from_value(body)?;

        let mut products = Vec::new();
        for value in parsed.products.unwrap_or_default() {
            match RawProduct::from_value(value) {
                Some(p) => products.push(p),
                None => tracing::warn!("skipping non-object product record"),
            }
        }
        Ok(products)
    }
}
