//! Client for a running Niche Scout server.
//!
//! [`ScoutClient`] wraps the HTTP API. The `run_*` functions are the CLI
//! entry points behind `scout ping`, `scout search`, `scout recent`,
//! `scout watch`, and `scout store-check`.
//!
//! # Environment Variables
//!
//! - `SCOUT_SERVER_URL` - base URL of the server, e.g. `http://127.0.0.1:8787`
//! - `SCOUT_TOKEN` - bearer token listed under `[auth.tokens]` on the server
//!
//! Both are required; a missing one is a hard failure naming the variable.

use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::models::{ProductSummary, SavedResult, SearchLogEntry, SearchRequest};
use crate::store::{Collection, Snapshot, LIVE_VIEW_LIMIT};

/// Message shown when Keepa has run out of request tokens.
pub const QUOTA_MESSAGE: &str = "Keepa tokens are depleted. Please wait for refill or add tokens.";

/// Fixed document id written by the store write check.
pub const TEST_DOC_ID: &str = "testDoc";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub token: String,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_url: must("SCOUT_SERVER_URL", std::env::var("SCOUT_SERVER_URL").ok())?,
            token: must("SCOUT_TOKEN", std::env::var("SCOUT_TOKEN").ok())?,
        })
    }
}

/// Fail with a clear message when a required variable is missing or blank.
fn must(name: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("Missing env var: {}. Set it and run the command again.", name),
    }
}

/// An error response returned by the server.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct RemoteError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct CallableEnvelope<T> {
    result: T,
}

/// True when an error message signals an exhausted Keepa token bucket.
pub fn is_quota_exhausted(message: &str) -> bool {
    message.contains("resource-exhausted") || message.contains("429")
}

/// The text to show a user for a failed call.
pub fn describe_failure(err: &anyhow::Error) -> String {
    let message = match err.downcast_ref::<RemoteError>() {
        Some(remote) => format!("{} {}", remote.code, remote.message),
        None => err.to_string(),
    };
    if is_quota_exhausted(&message) {
        QUOTA_MESSAGE.to_string()
    } else {
        err.to_string()
    }
}

pub struct ScoutClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ScoutClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let text = resp.text().await.unwrap_or_default();
        let err = match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(env) => RemoteError {
                status: status.as_u16(),
                code: env.error.code,
                message: env.error.message,
            },
            Err(_) => RemoteError {
                status: status.as_u16(),
                code: "internal".to_string(),
                message: format!("HTTP {}: {}", status.as_u16(), text),
            },
        };
        Err(err.into())
    }

    async fn call<T: DeserializeOwned>(&self, name: &str, data: Value) -> Result<T> {
        let resp = self
            .http
            .post(self.url(&format!("/functions/{}", name)))
            .bearer_auth(&self.token)
            .json(&json!({ "data": data }))
            .send()
            .await?;
        let envelope: CallableEnvelope<T> = Self::decode(resp).await?;
        Ok(envelope.result)
    }

    pub async fn diagnostic_ping(&self) -> Result<Value> {
        self.call("diagnosticPing", Value::Null).await
    }

    pub async fn search_products(&self, request: &SearchRequest) -> Result<Vec<ProductSummary>> {
        self.call("searchProducts", request.to_data()).await
    }

    pub async fn log_search(
        &self,
        keyword: &str,
        metadata: Map<String, Value>,
    ) -> Result<SearchLogEntry> {
        let mut body = metadata;
        body.insert("keyword".to_string(), Value::from(keyword));
        let resp = self
            .http
            .post(self.url("/users/me/searches"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn put_search(&self, id: &str, keyword: &str) -> Result<SearchLogEntry> {
        let resp = self
            .http
            .put(self.url(&format!("/users/me/searches/{}", id)))
            .bearer_auth(&self.token)
            .json(&json!({ "keyword": keyword }))
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn save_result(&self, item: &ProductSummary) -> Result<SavedResult> {
        let resp = self
            .http
            .post(self.url("/users/me/results"))
            .bearer_auth(&self.token)
            .json(item)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn recent(&self, collection: Collection, limit: usize) -> Result<Snapshot> {
        let resp = self
            .http
            .get(self.url(&format!("/users/me/{}", collection.as_str())))
            .bearer_auth(&self.token)
            .query(&[("limit", limit.to_string())])
            .send()
            .await?;
        Self::decode(resp).await
    }

    /// Follow a live view, calling `on_snapshot` for every snapshot until the
    /// server closes the stream or the callback returns `false`.
    pub async fn watch<F>(&self, collection: Collection, limit: usize, mut on_snapshot: F) -> Result<()>
    where
        F: FnMut(Snapshot) -> bool,
    {
        let resp = self
            .http
            .get(self.url(&format!("/users/me/{}/live", collection.as_str())))
            .bearer_auth(&self.token)
            .query(&[("limit", limit.to_string())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Self::decode::<()>(resp).await;
        }

        let mut resp = resp;
        let mut buf = String::new();
        while let Some(chunk) = resp.chunk().await? {
            buf.push_str(&String::from_utf8_lossy(&chunk));
            for data in drain_sse_data(&mut buf) {
                let snapshot: Snapshot = serde_json::from_str(&data)?;
                if !on_snapshot(snapshot) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Remove complete events from `buf` and return their `data` payloads.
///
/// Comment-only events (keep-alives) produce nothing.
fn drain_sse_data(buf: &mut String) -> Vec<String> {
    let mut out = Vec::new();
    let normalized = buf.replace("\r\n", "\n");
    let mut rest = normalized.as_str();
    while let Some(end) = rest.find("\n\n") {
        let block = &rest[..end];
        rest = &rest[end + 2..];
        let data: Vec<&str> = block
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect();
        if !data.is_empty() {
            out.push(data.join("\n"));
        }
    }
    *buf = rest.to_string();
    out
}

// ============ Rendering ============

/// Format integer cents as dollars, or `N/A`.
pub fn format_price(cents: Option<i64>) -> String {
    match cents {
        Some(c) if c != 0 => format!("${:.2}", c as f64 / 100.0),
        _ => "N/A".to_string(),
    }
}

/// Render search results as a plain-text table.
pub fn render_results(results: &[ProductSummary]) -> String {
    let title_width = results
        .iter()
        .map(|r| r.title.chars().count())
        .max()
        .unwrap_or(0)
        .clamp(5, 60);

    let mut out = format!(
        "{:<tw$}  {:<10}  {:>9}  {:>5}\n",
        "Title",
        "ASIN",
        "BuyBox",
        "Score",
        tw = title_width
    );
    for r in results {
        let title: String = r.title.chars().take(title_width).collect();
        out.push_str(&format!(
            "{:<tw$}  {:<10}  {:>9}  {:>5}\n",
            title,
            r.asin,
            format_price(r.buy_box_price),
            r.score,
            tw = title_width
        ));
    }
    out
}

fn print_snapshot(snapshot: &Snapshot) {
    match snapshot {
        Snapshot::Searches(docs) => {
            println!("Recent Searches");
            if docs.is_empty() {
                println!("  No searches yet.");
            }
            for d in docs {
                println!("  {} - {}", d.keyword, d.created_at);
            }
        }
        Snapshot::Results(docs) => {
            println!("Saved Results");
            if docs.is_empty() {
                println!("  No saved results yet.");
            }
            for d in docs {
                let price = match d.item.buy_box_price {
                    Some(c) if c != 0 => format!(" ({})", format_price(Some(c))),
                    _ => String::new(),
                };
                println!("  {} - {}{}", d.item.title, d.item.asin, price);
            }
        }
    }
}

// ============ CLI entry points ============

/// `scout ping`
pub async fn run_ping(client: &ScoutClient) -> Result<()> {
    let status = match client.diagnostic_ping().await {
        Ok(s) => s,
        Err(e) => bail!("{}", describe_failure(&e)),
    };
    let show = |key: &str| match status.get(key) {
        Some(Value::Null) | None => "?".to_string(),
        Some(v) => v.to_string(),
    };
    println!("Keepa OK. tokensLeft={}", show("tokensLeft"));
    println!("refillIn={}s", show("refillIn"));
    Ok(())
}

/// `scout search`: log the search, run it, print the table, save picks.
pub async fn run_search(client: &ScoutClient, request: SearchRequest, save: &[String]) -> Result<()> {
    if request.keyword.trim().is_empty() {
        bail!("Enter a keyword");
    }

    if let Err(e) = client.log_search(&request.keyword, Map::new()).await {
        eprintln!("Warning: could not log search: {}", describe_failure(&e));
    }

    let results = match client.search_products(&request).await {
        Ok(r) => r,
        Err(e) => bail!("{}", describe_failure(&e)),
    };

    if results.is_empty() {
        println!("No results.");
    } else {
        print!("{}", render_results(&results));
    }

    for asin in save {
        match results.iter().find(|r| &r.asin == asin) {
            Some(item) => {
                client.save_result(item).await?;
                println!("Saved {}", item.asin);
            }
            None => eprintln!("Warning: {} is not in the results; not saved", asin),
        }
    }
    Ok(())
}

/// `scout recent`
pub async fn run_recent(client: &ScoutClient) -> Result<()> {
    let searches = client.recent(Collection::Searches, LIVE_VIEW_LIMIT).await?;
    print_snapshot(&searches);
    println!();
    let saved = client.recent(Collection::Results, LIVE_VIEW_LIMIT).await?;
    print_snapshot(&saved);
    Ok(())
}

/// `scout watch`
pub async fn run_watch(client: &ScoutClient, collection: Collection) -> Result<()> {
    client
        .watch(collection, LIVE_VIEW_LIMIT, |snapshot| {
            print_snapshot(&snapshot);
            println!();
            true
        })
        .await
}

/// `scout store-check`
pub async fn run_store_check(client: &ScoutClient) -> Result<()> {
    client.put_search(TEST_DOC_ID, "test run").await?;
    println!("Store write OK (searches/{})", TEST_DOC_ID);
    Ok(())
}
