//! The product search pipeline and the Keepa diagnostic ping.
//!
//! # Pipeline
//!
//! ```text
//! keyword ──▶ /search ──▶ first 40 ASINs ──▶ /product ──▶ summarize ──▶ price filter ──▶ truncate
//!                              │
//!                              └── empty ──▶ []   (no /product call)
//! ```
//!
//! Both network calls run sequentially. Any failure aborts the whole call;
//! partial results are never returned.

use serde_json::Value;

use crate::error::Result;
use crate::keepa::{CatalogApi, MAX_PRODUCT_BATCH};
use crate::models::{ProductSummary, SearchRequest};
use crate::scoring::{filter_and_truncate, summarize, PriceFilter};

/// Validate a callable `data` payload and run the pipeline.
///
/// Validation happens before any outbound request.
pub async fn search_from_data(
    catalog: &dyn CatalogApi,
    data: &Value,
) -> Result<Vec<ProductSummary>> {
    let request = SearchRequest::from_data(data)?;
    search_products(catalog, &request).await
}

/// Run the two-stage Keepa lookup and return scored, filtered summaries.
pub async fn search_products(
    catalog: &dyn CatalogApi,
    request: &SearchRequest,
) -> Result<Vec<ProductSummary>> {
    let mut asins = catalog.search_asins(&request.keyword).await?;
    asins.truncate(MAX_PRODUCT_BATCH);
    if asins.is_empty() {
        tracing::info!(keyword = %request.keyword, "no ASINs matched");
        return Ok(Vec::new());
    }

    let products = catalog.fetch_products(&asins).await?;
    let summaries: Vec<ProductSummary> = products.iter().map(summarize).collect();
    let fetched = summaries.len();

    let filter = PriceFilter::new(request.min_price, request.max_price);
    let results = filter_and_truncate(summaries, &filter, request.max_results);

    tracing::info!(
        keyword = %request.keyword,
        asins = asins.len(),
        fetched,
        returned = results.len(),
        "search complete"
    );
    Ok(results)
}

/// Return Keepa's token status body unchanged.
pub async fn diagnostic_ping(catalog: &dyn CatalogApi) -> Result<Value> {
    catalog.token_status().await
}
