//! Product transform, scoring, and filtering.
//!
//! Raw Keepa records are reduced to [`ProductSummary`] values, then filtered
//! by the caller's price bounds and truncated to the requested count.
//!
//! # Score
//!
//! ```text
//! score = round2((100000 - rank) / 100000)    when a sales-rank average exists
//! score = 0                                   otherwise
//! ```
//!
//! The score is not clamped: ranks above 100000 give negative scores, and
//! negative ranks give scores above 1.

use crate::models::{ProductSummary, RawProduct};

/// Title used when Keepa has no title for a product.
pub const UNKNOWN_TITLE: &str = "Unknown";

/// Rank at which the score reaches zero.
pub const RANK_CEILING: f64 = 100_000.0;

/// Reduce a raw Keepa record to a summary.
pub fn summarize(raw: &RawProduct) -> ProductSummary {
    let title = match raw.title.as_deref() {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => UNKNOWN_TITLE.to_string(),
    };

    let buy_box_price = raw
        .buy_box_price_history
        .as_ref()
        .and_then(|history| history.last().copied());

    let sales_rank_average = sales_rank_signal(raw);

    let category = raw
        .category_tree
        .as_ref()
        .and_then(|tree| tree.last())
        .and_then(|node| node.name.clone());

    ProductSummary {
        asin: raw.asin.clone().unwrap_or_default(),
        title,
        buy_box_price,
        sales_rank_average,
        category,
        score: score(sales_rank_average),
    }
}

/// 30-day average when present, else 90-day. A zero average counts as missing.
fn sales_rank_signal(raw: &RawProduct) -> Option<i64> {
    let stats = raw.stats.as_ref()?;
    stats
        .sales_rank_average30
        .filter(|r| *r != 0)
        .or(stats.sales_rank_average90.filter(|r| *r != 0))
}

/// Desirability score for a sales-rank signal.
pub fn score(signal: Option<i64>) -> f64 {
    match signal {
        Some(rank) => round2((RANK_CEILING - rank as f64) / RANK_CEILING),
        None => 0.0,
    }
}

/// Round to two decimals, halves toward positive infinity.
fn round2(x: f64) -> f64 {
    (x * 100.0 + 0.5).floor() / 100.0
}

/// Inclusive price bounds in cents. Unset or zero bounds never exclude anything.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceFilter {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl PriceFilter {
    pub fn new(min: Option<i64>, max: Option<i64>) -> Self {
        Self { min, max }
    }

    /// A product without a price, or priced at zero, always passes.
    pub fn retains(&self, product: &ProductSummary) -> bool {
        let Some(price) = product.buy_box_price.filter(|p| *p != 0) else {
            return true;
        };
        if matches!(self.min.filter(|m| *m != 0), Some(min) if price < min) {
            return false;
        }
        if matches!(self.max.filter(|m| *m != 0), Some(max) if price > max) {
            return false;
        }
        true
    }
}

/// Filter by price and keep at most `max_results`, preserving order.
pub fn filter_and_truncate(
    items: Vec<ProductSummary>,
    filter: &PriceFilter,
    max_results: usize,
) -> Vec<ProductSummary> {
    items
        .into_iter()
        .filter(|p| filter.retains(p))
        .take(max_results)
        .collect()
}
