//! Core data models used throughout Niche Scout.
//!
//! Three groups of types live here:
//!
//! - the callable request ([`SearchRequest`]) and its validated form,
//! - the reduced product shape returned to callers ([`ProductSummary`]),
//! - the raw Keepa payload records ([`RawProduct`] and friends), decoded
//!   field-by-field so that a malformed or missing field only blanks that
//!   field instead of failing the whole batch.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, ScoutError};

/// Result count used when the caller does not pass `maxResults`.
pub const DEFAULT_MAX_RESULTS: usize = 20;

/// A validated `searchProducts` request.
///
/// Prices are integer cents, matching Keepa's price encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub keyword: String,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub max_results: usize,
}

impl SearchRequest {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            min_price: None,
            max_price: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// Validate the `data` payload of a callable request.
    ///
    /// `null` or absent optional fields fall back to their defaults. A
    /// missing, non-string or empty keyword is rejected, as is any price or
    /// count that is not a non-negative integer.
    pub fn from_data(data: &Value) -> Result<Self> {
        let empty = Map::new();
        let obj = match data {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(ScoutError::InvalidArgument(
                    "Request data must be an object.".to_string(),
                ))
            }
        };

        let keyword = match obj.get("keyword") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => {
                return Err(ScoutError::InvalidArgument(
                    "Keyword is required.".to_string(),
                ))
            }
        };

        let min_price = non_negative_int(obj, "minPrice")?;
        let max_price = non_negative_int(obj, "maxPrice")?;
        let max_results = match non_negative_int(obj, "maxResults")? {
            Some(n) => usize::try_from(n).map_err(|_| {
                ScoutError::InvalidArgument("maxResults is out of range.".to_string())
            })?,
            None => DEFAULT_MAX_RESULTS,
        };

        Ok(Self {
            keyword,
            min_price,
            max_price,
            max_results,
        })
    }

    /// Serialize back into the callable `data` payload shape.
    pub fn to_data(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("keyword".to_string(), Value::from(self.keyword.clone()));
        if let Some(p) = self.min_price {
            obj.insert("minPrice".to_string(), Value::from(p));
        }
        if let Some(p) = self.max_price {
            obj.insert("maxPrice".to_string(), Value::from(p));
        }
        obj.insert("maxResults".to_string(), Value::from(self.max_results));
        Value::Object(obj)
    }
}

fn non_negative_int(obj: &Map<String, Value>, field: &str) -> Result<Option<i64>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if n >= 0 => Ok(Some(n)),
            _ => Err(ScoutError::InvalidArgument(format!(
                "{} must be a non-negative integer.",
                field
            ))),
        },
    }
}

/// The reduced product record returned by `searchProducts`.
///
/// A copy of this record is what gets persisted when a user saves a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub asin: String,
    pub title: String,
    /// Most recent buy-box price in cents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_box_price: Option<i64>,
    /// 30-day sales-rank average, or the 90-day average when the former is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sales_rank_average: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub score: f64,
}

/// One entry of the per-user search log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchLogEntry {
    pub id: String,
    pub keyword: String,
    /// RFC 3339, assigned by the store.
    pub created_at: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// A product summary saved by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedResult {
    pub id: String,
    #[serde(flatten)]
    pub item: ProductSummary,
    /// RFC 3339, assigned by the store.
    pub saved_at: String,
}

// ============ Keepa payloads ============

/// Decode a field leniently: wrong-typed values become `None`.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Body of Keepa's `/search` resource.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepaSearchResponse {
    /// Kept as raw JSON; non-string entries are dropped one at a time by the client.
    #[serde(default, deserialize_with = "lenient")]
    pub asin_list: Option<Vec<Value>>,
}

/// Body of Keepa's `/product` resource.
///
/// Products are kept as raw JSON here and decoded one at a time with
/// [`RawProduct::from_value`], so one odd record cannot sink the batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeepaProductResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub products: Option<Vec<Value>>,
}

/// A Keepa product record, reduced to the fields scoring needs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProduct {
    #[serde(default, deserialize_with = "lenient")]
    pub asin: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub buy_box_price_history: Option<Vec<i64>>,
    #[serde(default, deserialize_with = "lenient")]
    pub stats: Option<KeepaStats>,
    #[serde(default, deserialize_with = "lenient")]
    pub category_tree: Option<Vec<CategoryNode>>,
}

impl RawProduct {
    /// Decode one product record. Returns `None` when the value is not an object.
    pub fn from_value(value: Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

/// Rolling sales-rank averages.
///
/// Keepa reports whole ranks. A whole-valued float such as `4200.0` is
/// accepted; a fractional average is treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepaStats {
    #[serde(default, deserialize_with = "rank_average")]
    pub sales_rank_average30: Option<i64>,
    #[serde(default, deserialize_with = "rank_average")]
    pub sales_rank_average90: Option<i64>,
}

fn rank_average<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if let Some(n) = value.as_i64() {
        return Ok(Some(n));
    }
    Ok(value
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64))
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
}
