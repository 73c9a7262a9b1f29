//! Per-user document store.
//!
//! Holds two append-only collections for every user:
//!
//! | Collection | Written by | Timestamp |
//! |------------|------------|-----------|
//! | `searches` | [`SqliteStore::log_search`] / [`SqliteStore::put_search`] | `createdAt` |
//! | `results`  | [`SqliteStore::save_result`] | `savedAt` |
//!
//! Timestamps are assigned by the store, never by the caller. Reads return a
//! [`Snapshot`] ordered by timestamp. [`SqliteStore::subscribe`] turns a query
//! into a live view: an initial snapshot, then a fresh one after every write to
//! that user's collection, until the [`Subscription`] is cancelled or dropped.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Result, ScoutError};
use crate::models::{ProductSummary, SavedResult, SearchLogEntry};
use crate::{db, migrate};

/// Default size of a live view.
pub const LIVE_VIEW_LIMIT: usize = 10;

/// Keys the store owns on a search log entry; caller metadata cannot set them.
const RESERVED_SEARCH_KEYS: [&str; 3] = ["id", "keyword", "createdAt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Searches,
    Results,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Searches => "searches",
            Collection::Results => "results",
        }
    }
}

impl FromStr for Collection {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "searches" => Ok(Collection::Searches),
            "results" => Ok(Collection::Results),
            other => Err(ScoutError::InvalidArgument(format!(
                "unknown collection: {}",
                other
            ))),
        }
    }
}

/// Timestamp ordering of a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl FromStr for Order {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "desc" => Ok(Order::NewestFirst),
            "asc" => Ok(Order::OldestFirst),
            other => Err(ScoutError::InvalidArgument(format!(
                "order must be 'asc' or 'desc', got '{}'",
                other
            ))),
        }
    }
}

impl Order {
    fn sql(&self) -> &'static str {
        match self {
            Order::NewestFirst => "DESC",
            Order::OldestFirst => "ASC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query {
    pub collection: Collection,
    pub order: Order,
    pub limit: usize,
}

impl Query {
    /// Newest-first view of the most recent [`LIVE_VIEW_LIMIT`] documents.
    pub fn recent(collection: Collection) -> Self {
        Self {
            collection,
            order: Order::NewestFirst,
            limit: LIVE_VIEW_LIMIT,
        }
    }
}

/// The documents matched by a [`Query`] at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", content = "docs", rename_all = "lowercase")]
pub enum Snapshot {
    Searches(Vec<SearchLogEntry>),
    Results(Vec<SavedResult>),
}

impl Snapshot {
    pub fn len(&self) -> usize {
        match self {
            Snapshot::Searches(docs) => docs.len(),
            Snapshot::Results(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A write notification: which user's collection changed.
#[derive(Debug, Clone)]
struct Change {
    uid: String,
    collection: Collection,
}

/// SQLite-backed document store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    changes: broadcast::Sender<Change>,
}

impl SqliteStore {
    /// Wrap a pool whose schema is already migrated.
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { pool, changes }
    }

    /// Connect to the configured database and apply migrations.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn notify(&self, uid: &str, collection: Collection) {
        // No receivers is fine: nobody is watching.
        let _ = self.changes.send(Change {
            uid: uid.to_string(),
            collection,
        });
    }

    /// Append a search log entry with optional extra metadata.
    pub async fn log_search(
        &self,
        uid: &str,
        keyword: &str,
        metadata: Map<String, Value>,
    ) -> Result<SearchLogEntry> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        let metadata: Map<String, Value> = metadata
            .into_iter()
            .filter(|(k, _)| !RESERVED_SEARCH_KEYS.contains(&k.as_str()))
            .collect();
        let metadata_json = serde_json::to_string(&metadata)?;

        sqlx::query(
            "INSERT INTO searches (id, uid, keyword, created_at, metadata_json) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(uid)
        .bind(keyword)
        .bind(now)
        .bind(&metadata_json)
        .execute(&self.pool)
        .await?;

        self.notify(uid, Collection::Searches);
        tracing::debug!(uid, keyword, "search logged");

        Ok(SearchLogEntry {
            id,
            keyword: keyword.to_string(),
            created_at: format_ts_iso(now),
            metadata,
        })
    }

    /// Write a search log entry under a fixed id, replacing any previous one.
    pub async fn put_search(&self, uid: &str, id: &str, keyword: &str) -> Result<SearchLogEntry> {
        if id.is_empty() {
            return Err(ScoutError::InvalidArgument(
                "document id must not be empty".to_string(),
            ));
        }
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO searches (id, uid, keyword, created_at, metadata_json)
            VALUES (?, ?, ?, ?, '{}')
            ON CONFLICT(uid, id) DO UPDATE SET
                keyword = excluded.keyword,
                created_at = excluded.created_at,
                metadata_json = '{}'
            "#,
        )
        .bind(id)
        .bind(uid)
        .bind(keyword)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.notify(uid, Collection::Searches);

        Ok(SearchLogEntry {
            id: id.to_string(),
            keyword: keyword.to_string(),
            created_at: format_ts_iso(now),
            metadata: Map::new(),
        })
    }

    /// Append a copy of a product summary. Saving the same product twice
    /// stores two documents.
    pub async fn save_result(&self, uid: &str, item: &ProductSummary) -> Result<SavedResult> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        let item_json = serde_json::to_string(item)?;

        sqlx::query(
            "INSERT INTO results (id, uid, asin, item_json, saved_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(uid)
        .bind(&item.asin)
        .bind(&item_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.notify(uid, Collection::Results);
        tracing::debug!(uid, asin = %item.asin, "result saved");

        Ok(SavedResult {
            id,
            item: item.clone(),
            saved_at: format_ts_iso(now),
        })
    }

    /// Read one collection for a user.
    pub async fn query(&self, uid: &str, query: &Query) -> Result<Snapshot> {
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let dir = query.order.sql();

        match query.collection {
            Collection::Searches => {
                let sql = format!(
                    "SELECT id, keyword, created_at, metadata_json FROM searches \
                     WHERE uid = ? ORDER BY created_at {dir}, rowid {dir} LIMIT ?"
                );
                let rows = sqlx::query(&sql)
                    .bind(uid)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?;

                let mut docs = Vec::with_capacity(rows.len());
                for row in &rows {
                    let metadata_json: String = row.get("metadata_json");
                    docs.push(SearchLogEntry {
                        id: row.get("id"),
                        keyword: row.get("keyword"),
                        created_at: format_ts_iso(row.get("created_at")),
                        metadata: serde_json::from_str(&metadata_json)?,
                    });
                }
                Ok(Snapshot::Searches(docs))
            }
            Collection::Results => {
                let sql = format!(
                    "SELECT id, item_json, saved_at FROM results \
                     WHERE uid = ? ORDER BY saved_at {dir}, rowid {dir} LIMIT ?"
                );
                let rows = sqlx::query(&sql)
                    .bind(uid)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?;

                let mut docs = Vec::with_capacity(rows.len());
                for row in &rows {
                    let item_json: String = row.get("item_json");
                    docs.push(SavedResult {
                        id: row.get("id"),
                        item: serde_json::from_str(&item_json)?,
                        saved_at: format_ts_iso(row.get("saved_at")),
                    });
                }
                Ok(Snapshot::Results(docs))
            }
        }
    }

    /// Start a live view of `query` for one user.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, uid: &str, query: Query) -> Subscription {
        let (tx, rx) = mpsc::channel(16);
        // Subscribe before the first read so no write slips between them.
        let mut changes = self.changes.subscribe();
        let store = self.clone();
        let uid = uid.to_string();

        let task = tokio::spawn(async move {
            let mut dirty = true;
            loop {
                if dirty {
                    match store.query(&uid, &query).await {
                        Ok(snapshot) => {
                            if tx.send(snapshot).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(uid = %uid, error = %e, "live view query failed"),
                    }
                }
                dirty = match changes.recv().await {
                    Ok(change) => change.uid == uid && change.collection == query.collection,
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
            }
        });

        Subscription { rx, task }
    }
}

/// Handle to a live view. Dropping it stops the view.
pub struct Subscription {
    rx: mpsc::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Wait for the next snapshot. `None` once the view has stopped.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    /// Stop the view and release its resources.
    pub fn cancel(self) {}

    /// Adapt into a stream of snapshots; dropping the stream cancels the view.
    pub fn into_stream(self) -> impl Stream<Item = Snapshot> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let snapshot = sub.next().await?;
            Some((snapshot, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn format_ts_iso(ts_millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts_millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ts_millis.to_string())
}
