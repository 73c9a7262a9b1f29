//! End-to-end tests: the real router served on an ephemeral port, backed by a
//! fake Keepa API and a temporary SQLite database.

use axum::{extract::Query, extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use niche_scout::client::{describe_failure, ClientConfig, ScoutClient, QUOTA_MESSAGE};
use niche_scout::config::{AuthConfig, Config, DbConfig, KeepaConfig, ServerConfig};
use niche_scout::keepa::KeepaClient;
use niche_scout::models::{SearchRequest, SearchLogEntry};
use niche_scout::server::{router, AppState};
use niche_scout::store::{Collection, Snapshot, SqliteStore};

#[derive(Default)]
struct KeepaState {
    search_status: Option<StatusCode>,
    token_failure: Option<(StatusCode, Value)>,
    asin_count: usize,
    search_hits: AtomicUsize,
    product_hits: AtomicUsize,
    token_hits: AtomicUsize,
    last_batch: Mutex<Vec<String>>,
}

type Shared = Arc<KeepaState>;

async fn fake_token(State(s): State<Shared>) -> (StatusCode, Json<Value>) {
    s.token_hits.fetch_add(1, Ordering::SeqCst);
    if let Some((status, body)) = &s.token_failure {
        return (*status, Json(body.clone()));
    }
    (
        StatusCode::OK,
        Json(json!({ "tokensLeft": 250, "refillIn": 42000, "refillRate": 5 })),
    )
}

async fn fake_search(State(s): State<Shared>) -> (StatusCode, Json<Value>) {
    s.search_hits.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = s.search_status {
        return (status, Json(json!({})));
    }
    let asins: Vec<String> = (0..s.asin_count).map(|i| format!("B{:09}", i)).collect();
    (StatusCode::OK, Json(json!({ "asinList": asins })))
}

/// Products priced 10.00, 10.10, ... with ranks 1000, 2000, ...
async fn fake_product(
    State(s): State<Shared>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Value> {
    s.product_hits.fetch_add(1, Ordering::SeqCst);
    let batch: Vec<String> = q
        .get("asin")
        .map(|a| a.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    *s.last_batch.lock().unwrap() = batch.clone();

    let products: Vec<Value> = batch
        .iter()
        .enumerate()
        .map(|(i, asin)| {
            json!({
                "asin": asin,
                "title": format!("Product {}", i),
                "buyBoxPriceHistory": [999, 1000 + (i as i64) * 10],
                "stats": { "salesRankAverage30": 1000 * (i as i64 + 1) },
                "categoryTree": [{ "name": "Home & Kitchen" }, { "name": "Spatulas" }]
            })
        })
        .collect();
    Json(json!({ "products": products }))
}

struct TestApp {
    _tmp: TempDir,
    base_url: String,
    keepa: Shared,
}

impl TestApp {
    fn client(&self, token: &str) -> ScoutClient {
        ScoutClient::new(&ClientConfig {
            server_url: self.base_url.clone(),
            token: token.to_string(),
        })
        .unwrap()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn spawn_app(keepa: KeepaState) -> TestApp {
    let keepa = Arc::new(keepa);
    let keepa_app = Router::new()
        .route("/token", get(fake_token))
        .route("/search", get(fake_search))
        .route("/product", get(fake_product))
        .with_state(keepa.clone());
    let keepa_url = serve(keepa_app).await;

    let tmp = TempDir::new().unwrap();
    let mut tokens = HashMap::new();
    tokens.insert("token-a".to_string(), "user-a".to_string());
    tokens.insert("token-b".to_string(), "user-b".to_string());
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("scout.sqlite"),
        },
        keepa: KeepaConfig {
            base_url: keepa_url,
            ..KeepaConfig::default()
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
        auth: AuthConfig { tokens },
    };

    let catalog = KeepaClient::new(&config.keepa, "test-key".to_string()).unwrap();
    let store = SqliteStore::open(&config).await.unwrap();
    let base_url = serve(router(AppState::new(config, Arc::new(catalog), store))).await;

    TestApp {
        _tmp: tmp,
        base_url,
        keepa,
    }
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let app = spawn_app(KeepaState::default()).await;
    let resp = reqwest::get(app.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_callables_reject_missing_or_unknown_token() {
    let app = spawn_app(KeepaState::default()).await;
    let http = reqwest::Client::new();

    let resp = http
        .post(app.url("/functions/searchProducts"))
        .json(&json!({ "data": { "keyword": "mug" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthenticated");

    let resp = http
        .post(app.url("/functions/diagnosticPing"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    assert_eq!(app.keepa.search_hits.load(Ordering::SeqCst), 0);
    assert_eq!(app.keepa.token_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_keyword_makes_no_upstream_call() {
    let app = spawn_app(KeepaState::default()).await;
    let http = reqwest::Client::new();

    for data in [json!({}), json!({ "keyword": "" }), json!({ "keyword": 42 })] {
        let resp = http
            .post(app.url("/functions/searchProducts"))
            .bearer_auth("token-a")
            .json(&json!({ "data": data }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "invalid-argument");
    }
    assert_eq!(app.keepa.search_hits.load(Ordering::SeqCst), 0);
    assert_eq!(app.keepa.product_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_search_skips_product_lookup() {
    let app = spawn_app(KeepaState::default()).await;
    let results = app
        .client("token-a")
        .search_products(&SearchRequest::new("zzzz no such thing"))
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(app.keepa.search_hits.load(Ordering::SeqCst), 1);
    assert_eq!(app.keepa.product_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_search_caps_batch_and_filters() {
    let app = spawn_app(KeepaState {
        asin_count: 60,
        ..KeepaState::default()
    })
    .await;

    let request = SearchRequest {
        keyword: "silicone spatula".to_string(),
        min_price: Some(1050),
        max_price: Some(1100),
        max_results: 20,
    };
    let results = app.client("token-a").search_products(&request).await.unwrap();

    let batch = app.keepa.last_batch.lock().unwrap().clone();
    assert_eq!(batch.len(), 40);
    assert_eq!(batch[0], "B000000000");

    // Prices 10.50 through 11.00 inclusive are items 5..=10.
    let asins: Vec<&str> = results.iter().map(|r| r.asin.as_str()).collect();
    assert_eq!(asins.len(), 6);
    assert_eq!(asins[0], "B000000005");
    assert_eq!(results[0].buy_box_price, Some(1050));
    assert_eq!(results[0].sales_rank_average, Some(6000));
    assert_eq!(results[0].category.as_deref(), Some("Spatulas"));
    assert!((results[0].score - 0.94).abs() < 1e-9);
}

#[tokio::test]
async fn test_search_default_truncates_to_twenty() {
    let app = spawn_app(KeepaState {
        asin_count: 30,
        ..KeepaState::default()
    })
    .await;
    let http = reqwest::Client::new();
    let resp = http
        .post(app.url("/functions/searchProducts"))
        .bearer_auth("token-a")
        .json(&json!({ "data": { "keyword": "mug" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let result = body["result"].as_array().unwrap();
    assert_eq!(result.len(), 20);
    assert_eq!(result[0]["buyBoxPrice"], 1000);
    assert_eq!(result[0]["title"], "Product 0");
}

#[tokio::test]
async fn test_rate_limited_search_is_failed_precondition() {
    let app = spawn_app(KeepaState {
        search_status: Some(StatusCode::TOO_MANY_REQUESTS),
        ..KeepaState::default()
    })
    .await;
    let http = reqwest::Client::new();
    let resp = http
        .post(app.url("/functions/searchProducts"))
        .bearer_auth("token-a")
        .json(&json!({ "data": { "keyword": "mug" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "failed-precondition");
    assert_eq!(body["error"]["message"], "Keepa search HTTP 429");
    assert_eq!(app.keepa.product_hits.load(Ordering::SeqCst), 0);

    let err = app
        .client("token-a")
        .search_products(&SearchRequest::new("mug"))
        .await
        .unwrap_err();
    assert_eq!(describe_failure(&err), QUOTA_MESSAGE);
}

#[tokio::test]
async fn test_diagnostic_ping_is_verbatim() {
    let app = spawn_app(KeepaState::default()).await;
    let client = app.client("token-a");
    let first = client.diagnostic_ping().await.unwrap();
    let second = client.diagnostic_ping().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, json!({ "tokensLeft": 250, "refillIn": 42000, "refillRate": 5 }));
    assert_eq!(app.keepa.token_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_search_log_round_trip_and_isolation() {
    let app = spawn_app(KeepaState::default()).await;
    let alice = app.client("token-a");
    let bob = app.client("token-b");

    let mut metadata = serde_json::Map::new();
    metadata.insert("source".to_string(), json!("cli"));
    let logged: SearchLogEntry = alice.log_search("garlic press", metadata).await.unwrap();
    assert_eq!(logged.keyword, "garlic press");
    alice.log_search("cake tester", Default::default()).await.unwrap();

    match alice.recent(Collection::Searches, 10).await.unwrap() {
        Snapshot::Searches(docs) => {
            let keywords: Vec<&str> = docs.iter().map(|d| d.keyword.as_str()).collect();
            assert_eq!(keywords, vec!["cake tester", "garlic press"]);
            assert_eq!(docs[1].metadata.get("source"), Some(&json!("cli")));
        }
        other => panic!("unexpected snapshot: {:?}", other),
    }

    assert!(bob.recent(Collection::Searches, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_check_document_is_upserted() {
    let app = spawn_app(KeepaState::default()).await;
    let client = app.client("token-a");
    client.put_search("testDoc", "test run").await.unwrap();
    client.put_search("testDoc", "test run").await.unwrap();

    let snapshot = client.recent(Collection::Searches, 10).await.unwrap();
    match snapshot {
        Snapshot::Searches(docs) => {
            assert_eq!(docs.len(), 1);
            assert_eq!(docs[0].id, "testDoc");
            assert_eq!(docs[0].keyword, "test run");
        }
        other => panic!("unexpected snapshot: {:?}", other),
    }
}

#[tokio::test]
async fn test_live_results_follow_saves() {
    let app = spawn_app(KeepaState {
        asin_count: 3,
        ..KeepaState::default()
    })
    .await;
    let writer = app.client("token-a");
    let watcher = app.client("token-a");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Snapshot>();
    let watch = tokio::spawn(async move {
        let mut seen = 0;
        watcher
            .watch(Collection::Results, 10, |snapshot| {
                seen += 1;
                let _ = tx.send(snapshot);
                seen < 2
            })
            .await
    });

    let initial = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(initial.is_empty());

    let results = writer.search_products(&SearchRequest::new("mug")).await.unwrap();
    writer.save_result(&results[0]).await.unwrap();

    let updated = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match updated {
        Snapshot::Results(docs) => {
            assert_eq!(docs.len(), 1);
            assert_eq!(docs[0].item.asin, results[0].asin);
        }
        other => panic!("unexpected snapshot: {:?}", other),
    }

    tokio::time::timeout(Duration::from_secs(5), watch)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

async fn ping_error(app: &TestApp) -> Value {
    let resp = reqwest::Client::new()
        .post(app.url("/functions/diagnosticPing"))
        .bearer_auth("token-a")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    body["error"].clone()
}

#[tokio::test]
async fn test_diagnostic_ping_upstream_http_failure() {
    let app = spawn_app(KeepaState {
        token_failure: Some((StatusCode::SERVICE_UNAVAILABLE, json!({}))),
        ..KeepaState::default()
    })
    .await;
    let error = ping_error(&app).await;
    assert_eq!(error["code"], "failed-precondition");
    assert_eq!(error["message"], "Keepa token HTTP 503");
}

#[tokio::test]
async fn test_diagnostic_ping_embedded_error() {
    let app = spawn_app(KeepaState {
        token_failure: Some((StatusCode::OK, json!({ "error": { "type": "invalidKey" } }))),
        ..KeepaState::default()
    })
    .await;
    let error = ping_error(&app).await;
    assert_eq!(error["code"], "failed-precondition");
    let message = error["message"].as_str().unwrap();
    assert!(message.starts_with("Keepa token error: "), "message: {}", message);
    assert!(message.contains("invalidKey"));
}
