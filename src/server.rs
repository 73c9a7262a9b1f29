//! HTTP server: callable endpoints and the per-user document API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version), no auth |
//! | `POST` | `/functions/searchProducts` | Keyword search → scored product list |
//! | `POST` | `/functions/diagnosticPing` | Keepa token status, verbatim |
//! | `GET`/`POST` | `/users/me/searches` | Read / append the caller's search log |
//! | `PUT`  | `/users/me/searches/{id}` | Write a search entry under a fixed id |
//! | `GET`/`POST` | `/users/me/results` | Read / append the caller's saved results |
//! | `GET`  | `/users/me/searches/live`, `/users/me/results/live` | Live view (Server-Sent Events) |
//!
//! Callable endpoints take `{"data": ...}` and answer `{"result": ...}`.
//! Everything except `/health` requires `Authorization: Bearer <token>`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "failed-precondition", "message": "Keepa search HTTP 429" } }
//! ```
//!
//! Error codes: `unauthenticated` (401), `invalid-argument` (400),
//! `failed-precondition` (400), `internal` (500).

use axum::{
    body::Bytes,
    extract::{Path, Query as QueryParams, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Extension, Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::ScoutError;
use crate::keepa::{CatalogApi, KeepaClient};
use crate::models::{ProductSummary, SavedResult, SearchLogEntry};
use crate::search;
use crate::store::{Collection, Order, Query, Snapshot, SqliteStore, LIVE_VIEW_LIMIT};

/// Largest page a document read may request.
const MAX_PAGE: usize = 100;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    catalog: Arc<dyn CatalogApi>,
    store: SqliteStore,
}

impl AppState {
    pub fn new(config: Config, catalog: Arc<dyn CatalogApi>, store: SqliteStore) -> Self {
        Self {
            config: Arc::new(config),
            catalog,
            store,
        }
    }
}

/// The authenticated caller, inserted by [`require_caller`].
#[derive(Debug, Clone)]
pub struct Caller {
    pub uid: String,
}

/// Starts the HTTP server.
///
/// Resolves the Keepa API key, opens (and migrates) the database, then serves
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let catalog = KeepaClient::from_config(&config.keepa)?;
    let store = SqliteStore::open(config).await?;

    if config.auth.tokens.is_empty() {
        tracing::warn!("no [auth.tokens] configured; every call will be rejected");
    }

    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(config.clone(), Arc::new(catalog), store));

    tracing::info!(bind = %bind_addr, domain = %config.keepa.domain, "server starting");
    println!("Niche Scout server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let authed = Router::new()
        .route("/functions/searchProducts", post(handle_search_products))
        .route("/functions/diagnosticPing", post(handle_diagnostic_ping))
        .route("/users/me/searches", get(handle_list_searches).post(handle_log_search))
        .route("/users/me/searches/live", get(handle_live_searches))
        .route("/users/me/searches/{id}", put(handle_put_search))
        .route("/users/me/results", get(handle_list_results).post(handle_save_result))
        .route("/users/me/results/live", get(handle_live_results))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_caller));

    Router::new()
        .route("/health", get(handle_health))
        .merge(authed)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ScoutError> for AppError {
    fn from(err: ScoutError) -> Self {
        let status = match err {
            ScoutError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ScoutError::InvalidArgument(_) | ScoutError::UpstreamPrecondition(_) => {
                StatusCode::BAD_REQUEST
            }
            ScoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.message().to_string(),
        }
    }
}

// ============ Auth ============

/// Resolve the bearer token to a user id, or reject as unauthenticated.
async fn require_caller(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let uid = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| state.config.auth.user_for(token.trim()))
        .map(str::to_string)
        .ok_or_else(|| ScoutError::Unauthenticated("Sign in required.".to_string()))?;

    req.extensions_mut().insert(Caller { uid });
    Ok(next.run(req).await)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Callables ============

/// Extract the `data` member of a callable request body.
///
/// An empty body, or an object without `data`, yields `null`.
fn callable_data(body: &[u8]) -> Result<Value, ScoutError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    let parsed: Value = serde_json::from_slice(body)
        .map_err(|_| ScoutError::InvalidArgument("Request body must be JSON.".to_string()))?;
    match parsed {
        Value::Object(mut obj) => Ok(obj.remove("data").unwrap_or(Value::Null)),
        _ => Err(ScoutError::InvalidArgument(
            "Request body must be an object with a data field.".to_string(),
        )),
    }
}

async fn handle_search_products(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let data = callable_data(&body)?;
    let results = search::search_from_data(state.catalog.as_ref(), &data)
        .await
        .map_err(|e| {
            tracing::error!(uid = %caller.uid, code = e.code(), error = %e, "searchProducts failed");
            e
        })?;
    Ok(Json(json!({ "result": results })))
}

async fn handle_diagnostic_ping(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Value>, AppError> {
    let status = search::diagnostic_ping(state.catalog.as_ref())
        .await
        .map_err(|e| {
            tracing::error!(uid = %caller.uid, code = e.code(), error = %e, "diagnosticPing failed");
            e
        })?;
    Ok(Json(json!({ "result": status })))
}

// ============ Documents ============

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    limit: Option<String>,
    order: Option<String>,
}

impl ListParams {
    fn into_query(self, collection: Collection) -> Result<Query, ScoutError> {
        let limit = match self.limit {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| {
                    ScoutError::InvalidArgument("limit must be a positive integer".to_string())
                })?
                .clamp(1, MAX_PAGE),
            None => LIVE_VIEW_LIMIT,
        };
        let order = match self.order {
            Some(raw) => raw.parse::<Order>()?,
            None => Order::default(),
        };
        Ok(Query {
            collection,
            order,
            limit,
        })
    }
}

async fn list(
    state: &AppState,
    caller: &Caller,
    params: ListParams,
    collection: Collection,
) -> Result<Json<Snapshot>, AppError> {
    let query = params.into_query(collection)?;
    let snapshot = state.store.query(&caller.uid, &query).await?;
    Ok(Json(snapshot))
}

async fn handle_list_searches(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    QueryParams(params): QueryParams<ListParams>,
) -> Result<Json<Snapshot>, AppError> {
    list(&state, &caller, params, Collection::Searches).await
}

async fn handle_list_results(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    QueryParams(params): QueryParams<ListParams>,
) -> Result<Json<Snapshot>, AppError> {
    list(&state, &caller, params, Collection::Results).await
}

/// Parse a JSON object body; anything else is an invalid argument.
fn object_body(body: &[u8]) -> Result<Map<String, Value>, ScoutError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(obj)) => Ok(obj),
        _ => Err(ScoutError::InvalidArgument(
            "Request body must be a JSON object.".to_string(),
        )),
    }
}

fn required_keyword(obj: &Map<String, Value>) -> Result<String, ScoutError> {
    match obj.get("keyword") {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(ScoutError::InvalidArgument("Keyword is required.".to_string())),
    }
}

async fn handle_log_search(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Bytes,
) -> Result<(StatusCode, Json<SearchLogEntry>), AppError> {
    let mut obj = object_body(&body)?;
    let keyword = required_keyword(&obj)?;
    obj.remove("keyword");
    let entry = state.store.log_search(&caller.uid, &keyword, obj).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn handle_put_search(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<SearchLogEntry>, AppError> {
    let obj = object_body(&body)?;
    let keyword = required_keyword(&obj)?;
    let entry = state.store.put_search(&caller.uid, &id, &keyword).await?;
    Ok(Json(entry))
}

async fn handle_save_result(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Bytes,
) -> Result<(StatusCode, Json<SavedResult>), AppError> {
    let item: ProductSummary = serde_json::from_slice(&body).map_err(|e| {
        ScoutError::InvalidArgument(format!("Request body must be a product summary: {}", e))
    })?;
    let saved = state.store.save_result(&caller.uid, &item).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

// ============ Live views ============

fn live(
    state: &AppState,
    caller: &Caller,
    params: ListParams,
    collection: Collection,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let query = params.into_query(collection)?;
    let stream = state
        .store
        .subscribe(&caller.uid, query)
        .into_stream()
        .map(|snapshot| Event::default().event("snapshot").json_data(&snapshot));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn handle_live_searches(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    QueryParams(params): QueryParams<ListParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    live(&state, &caller, params, Collection::Searches)
}

async fn handle_live_results(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    QueryParams(params): QueryParams<ListParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    live(&state, &caller, params, Collection::Results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callable_data_shapes() {
        assert_eq!(callable_data(b"").unwrap(), Value::Null);
        assert_eq!(callable_data(b"{}").unwrap(), Value::Null);
        assert_eq!(
            callable_data(br#"{"data":{"keyword":"mug"}}"#).unwrap(),
            json!({ "keyword": "mug" })
        );
        assert_eq!(callable_data(b"not json").unwrap_err().code(), "invalid-argument");
        assert_eq!(callable_data(b"[1]").unwrap_err().code(), "invalid-argument");
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ScoutError::Unauthenticated("x".into()), StatusCode::UNAUTHORIZED),
            (ScoutError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (ScoutError::UpstreamPrecondition("x".into()), StatusCode::BAD_REQUEST),
            (ScoutError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let code = err.code();
            let app: AppError = err.into();
            assert_eq!(app.status, status);
            assert_eq!(app.code, code);
        }
    }

    #[test]
    fn test_list_params_clamped() {
        let q = ListParams {
            limit: Some("500".into()),
            order: Some("asc".into()),
        }
        .into_query(Collection::Results)
        .unwrap();
        assert_eq!(q.limit, MAX_PAGE);
        assert_eq!(q.order, Order::OldestFirst);

        let q = ListParams::default().into_query(Collection::Searches).unwrap();
        assert_eq!(q.limit, LIVE_VIEW_LIMIT);
        assert_eq!(q.order, Order::NewestFirst);

        let bad = ListParams {
            limit: Some("-3".into()),
            order: None,
        };
        assert!(bad.into_query(Collection::Searches).is_err());
    }
}
