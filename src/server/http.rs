use std::collections::BTreeMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use super::{Admission, Lifecycle};
use crate::engine::{Engine, ExecutionResult, Privilege};
use crate::error::{ErrorClass, RequestError};
use crate::query::{Latency, MutationInput, Request};
use crate::schema::SchemaNode;
use crate::storage::StoreStats;

/// Predicate holding shared query text.
pub const SHARE_PREDICATE: &str = "_share_";

/// Predicate holding the SHA-256 of shared query text.
pub const SHARE_HASH_PREDICATE: &str = "_share_hash_";

/// Shared handles behind every route.
pub struct ServerState {
    engine: Arc<Engine>,
    admission: Admission,
    lifecycle: Lifecycle,
    allow_origins: Vec<String>,
}

impl ServerState {
    /// State serving `engine`.
    pub fn new(
        engine: Arc<Engine>,
        admission: Admission,
        lifecycle: Lifecycle,
        allow_origins: Vec<String>,
    ) -> Self {
        Self {
            engine,
            admission,
            lifecycle,
            allow_origins,
        }
    }

    async fn run(
        &self,
        request: Request,
        privilege: Privilege,
    ) -> Result<(ExecutionResult, Latency), AppError> {
        if !self.engine.storage().is_ready() {
            return Err(AppError::Unavailable);
        }
        let permit = self.admission.acquire().await.ok_or(AppError::Unavailable)?;
        Ok(self.engine.run(request, privilege, permit).await?)
    }
}

type AppState = Arc<ServerState>;

/// Routes of a node. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the local-only
/// routes can see the caller address.
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.allow_origins);

    let mut router = Router::new()
        .route("/query", post(query_handler))
        .route("/run", post(run_handler))
        .route("/share", post(share_handler))
        .route("/health", get(health_handler))
        .route("/debug/store", get(store_stats_handler))
        .route("/admin/shutdown", get(shutdown_handler));

    if let Some(layer) = cors {
        router = router.layer(layer);
    }

    router.with_state(state).layer(TraceLayer::new_for_http())
}

fn build_cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let mut allowed = Vec::new();
    for origin in origins {
        let normalized = normalize_origin(origin);
        match normalized
            .as_deref()
            .and_then(|value| HeaderValue::from_str(value).ok())
        {
            Some(value) => allowed.push(value),
            None => {
                tracing::warn!(%origin, ?normalized, "ignoring invalid CORS origin");
            }
        }
    }

    if allowed.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([ACCEPT, CONTENT_TYPE]),
    )
}

fn normalize_origin(origin: &str) -> Option<String> {
    let trimmed = origin.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

fn require_local(addr: SocketAddr) -> Result<(), AppError> {
    if addr.ip().is_loopback() {
        Ok(())
    } else {
        tracing::warn!(%addr, "rejected admin request from remote address");
        Err(AppError::Unauthorized)
    }
}

#[derive(Debug, Default, Deserialize)]
struct QueryParams {
    #[serde(default)]
    latency: bool,
    #[serde(default)]
    debug: bool,
}

async fn query_handler(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
    body: String,
) -> Result<Json<Value>, AppError> {
    let request = Request {
        query: body,
        http: true,
        ..Request::default()
    };
    let (result, mut latency) = state.run(request, Privilege::Client).await?;
    Ok(Json(render_query(
        &result,
        &mut latency,
        params.latency || params.debug,
    )))
}

/// Mutation-only requests get a success envelope; requests with query
/// output get the output keyed by block alias.
fn render_query(result: &ExecutionResult, latency: &mut Latency, with_latency: bool) -> Value {
    let encoding = Instant::now();
    let mut body = Map::new();
    if result.subgraphs.is_empty() {
        body.insert("code".into(), "Success".into());
        body.insert("message".into(), "Done".into());
        body.insert("uids".into(), json_map(result.uids_hex()));
    } else {
        body = result.data();
        if !result.allocations.is_empty() {
            body.insert("uids".into(), json_map(result.uids_hex()));
        }
    }
    if !result.schema.is_empty() {
        body.insert("schema".into(), schema_json(&result.schema));
    }
    latency.encoding = encoding.elapsed();
    if with_latency {
        body.insert("server_latency".into(), latency.to_json());
    }
    Value::Object(body)
}

fn json_map(map: BTreeMap<String, String>) -> Value {
    Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

fn schema_json(schema: &[SchemaNode]) -> Value {
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

/// Structured request body of `/run`.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    /// Query blocks.
    #[serde(default)]
    pub query: String,
    /// Values for `$name` placeholders.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    /// Facts to add.
    #[serde(default)]
    pub set: String,
    /// Facts to remove.
    #[serde(default)]
    pub delete: String,
    /// Schema declarations.
    #[serde(default)]
    pub schema: String,
}

impl From<RunRequest> for Request {
    fn from(run: RunRequest) -> Self {
        let has_mutation = [&run.set, &run.delete, &run.schema]
            .iter()
            .any(|text| !text.trim().is_empty());
        Request {
            query: run.query,
            mutation: has_mutation.then(|| MutationInput {
                schema: run.schema,
                set: run.set,
                del: run.delete,
            }),
            vars: run.vars,
            http: false,
        }
    }
}

/// Response of `/run`.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    /// Uid assigned to each blank label.
    pub uids: BTreeMap<String, String>,
    /// Schema query answer.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub schema: Vec<SchemaNode>,
    /// Query output keyed by block alias.
    pub data: Map<String, Value>,
    /// Stage timings.
    pub latency: Value,
}

async fn run_handler(
    State(state): State<AppState>,
    Json(payload): Json<RunRequest>,
) -> Result<Json<RunResponse>, AppError> {
    let (result, mut latency) = state.run(payload.into(), Privilege::Client).await?;
    let encoding = Instant::now();
    let data = result.data();
    latency.encoding = encoding.elapsed();
    Ok(Json(RunResponse {
        uids: result.uids_hex(),
        schema: result.schema,
        data,
        latency: latency.to_json(),
    }))
}

/// Stores the raw body as a shared query and returns its node. Sharing the
/// same text twice returns the node stored the first time.
async fn share_handler(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<Value>, AppError> {
    if body.trim().is_empty() {
        return Err(RequestError::invalid("share requires a query").into());
    }
    let hash = hex::encode(Sha256::digest(body.as_bytes()));

    let lookup = Request::text(format!(
        "{{ share(func: eq({SHARE_HASH_PREDICATE}, \"{hash}\")) {{ uid }} }}"
    ));
    let (found, _) = state.run(lookup, Privilege::Internal).await?;
    let existing = found
        .subgraphs
        .first()
        .and_then(|sg| sg.rows.first())
        .and_then(|row| row.get("uid"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let uid = match existing {
        Some(uid) => uid,
        None => {
            let facts = format!(
                "_:share <{SHARE_PREDICATE}> \"{}\" .\n_:share <{SHARE_HASH_PREDICATE}> \"{hash}\" .",
                escape_literal(&body)
            );
            let request = Request {
                mutation: Some(MutationInput {
                    set: facts,
                    ..MutationInput::default()
                }),
                http: true,
                ..Request::default()
            };
            let (stored, _) = state.run(request, Privilege::Internal).await?;
            stored
                .uids_hex()
                .remove("share")
                .ok_or_else(|| RequestError::internal("share node was not allocated"))?
        }
    };
    tracing::debug!(%uid, %hash, "shared query");
    Ok(Json(serde_json::json!({
        "code": "Success",
        "message": "Done",
        "uids": { "share": uid },
    })))
}

fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

async fn health_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<&'static str, AppError> {
    require_local(addr)?;
    if state.engine.storage().is_ready() {
        Ok("OK")
    } else {
        Err(AppError::Unavailable)
    }
}

async fn store_stats_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<StoreStats>, AppError> {
    require_local(addr)?;
    Ok(Json(state.engine.storage().stats()))
}

async fn shutdown_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<ErrorPayload>, AppError> {
    require_local(addr)?;
    let message = if state.lifecycle.shutdown() {
        "Server is shutting down"
    } else {
        "Server is already shutting down"
    };
    Ok(Json(ErrorPayload {
        code: "Success",
        message: message.to_string(),
    }))
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("server is not ready to accept requests")]
    Unavailable,
    #[error("request must come from the local host")]
    Unauthorized,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Request(err) => match err.class() {
                ErrorClass::InvalidRequest => (StatusCode::BAD_REQUEST, err.class().code()),
                ErrorClass::Internal | ErrorClass::Fatal => {
                    (StatusCode::INTERNAL_SERVER_ERROR, err.class().code())
                }
            },
            AppError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "Error"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "ErrorUnauthorized"),
        };
        let message = match &self {
            AppError::Request(err) => err.message(),
            other => other.to_string(),
        };
        (status, Json(ErrorPayload { code, message })).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    code: &'static str,
    message: String,
}
