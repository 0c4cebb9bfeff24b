#![allow(missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use meridian::{
    engine::{Engine, EngineOptions, MutationMode},
    query::{BlockParser, ScanEvaluator},
    server::{build_router, Admission, Lifecycle, NodeState, ServerState},
    storage::MemStore,
    types::Uid,
};
use serde_json::{json, Value};
use tower::ServiceExt;

struct Node {
    store: Arc<MemStore>,
    lifecycle: Lifecycle,
    local: Router,
    remote: Router,
}

fn node(mode: MutationMode) -> Node {
    let store = Arc::new(MemStore::new());
    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(BlockParser),
        Arc::new(ScanEvaluator::new(store.clone())),
        EngineOptions {
            mutations: mode,
            ..EngineOptions::default()
        },
    ));
    let lifecycle = Lifecycle::new();
    let router = build_router(Arc::new(ServerState::new(
        engine,
        Admission::new(16),
        lifecycle.clone(),
        vec!["http://ui.test/".into()],
    )));
    Node {
        store,
        lifecycle,
        local: router
            .clone()
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000)))),
        remote: router.layer(MockConnectInfo(SocketAddr::from(([10, 1, 2, 3], 40000)))),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn mutation_then_query_over_http() {
    let node = node(MutationMode::Allowed);
    let (status, body) = send(
        &node.local,
        post("/query", r#"mutation { set { _:ann <name> "Ann" . } }"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "Success");
    assert_eq!(body["message"], "Done");
    let ann = body["uids"]["ann"].as_str().unwrap().to_string();

    let (status, body) = send(
        &node.remote,
        post("/query?latency=true", r#"{ people(func: has(name)) { uid name } }"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["people"], json!([{ "uid": ann, "name": "Ann" }]));
    assert!(body["server_latency"]["total"].is_string());
    assert!(body.get("uids").is_none());
}

#[tokio::test]
async fn errors_use_the_envelope() {
    let node = node(MutationMode::Allowed);
    let (status, body) = send(&node.local, post("/query", "mutation { set { nonsense } }")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ErrorInvalidRequest");
    assert!(body["message"].as_str().unwrap().starts_with("failed to parse request"));

    let (status, body) = send(&node.local, post("/query", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ErrorInvalidRequest");

    node.store.set_ready(false);
    let (status, body) = send(&node.local, post("/query", "{ q(func: has(x)) { x } }")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "Error");
}

#[tokio::test]
async fn nomutations_rejects_clients_but_allows_share() {
    let node = node(MutationMode::Disabled);
    let (status, body) = send(
        &node.local,
        post("/query", r#"mutation { set { _:a <name> "x" . } }"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ErrorInvalidRequest");

    let shared = "{ me(func: has(name)) { name } }";
    let (status, body) = send(&node.local, post("/share", shared)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let uid = body["uids"]["share"].as_str().unwrap().to_string();
    let node_uid = Uid::parse(&uid).unwrap();
    assert_eq!(
        node.store.scalar("_share_", node_uid).map(|v| v.to_text()),
        Some(shared.to_string())
    );

    let (_, again) = send(&node.local, post("/share", shared)).await;
    assert_eq!(again["uids"]["share"], uid.as_str());
}

#[tokio::test]
async fn run_accepts_structured_requests() {
    let node = node(MutationMode::Allowed);
    let payload = json!({
        "schema": "age: int @index(int) .",
        "set": "<peter> <age> \"28\"^^<xs:int> .",
        "query": "{ q(func: eq(age, $a)) { age } }",
        "vars": { "$a": "28" },
    });
    let request = Request::builder()
        .method("POST")
        .uri("/run")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(&node.local, request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["q"], json!([{ "age": 28 }]));
    assert_eq!(body["uids"], json!({}));
    assert!(body["latency"]["parsing"].is_string());
}

#[tokio::test]
async fn admin_routes_are_local_only() {
    let node = node(MutationMode::Allowed);
    for path in ["/health", "/debug/store", "/admin/shutdown"] {
        let (status, body) = send(&node.remote, get(path)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
        assert_eq!(body["code"], "ErrorUnauthorized");
    }
    assert_eq!(node.lifecycle.state(), NodeState::Running);

    let (status, body) = send(&node.local, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));

    let (status, body) = send(&node.local, get("/debug/store")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["halted"], false);

    let (status, body) = send(&node.local, get("/admin/shutdown")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "Success");
    assert_eq!(node.lifecycle.state(), NodeState::Draining);
    let (_, body) = send(&node.local, get("/admin/shutdown")).await;
    assert_eq!(body["message"], "Server is already shutting down");
}

#[tokio::test]
async fn cors_allows_configured_origin() {
    let node = node(MutationMode::Allowed);
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/query")
        .header("origin", "http://ui.test")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = node.local.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("http://ui.test")
    );
}
