#![allow(missing_docs)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{Request as HttpRequest, StatusCode},
    Router,
};
use meridian::{
    engine::{Engine, EngineOptions, MutationMode, Privilege},
    error::ErrorClass,
    query::{
        BlockParser, EvalError, Evaluation, Latency, ParseError, ParsedRequest, QueryAst,
        QueryEvaluator, Request, RequestParser, ScanEvaluator,
    },
    server::{build_router, serve, Admission, Lifecycle, NodeState, ServerState},
    storage::{MemStore, Storage},
};
use tokio::net::TcpListener;
use tower::ServiceExt;

struct SlowParser {
    delay: Duration,
    finished: Arc<AtomicBool>,
}

impl RequestParser for SlowParser {
    fn parse(&self, request: &Request) -> Result<ParsedRequest, ParseError> {
        std::thread::sleep(self.delay);
        let parsed = BlockParser.parse(request);
        self.finished.store(true, Ordering::SeqCst);
        parsed
    }
}

struct SlowEvaluator {
    delay: Duration,
    inner: ScanEvaluator,
}

impl QueryEvaluator for SlowEvaluator {
    fn evaluate(&self, ast: &QueryAst, latency: &mut Latency) -> Result<Evaluation, EvalError> {
        std::thread::sleep(self.delay);
        self.inner.evaluate(ast, latency)
    }
}

fn engine_with(
    store: &Arc<MemStore>,
    parser: Arc<dyn RequestParser>,
    eval_delay: Duration,
    options: EngineOptions,
) -> Arc<Engine> {
    Arc::new(Engine::new(
        store.clone(),
        parser,
        Arc::new(SlowEvaluator {
            delay: eval_delay,
            inner: ScanEvaluator::new(store.clone()),
        }),
        options,
    ))
}

#[tokio::test]
async fn parse_timeout_abandons_the_wait_but_not_the_parser() {
    let store = Arc::new(MemStore::new());
    let finished = Arc::new(AtomicBool::new(false));
    let engine = engine_with(
        &store,
        Arc::new(SlowParser {
            delay: Duration::from_millis(200),
            finished: finished.clone(),
        }),
        Duration::ZERO,
        EngineOptions {
            parse_timeout: Duration::from_millis(20),
            ..EngineOptions::default()
        },
    );

    let err = engine
        .parse_with_timeout(Request::text("{ q(func: has(name)) { name } }"))
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidRequest);
    assert!(!finished.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn timed_out_request_keeps_its_slot_until_done() {
    let store = Arc::new(MemStore::new());
    let engine = engine_with(
        &store,
        Arc::new(BlockParser),
        Duration::from_millis(300),
        EngineOptions {
            request_timeout: Duration::from_millis(50),
            ..EngineOptions::default()
        },
    );
    let admission = Admission::new(1);
    let permit = admission.acquire().await.unwrap();

    let err = engine
        .run(
            Request::text("{ q(func: has(name)) { name } }"),
            Privilege::Client,
            permit,
        )
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Internal);
    assert!(err.message().contains("timed out"), "{}", err.message());
    assert_eq!(admission.available(), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(admission.available(), 1);
}

#[tokio::test]
async fn schema_requests_are_not_timed_out() {
    let store = Arc::new(MemStore::new());
    let engine = engine_with(
        &store,
        Arc::new(BlockParser),
        Duration::from_millis(150),
        EngineOptions {
            request_timeout: Duration::from_millis(20),
            ..EngineOptions::default()
        },
    );
    let admission = Admission::new(1);
    let text = "mutation { schema { name: string @index(exact) . } }\n{ q(func: has(name)) { name } }";
    let (result, _) = engine
        .run(Request::text(text), Privilege::Client, admission.acquire().await.unwrap())
        .await
        .unwrap();
    assert_eq!(result.subgraphs.len(), 1);
    assert_eq!(store.fetch_schema(&["name".to_string()]).unwrap().len(), 1);
}

#[tokio::test]
async fn disabled_mutations_admit_internal_callers() {
    let store = Arc::new(MemStore::new());
    let engine = engine_with(
        &store,
        Arc::new(BlockParser),
        Duration::ZERO,
        EngineOptions {
            mutations: MutationMode::Disabled,
            ..EngineOptions::default()
        },
    );
    let admission = Admission::new(4);
    let text = r#"mutation { set { _:a <name> "x" . } }"#;

    let err = engine
        .run(Request::text(text), Privilege::Client, admission.acquire().await.unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::InvalidRequest);

    let (result, _) = engine
        .run(Request::text(text), Privilege::Internal, admission.acquire().await.unwrap())
        .await
        .unwrap();
    assert_eq!(result.allocations.len(), 1);
    assert_eq!(store.stats().edges, 1);
}

#[tokio::test]
async fn unready_storage_fails_before_parsing() {
    let store = Arc::new(MemStore::new());
    store.set_ready(false);
    let finished = Arc::new(AtomicBool::new(false));
    let engine = engine_with(
        &store,
        Arc::new(SlowParser {
            delay: Duration::ZERO,
            finished: finished.clone(),
        }),
        Duration::ZERO,
        EngineOptions::default(),
    );
    let err = engine
        .run(
            Request::text("{ q(func: has(name)) { name } }"),
            Privilege::Client,
            Admission::new(1).acquire().await.unwrap(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Internal);
    assert!(!finished.load(Ordering::SeqCst));
}

async fn get(router: &Router, path: &str) -> (StatusCode, String) {
    let request = HttpRequest::builder().uri(path).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::test]
async fn admin_shutdown_drains_listeners_then_halts_storage() {
    let store = Arc::new(MemStore::new());
    let engine = engine_with(&store, Arc::new(BlockParser), Duration::ZERO, EngineOptions::default());
    let lifecycle = Lifecycle::new();
    let router = build_router(Arc::new(ServerState::new(
        engine,
        Admission::new(8),
        lifecycle.clone(),
        Vec::new(),
    )));

    let local = router
        .clone()
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));

    let mut loops = Vec::new();
    for name in ["primary", "secondary"] {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let handle = lifecycle.register_listener(name).unwrap();
        loops.push(tokio::spawn(serve(listener, router.clone(), handle)));
    }
    assert_eq!(lifecycle.active_listeners(), 2);

    let (status, _) = get(&local, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let drain = {
        let lifecycle = lifecycle.clone();
        let store = store.clone();
        tokio::spawn(async move { lifecycle.drain_and_halt(&*store).await })
    };

    let (status, body) = get(&local, "/admin/shutdown").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Server is shutting down"), "{body}");
    assert!(!lifecycle.shutdown());

    for serve_loop in loops {
        tokio::time::timeout(Duration::from_secs(5), serve_loop)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lifecycle.state(), NodeState::Stopped);
    assert!(store.stats().halted);
    assert!(lifecycle.register_listener("late").is_none());
}
