use super::{
    handler::{DESCRIPTION, Heartbeat, LedgerService, ServiceInfo},
    response::ErrorResponse,
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use ledger::{
    Checker, Error, Inserter, Kind, MemoryStorage, Result, Storage, Token, TokenSource,
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tower::ServiceExt;

const MAX_BATCH: u64 = 10;

/// Source producing `t0..tN`, or failing with a fixed kind.
#[derive(Default)]
struct FixedSource {
    fail: Option<Kind>,
    calls: AtomicUsize,
}

impl Checker for FixedSource {
    async fn check(&self) -> Result<()> {
        Ok(())
    }
}

impl TokenSource for FixedSource {
    async fn generate(&self, n: usize) -> Result<Vec<Token>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail {
            Some(kind) => Err(Error::builder()
                .op("source/fixed.generate")
                .kind(kind)
                .message("generator down")
                .build()),
            None => Ok((0..n).map(|i| Token::new(format!("t{i}"))).collect()),
        }
    }
}

/// Storage whose inserts never finish.
struct StalledStorage;

impl Checker for StalledStorage {
    async fn check(&self) -> Result<()> {
        Ok(())
    }
}

impl Storage for StalledStorage {
    async fn insert(&self, _token: &Token) -> Result<()> {
        std::future::pending().await
    }
}

fn app(source: Arc<FixedSource>) -> (Router, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let inserter = Inserter::new(Arc::clone(&storage), 2);
    let router = LedgerService::new(inserter, source, MAX_BATCH).router();
    (router, storage)
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn sorted_lines(response: Response) -> Vec<String> {
    let mut lines: Vec<String> = body_text(response)
        .await
        .lines()
        .map(str::to_owned)
        .collect();
    lines.sort();
    lines
}

async fn error_body(response: Response) -> ErrorResponse {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn streams_one_line_per_token() {
    let source = Arc::new(FixedSource::default());
    let (router, storage) = app(source);

    let response = router.oneshot(post("/api/v1/tokens?size=3")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(
        sorted_lines(response).await,
        vec!["OK  : t0", "OK  : t1", "OK  : t2"]
    );
    assert_eq!(storage.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_tokens_are_reported_as_failures() {
    let source = Arc::new(FixedSource::default());
    let (router, storage) = app(source);

    let first = router
        .clone()
        .oneshot(post("/api/v1/tokens?size=2"))
        .await
        .unwrap();
    assert_eq!(sorted_lines(first).await, vec!["OK  : t0", "OK  : t1"]);

    let second = router.oneshot(post("/api/v1/tokens?size=3")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        sorted_lines(second).await,
        vec!["ERR : t0", "ERR : t1", "OK  : t2"]
    );
    assert_eq!(storage.len(), 3);
}

#[tokio::test]
async fn missing_or_zero_size_is_an_empty_stream() {
    let source = Arc::new(FixedSource::default());
    let (router, storage) = app(Arc::clone(&source));

    for uri in ["/api/v1/tokens", "/api/v1/tokens?size=0"] {
        let response = router.clone().oneshot(post(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "");
    }

    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn bad_sizes_are_rejected() {
    let source = Arc::new(FixedSource::default());
    let (router, _) = app(Arc::clone(&source));

    for (uri, needle) in [
        ("/api/v1/tokens?size=abc", "is not an integer"),
        ("/api/v1/tokens?size=-1", "must not be negative"),
        ("/api/v1/tokens?size=11", "exceeds maximum allowed (10)"),
    ] {
        let response = router.clone().oneshot(post(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");

        let body = error_body(response).await;
        assert_eq!(body.code, 400);
        assert!(body.message.starts_with("invalid operation"), "{}", body.message);
        assert!(body.message.contains(needle), "{}", body.message);
    }

    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn source_failures_map_to_server_errors() {
    let source = Arc::new(FixedSource {
        fail: Some(Kind::Internal),
        ..FixedSource::default()
    });
    let (router, storage) = app(source);

    let response = router.oneshot(post("/api/v1/tokens?size=3")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = error_body(response).await;
    assert_eq!(body.code, 500);
    assert!(body.message.contains("generator down"), "{}", body.message);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn unknown_routes_are_json_not_found() {
    let (router, _) = app(Arc::new(FixedSource::default()));

    let response = router.oneshot(get("/nope")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = error_body(response).await;
    assert_eq!(body.code, 404);
    assert!(body.message.contains("no route for /nope"), "{}", body.message);
}

#[tokio::test]
async fn service_info_describes_the_build() {
    let (router, _) = app(Arc::new(FixedSource::default()));

    let response = router.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let info: ServiceInfo = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(info.description, DESCRIPTION);
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(info.os, std::env::consts::OS);
    assert_eq!(info.arch, std::env::consts::ARCH);
    assert_eq!(info.build_time.as_deref(), option_env!("LEDGER_BUILD_TIME"));
    assert_eq!(info.commit.as_deref(), option_env!("LEDGER_COMMIT"));
    assert!(!info.runtime_version.is_empty());
}

#[tokio::test]
async fn service_info_serializes_missing_build_fields_as_null() {
    let info = ServiceInfo {
        build_time: None,
        commit: None,
        ..ServiceInfo::current()
    };
    let json: serde_json::Value = serde_json::to_value(&info).unwrap();
    assert!(json["build_time"].is_null());
    assert!(json["commit"].is_null());
    assert!(json["runtime_version"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_timeout_ends_stalled_batches() {
    let inserter = Inserter::new(Arc::new(StalledStorage), 4);
    let router = LedgerService::new(inserter, Arc::new(FixedSource::default()), MAX_BATCH)
        .with_request_timeout(Some(Duration::from_millis(50)))
        .router();

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        router.oneshot(post("/api/v1/tokens?size=2")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let lines = tokio::time::timeout(Duration::from_secs(5), sorted_lines(response))
        .await
        .unwrap();
    assert_eq!(lines, vec!["ERR : t0", "ERR : t1"]);
}

#[tokio::test]
async fn requests_pass_through_the_access_log() {
    let (router, _) = app(Arc::new(FixedSource::default()));
    let response = router.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::CONTENT_TYPE));

    let failing = Arc::new(FixedSource {
        fail: Some(Kind::Internal),
        ..FixedSource::default()
    });
    let (router, _) = app(failing);
    let response = router.oneshot(post("/api/v1/tokens?size=1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_body(response).await.code, 500);
}

#[tokio::test]
async fn heartbeat_honours_accept() {
    let (router, _) = app(Arc::new(FixedSource::default()));

    let json = Request::builder()
        .uri("/health/heartbeat")
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(json).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let beat: Heartbeat = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(beat.status, "ok");
    assert!(beat.now >= beat.started_at);

    let response = router.oneshot(get("/health/heartbeat")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.starts_with(&format!("{DESCRIPTION} @ ")), "{text}");
}
