// REST surface scenarios: authentication, guild grants, validation, the
// async job path, scheduling, and the per-principal rate limit.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use recap_core::config::{PrincipalConfig, RecapConfig};
use recap_engine::{LlmClient, MockProvider, SummaryEngine};
use recap_gateway::{build_router, AppState};
use recap_scheduler::{Deliverer, Scheduler};
use recap_source::{MemorySource, MessageSource};
use recap_store::Store;

struct Harness {
    router: Router,
    source: Arc<MemorySource>,
    _dir: tempfile::TempDir,
}

fn harness(rate_limit: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recap.db");
    let store = Arc::new(Store::open(path.to_str().unwrap(), 2).unwrap());

    let mut config = RecapConfig::default();
    config.llm.max_retries = 0;
    config.llm.min_dispatch_interval_ms = 0;
    config.gateway.rate_limit_per_minute = rate_limit;
    config.gateway.jwt_secret = Some("test-secret".to_string());
    config.gateway.api_keys.insert(
        "valid-key".to_string(),
        PrincipalConfig {
            name: "tester".to_string(),
            guilds: vec!["guild-1".to_string()],
        },
    );

    let mock = Arc::new(MockProvider::new());
    let llm = Arc::new(LlmClient::new(Box::new(Arc::clone(&mock)), &config.llm).unwrap());
    let source = Arc::new(MemorySource::new());
    let engine = Arc::new(SummaryEngine::new(
        Arc::clone(&source) as Arc<dyn MessageSource>,
        Arc::clone(&store),
        llm,
        &config,
    ));
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        Deliverer::new(None),
        Duration::from_secs(30),
        Duration::from_secs(300),
    ));

    let state = Arc::new(
        AppState::new(
            config,
            engine,
            scheduler,
            store,
            Arc::clone(&source) as Arc<dyn MessageSource>,
        )
        .unwrap(),
    );

    Harness {
        router: build_router(state),
        source,
        _dir: dir,
    }
}

fn seed_messages(source: &MemorySource) {
    let now = Utc::now();
    for i in 0..8 {
        source.push(
            "chan-1",
            MemorySource::message(
                &format!("m{i}"),
                "u1",
                "Ana",
                now - ChronoDuration::minutes(90 - i),
                &format!("note {i} about the incident"),
            ),
        );
    }
}

fn summarize_body(hours: i64) -> String {
    let end = Utc::now();
    let start = end - ChronoDuration::hours(hours);
    json!({
        "channelId": "chan-1",
        "guildId": "guild-1",
        "start": start.to_rfc3339(),
        "end": end.to_rfc3339(),
    })
    .to_string()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, key: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn summarize_requires_authentication() {
    let h = harness(100);
    seed_messages(&h.source);

    // No headers at all.
    let (status, body) = send(&h.router, post("/v1/summarize", None, summarize_body(2))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errorCode"], "AUTH_FAILED");

    // Wrong key.
    let (status, _) = send(
        &h.router,
        post("/v1/summarize", Some("wrong-key"), summarize_body(2)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn guild_grants_are_enforced() {
    let h = harness(100);
    seed_messages(&h.source);

    let end = Utc::now();
    let start = end - ChronoDuration::hours(2);
    let body = json!({
        "channelId": "chan-1",
        "guildId": "guild-2",
        "start": start.to_rfc3339(),
        "end": end.to_rfc3339(),
    })
    .to_string();

    let (status, body) = send(&h.router, post("/v1/summarize", Some("valid-key"), body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["errorCode"], "PERMISSION_DENIED");
}

#[tokio::test]
async fn valid_request_creates_a_summary() {
    let h = harness(100);
    seed_messages(&h.source);

    let (status, body) = send(
        &h.router,
        post("/v1/summarize", Some("valid-key"), summarize_body(2)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["channel_id"], "chan-1");
    assert!(body["id"].as_str().is_some());

    // The created summary is retrievable.
    let id = body["id"].as_str().unwrap();
    let (status, fetched) = send(&h.router, get(&format!("/v1/summary/{id}"), Some("valid-key"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], body["id"]);

    // And listed.
    let (status, listing) = send(
        &h.router,
        get("/v1/summaries?guild=guild-1&channel=chan-1", Some("valid-key")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_body_fields_are_rejected() {
    let h = harness(100);
    let end = Utc::now();
    let body = json!({
        "channelId": "chan-1",
        "guildId": "guild-1",
        "start": (end - ChronoDuration::hours(2)).to_rfc3339(),
        "end": end.to_rfc3339(),
        "surprise": true,
    })
    .to_string();

    let (status, _) = send(&h.router, post("/v1/summarize", Some("valid-key"), body)).await;
    assert!(status.is_client_error(), "got {status}");
}

#[tokio::test]
async fn oversized_windows_defer_to_a_job() {
    let h = harness(100);
    // Messages across the whole window.
    let now = Utc::now();
    for i in 0..10 {
        h.source.push(
            "chan-1",
            MemorySource::message(
                &format!("m{i}"),
                "u1",
                "Ana",
                now - ChronoDuration::hours(60) + ChronoDuration::hours(i * 5),
                &format!("long-range note {i}"),
            ),
        );
    }

    let (status, body) = send(
        &h.router,
        post("/v1/summarize", Some("valid-key"), summarize_body(72)),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    // Poll the job until the summary lands.
    let mut last = (StatusCode::ACCEPTED, Value::Null);
    for _ in 0..50 {
        last = send(&h.router, get(&format!("/v1/summary/{job_id}"), Some("valid-key"))).await;
        if last.0 == StatusCode::OK && last.1.get("status").is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(last.0, StatusCode::OK, "job never completed: {:?}", last.1);
    assert_eq!(last.1["channel_id"], "chan-1");
}

#[tokio::test]
async fn schedule_lifecycle_over_rest() {
    let h = harness(100);

    let body = json!({
        "name": "nightly",
        "channelId": "chan-1",
        "guildId": "guild-1",
        "schedule": { "kind": "daily", "hour": 8, "minute": 0 },
    })
    .to_string();

    let (status, created) = send(&h.router, post("/v1/schedule", Some("valid-key"), body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["id"].as_str().is_some());
    assert!(created["nextRun"].as_str().is_some());

    // Duplicate name in the same guild conflicts.
    let (status, dup) = send(&h.router, post("/v1/schedule", Some("valid-key"), body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(dup["errorCode"], "STORE_CONSTRAINT");

    // Delete, then the id is gone.
    let id = created["id"].as_str().unwrap();
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/v1/schedule/{id}"))
        .header("x-api-key", "valid-key")
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/v1/schedule/{id}"))
        .header("x-api-key", "valid-key")
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn principal_rate_limit_returns_retry_after() {
    let h = harness(2);
    let (status, _) = send(&h.router, get("/v1/summaries?guild=guild-1", Some("valid-key"))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&h.router, get("/v1/summaries?guild=guild-1", Some("valid-key"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&h.router, get("/v1/summaries?guild=guild-1", Some("valid-key"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["errorCode"], "RATE_LIMITED");
    assert!(body["retryAfter"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn bearer_tokens_work_end_to_end() {
    let h = harness(100);
    seed_messages(&h.source);

    let token = recap_gateway::auth::sign_token(
        "test-secret",
        &json!({
            "sub": "svc",
            "exp": Utc::now().timestamp() + 600,
            "guilds": ["guild-1"],
        }),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/v1/summarize")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(summarize_body(2)))
        .unwrap();
    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
}

#[tokio::test]
async fn health_reports_component_state() {
    let h = harness(100);
    let (status, body) = send(&h.router, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["componentHealth"]["store"], "ok");
    assert_eq!(body["componentHealth"]["llm"]["provider"], "mock");
}
