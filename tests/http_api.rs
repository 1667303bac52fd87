use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use linguaflow::scheduler::{DeferredTask, TaskScheduler};
use linguaflow::server::{router, AppState};
use linguaflow::translate::cache::MemoryCache;
use linguaflow::{TranslationService, Translator, UpstreamError};

struct UppercaseTranslator;

#[async_trait]
impl Translator for UppercaseTranslator {
    async fn translate(&self, text: &str, _target_lang: &str) -> Result<String, UpstreamError> {
        Ok(text.to_uppercase())
    }
}

struct DownTranslator;

#[async_trait]
impl Translator for DownTranslator {
    async fn translate(&self, _text: &str, _target_lang: &str) -> Result<String, UpstreamError> {
        Err(UpstreamError::Unauthorized("invalid api key".into()))
    }
}

struct DiscardScheduler;

impl TaskScheduler for DiscardScheduler {
    fn schedule(&self, _label: &'static str, _task: DeferredTask) {}
}

fn app(translator: Arc<dyn Translator>) -> axum::Router {
    let service = TranslationService::builder(translator, Arc::new(DiscardScheduler))
        .cache(Arc::new(MemoryCache::new(16)))
        .build();
    router(AppState::new(Arc::new(service)))
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn translate_returns_result_json() {
    let app = app(Arc::new(UppercaseTranslator));

    let response = app
        .clone()
        .oneshot(post_json("/translate", r#"{"text":"hello","target_lang":"French"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["original"], "hello");
    assert_eq!(body["translated"], "HELLO");
    assert_eq!(body["source"], "api");
    assert!(body["latency_ms"].as_f64().unwrap() >= 0.0);

    let again = app
        .oneshot(post_json("/translate", r#"{"text":"Hello ","target_lang":"French"}"#))
        .await
        .unwrap();
    let body = json_body(again).await;
    assert_eq!(body["source"], "cache");
    assert_eq!(body["translated"], "HELLO");
}

#[tokio::test]
async fn upstream_failure_maps_to_500_with_detail() {
    let response = app(Arc::new(DownTranslator))
        .oneshot(post_json("/translate", r#"{"text":"hello"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["detail"].as_str().unwrap().contains("invalid api key"));
}

#[tokio::test]
async fn empty_or_malformed_input_is_rejected() {
    let app = app(Arc::new(UppercaseTranslator));

    let empty = app
        .clone()
        .oneshot(post_json("/translate", r#"{"text":""}"#))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json_body(empty).await["detail"].is_string());

    let missing = app
        .oneshot(post_json("/translate", r#"{"target_lang":"French"}"#))
        .await
        .unwrap();
    assert!(missing.status().is_client_error());
    assert!(json_body(missing).await["detail"].is_string());
}

#[tokio::test]
async fn health_reports_backends() {
    let response = app(Arc::new(UppercaseTranslator))
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache"], "memory");
    assert_eq!(body["telemetry"], "none");
}

#[tokio::test]
async fn metrics_lists_recorded_timings() {
    let app = app(Arc::new(UppercaseTranslator));
    app.clone()
        .oneshot(post_json("/translate", r#"{"text":"hi"}"#))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["translate_miss"]["count"], 1);
    assert_eq!(body["upstream_ok"]["count"], 1);
}
