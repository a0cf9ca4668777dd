/// HTTP surface tests: routing, auth, error bodies and translation headers
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use logql_gateway::{
    config::{ApiKeyConfig, Config, TranslationMode},
    handlers::AppState,
    server::{build_orchestrator, create_router},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

const API_KEY: &str = "sk-gateway-test-0001";

fn config_for(loki: &MockServer, llm: &MockServer) -> Config {
    let raw = format!(
        r#"
[loki]
base_url = "{loki}"
timeout_seconds = 5

[completion]
default_model = "qwen2.5-coder"

[[completion.backends]]
name = "vllm"
base_url = "{llm}/v1"
timeout_seconds = 5
models = ["qwen2.5-coder"]

[retry]
backoff_ms = 1
max_backoff_ms = 5
"#,
        loki = loki.uri(),
        llm = llm.uri()
    );
    toml::from_str(&raw).unwrap()
}

fn app(config: &Config) -> Router {
    let orchestrator = Arc::new(build_orchestrator(config).unwrap());
    create_router(config, AppState { orchestrator }, None)
}

fn query_request(body: Value, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/query")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {}", key));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn mount_loki(loki: &MockServer) {
    Mock::given(path("/loki/api/v1/labels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": ["container", "status"]
        })))
        .mount(loki)
        .await;
    Mock::given(path("/loki/api/v1/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": [{"container": "run_loki-flog-1"}]
        })))
        .mount(loki)
        .await;
    Mock::given(path("/loki/api/v1/label/status/values"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": ["200", "500"]
        })))
        .mount(loki)
        .await;
}

async fn mount_completion(llm: &MockServer, query: &str) {
    let reply = |content: Value| {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content.to_string()}}]
        }))
    };
    Mock::given(method("POST"))
        .and(body_string_contains("label_selection"))
        .respond_with(reply(json!({"label": "status"})))
        .mount(llm)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("query_synthesis"))
        .respond_with(reply(json!({"query": query})))
        .mount(llm)
        .await;
}

#[tokio::test]
async fn test_dry_run_returns_translation_and_headers() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_loki(&loki).await;
    mount_completion(&llm, r#"{container="run_loki-flog-1"} |= "500""#).await;

    let response = app(&config_for(&loki, &llm))
        .oneshot(query_request(
            json!({"query": "show me all errors", "dry_run": true}),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-translation-source"], "model");
    assert_eq!(
        response.headers()["x-logql-query"],
        r#"{container="run_loki-flog-1"} |= "500""#
    );
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await;
    assert_eq!(body["label"], "status");
    assert_eq!(body["source"], "model");

    let executed = loki
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().starts_with("/loki/api/v1/query"))
        .count();
    assert_eq!(executed, 0);
}

#[tokio::test]
async fn test_missing_query_is_bad_request() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;

    let response = app(&config_for(&loki, &llm))
        .oneshot(query_request(json!({"model": "qwen2.5-coder"}), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "invalid_request");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;

    let request = Request::builder()
        .method("POST")
        .uri("/query")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app(&config_for(&loki, &llm)).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_model_is_bad_request() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_loki(&loki).await;

    let response = app(&config_for(&loki, &llm))
        .oneshot(query_request(
            json!({"query": "show me all errors", "model": "gpt-unknown"}),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(llm.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_auth_enforced_on_query() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_loki(&loki).await;
    mount_completion(&llm, r#"{container="run_loki-flog-1"}"#).await;

    let mut config = config_for(&loki, &llm);
    config.auth.enabled = true;
    config.auth.api_keys = vec![ApiKeyConfig {
        key: API_KEY.to_string(),
        name: "grafana".to_string(),
        enabled: true,
    }];
    let app = app(&config);

    let body = json!({"query": "list recent logs", "dry_run": true});

    let response = app.clone().oneshot(query_request(body.clone(), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["kind"], "unauthorized");

    let response = app
        .clone()
        .oneshot(query_request(body.clone(), Some("sk-wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.oneshot(query_request(body, Some(API_KEY))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_backend_query_error_surfaces_status() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_loki(&loki).await;
    mount_completion(&llm, r#"{container="run_loki-flog-1"} |= "500""#).await;
    Mock::given(path("/loki/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(400).set_body_string("parse error at line 1"))
        .mount(&loki)
        .await;

    let mut config = config_for(&loki, &llm);
    config.pipeline.max_synthesis_attempts = 1;

    let response = app(&config)
        .oneshot(query_request(json!({"query": "show me all errors"}), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "backend_query_error");
    assert_eq!(body["error"]["backend_status"], 400);
    assert_eq!(body["error"]["detail"], "parse error at line 1");
}

#[tokio::test]
async fn test_fallback_mode_needs_no_completion_backend() {
    let loki = MockServer::start().await;
    Mock::given(path("/loki/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {"resultType": "streams", "result": []}
        })))
        .expect(1)
        .mount(&loki)
        .await;

    let mut config: Config = toml::from_str(&format!(
        "[loki]\nbase_url = \"{}\"\n\n[translation]\nmode = \"fallback\"\n",
        loki.uri()
    ))
    .unwrap();
    config.retry.backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    assert_eq!(config.translation.mode, TranslationMode::Fallback);

    let response = app(&config)
        .oneshot(query_request(json!({"query": "list recent logs"}), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-translation-source"], "fallback");
    assert_eq!(
        response.headers()["x-logql-query"],
        r#"{container="run_loki-flog-1"}"#
    );
    assert_eq!(json_body(response).await["data"]["resultType"], "streams");
}

#[tokio::test]
async fn test_schema_refresh_route() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_loki(&loki).await;

    let request = Request::builder()
        .method("POST")
        .uri("/admin/schema/refresh")
        .body(Body::empty())
        .unwrap();
    let response = app(&config_for(&loki, &llm)).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["labels"], 2);
    assert_eq!(body["streams"], 1);
}
