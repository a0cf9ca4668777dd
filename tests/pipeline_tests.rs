/// End-to-end pipeline tests against fake Loki and completion servers
use logql_gateway::{
    config::{validate_config, Config},
    error::AppError,
    pipeline::{QueryRequest, QuerySource},
    server::build_orchestrator,
};
use serde_json::json;
use wiremock::{
    matchers::{body_string_contains, header, method, path, path_regex, query_param},
    Mock, MockServer, ResponseTemplate,
};

const ERRORS_QUERY: &str = r#"{container="run_loki-flog-1"} | json status | status="500""#;

fn config_for(loki: &MockServer, llm: &MockServer) -> Config {
    let raw = format!(
        r#"
[loki]
base_url = "{loki}"
tenant_id = "team-a"
timeout_seconds = 5
query_mode = "range"

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
    let cfg: Config = toml::from_str(&raw).unwrap();
    validate_config(&cfg).unwrap();
    cfg
}

fn chat_response(content: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-test",
        "model": "qwen2.5-coder",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content.to_string()},
            "finish_reason": "stop"
        }]
    }))
}

async fn mount_metadata(loki: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/loki/api/v1/labels"))
        .and(header("X-Scope-OrgID", "team-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": ["container", "method", "status"]
        })))
        .mount(loki)
        .await;
    Mock::given(method("GET"))
        .and(path("/loki/api/v1/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": [{"container": "run_loki-flog-1", "job": "docker"}]
        })))
        .mount(loki)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/loki/api/v1/label/[^/]+/values$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": ["200", "404", "500"]
        })))
        .mount(loki)
        .await;
}

fn streams_body() -> serde_json::Value {
    json!({
        "status": "success",
        "data": {
            "resultType": "streams",
            "result": [{
                "stream": {"container": "run_loki-flog-1"},
                "values": [["1700000000000000000", "{\"status\":500}"]]
            }]
        }
    })
}

fn request(question: &str) -> QueryRequest {
    QueryRequest::new(question)
}

#[tokio::test]
async fn test_show_me_all_errors_end_to_end() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_metadata(&loki).await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("label_selection"))
        .respond_with(chat_response(json!({"label": "status"})))
        .expect(1)
        .mount(&llm)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("query_synthesis"))
        .respond_with(chat_response(json!({"query": ERRORS_QUERY})))
        .expect(1)
        .mount(&llm)
        .await;
    Mock::given(method("GET"))
        .and(path("/loki/api/v1/query_range"))
        .and(query_param("query", ERRORS_QUERY))
        .respond_with(ResponseTemplate::new(200).set_body_json(streams_body()))
        .expect(1)
        .mount(&loki)
        .await;

    let orchestrator = build_orchestrator(&config_for(&loki, &llm)).unwrap();
    let output = orchestrator.run(&request("show me all errors")).await.unwrap();

    assert_eq!(output.query.expr(), ERRORS_QUERY);
    assert_eq!(output.query.source(), QuerySource::Model);
    assert_eq!(output.label.as_deref(), Some("status"));
    assert_eq!(output.result.unwrap(), streams_body());
}

#[tokio::test]
async fn test_empty_question_makes_no_backend_calls() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;

    let orchestrator = build_orchestrator(&config_for(&loki, &llm)).unwrap();
    let err = orchestrator.run(&request("   ")).await.unwrap_err();

    assert!(matches!(err, AppError::InvalidRequest(_)));
    assert!(loki.received_requests().await.unwrap().is_empty());
    assert!(llm.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_loki_query_unavailable_after_one_retry() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_metadata(&loki).await;

    Mock::given(body_string_contains("label_selection"))
        .respond_with(chat_response(json!({"label": "status"})))
        .mount(&llm)
        .await;
    Mock::given(body_string_contains("query_synthesis"))
        .respond_with(chat_response(json!({"query": ERRORS_QUERY})))
        .mount(&llm)
        .await;
    Mock::given(method("GET"))
        .and(path("/loki/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(503).set_body_string("ingester unavailable"))
        .expect(2)
        .mount(&loki)
        .await;

    let orchestrator = build_orchestrator(&config_for(&loki, &llm)).unwrap();
    let err = orchestrator.run(&request("show me all errors")).await.unwrap_err();

    assert!(matches!(err, AppError::BackendUnavailable { .. }));
    assert!(err.detail().unwrap().contains("ingester unavailable"));
}

#[tokio::test]
async fn test_out_of_set_label_twice_is_unresolvable() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_metadata(&loki).await;

    Mock::given(body_string_contains("label_selection"))
        .respond_with(chat_response(json!({"label": "hostname"})))
        .expect(2)
        .mount(&llm)
        .await;
    Mock::given(body_string_contains("query_synthesis"))
        .respond_with(chat_response(json!({"query": ERRORS_QUERY})))
        .expect(0)
        .mount(&llm)
        .await;
    Mock::given(path("/loki/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(streams_body()))
        .expect(0)
        .mount(&loki)
        .await;

    let orchestrator = build_orchestrator(&config_for(&loki, &llm)).unwrap();
    let err = orchestrator.run(&request("show me all errors")).await.unwrap_err();

    assert!(matches!(err, AppError::AmbiguousOrUnresolvable(_)));
}

#[tokio::test]
async fn test_invalid_synthesis_twice_fails_without_execution() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_metadata(&loki).await;

    Mock::given(body_string_contains("label_selection"))
        .respond_with(chat_response(json!({"label": "status"})))
        .mount(&llm)
        .await;
    Mock::given(body_string_contains("query_synthesis"))
        .respond_with(chat_response(json!({"query": "status is 500"})))
        .expect(2)
        .mount(&llm)
        .await;
    Mock::given(path("/loki/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(streams_body()))
        .expect(0)
        .mount(&loki)
        .await;

    let orchestrator = build_orchestrator(&config_for(&loki, &llm)).unwrap();
    let err = orchestrator.run(&request("show me all errors")).await.unwrap_err();

    assert!(matches!(err, AppError::QuerySynthesisFailed(_)));
}

#[tokio::test]
async fn test_translate_does_not_execute() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_metadata(&loki).await;

    Mock::given(body_string_contains("label_selection"))
        .respond_with(chat_response(json!({"label": "status"})))
        .mount(&llm)
        .await;
    Mock::given(body_string_contains("query_synthesis"))
        .respond_with(chat_response(json!({"query": format!("```logql\n{}\n```", ERRORS_QUERY)})))
        .mount(&llm)
        .await;
    Mock::given(path("/loki/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(streams_body()))
        .expect(0)
        .mount(&loki)
        .await;

    let orchestrator = build_orchestrator(&config_for(&loki, &llm)).unwrap();
    let output = orchestrator.translate(&request("show me all errors")).await.unwrap();

    assert_eq!(output.query.expr(), ERRORS_QUERY);
    assert!(output.result.is_none());
}

#[tokio::test]
async fn test_fallback_when_completion_unavailable() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_metadata(&loki).await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
        .expect(2)
        .mount(&llm)
        .await;
    Mock::given(path("/loki/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(streams_body()))
        .expect(1)
        .mount(&loki)
        .await;

    let mut config = config_for(&loki, &llm);
    config.translation.fallback_on_unavailable = true;

    let orchestrator = build_orchestrator(&config).unwrap();
    let output = orchestrator.run(&request("Show me all errors")).await.unwrap();

    assert_eq!(output.query.source(), QuerySource::Fallback);
    assert!(output.query.expr().starts_with(r#"{container="run_loki-flog-1"} | json status"#));
    assert!(output.label.is_none());
}

#[tokio::test]
async fn test_completion_unavailable_without_fallback() {
    let loki = MockServer::start().await;
    let llm = MockServer::start().await;
    mount_metadata(&loki).await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
        .expect(2)
        .mount(&llm)
        .await;

    let orchestrator = build_orchestrator(&config_for(&loki, &llm)).unwrap();
    let err = orchestrator.run(&request("show me all errors")).await.unwrap_err();

    assert!(matches!(err, AppError::BackendUnavailable { .. }));
}
