use axum::{
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use codex_ai::{AiConfig, AiError, CompletionProvider, CompletionRequest, OpenAiClient};
use serde_json::{json, Value};
use std::net::SocketAddr;

async fn ok_handler(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-key") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "bad key"}})),
        );
    }
    let user = body["messages"][1]["content"].as_str().unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({
            "choices": [{"message": {"role": "assistant", "content": format!("  echo: {}  ", user)}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7}
        })),
    )
}

async fn empty_handler() -> Json<Value> {
    Json(json!({"choices": [{"message": {"role": "assistant", "content": ""}}]}))
}

async fn overloaded_handler() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
}

async fn spawn_fake_api() -> SocketAddr {
    let app = Router::new()
        .route("/ok/chat/completions", post(ok_handler))
        .route("/empty/chat/completions", post(empty_handler))
        .route("/down/chat/completions", post(overloaded_handler));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr, prefix: &str, key: &str) -> OpenAiClient {
    let config = AiConfig {
        base_url: format!("http://{}/{}", addr, prefix),
        api_key: key.to_string(),
        timeout_secs: 5,
        ..AiConfig::default()
    };
    OpenAiClient::new(&config).unwrap()
}

fn request() -> CompletionRequest {
    CompletionRequest {
        system: "You are a strategist.".to_string(),
        user: "Section: Core Niche Statement".to_string(),
        temperature: 0.2,
        max_tokens: 64,
    }
}

#[tokio::test]
async fn completes_and_reports_usage() {
    let addr = spawn_fake_api().await;
    let completion = client(addr, "ok", "test-key")
        .complete(request())
        .await
        .unwrap();

    assert_eq!(completion.text, "echo: Section: Core Niche Statement");
    assert_eq!(completion.prompt_tokens, 12);
    assert_eq!(completion.completion_tokens, 7);
    assert_eq!(completion.total_tokens(), 19);
}

#[tokio::test]
async fn non_success_status_is_api_error() {
    let addr = spawn_fake_api().await;

    let err = client(addr, "ok", "wrong-key")
        .complete(request())
        .await
        .unwrap_err();
    match err {
        AiError::Api { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("bad key"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }

    let err = client(addr, "down", "test-key")
        .complete(request())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn blank_content_is_empty_response() {
    let addr = spawn_fake_api().await;
    let err = client(addr, "empty", "test-key")
        .complete(request())
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::EmptyResponse));
}
