#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use codex_ai::MockProvider;
use codex_db::{create_pool, run_migrations, DbRuntimeSettings};
use codex_generation::{Generator, PromptOptions};
use codex_server::{app, middleware::RateLimiter, notify::Mailer, AppState};
use codex_types::{AppPolicy, Branding};
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tower::ServiceExt;

pub const PASSWORD: &str = "correct horse battery";

/// A policy that keeps tests fast: cheap hashing and no retry backoff.
pub fn test_policy() -> AppPolicy {
    let mut policy = AppPolicy::default();
    policy.share.pbkdf2_iterations = 1_000;
    policy.generation.retry_backoff_ms = 1;
    policy.rate_limit.default_limit = 10_000;
    policy.rate_limit.auth_limit = 1_000;
    policy.rate_limit.unlock_limit = 1_000;
    policy
}

pub fn test_state(policy: AppPolicy) -> AppState {
    test_state_with_provider(policy, Arc::new(MockProvider::new()))
}

pub fn test_state_with_provider(policy: AppPolicy, provider: Arc<MockProvider>) -> AppState {
    let pool = create_pool(":memory:", DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }
    let policy = Arc::new(RwLock::new(policy));
    let generator = Generator::new(pool.clone(), provider, policy.clone(), PromptOptions::default());

    AppState {
        pool,
        policy,
        branding: Arc::new(RwLock::new(Branding::default())),
        generator,
        rate_limiter: RateLimiter::new(),
        mailer: Mailer::disabled(),
        share_secret: Arc::new(b"test-share-secret".to_vec()),
        public_url: "https://app.test".to_string(),
        session_ttl_hours: 24,
        password_iterations: 1_000,
        client_dir: "does-not-exist".to_string(),
    }
}

pub fn test_app() -> Router {
    app(test_state(test_policy()))
}

pub fn client_addr(last_octet: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), 40000)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

/// Sends one request from `addr`, with an optional bearer token and JSON
/// body.
pub async fn send_from(
    app: &Router,
    addr: SocketAddr,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
    extra_headers: &[(&str, &str)],
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    for (name, value) in extra_headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let mut req = builder.body(body).unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> TestResponse {
    send_from(app, client_addr(1), method, uri, token, body, &[]).await
}

/// Creates an account and returns its session token and user ID.
pub async fn signup(app: &Router, email: &str, name: &str) -> (String, String) {
    let res = send(
        app,
        "POST",
        "/api/auth/signup",
        None,
        Some(json!({ "email": email, "password": PASSWORD, "display_name": name })),
    )
    .await;
    assert_eq!(res.status, StatusCode::CREATED, "signup failed: {:?}", res.json());
    let body = res.json();
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

/// Submits a run for the first seeded template only.
pub async fn create_run(app: &Router, token: &str, title: &str) -> String {
    let res = send(
        app,
        "POST",
        "/api/runs",
        Some(token),
        Some(json!({
            "title": title,
            "source": {
                "kind": "questionnaire",
                "answers": [
                    { "question": "Who do you serve?", "answer": "Agency owners who want to scale past six figures." }
                ]
            },
            "template_ids": [1]
        })),
    )
    .await;
    assert_eq!(res.status, StatusCode::ACCEPTED, "run create failed: {:?}", res.json());
    res.json()["id"].as_str().unwrap().to_string()
}

/// Polls the run until it leaves `pending`/`generating`. Returns the run
/// detail.
pub async fn wait_for_run(app: &Router, token: &str, run_id: &str) -> Value {
    for _ in 0..500 {
        let res = send(app, "GET", &format!("/api/runs/{}", run_id), Some(token), None).await;
        assert_eq!(res.status, StatusCode::OK);
        let detail = res.json();
        let status = detail["run"]["status"].as_str().unwrap_or_default().to_string();
        if status != "pending" && status != "generating" {
            return detail;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} did not finish", run_id);
}

/// Signs up, generates one codex and returns `(token, codex_id)`.
pub async fn completed_codex(app: &Router, email: &str) -> (String, String) {
    let (token, _) = signup(app, email, "Coach").await;
    let run_id = create_run(app, &token, "Spring launch").await;
    let detail = wait_for_run(app, &token, &run_id).await;
    assert_eq!(detail["run"]["status"], "completed");
    let codex_id = detail["codexes"][0]["id"].as_str().unwrap().to_string();
    (token, codex_id)
}
