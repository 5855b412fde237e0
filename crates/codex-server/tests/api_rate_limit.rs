mod common;

use axum::http::{header, StatusCode};
use codex_server::app;
use common::{client_addr, send, send_from, signup, test_policy, test_state};
use serde_json::json;

#[tokio::test]
async fn login_is_limited_per_ip() {
    let mut policy = test_policy();
    policy.rate_limit.auth_limit = 2;
    let app = app(test_state(policy));

    let body = json!({ "email": "nobody@example.com", "password": "whatever123" });
    for _ in 0..2 {
        let res = send_from(&app, client_addr(3), "POST", "/api/auth/login", None, Some(body.clone()), &[]).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    let res = send_from(&app, client_addr(3), "POST", "/api/auth/login", None, Some(body.clone()), &[]).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers[header::RETRY_AFTER], "60");
    assert!(res.json()["error"].is_string());

    // A different client still gets through.
    let res = send_from(&app, client_addr(4), "POST", "/api/auth/login", None, Some(body), &[]).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authenticated_requests_are_limited_per_account() {
    let mut policy = test_policy();
    policy.rate_limit.default_limit = 3;
    let app = app(test_state(policy));
    let (alice, _) = signup(&app, "alice@example.com", "Alice").await;
    let (bob, _) = signup(&app, "bob@example.com", "Bob").await;

    for _ in 0..3 {
        let res = send(&app, "GET", "/api/me", Some(&alice), None).await;
        assert_eq!(res.status, StatusCode::OK);
    }
    let res = send(&app, "GET", "/api/me", Some(&alice), None).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);

    // Same IP, different account.
    let res = send(&app, "GET", "/api/me", Some(&bob), None).await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn health_is_never_limited() {
    let mut policy = test_policy();
    policy.rate_limit.default_limit = 1;
    let app = app(test_state(policy));
    for _ in 0..5 {
        let res = send(&app, "GET", "/health", None, None).await;
        assert_eq!(res.status, StatusCode::OK);
    }
}
