mod common;

use axum::http::StatusCode;
use common::{completed_codex, send, signup, test_app};
use serde_json::json;

#[tokio::test]
async fn admin_routes_reject_regular_users() {
    let app = test_app();
    signup(&app, "admin@example.com", "Admin").await;
    let (user, _) = signup(&app, "coach@example.com", "Coach").await;

    for uri in [
        "/api/admin/users",
        "/api/admin/policy",
        "/api/admin/templates",
        "/api/admin/runs",
        "/api/admin/analytics/summary",
        "/api/admin/analytics/events",
    ] {
        let res = send(&app, "GET", uri, Some(&user), None).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN, "{}", uri);
    }

    let res = send(&app, "GET", "/api/admin/users", None, None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_manages_users() {
    let app = test_app();
    let (admin, admin_id) = signup(&app, "admin@example.com", "Admin").await;
    let (user, user_id) = signup(&app, "coach@example.com", "Coach").await;

    let res = send(&app, "GET", "/api/admin/users", Some(&admin), None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json().as_array().unwrap().len(), 2);

    let res = send(
        &app,
        "PATCH",
        &format!("/api/admin/users/{}", user_id),
        Some(&admin),
        Some(json!({ "active": false })),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["active"], false);

    // Deactivated accounts lose their sessions.
    let res = send(&app, "GET", "/api/me", Some(&user), None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    // The only administrator cannot demote themselves.
    let res = send(
        &app,
        "PATCH",
        &format!("/api/admin/users/{}", admin_id),
        Some(&admin),
        Some(json!({ "role": "user" })),
    )
    .await;
    assert_eq!(res.status, StatusCode::CONFLICT);

    let res = send(
        &app,
        "PATCH",
        &format!("/api/admin/users/{}", user_id),
        Some(&admin),
        Some(json!({})),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn policy_update_is_versioned_and_applied() {
    let app = test_app();
    let (admin, _) = signup(&app, "admin@example.com", "Admin").await;

    let mut policy = send(&app, "GET", "/api/admin/policy", Some(&admin), None)
        .await
        .json()["policy"]
        .clone();
    policy["generation"]["batch_size"] = json!(2);
    // The test harness runs with cheap hashing, below the accepted minimum.
    policy["share"]["pbkdf2_iterations"] = json!(10_000);

    let res = send(&app, "PUT", "/api/admin/policy", Some(&admin), Some(policy.clone())).await;
    assert_eq!(res.status, StatusCode::OK, "{:?}", res.json());
    let version_id = res.json()["version_id"].as_str().unwrap().to_string();

    let current = send(&app, "GET", "/api/admin/policy", Some(&admin), None).await.json();
    assert_eq!(current["policy"]["generation"]["batch_size"], 2);
    assert_eq!(current["history"][0]["version_id"], version_id.as_str());

    policy["generation"]["batch_size"] = json!(0);
    let res = send(&app, "PUT", "/api/admin/policy", Some(&admin), Some(policy)).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let events = send(
        &app,
        "GET",
        "/api/admin/analytics/events?event_type=ADMIN_ACTION",
        Some(&admin),
        None,
    )
    .await
    .json();
    assert_eq!(events.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn branding_update_is_public() {
    let app = test_app();
    let (admin, _) = signup(&app, "admin@example.com", "Admin").await;

    let res = send(
        &app,
        "PUT",
        "/api/admin/branding",
        Some(&admin),
        Some(json!({
            "app_name": "LightOS",
            "tagline": "Clarity for coaches",
            "primary_color": "#112233",
            "footer_text": "LightOS Inc."
        })),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{:?}", res.json());

    let branding = send(&app, "GET", "/api/branding", None, None).await.json();
    assert_eq!(branding["app_name"], "LightOS");
    assert_eq!(branding["primary_color"], "#112233");

    let res = send(
        &app,
        "PUT",
        "/api/admin/branding",
        Some(&admin),
        Some(json!({ "app_name": "LightOS", "primary_color": "blue" })),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn templates_can_be_deactivated() {
    let app = test_app();
    let (admin, _) = signup(&app, "admin@example.com", "Admin").await;

    let res = send(
        &app,
        "PUT",
        "/api/admin/templates/1",
        Some(&admin),
        Some(json!({ "active": false })),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["active"], false);

    let all = send(&app, "GET", "/api/admin/templates", Some(&admin), None).await.json();
    let active = send(&app, "GET", "/api/templates", Some(&admin), None).await.json();
    assert_eq!(all.as_array().unwrap().len(), active.as_array().unwrap().len() + 1);

    let res = send(&app, "PUT", "/api/admin/templates/9999", Some(&admin), Some(json!({ "active": true }))).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn analytics_reflect_usage() {
    let app = test_app();
    let (admin, codex_id) = completed_codex(&app, "admin@example.com").await;
    let res = send(&app, "GET", &format!("/api/codexes/{}/pdf", codex_id), Some(&admin), None).await;
    assert_eq!(res.status, StatusCode::OK);

    let res = send(&app, "GET", "/api/admin/analytics/summary", Some(&admin), None).await;
    assert_eq!(res.status, StatusCode::OK);
    let summary = res.json();
    assert_eq!(summary["runs_created"], 1);
    assert_eq!(summary["codexes_completed"], 1);
    assert_eq!(summary["pdf_exports"], 1);
    assert_eq!(summary["runs_per_day"][0]["count"], 1);

    let runs = send(&app, "GET", "/api/admin/runs?status=completed", Some(&admin), None)
        .await
        .json();
    assert_eq!(runs.as_array().unwrap().len(), 1);
}
