mod common;

use axum::http::{header, StatusCode};
use codex_ai::MockProvider;
use codex_server::app;
use common::{
    completed_codex, create_run, send, signup, test_app, test_policy, test_state_with_provider,
    wait_for_run,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn templates_are_listed() {
    let app = test_app();
    let (token, _) = signup(&app, "coach@example.com", "Coach").await;
    let res = send(&app, "GET", "/api/templates", Some(&token), None).await;
    assert_eq!(res.status, StatusCode::OK);
    let templates = res.json();
    assert!(!templates.as_array().unwrap().is_empty());
    assert!(!templates[0]["sections"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn run_generates_in_background() {
    let app = test_app();
    let (token, _) = signup(&app, "coach@example.com", "Coach").await;
    let run_id = create_run(&app, &token, "Spring launch").await;

    let detail = wait_for_run(&app, &token, &run_id).await;
    assert_eq!(detail["run"]["status"], "completed");
    let codexes = detail["codexes"].as_array().unwrap();
    assert_eq!(codexes.len(), 1);
    assert_eq!(codexes[0]["title"], "Niche Clarity");
    assert_eq!(codexes[0]["completed_sections"], codexes[0]["total_sections"]);

    let codex_id = codexes[0]["id"].as_str().unwrap();
    let res = send(&app, "GET", &format!("/api/codexes/{}", codex_id), Some(&token), None).await;
    assert_eq!(res.status, StatusCode::OK);
    let codex = res.json();
    assert_eq!(codex["run_title"], "Spring launch");
    for section in codex["sections"].as_array().unwrap() {
        assert_eq!(section["status"], "completed");
        assert!(!section["content"].as_str().unwrap().is_empty());
    }

    let res = send(&app, "GET", "/api/runs", Some(&token), None).await;
    assert_eq!(res.json().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_run_is_rejected() {
    let app = test_app();
    let (token, _) = signup(&app, "coach@example.com", "Coach").await;
    let res = send(
        &app,
        "POST",
        "/api/runs",
        Some(&token),
        Some(json!({
            "title": "Empty",
            "source": { "kind": "transcript", "transcript": "   " }
        })),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = send(
        &app,
        "POST",
        "/api/runs",
        Some(&token),
        Some(json!({
            "title": "Unknown template",
            "source": { "kind": "transcript", "transcript": "We coach founders." },
            "template_ids": [9999]
        })),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn other_users_runs_look_missing() {
    let app = test_app();
    // The first account is the admin; use two regular accounts.
    let (admin, _) = signup(&app, "admin@example.com", "Admin").await;
    let (owner, _) = signup(&app, "owner@example.com", "Owner").await;
    let (other, _) = signup(&app, "other@example.com", "Other").await;

    let run_id = create_run(&app, &owner, "Private").await;
    let detail = wait_for_run(&app, &owner, &run_id).await;
    let codex_id = detail["codexes"][0]["id"].as_str().unwrap().to_string();

    let res = send(&app, "GET", &format!("/api/runs/{}", run_id), Some(&other), None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    let res = send(&app, "GET", &format!("/api/codexes/{}", codex_id), Some(&other), None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    let res = send(&app, "DELETE", &format!("/api/runs/{}", run_id), Some(&other), None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = send(&app, "GET", &format!("/api/runs/{}", run_id), Some(&admin), None).await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn delete_run_removes_it() {
    let app = test_app();
    let (token, _) = signup(&app, "coach@example.com", "Coach").await;
    let run_id = create_run(&app, &token, "Throwaway").await;
    wait_for_run(&app, &token, &run_id).await;

    let res = send(&app, "DELETE", &format!("/api/runs/{}", run_id), Some(&token), None).await;
    assert_eq!(res.status, StatusCode::NO_CONTENT);
    let res = send(&app, "GET", &format!("/api/runs/{}", run_id), Some(&token), None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_sections_can_be_retried() {
    let mut policy = test_policy();
    policy.generation.max_attempts = 1;
    let provider = Arc::new(MockProvider::new().fail_first(1));
    let app = app(test_state_with_provider(policy, provider.clone()));

    let (token, _) = signup(&app, "coach@example.com", "Coach").await;
    let run_id = create_run(&app, &token, "Flaky").await;
    let detail = wait_for_run(&app, &token, &run_id).await;
    assert_eq!(detail["run"]["status"], "error");
    let codex_id = detail["codexes"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(detail["codexes"][0]["status"], "error");

    let res = send(
        &app,
        "POST",
        &format!("/api/codexes/{}/retry", codex_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{:?}", res.json());
    assert_eq!(res.json()["status"], "completed");

    let detail = wait_for_run(&app, &token, &run_id).await;
    assert_eq!(detail["run"]["status"], "completed");
}

#[tokio::test]
async fn section_can_be_regenerated() {
    let app = test_app();
    let (token, codex_id) = completed_codex(&app, "coach@example.com").await;
    let codex = send(&app, "GET", &format!("/api/codexes/{}", codex_id), Some(&token), None)
        .await
        .json();
    let section_id = codex["sections"][0]["id"].as_str().unwrap().to_string();

    let res = send(
        &app,
        "POST",
        &format!("/api/sections/{}/regenerate", section_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["status"], "completed");
    assert_eq!(res.json()["id"], section_id.as_str());
}

#[tokio::test]
async fn events_stream_sends_snapshot_for_finished_run() {
    let app = test_app();
    let (token, _) = signup(&app, "coach@example.com", "Coach").await;
    let run_id = create_run(&app, &token, "Stream").await;
    wait_for_run(&app, &token, &run_id).await;

    let res = send(
        &app,
        "GET",
        &format!("/api/runs/{}/events", run_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let body = String::from_utf8(res.body).unwrap();
    assert!(body.contains("event: snapshot"));
    assert!(body.contains(&run_id));
}

#[tokio::test]
async fn codex_downloads_as_pdf() {
    let app = test_app();
    let (token, codex_id) = completed_codex(&app, "coach@example.com").await;

    let res = send(&app, "GET", &format!("/api/codexes/{}/pdf", codex_id), Some(&token), None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.headers[header::CONTENT_TYPE], "application/pdf");
    let disposition = res.headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.contains("niche-clarity.pdf"), "{}", disposition);
    assert!(res.body.starts_with(b"%PDF"));
}

#[tokio::test]
async fn events_stream_follows_generation_until_finished() {
    let provider = Arc::new(MockProvider::new().with_delay(Duration::from_millis(300)));
    let app = app(test_state_with_provider(test_policy(), provider));
    let (token, _) = signup(&app, "coach@example.com", "Coach").await;
    let run_id = create_run(&app, &token, "Live").await;

    let res = tokio::time::timeout(
        Duration::from_secs(10),
        send(&app, "GET", &format!("/api/runs/{}/events", run_id), Some(&token), None),
    )
    .await
    .expect("stream should close after run_finished");
    assert_eq!(res.status, StatusCode::OK);

    let body = String::from_utf8(res.body).unwrap();
    let snapshot = body.find("event: snapshot").unwrap();
    let completed = body.find("event: section_completed").unwrap();
    let finished = body.find("event: run_finished").unwrap();
    assert!(snapshot < completed && completed < finished, "{}", body);
    assert!(body.trim_end().ends_with('}'), "nothing may follow run_finished: {}", body);

    let detail = wait_for_run(&app, &token, &run_id).await;
    assert_eq!(detail["run"]["status"], "completed");
}
