//! Admin console API handlers.
//!
//! Every route here sits behind `admin_middleware`. Mutations record an
//! `ADMIN_ACTION` usage event naming the acting administrator.

use crate::api::{record_event, with_conn, ApiError};
use crate::middleware::UserContext;
use crate::settings::{policy_history, save_branding, save_policy, PolicyVersion};
use crate::AppState;
use axum::extract::{Extension, Json, Path, Query};
use codex_generation::{list_runs, list_templates, update_template, PersonaRun, RunFilter, Template, TemplateUpdate};
use codex_identity::{list_users, set_active, set_role, update_display_name, User};
use codex_observe::{
    daily_counts, query_events, usage_summary, DailyCount, EventFilter, EventPayload, UsageEvent,
    UsageSummary,
};
use codex_types::{AppPolicy, Branding, GenerationStatus, Role};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const POLICY_HISTORY_LIMIT: i64 = 20;
const MAX_EVENT_LIMIT: i64 = 500;
const TREND_DAYS: u32 = 30;

fn admin_action(conn: &Connection, ctx: &UserContext, action: &str, target: Option<String>, description: String) {
    let entity = target.clone().unwrap_or_else(|| ctx.user.id.clone());
    record_event(
        conn,
        Some(&ctx.user.id),
        &entity,
        &EventPayload::AdminAction {
            action: action.to_string(),
            target,
            description,
        },
    );
}

// ── Users ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub display_name: Option<String>,
}

/// Handler for `GET /api/admin/users`.
pub async fn list_users_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = with_conn(&state, |conn| Ok(list_users(conn)?)).await?;
    Ok(Json(users))
}

/// Handler for `PATCH /api/admin/users/{id}`.
///
/// Changes are applied in order: display name, role, active flag. The last
/// active administrator can be neither demoted nor deactivated.
pub async fn update_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    if payload.role.is_none() && payload.active.is_none() && payload.display_name.is_none() {
        return Err(ApiError::BadRequest("no changes requested".to_string()));
    }

    let user = with_conn(&state, move |conn| {
        let mut changes = Vec::new();
        let mut user = None;
        if let Some(ref name) = payload.display_name {
            user = Some(update_display_name(conn, &user_id, name)?);
            changes.push("display_name".to_string());
        }
        if let Some(role) = payload.role {
            user = Some(set_role(conn, &user_id, role)?);
            changes.push(format!("role={}", role));
        }
        if let Some(active) = payload.active {
            user = Some(set_active(conn, &user_id, active)?);
            changes.push(format!("active={}", active));
        }
        let user = user.ok_or_else(|| ApiError::BadRequest("no changes requested".to_string()))?;

        admin_action(
            conn,
            &ctx,
            "user_update",
            Some(user.id.clone()),
            format!("Updated {}: {}", user.email, changes.join(", ")),
        );
        Ok(user)
    })
    .await?;

    tracing::info!(user_id = %user.id, role = %user.role, active = user.active, "user updated by admin");
    Ok(Json(user))
}

// ── Policy and branding ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PolicyResponse {
    pub policy: AppPolicy,
    pub history: Vec<PolicyVersion>,
}

#[derive(Debug, Serialize)]
pub struct PolicyUpdated {
    pub version_id: String,
    pub policy: AppPolicy,
}

/// Handler for `GET /api/admin/policy`. The active policy and its recent
/// versions.
pub async fn get_policy_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<PolicyResponse>, ApiError> {
    let history = with_conn(&state, |conn| Ok(policy_history(conn, POLICY_HISTORY_LIMIT)?)).await?;
    Ok(Json(PolicyResponse {
        policy: state.policy_snapshot(),
        history,
    }))
}

/// Handler for `PUT /api/admin/policy`.
///
/// Validates the policy, persists it as a new version and swaps it into
/// the running server. Rate limits and generation settings apply to the
/// next request or batch.
pub async fn update_policy_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Json(new_policy): Json<AppPolicy>,
) -> Result<Json<PolicyUpdated>, ApiError> {
    new_policy
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let stored = new_policy.clone();
    let version_id = with_conn(&state, move |conn| {
        let version_id = save_policy(conn, &stored, Some(&ctx.user.id))?;
        admin_action(
            conn,
            &ctx,
            "policy_update",
            None,
            format!("Policy updated to version {}", version_id),
        );
        Ok(version_id)
    })
    .await?;

    match state.policy.write() {
        Ok(mut policy) => *policy = new_policy.clone(),
        Err(poisoned) => *poisoned.into_inner() = new_policy.clone(),
    }

    tracing::info!(version_id = %version_id, "policy updated");
    Ok(Json(PolicyUpdated {
        version_id,
        policy: new_policy,
    }))
}

/// Handler for `GET /api/branding`. Public.
pub async fn get_branding_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Branding> {
    Json(state.branding_snapshot())
}

/// Handler for `PUT /api/admin/branding`.
pub async fn update_branding_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Json(branding): Json<Branding>,
) -> Result<Json<Branding>, ApiError> {
    branding
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let stored = branding.clone();
    with_conn(&state, move |conn| {
        save_branding(conn, &stored)?;
        admin_action(
            conn,
            &ctx,
            "branding_update",
            None,
            format!("Branding updated, app name \"{}\"", stored.app_name),
        );
        Ok(())
    })
    .await?;

    match state.branding.write() {
        Ok(mut current) => *current = branding.clone(),
        Err(poisoned) => *poisoned.into_inner() = branding.clone(),
    }
    Ok(Json(branding))
}

// ── Templates ─────────────────────────────────────────────────────────

/// Handler for `GET /api/admin/templates`. Includes inactive templates.
pub async fn list_all_templates_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Template>>, ApiError> {
    let templates = with_conn(&state, |conn| Ok(list_templates(conn, false)?)).await?;
    Ok(Json(templates))
}

/// Handler for `PUT /api/admin/templates/{id}`.
pub async fn update_template_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(template_id): Path<i64>,
    Json(update): Json<TemplateUpdate>,
) -> Result<Json<Template>, ApiError> {
    let template = with_conn(&state, move |conn| {
        let template = update_template(conn, template_id, &update)?;
        admin_action(
            conn,
            &ctx,
            "template_update",
            Some(template.id.to_string()),
            format!("Template \"{}\" updated", template.slug),
        );
        Ok(template)
    })
    .await?;
    Ok(Json(template))
}

// ── Runs and analytics ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AdminRunsQuery {
    pub user_id: Option<String>,
    pub status: Option<GenerationStatus>,
    pub limit: Option<i64>,
}

/// Handler for `GET /api/admin/runs`. Runs across all users.
pub async fn list_all_runs_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<AdminRunsQuery>,
) -> Result<Json<Vec<PersonaRun>>, ApiError> {
    let filter = RunFilter {
        user_id: query.user_id,
        status: query.status,
        limit: Some(query.limit.unwrap_or(100).clamp(1, 500)),
    };
    let runs = with_conn(&state, move |conn| Ok(list_runs(conn, &filter)?)).await?;
    Ok(Json(runs))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    /// RFC 3339 lower bound; all time when absent.
    pub since: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsSummary {
    #[serde(flatten)]
    pub summary: UsageSummary,
    /// Runs created per day over the last 30 days.
    pub runs_per_day: Vec<DailyCount>,
}

/// Handler for `GET /api/admin/analytics/summary`.
pub async fn analytics_summary_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<AnalyticsSummary>, ApiError> {
    let summary = with_conn(&state, move |conn| {
        Ok(AnalyticsSummary {
            summary: usage_summary(conn, query.since.as_deref())?,
            runs_per_day: daily_counts(conn, "RUN_CREATED", TREND_DAYS)?,
        })
    })
    .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub entity_id: Option<String>,
    pub since: Option<String>,
    pub after_seq: Option<i64>,
    pub limit: Option<i64>,
}

/// Handler for `GET /api/admin/analytics/events`.
pub async fn analytics_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<UsageEvent>>, ApiError> {
    let filter = EventFilter {
        event_type: query.event_type,
        user_id: query.user_id,
        entity_id: query.entity_id,
        since: query.since,
        after_seq: query.after_seq,
        limit: query.limit.map(|l| l.clamp(1, MAX_EVENT_LIMIT)),
    };
    let events = with_conn(&state, move |conn| Ok(query_events(conn, &filter)?)).await?;
    Ok(Json(events))
}
