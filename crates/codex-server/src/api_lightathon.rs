//! The 21-day Lightathon endpoints.

use crate::api::{with_conn, ApiError};
use crate::middleware::UserContext;
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
};
use chrono::NaiveDate;
use codex_lightathon::{
    abandon, active_enrollment, complete_mission, enroll, leaderboard, progress, Enrollment,
    LeaderboardEntry, MissionOutcome, Progress,
};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_LEADERBOARD_LIMIT: usize = 20;
const MAX_LEADERBOARD_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub codex_id: String,
    /// Defaults to today (UTC).
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Handler for `POST /api/lightathon/enrollments`.
pub async fn enroll_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Json(payload): Json<EnrollRequest>,
) -> Result<(StatusCode, Json<Progress>), ApiError> {
    let start = payload.start_date.unwrap_or_else(today);
    let view = with_conn(&state, move |conn| {
        let enrollment = enroll(conn, &ctx.user.id, &payload.codex_id, start)?;
        Ok(progress(conn, &enrollment.id, today())?)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Handler for `GET /api/lightathon/enrollments/current`.
pub async fn current_enrollment_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
) -> Result<Json<Progress>, ApiError> {
    let view = with_conn(&state, move |conn| {
        let enrollment = active_enrollment(conn, &ctx.user.id)?
            .ok_or_else(|| ApiError::NotFound("no active lightathon".to_string()))?;
        Ok(progress(conn, &enrollment.id, today())?)
    })
    .await?;
    Ok(Json(view))
}

/// Handler for `POST /api/lightathon/enrollments/{id}/missions/{day}/complete`.
pub async fn complete_mission_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path((enrollment_id, day)): Path<(String, u32)>,
) -> Result<Json<MissionOutcome>, ApiError> {
    let policy = state.policy_snapshot().lightathon;
    let outcome = with_conn(&state, move |conn| {
        Ok(complete_mission(
            conn,
            &enrollment_id,
            &ctx.user.id,
            day,
            today(),
            &policy,
        )?)
    })
    .await?;
    Ok(Json(outcome))
}

/// Handler for `POST /api/lightathon/enrollments/{id}/abandon`.
pub async fn abandon_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(enrollment_id): Path<String>,
) -> Result<Json<Enrollment>, ApiError> {
    let enrollment =
        with_conn(&state, move |conn| Ok(abandon(conn, &enrollment_id, &ctx.user.id)?)).await?;
    Ok(Json(enrollment))
}

/// Handler for `GET /api/lightathon/leaderboard`.
pub async fn leaderboard_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    let entries = with_conn(&state, move |conn| Ok(leaderboard(conn, limit)?)).await?;
    Ok(Json(entries))
}
