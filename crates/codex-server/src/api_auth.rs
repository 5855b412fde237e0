//! Sign-up, login, logout and the current account.

use crate::api::{record_event, with_conn, ApiError};
use crate::middleware::UserContext;
use crate::AppState;
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
};
use codex_identity::{
    authenticate, create_session, create_user, revoke_session, update_display_name, NewUser, User,
};
use codex_observe::EventPayload;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// Bearer token for the `Authorization` header.
    pub token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMeRequest {
    pub display_name: String,
}

/// Handler for `POST /api/auth/signup`.
///
/// The first account on a fresh database becomes the administrator.
pub async fn signup_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let iterations = state.password_iterations;
    let ttl = state.session_ttl_hours;

    let response = with_conn(&state, move |conn| {
        let user = create_user(
            conn,
            &NewUser {
                email: payload.email,
                password: payload.password,
                display_name: payload.display_name,
            },
            iterations,
        )?;
        let token = create_session(conn, &user.id, ttl)?;

        let email_domain = user
            .email
            .split_once('@')
            .map(|(_, domain)| domain.to_string())
            .unwrap_or_default();
        record_event(
            conn,
            Some(&user.id),
            &user.id,
            &EventPayload::UserSignedUp { email_domain },
        );
        Ok(SessionResponse { token, user })
    })
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Handler for `POST /api/auth/login`.
pub async fn login_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let ttl = state.session_ttl_hours;
    let response = with_conn(&state, move |conn| {
        let user = authenticate(conn, &payload.email, &payload.password)?;
        let token = create_session(conn, &user.id, ttl)?;
        record_event(conn, Some(&user.id), &user.id, &EventPayload::UserLoggedIn {});
        Ok(SessionResponse { token, user })
    })
    .await?;
    Ok(Json(response))
}

/// Handler for `POST /api/auth/logout`.
pub async fn logout_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
) -> Result<StatusCode, ApiError> {
    let token = ctx.session_token;
    with_conn(&state, move |conn| Ok(revoke_session(conn, &token)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `GET /api/me`.
pub async fn get_me_handler(Extension(ctx): Extension<UserContext>) -> Json<User> {
    Json(ctx.user)
}

/// Handler for `PATCH /api/me`.
pub async fn update_me_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Json(payload): Json<UpdateMeRequest>,
) -> Result<Json<User>, ApiError> {
    let user_id = ctx.user.id;
    let user = with_conn(&state, move |conn| {
        Ok(update_display_name(conn, &user_id, &payload.display_name)?)
    })
    .await?;
    Ok(Json(user))
}
