//! Share links: owner management and the public shared view.

use crate::api::{with_conn, ApiError};
use crate::api_runs::owned_codex;
use crate::middleware::UserContext;
use crate::notify::share_link_email;
use crate::AppState;
use axum::{
    extract::{ConnectInfo, Extension, Json, Path},
    http::{HeaderMap, StatusCode},
};
use codex_generation::{get_codex, list_sections, Codex, CodexSection};
use codex_identity::normalize_email;
use codex_sharing::{
    create_share_link, get_link, issue_access_grant, list_links_for_codex, record_view,
    resolve_token, revoke_link, verify_access_grant, verify_link_password, AccessGrant,
    NewShareLink, ShareLink,
};
use codex_types::{Branding, GenerationStatus};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Header carrying the grant returned by the unlock endpoint.
pub const SHARE_ACCESS_HEADER: &str = "x-share-access";

#[derive(Debug, Default, Deserialize)]
pub struct CreateShareLinkRequest {
    pub password: Option<String>,
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreatedShareLink {
    pub link: ShareLink,
    /// Shown once; only its hash is stored.
    pub token: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ShareEmailRequest {
    pub to: String,
    /// The link's token, needed to build the URL since only its hash is stored.
    pub token: String,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SharedSection {
    pub title: String,
    pub content: String,
}

/// What an anonymous visitor sees.
#[derive(Debug, Serialize)]
pub struct SharedCodexView {
    pub title: String,
    pub completed_at: Option<String>,
    pub expires_at: Option<String>,
    pub password_protected: bool,
    pub sections: Vec<SharedSection>,
    pub branding: Branding,
}

pub(crate) fn share_url(public_url: &str, token: &str) -> String {
    format!("{}/share/{}", public_url.trim_end_matches('/'), token)
}

fn owned_link(conn: &Connection, ctx: &UserContext, link_id: &str) -> Result<ShareLink, ApiError> {
    let link = get_link(conn, link_id)?;
    owned_codex(conn, &ctx.user, &link.codex_id)?;
    Ok(link)
}

/// Handler for `POST /api/codexes/{id}/share-links`.
pub async fn create_share_link_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(codex_id): Path<String>,
    Json(payload): Json<CreateShareLinkRequest>,
) -> Result<(StatusCode, Json<CreatedShareLink>), ApiError> {
    let share_policy = state.policy_snapshot().share;
    let public_url = state.public_url.clone();

    let created = with_conn(&state, move |conn| {
        owned_codex(conn, &ctx.user, &codex_id)?;
        let (link, token) = create_share_link(
            conn,
            &NewShareLink {
                codex_id,
                created_by: ctx.user.id.clone(),
                password: payload.password,
                expires_in_days: payload.expires_in_days,
            },
            &share_policy,
        )?;
        Ok(CreatedShareLink {
            url: share_url(&public_url, &token),
            link,
            token,
        })
    })
    .await?;

    tracing::info!(
        share_link_id = %created.link.id,
        codex_id = %created.link.codex_id,
        password_protected = created.link.password_protected,
        "share link created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// Handler for `GET /api/codexes/{id}/share-links`.
pub async fn list_share_links_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(codex_id): Path<String>,
) -> Result<Json<Vec<ShareLink>>, ApiError> {
    let links = with_conn(&state, move |conn| {
        owned_codex(conn, &ctx.user, &codex_id)?;
        Ok(list_links_for_codex(conn, &codex_id)?)
    })
    .await?;
    Ok(Json(links))
}

/// Handler for `DELETE /api/share-links/{id}`. Revokes the link.
pub async fn revoke_share_link_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(link_id): Path<String>,
) -> Result<Json<ShareLink>, ApiError> {
    let link = with_conn(&state, move |conn| {
        owned_link(conn, &ctx, &link_id)?;
        Ok(revoke_link(conn, &link_id)?)
    })
    .await?;
    tracing::info!(share_link_id = %link.id, "share link revoked");
    Ok(Json(link))
}

/// Handler for `POST /api/share-links/{id}/email`.
pub async fn email_share_link_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(link_id): Path<String>,
    Json(payload): Json<ShareEmailRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let to = normalize_email(&payload.to)?;
    let token = payload.token;
    let sender = ctx.user.display_name.clone();

    let lookup_token = token.clone();
    let codex_title = with_conn(&state, move |conn| {
        let link = owned_link(conn, &ctx, &link_id)?;
        let by_token = resolve_token(conn, &lookup_token)?;
        if by_token.id != link.id {
            return Err(ApiError::BadRequest(
                "token does not belong to this share link".to_string(),
            ));
        }
        Ok(get_codex(conn, &link.codex_id)?.title)
    })
    .await?;

    let branding = state.branding_snapshot();
    let message = share_link_email(
        &branding.app_name,
        &to,
        &sender,
        &codex_title,
        &share_url(&state.public_url, &token),
        payload.message.as_deref(),
    );
    let sent = state
        .mailer
        .send(&message)
        .await
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;

    Ok(Json(serde_json::json!({ "sent": sent })))
}

fn access_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SHARE_ACCESS_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Resolves a public token and enforces the password grant.
///
/// Returns the link, its codex, and the codex's completed sections.
pub(crate) fn open_shared_codex(
    conn: &Connection,
    token: &str,
    grant: Option<&str>,
    secret: &[u8],
) -> Result<(ShareLink, Codex, Vec<CodexSection>), ApiError> {
    let link = resolve_token(conn, token)?;
    if link.password_protected {
        let grant = grant.ok_or(ApiError::PasswordRequired)?;
        verify_access_grant(secret, grant, &link.id, chrono::Utc::now().timestamp())?;
    }
    let codex = get_codex(conn, &link.codex_id)?;
    let sections = list_sections(conn, &codex.id)?
        .into_iter()
        .filter(|s| s.status == GenerationStatus::Completed)
        .collect();
    Ok((link, codex, sections))
}

/// Handler for `GET /api/shared/{token}`.
pub async fn get_shared_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SharedCodexView>, ApiError> {
    let grant = access_header(&headers);
    let secret = state.share_secret.clone();

    let (link, codex, sections) = with_conn(&state, move |conn| {
        let opened = open_shared_codex(conn, &token, grant.as_deref(), &secret)?;
        record_view(conn, &opened.0)?;
        Ok(opened)
    })
    .await?;

    Ok(Json(SharedCodexView {
        title: codex.title,
        completed_at: codex.completed_at,
        expires_at: link.expires_at,
        password_protected: link.password_protected,
        sections: sections
            .into_iter()
            .map(|s| SharedSection {
                title: s.title,
                content: s.content.unwrap_or_default(),
            })
            .collect(),
        branding: state.branding_snapshot(),
    }))
}

/// Handler for `POST /api/shared/{token}/unlock`.
///
/// Exchanges the link password for a short-lived access grant.
pub async fn unlock_shared_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(token): Path<String>,
    Json(payload): Json<UnlockRequest>,
) -> Result<Json<AccessGrant>, ApiError> {
    let share_policy = state.policy_snapshot().share;
    let secret = state.share_secret.clone();
    let client_key = addr.ip().to_string();

    let grant = with_conn(&state, move |conn| {
        let link = resolve_token(conn, &token)?;
        verify_link_password(conn, &link, &payload.password, &client_key, &share_policy)?;
        Ok(issue_access_grant(
            &secret,
            &link.id,
            u64::from(share_policy.access_ttl_minutes),
            chrono::Utc::now().timestamp(),
        )?)
    })
    .await?;
    Ok(Json(grant))
}
