//! Codex viewing and regeneration.

use crate::api::{with_conn, ApiError};
use crate::api_runs::owned_codex;
use crate::middleware::UserContext;
use crate::AppState;
use axum::extract::{Extension, Json, Path};
use codex_generation::{get_section, list_sections, Codex, CodexSection};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct CodexDetail {
    pub codex: Codex,
    pub run_title: String,
    pub sections: Vec<CodexSection>,
}

/// Handler for `GET /api/codexes/{id}`.
pub async fn get_codex_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(codex_id): Path<String>,
) -> Result<Json<CodexDetail>, ApiError> {
    let detail = with_conn(&state, move |conn| {
        let (codex, run) = owned_codex(conn, &ctx.user, &codex_id)?;
        let sections = list_sections(conn, &codex.id)?;
        Ok(CodexDetail {
            codex,
            run_title: run.title,
            sections,
        })
    })
    .await?;
    Ok(Json(detail))
}

/// Handler for `POST /api/codexes/{id}/retry`.
///
/// Regenerates the failed sections of a codex and waits for the result.
pub async fn retry_codex_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(codex_id): Path<String>,
) -> Result<Json<Codex>, ApiError> {
    let lookup_id = codex_id.clone();
    with_conn(&state, move |conn| owned_codex(conn, &ctx.user, &lookup_id)).await?;

    let codex = state.generator.retry_codex(&codex_id).await?;
    tracing::info!(codex_id = %codex.id, status = %codex.status, "codex retried");
    Ok(Json(codex))
}

/// Handler for `POST /api/sections/{id}/regenerate`.
pub async fn regenerate_section_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(section_id): Path<String>,
) -> Result<Json<CodexSection>, ApiError> {
    let lookup_id = section_id.clone();
    with_conn(&state, move |conn| {
        let section = get_section(conn, &lookup_id)?;
        owned_codex(conn, &ctx.user, &section.codex_id)?;
        Ok(())
    })
    .await?;

    let section = state.generator.regenerate_section(&section_id).await?;
    Ok(Json(section))
}
