//! PDF downloads for owners and share link visitors.

use crate::api::{record_event, with_conn, ApiError};
use crate::api_runs::owned_codex;
use crate::api_share::{open_shared_codex, SHARE_ACCESS_HEADER};
use crate::middleware::UserContext;
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use codex_export::{export_filename, render_pdf, ExportDocument, ExportSection};
use codex_generation::{list_sections, Codex, CodexSection};
use codex_observe::EventPayload;
use codex_types::{Branding, GenerationStatus};
use std::sync::Arc;

fn export_document(
    branding: &Branding,
    codex: &Codex,
    run_title: Option<String>,
    sections: Vec<CodexSection>,
) -> ExportDocument {
    ExportDocument {
        brand_name: branding.app_name.clone(),
        title: codex.title.clone(),
        subtitle: run_title,
        sections: sections
            .into_iter()
            .filter(|s| s.status == GenerationStatus::Completed)
            .map(|s| ExportSection {
                title: s.title,
                body: s.content.unwrap_or_default(),
            })
            .collect(),
        footer: branding
            .footer_text
            .clone()
            .or_else(|| branding.support_email.clone()),
    }
}

fn ensure_exportable(codex: &Codex) -> Result<(), ApiError> {
    if codex.status != GenerationStatus::Completed {
        return Err(ApiError::Conflict(format!(
            "codex {} is {}, only completed codexes can be exported",
            codex.id, codex.status
        )));
    }
    Ok(())
}

async fn pdf_response(doc: ExportDocument) -> Result<Response, ApiError> {
    let filename = export_filename(&doc.title);
    let bytes = tokio::task::spawn_blocking(move || render_pdf(&doc))
        .await
        .map_err(|e| ApiError::InternalServerError(format!("pdf task failed: {}", e)))??;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Handler for `GET /api/codexes/{id}/pdf`.
pub async fn export_codex_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(codex_id): Path<String>,
) -> Result<Response, ApiError> {
    let branding = state.branding_snapshot();
    let doc = with_conn(&state, move |conn| {
        let (codex, run) = owned_codex(conn, &ctx.user, &codex_id)?;
        ensure_exportable(&codex)?;
        let sections = list_sections(conn, &codex.id)?;
        record_event(
            conn,
            Some(&ctx.user.id),
            &codex.id,
            &EventPayload::PdfExported {
                codex_id: codex.id.clone(),
                via_share_link: false,
            },
        );
        Ok(export_document(&branding, &codex, Some(run.title), sections))
    })
    .await?;

    pdf_response(doc).await
}

/// Handler for `GET /api/shared/{token}/pdf`.
///
/// Password-protected links need the same access grant as the shared view.
pub async fn export_shared_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let grant = headers
        .get(SHARE_ACCESS_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let secret = state.share_secret.clone();
    let branding = state.branding_snapshot();

    let doc = with_conn(&state, move |conn| {
        let (_link, codex, sections) = open_shared_codex(conn, &token, grant.as_deref(), &secret)?;
        ensure_exportable(&codex)?;
        record_event(
            conn,
            None,
            &codex.id,
            &EventPayload::PdfExported {
                codex_id: codex.id.clone(),
                via_share_link: true,
            },
        );
        Ok(export_document(&branding, &codex, None, sections))
    })
    .await?;

    pdf_response(doc).await
}
