//! Persona runs: creation, listing, deletion and the live progress stream.

use crate::api::{with_conn, ApiError};
use crate::background::spawn_generation;
use crate::middleware::UserContext;
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
};
use codex_generation::{
    create_run, delete_run, get_codex, get_run, list_codexes, list_runs, list_sections,
    list_templates, Codex, GenerationEvent, NewRun, PersonaRun, RunFilter, Template,
};
use codex_identity::User;
use codex_types::GenerationStatus;
use futures_util::future::ready;
use futures_util::stream::{self, BoxStream, StreamExt};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;

/// Loads a run visible to `user`. Other users' runs look missing.
pub(crate) fn owned_run(conn: &Connection, user: &User, run_id: &str) -> Result<PersonaRun, ApiError> {
    let run = get_run(conn, run_id)?;
    if run.user_id != user.id && !user.is_admin() {
        return Err(ApiError::NotFound(format!("run {}", run_id)));
    }
    Ok(run)
}

/// Loads a codex visible to `user`, with its run.
pub(crate) fn owned_codex(
    conn: &Connection,
    user: &User,
    codex_id: &str,
) -> Result<(Codex, PersonaRun), ApiError> {
    let codex = get_codex(conn, codex_id)?;
    let run = get_run(conn, &codex.run_id)?;
    if run.user_id != user.id && !user.is_admin() {
        return Err(ApiError::NotFound(format!("codex {}", codex_id)));
    }
    Ok((codex, run))
}

#[derive(Debug, Serialize)]
pub struct CodexProgress {
    #[serde(flatten)]
    pub codex: Codex,
    pub total_sections: usize,
    pub completed_sections: usize,
}

#[derive(Debug, Serialize)]
pub struct RunDetail {
    pub run: PersonaRun,
    pub codexes: Vec<CodexProgress>,
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub status: Option<GenerationStatus>,
    pub limit: Option<i64>,
}

/// Handler for `GET /api/templates`. Lists active templates.
pub async fn list_templates_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Template>>, ApiError> {
    let templates = with_conn(&state, |conn| Ok(list_templates(conn, true)?)).await?;
    Ok(Json(templates))
}

/// Handler for `POST /api/runs`.
///
/// Stores the run and starts generating it in the background.
pub async fn create_run_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Json(payload): Json<NewRun>,
) -> Result<(StatusCode, Json<PersonaRun>), ApiError> {
    let user_id = ctx.user.id.clone();
    let run = with_conn(&state, move |conn| Ok(create_run(conn, &user_id, &payload)?)).await?;

    tracing::info!(run_id = %run.id, user_id = %ctx.user.id, source = run.source.kind(), "persona run created");
    spawn_generation(state.clone(), run.id.clone());

    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// Handler for `GET /api/runs`. Lists the caller's runs, newest first.
pub async fn list_runs_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Vec<PersonaRun>>, ApiError> {
    let filter = RunFilter {
        user_id: Some(ctx.user.id),
        status: query.status,
        limit: query.limit.map(|l| l.clamp(1, 200)),
    };
    let runs = with_conn(&state, move |conn| Ok(list_runs(conn, &filter)?)).await?;
    Ok(Json(runs))
}

fn run_detail(conn: &Connection, run: PersonaRun) -> Result<RunDetail, ApiError> {
    let mut codexes = Vec::new();
    for codex in list_codexes(conn, &run.id)? {
        let sections = list_sections(conn, &codex.id)?;
        codexes.push(CodexProgress {
            total_sections: sections.len(),
            completed_sections: sections
                .iter()
                .filter(|s| s.status == GenerationStatus::Completed)
                .count(),
            codex,
        });
    }
    Ok(RunDetail { run, codexes })
}

/// Handler for `GET /api/runs/{id}`.
pub async fn get_run_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(run_id): Path<String>,
) -> Result<Json<RunDetail>, ApiError> {
    let detail = with_conn(&state, move |conn| {
        let run = owned_run(conn, &ctx.user, &run_id)?;
        run_detail(conn, run)
    })
    .await?;
    Ok(Json(detail))
}

/// Handler for `DELETE /api/runs/{id}`.
pub async fn delete_run_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(run_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    with_conn(&state, move |conn| {
        owned_run(conn, &ctx.user, &run_id)?;
        delete_run(conn, &run_id)?;
        tracing::info!(run_id = %run_id, user_id = %ctx.user.id, "persona run deleted");
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn sse_event(kind: &str, data: &impl Serialize) -> Option<Result<Event, Infallible>> {
    match serde_json::to_string(data) {
        Ok(json) => Some(Ok(Event::default().event(kind).data(json))),
        Err(e) => {
            tracing::error!("failed to serialize generation event: {}", e);
            None
        }
    }
}

fn event_kind(event: &GenerationEvent) -> &'static str {
    match event {
        GenerationEvent::RunStarted { .. } => "run_started",
        GenerationEvent::SectionStarted { .. } => "section_started",
        GenerationEvent::SectionCompleted { .. } => "section_completed",
        GenerationEvent::SectionFailed { .. } => "section_failed",
        GenerationEvent::CodexFinished { .. } => "codex_finished",
        GenerationEvent::RunFinished { .. } => "run_finished",
    }
}

/// Event stream returned by [`run_events_handler`].
pub type RunEventStream = Sse<KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>>;

/// Handler for `GET /api/runs/{id}/events`.
///
/// Sends a `snapshot` of the run first. Runs that are not generating end the
/// stream right after it; otherwise progress events follow and the stream
/// closes once `run_finished` has been sent.
pub async fn run_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<UserContext>,
    Path(run_id): Path<String>,
) -> Result<RunEventStream, ApiError> {
    // Subscribe before reading the snapshot so no event falls in between.
    let rx = state.generator.subscribe();
    let lookup_id = run_id.clone();
    let detail = with_conn(&state, move |conn| {
        let run = owned_run(conn, &ctx.user, &lookup_id)?;
        run_detail(conn, run)
    })
    .await?;

    let live = detail.run.status == GenerationStatus::Generating
        || detail.run.status == GenerationStatus::Pending;
    let snapshot = stream::iter(sse_event("snapshot", &detail));

    if !live {
        return Ok(Sse::new(snapshot.boxed()).keep_alive(KeepAlive::default()));
    }

    let run_events = BroadcastStream::new(rx)
        .filter_map(move |result| {
            ready(match result {
                Ok(event) if event.run_id() == run_id => Some(event),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "generation SSE stream lagged; events were dropped for this subscriber"
                    );
                    None
                }
            })
        })
        .boxed();

    // Ends right after the final event instead of waiting for another one.
    let updates = stream::unfold((run_events, false), |(mut events, done)| async move {
        if done {
            return None;
        }
        let event = events.next().await?;
        let finished = event.is_final();
        Some((event, (events, finished)))
    })
    .filter_map(|event| ready(sse_event(event_kind(&event), &event)));

    Ok(Sse::new(snapshot.chain(updates).boxed()).keep_alive(KeepAlive::default()))
}
