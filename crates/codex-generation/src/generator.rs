//! Generation orchestrator.
//!
//! [`Generator::run`] walks a run's codexes in position order. Within a
//! codex, unfinished sections are generated in batches of
//! `GenerationPolicy::batch_size`; the sections of one batch are awaited
//! together with `join_all`, batches and codexes are sequential.
//!
//! All SQLite access happens in `spawn_blocking`, one short-lived pooled
//! connection at a time. No connection is held across a provider call.

use crate::prompt::{build_prompt, PromptOptions};
use crate::runs::{
    get_codex, get_run, get_section, list_codexes, list_sections, Codex, CodexSection, PersonaRun,
    RunSource,
};
use crate::status::{refresh_codex_status, refresh_run_status};
use crate::templates::{get_template, Template};
use crate::GenerationError;
use codex_ai::CompletionProvider;
use codex_db::DbPool;
use codex_observe::{emit_event, EventPayload};
use codex_types::{AppPolicy, GenerationPolicy, GenerationStatus};
use futures_util::future::join_all;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Progress notifications, streamed to clients over SSE.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    RunStarted {
        run_id: String,
    },
    SectionStarted {
        run_id: String,
        codex_id: String,
        section_id: String,
    },
    SectionCompleted {
        run_id: String,
        codex_id: String,
        section_id: String,
        tokens_used: i64,
    },
    SectionFailed {
        run_id: String,
        codex_id: String,
        section_id: String,
        error: String,
    },
    CodexFinished {
        run_id: String,
        codex_id: String,
        status: GenerationStatus,
    },
    RunFinished {
        run_id: String,
        status: GenerationStatus,
        error: Option<String>,
    },
}

impl GenerationEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id }
            | Self::SectionStarted { run_id, .. }
            | Self::SectionCompleted { run_id, .. }
            | Self::SectionFailed { run_id, .. }
            | Self::CodexFinished { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }

    /// Whether this is the last event of a generation pass.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::RunFinished { .. })
    }
}

/// Everything a section needs that is shared across its codex.
struct CodexJob {
    run_id: String,
    user_id: String,
    codex_id: String,
    template: Template,
    source: RunSource,
}

/// Records an analytics event without letting analytics failures abort
/// generation.
fn record_event(conn: &Connection, user_id: &str, entity_id: &str, payload: EventPayload) {
    if let Err(e) = emit_event(conn, Some(user_id), entity_id, &payload) {
        tracing::warn!(event = payload.event_type(), error = %e, "failed to record usage event");
    }
}

/// Drives an AI provider over persona runs.
#[derive(Clone)]
pub struct Generator {
    pool: DbPool,
    provider: Arc<dyn CompletionProvider>,
    policy: Arc<RwLock<AppPolicy>>,
    options: PromptOptions,
    events: broadcast::Sender<GenerationEvent>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Marks a run as being worked on by this process until dropped.
struct InFlight {
    runs: Arc<Mutex<HashSet<String>>>,
    run_id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        match self.runs.lock() {
            Ok(mut runs) => runs.remove(&self.run_id),
            Err(poisoned) => poisoned.into_inner().remove(&self.run_id),
        };
    }
}

impl Generator {
    pub fn new(
        pool: DbPool,
        provider: Arc<dyn CompletionProvider>,
        policy: Arc<RwLock<AppPolicy>>,
        options: PromptOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            pool,
            provider,
            policy,
            options,
            events,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn track(&self, run_id: &str) -> InFlight {
        match self.in_flight.lock() {
            Ok(mut runs) => runs.insert(run_id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(run_id.to_string()),
        };
        InFlight {
            runs: self.in_flight.clone(),
            run_id: run_id.to_string(),
        }
    }

    /// Runs this generator is currently working on.
    pub fn active_runs(&self) -> HashSet<String> {
        match self.in_flight.lock() {
            Ok(runs) => runs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Periodic counterpart of [`recover_interrupted`]: stale sections of
    /// runs this generator is still working on are left alone, so a slow
    /// provider call never gets the same run generated twice.
    pub async fn recover_stale(
        &self,
        stale_after_seconds: u64,
    ) -> Result<Vec<String>, GenerationError> {
        let busy = self.active_runs();
        self.with_conn(move |conn| recover_sections(conn, stale_after_seconds, &busy))
            .await
    }

    /// Subscribes to progress events of every run.
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: GenerationEvent) {
        // No receivers is the normal case when nobody is watching.
        let _ = self.events.send(event);
    }

    fn generation_policy(&self) -> GenerationPolicy {
        match self.policy.read() {
            Ok(policy) => policy.generation.clone(),
            Err(poisoned) => poisoned.into_inner().generation.clone(),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, GenerationError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, GenerationError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| GenerationError::Task(e.to_string()))?
    }

    /// Generates every unfinished section of a run.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Busy`] if the run is already generating and
    /// [`GenerationError::NotFound`] if it does not exist. Provider failures
    /// are not errors: they end up as `error` sections and an `error` run.
    pub async fn run(&self, run_id: &str) -> Result<PersonaRun, GenerationError> {
        let policy = self.generation_policy();
        let id = run_id.to_string();
        let (run, codexes) = self
            .with_conn(move |conn| {
                let run = get_run(conn, &id)?;
                let claimed = conn.execute(
                    "UPDATE persona_runs SET
                        status = 'generating',
                        started_at = COALESCE(started_at, datetime('now')),
                        error = NULL,
                        completed_at = NULL
                     WHERE id = ?1 AND status != 'generating'",
                    [&id],
                )?;
                if claimed == 0 {
                    return Err(GenerationError::Busy(format!("run {}", id)));
                }
                conn.execute(
                    "UPDATE codexes SET status = 'generating', error = NULL, completed_at = NULL
                     WHERE run_id = ?1 AND status != 'completed'",
                    [&id],
                )?;
                Ok((run, list_codexes(conn, &id)?))
            })
            .await?;
        let _in_flight = self.track(&run.id);

        tracing::info!(
            run_id = %run.id,
            codexes = codexes.len(),
            provider = self.provider.name(),
            batch_size = policy.batch_size,
            "generation started"
        );
        self.emit(GenerationEvent::RunStarted {
            run_id: run.id.clone(),
        });

        for codex in codexes
            .iter()
            .filter(|c| c.status != GenerationStatus::Completed)
        {
            if let Err(e) = self.generate_codex(&run, codex, &policy).await {
                tracing::error!(run_id = %run.id, codex_id = %codex.id, error = %e, "generation aborted");
                if let Err(release_err) = self.release_run(&run.id).await {
                    tracing::error!(run_id = %run.id, error = %release_err, "failed to release run");
                }
                return Err(e);
            }
        }

        self.finish_run(&run.id).await
    }

    /// Re-derives every codex of an aborted run that is still marked
    /// generating, so the run can be retried.
    async fn release_run(&self, run_id: &str) -> Result<(), GenerationError> {
        let id = run_id.to_string();
        self.with_conn(move |conn| {
            for codex_id in collect_ids(
                conn,
                "SELECT id FROM codexes WHERE run_id = ?1 AND status = 'generating'",
                [&id],
            )? {
                refresh_codex_status(conn, &codex_id)?;
            }
            refresh_run_status(conn, &id)?;
            Ok(())
        })
        .await
    }

    /// Regenerates the failed sections of one codex.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Busy`] while the codex is generating.
    pub async fn retry_codex(&self, codex_id: &str) -> Result<Codex, GenerationError> {
        let policy = self.generation_policy();
        let id = codex_id.to_string();
        let (run, codex) = self
            .with_conn(move |conn| {
                let codex = get_codex(conn, &id)?;
                claim_codex(conn, &id)?;
                conn.execute(
                    "UPDATE codex_sections SET
                        status = 'pending', attempts = 0, error = NULL, updated_at = datetime('now')
                     WHERE codex_id = ?1 AND status = 'error'",
                    [&id],
                )?;
                refresh_run_status(conn, &codex.run_id)?;
                Ok((get_run(conn, &codex.run_id)?, codex))
            })
            .await?;

        let _in_flight = self.track(&run.id);
        tracing::info!(codex_id = %codex.id, run_id = %run.id, "retrying codex");
        self.generate_codex(&run, &codex, &policy).await?;
        self.finish_run(&run.id).await?;

        let id = codex.id.clone();
        self.with_conn(move |conn| get_codex(conn, &id)).await
    }

    /// Regenerates one section regardless of its current status.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Busy`] while the section's codex is
    /// generating.
    pub async fn regenerate_section(&self, section_id: &str) -> Result<CodexSection, GenerationError> {
        let policy = self.generation_policy();
        let id = section_id.to_string();
        let (run, codex, template, section) = self
            .with_conn(move |conn| {
                let section = get_section(conn, &id)?;
                let codex = get_codex(conn, &section.codex_id)?;
                claim_codex(conn, &codex.id)?;
                conn.execute(
                    "UPDATE codex_sections SET
                        status = 'pending', attempts = 0, error = NULL, updated_at = datetime('now')
                     WHERE id = ?1",
                    [&id],
                )?;
                refresh_run_status(conn, &codex.run_id)?;
                let run = get_run(conn, &codex.run_id)?;
                let template = get_template(conn, codex.template_id)?;
                Ok((run, codex, template, section))
            })
            .await?;

        let _in_flight = self.track(&run.id);
        tracing::info!(section_id = %section.id, codex_id = %codex.id, "regenerating section");
        let job = CodexJob {
            run_id: run.id.clone(),
            user_id: run.user_id.clone(),
            codex_id: codex.id.clone(),
            template,
            source: run.source.clone(),
        };
        let outcome = self.generate_section(&job, &section, &policy).await;
        self.settle_codex(&job).await?;
        self.finish_run(&run.id).await?;
        outcome?;

        let id = section.id.clone();
        self.with_conn(move |conn| get_section(conn, &id)).await
    }

    async fn generate_codex(
        &self,
        run: &PersonaRun,
        codex: &Codex,
        policy: &GenerationPolicy,
    ) -> Result<GenerationStatus, GenerationError> {
        let codex_id = codex.id.clone();
        let template_id = codex.template_id;
        let (template, sections) = self
            .with_conn(move |conn| {
                let template = get_template(conn, template_id)?;
                let sections: Vec<CodexSection> = list_sections(conn, &codex_id)?
                    .into_iter()
                    .filter(|s| s.status != GenerationStatus::Completed)
                    .collect();
                Ok((template, sections))
            })
            .await?;

        let job = CodexJob {
            run_id: run.id.clone(),
            user_id: run.user_id.clone(),
            codex_id: codex.id.clone(),
            template,
            source: run.source.clone(),
        };

        tracing::debug!(
            codex_id = %job.codex_id,
            template = %job.template.slug,
            sections = sections.len(),
            "generating codex"
        );

        let mut failure = None;
        for batch in sections.chunks(policy.batch_size.max(1)) {
            let results = join_all(
                batch
                    .iter()
                    .map(|section| self.generate_section(&job, section, policy)),
            )
            .await;
            if let Some(err) = results.into_iter().find_map(Result::err) {
                failure = Some(err);
                break;
            }
        }

        let status = self.settle_codex(&job).await?;
        match failure {
            Some(err) => Err(err),
            None => Ok(status),
        }
    }

    /// Generates one section with retries. Returns whether it completed.
    async fn generate_section(
        &self,
        job: &CodexJob,
        section: &CodexSection,
        policy: &GenerationPolicy,
    ) -> Result<bool, GenerationError> {
        let id = section.id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE codex_sections SET status = 'generating', error = NULL, updated_at = datetime('now')
                 WHERE id = ?1",
                [&id],
            )?;
            Ok(())
        })
        .await?;
        self.emit(GenerationEvent::SectionStarted {
            run_id: job.run_id.clone(),
            codex_id: job.codex_id.clone(),
            section_id: section.id.clone(),
        });

        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = 0u32;
        let mut last_error = String::new();

        while attempts < max_attempts {
            attempts += 1;
            let request = build_prompt(&job.template, &job.source, section, &self.options);
            match self.provider.complete(request).await {
                Ok(completion) => {
                    let tokens = i64::from(completion.total_tokens());
                    let id = section.id.clone();
                    let text = completion.text;
                    self.with_conn(move |conn| {
                        conn.execute(
                            "UPDATE codex_sections SET
                                status = 'completed',
                                content = ?2,
                                tokens_used = ?3,
                                attempts = attempts + 1,
                                error = NULL,
                                updated_at = datetime('now')
                             WHERE id = ?1",
                            params![id, text, tokens],
                        )?;
                        Ok(())
                    })
                    .await?;

                    tracing::debug!(section_id = %section.id, attempts, tokens, "section completed");
                    self.emit(GenerationEvent::SectionCompleted {
                        run_id: job.run_id.clone(),
                        codex_id: job.codex_id.clone(),
                        section_id: section.id.clone(),
                        tokens_used: tokens,
                    });
                    return Ok(true);
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    last_error = e.to_string();
                    tracing::warn!(
                        section_id = %section.id,
                        attempt = attempts,
                        retryable,
                        error = %e,
                        "section attempt failed"
                    );

                    let id = section.id.clone();
                    self.with_conn(move |conn| {
                        conn.execute(
                            "UPDATE codex_sections SET attempts = attempts + 1, updated_at = datetime('now')
                             WHERE id = ?1",
                            [&id],
                        )?;
                        Ok(())
                    })
                    .await?;

                    if !retryable {
                        break;
                    }
                    if attempts < max_attempts {
                        let backoff = policy.retry_backoff_ms.saturating_mul(u64::from(attempts));
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        let id = section.id.clone();
        let codex_id = job.codex_id.clone();
        let user_id = job.user_id.clone();
        let error = last_error.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE codex_sections SET status = 'error', error = ?2, updated_at = datetime('now')
                 WHERE id = ?1",
                params![id, error],
            )?;
            record_event(
                conn,
                &user_id,
                &id,
                EventPayload::SectionFailed {
                    section_id: id.clone(),
                    codex_id,
                    attempts,
                    error,
                },
            );
            Ok(())
        })
        .await?;

        tracing::error!(section_id = %section.id, attempts, error = %last_error, "section failed");
        self.emit(GenerationEvent::SectionFailed {
            run_id: job.run_id.clone(),
            codex_id: job.codex_id.clone(),
            section_id: section.id.clone(),
            error: last_error,
        });
        Ok(false)
    }

    /// Re-derives codex and run status after a codex pass.
    async fn settle_codex(&self, job: &CodexJob) -> Result<GenerationStatus, GenerationError> {
        let codex_id = job.codex_id.clone();
        let run_id = job.run_id.clone();
        let user_id = job.user_id.clone();
        let status = self
            .with_conn(move |conn| {
                let status = refresh_codex_status(conn, &codex_id)?;
                match status {
                    GenerationStatus::Completed => {
                        let tokens_used: i64 = conn.query_row(
                            "SELECT COALESCE(SUM(tokens_used), 0) FROM codex_sections WHERE codex_id = ?1",
                            [&codex_id],
                            |row| row.get(0),
                        )?;
                        record_event(
                            conn,
                            &user_id,
                            &codex_id,
                            EventPayload::CodexCompleted {
                                codex_id: codex_id.clone(),
                                run_id: run_id.clone(),
                                tokens_used,
                            },
                        );
                    }
                    GenerationStatus::Error => {
                        let failed: u32 = conn.query_row(
                            "SELECT COUNT(*) FROM codex_sections WHERE codex_id = ?1 AND status = 'error'",
                            [&codex_id],
                            |row| row.get(0),
                        )?;
                        record_event(
                            conn,
                            &user_id,
                            &codex_id,
                            EventPayload::CodexFailed {
                                codex_id: codex_id.clone(),
                                run_id: run_id.clone(),
                                failed_sections: failed,
                            },
                        );
                    }
                    _ => {}
                }
                refresh_run_status(conn, &run_id)?;
                Ok(status)
            })
            .await?;

        tracing::info!(codex_id = %job.codex_id, status = %status, "codex finished");
        self.emit(GenerationEvent::CodexFinished {
            run_id: job.run_id.clone(),
            codex_id: job.codex_id.clone(),
            status,
        });
        Ok(status)
    }

    async fn finish_run(&self, run_id: &str) -> Result<PersonaRun, GenerationError> {
        let id = run_id.to_string();
        let run = self
            .with_conn(move |conn| {
                refresh_run_status(conn, &id)?;
                get_run(conn, &id)
            })
            .await?;

        tracing::info!(run_id = %run.id, status = %run.status, error = ?run.error, "generation finished");
        self.emit(GenerationEvent::RunFinished {
            run_id: run.id.clone(),
            status: run.status,
            error: run.error.clone(),
        });
        Ok(run)
    }
}

/// Marks a codex as generating unless it already is.
fn claim_codex(conn: &Connection, codex_id: &str) -> Result<(), GenerationError> {
    let claimed = conn.execute(
        "UPDATE codexes SET status = 'generating', error = NULL, completed_at = NULL
         WHERE id = ?1 AND status != 'generating'",
        [codex_id],
    )?;
    if claimed == 0 {
        return Err(GenerationError::Busy(format!("codex {}", codex_id)));
    }
    Ok(())
}

fn collect_ids<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<String>, GenerationError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Resets sections stuck in `generating` for longer than
/// `stale_after_seconds` back to `pending` and re-derives their codexes and
/// runs.
///
/// With a threshold of zero (used at startup, when nothing can be in
/// flight) every generating section, codex and run is reset. Returns the IDs
/// of affected runs that have pending sections left to generate.
pub fn recover_interrupted(
    conn: &Connection,
    stale_after_seconds: u64,
) -> Result<Vec<String>, GenerationError> {
    recover_sections(conn, stale_after_seconds, &HashSet::new())
}

fn recover_sections(
    conn: &Connection,
    stale_after_seconds: u64,
    busy_runs: &HashSet<String>,
) -> Result<Vec<String>, GenerationError> {
    let threshold = format!("-{} seconds", stale_after_seconds);

    let stale: Vec<(String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT s.id, s.codex_id, c.run_id FROM codex_sections s
             JOIN codexes c ON c.id = s.codex_id
             WHERE s.status = 'generating' AND s.updated_at <= datetime('now', ?1)",
        )?;
        let rows = stmt.query_map([&threshold], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut stale = Vec::new();
        for row in rows {
            let (section_id, codex_id, run_id) = row?;
            if !busy_runs.contains(&run_id) {
                stale.push((section_id, codex_id));
            }
        }
        stale
    };

    let mut codex_ids: Vec<String> = Vec::new();
    let mut reset = 0;
    for (section_id, codex_id) in stale {
        reset += conn.execute(
            "UPDATE codex_sections SET status = 'pending', error = NULL, updated_at = datetime('now')
             WHERE id = ?1 AND status = 'generating'",
            [&section_id],
        )?;
        if !codex_ids.contains(&codex_id) {
            codex_ids.push(codex_id);
        }
    }
    if stale_after_seconds == 0 {
        for id in collect_ids(
            conn,
            "SELECT id FROM codexes WHERE status = 'generating'",
            [],
        )? {
            if !codex_ids.contains(&id) {
                codex_ids.push(id);
            }
        }
    }

    let mut run_ids: Vec<String> = Vec::new();
    for codex_id in &codex_ids {
        let codex = get_codex(conn, codex_id)?;
        refresh_codex_status(conn, codex_id)?;
        if !run_ids.contains(&codex.run_id) {
            run_ids.push(codex.run_id);
        }
    }
    if stale_after_seconds == 0 {
        for id in collect_ids(
            conn,
            "SELECT id FROM persona_runs WHERE status = 'generating'",
            [],
        )? {
            if !run_ids.contains(&id) {
                run_ids.push(id);
            }
        }
    }

    let mut needs_work = Vec::new();
    for run_id in run_ids {
        if busy_runs.contains(&run_id) {
            continue;
        }
        refresh_run_status(conn, &run_id)?;
        let pending: i64 = conn.query_row(
            "SELECT COUNT(*) FROM codex_sections s JOIN codexes c ON c.id = s.codex_id
             WHERE c.run_id = ?1 AND s.status = 'pending'",
            [&run_id],
            |row| row.get(0),
        )?;
        if pending > 0 {
            needs_work.push(run_id);
        }
    }

    if reset > 0 || !needs_work.is_empty() {
        tracing::info!(
            sections_reset = reset,
            runs = needs_work.len(),
            stale_after_seconds,
            "recovered interrupted generation"
        );
    }
    Ok(needs_work)
}

/// Runs that were created but never started.
pub fn runs_awaiting_generation(conn: &Connection) -> Result<Vec<String>, GenerationError> {
    collect_ids(
        conn,
        "SELECT id FROM persona_runs WHERE status = 'pending' ORDER BY created_at ASC",
        [],
    )
}
