//! Background tasks for the CodeXAlpha server.
//!
//! Includes:
//! - Generating persona runs off the request path.
//! - Resuming generation interrupted by a restart.
//! - Resetting sections stuck in `generating`.
//! - Pruning expired sessions and old share link attempts.

use crate::notify::run_finished_email;
use crate::AppState;
use codex_generation::{
    list_codexes, recover_interrupted, runs_awaiting_generation, GenerationError, PersonaRun,
};
use codex_identity::{get_user, purge_expired_sessions};
use codex_sharing::prune_attempts;
use codex_types::GenerationStatus;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// Generates `run_id` on a separate task and emails the owner when it ends.
pub fn spawn_generation(state: Arc<AppState>, run_id: String) {
    tokio::spawn(async move {
        match state.generator.run(&run_id).await {
            Ok(run) => notify_run_finished(&state, run).await,
            Err(GenerationError::Busy(_)) => {
                tracing::debug!(run_id = %run_id, "run already generating");
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "generation failed");
            }
        }
    });
}

async fn notify_run_finished(state: &Arc<AppState>, run: PersonaRun) {
    if !state.mailer.is_enabled() {
        return;
    }

    let pool = state.pool.clone();
    let run_id = run.id.clone();
    let user_id = run.user_id.clone();
    let res = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let user = get_user(&conn, &user_id).map_err(|e| e.to_string())?;
        let codexes = list_codexes(&conn, &run_id).map_err(|e| e.to_string())?;
        Ok::<_, String>((user, codexes))
    })
    .await;

    let (user, codexes) = match res {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            tracing::error!(run_id = %run.id, "failed to load run for notification: {}", e);
            return;
        }
        Err(e) => {
            tracing::error!("notification task join error: {}", e);
            return;
        }
    };

    let completed: Vec<String> = codexes
        .iter()
        .filter(|c| c.status == GenerationStatus::Completed)
        .map(|c| c.title.clone())
        .collect();
    let failed = codexes.len() - completed.len();
    let branding = state.branding_snapshot();
    let run_url = format!("{}/runs/{}", state.public_url.trim_end_matches('/'), run.id);
    let message = run_finished_email(
        &branding.app_name,
        &user.email,
        &run.title,
        &completed,
        failed,
        &run_url,
    );

    if let Err(e) = state.mailer.send(&message).await {
        tracing::warn!(run_id = %run.id, error = %e, "failed to send run notification");
    }
}

/// Restarts generation for runs left unfinished by the previous process.
///
/// Nothing can be in flight at startup, so every `generating` row is reset
/// before the runs are picked up again.
pub async fn resume_generation(state: Arc<AppState>) {
    let pool = state.pool.clone();
    let res = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let mut run_ids = recover_interrupted(&conn, 0).map_err(|e| e.to_string())?;
        for id in runs_awaiting_generation(&conn).map_err(|e| e.to_string())? {
            if !run_ids.contains(&id) {
                run_ids.push(id);
            }
        }
        Ok::<_, String>(run_ids)
    })
    .await;

    match res {
        Ok(Ok(run_ids)) => {
            if !run_ids.is_empty() {
                tracing::info!(count = run_ids.len(), "resuming interrupted generation");
            }
            for run_id in run_ids {
                spawn_generation(state.clone(), run_id);
            }
        }
        Ok(Err(e)) => {
            tracing::error!("failed to resume generation: {}", e);
        }
        Err(e) => {
            tracing::error!("resume task join error: {}", e);
        }
    }
}

/// Starts the stale section recovery task.
///
/// Sections that stay `generating` longer than the policy's
/// `stale_after_seconds` are reset to `pending` and their runs generated
/// again, unless this process is still working on the run. The threshold is re-read from the policy on every pass.
pub async fn start_recovery_task(state: Arc<AppState>) {
    tracing::info!("starting stale generation recovery task");

    loop {
        let threshold_seconds = state.policy_snapshot().generation.stale_after_seconds;
        if threshold_seconds == 0 {
            tracing::warn!("stale generation recovery disabled (threshold=0)");
            return;
        }
        let interval_seconds = (threshold_seconds / 2).clamp(5, 60);
        sleep(Duration::from_secs(interval_seconds)).await;

        match state.generator.recover_stale(threshold_seconds).await {
            Ok(run_ids) => {
                for run_id in run_ids {
                    spawn_generation(state.clone(), run_id);
                }
            }
            Err(e) => {
                tracing::error!("failed to recover stale sections: {}", e);
            }
        }
    }
}

/// Starts the pruning task for expired sessions and old share link
/// password attempts.
pub async fn start_pruning_task(state: Arc<AppState>) {
    tracing::info!(
        interval_seconds = PRUNE_INTERVAL.as_secs(),
        "starting session and attempt pruning task"
    );

    loop {
        sleep(PRUNE_INTERVAL).await;

        let pool = state.pool.clone();
        let window = state.policy_snapshot().share.attempt_window_minutes;
        let res = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            let sessions = purge_expired_sessions(&conn).map_err(|e| e.to_string())?;
            let attempts = prune_attempts(&conn, window).map_err(|e| e.to_string())?;
            Ok::<_, String>((sessions, attempts))
        })
        .await;

        match res {
            Ok(Ok((sessions, attempts))) => {
                if sessions > 0 || attempts > 0 {
                    tracing::info!(sessions, attempts, "pruned expired sessions and attempts");
                }
            }
            Ok(Err(e)) => {
                tracing::error!("failed to prune sessions and attempts: {}", e);
            }
            Err(e) => {
                tracing::error!("pruning task join error: {}", e);
            }
        }
    }
}
