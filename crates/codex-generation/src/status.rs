//! Status derivation.
//!
//! Section status is written by the generator; codex and run status are
//! always recomputed from their children so the three levels never drift.

use crate::{parse_status, GenerationError};
use codex_types::GenerationStatus;
use rusqlite::{params, Connection};

fn derive(statuses: &[GenerationStatus]) -> GenerationStatus {
    if statuses.iter().all(|s| *s == GenerationStatus::Completed) {
        GenerationStatus::Completed
    } else if statuses.contains(&GenerationStatus::Generating) {
        GenerationStatus::Generating
    } else if statuses.contains(&GenerationStatus::Error) {
        GenerationStatus::Error
    } else {
        GenerationStatus::Pending
    }
}

/// Codex status from its section statuses.
///
/// All completed → completed; any generating → generating; any error →
/// error; otherwise pending. A codex without sections counts as completed.
pub fn derive_codex_status(sections: &[GenerationStatus]) -> GenerationStatus {
    derive(sections)
}

/// Run status from its codex statuses, using the same rule as
/// [`derive_codex_status`].
pub fn derive_run_status(codexes: &[GenerationStatus]) -> GenerationStatus {
    derive(codexes)
}

fn child_statuses(conn: &Connection, sql: &str, parent_id: &str) -> Result<Vec<GenerationStatus>, GenerationError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([parent_id], |row| parse_status(0, row.get(0)?))?;
    let mut statuses = Vec::new();
    for row in rows {
        statuses.push(row?);
    }
    Ok(statuses)
}

/// Recomputes and stores a codex's status from its sections.
pub fn refresh_codex_status(conn: &Connection, codex_id: &str) -> Result<GenerationStatus, GenerationError> {
    let statuses = child_statuses(
        conn,
        "SELECT status FROM codex_sections WHERE codex_id = ?1",
        codex_id,
    )?;
    let status = derive_codex_status(&statuses);
    let failed = statuses.iter().filter(|s| **s == GenerationStatus::Error).count();
    let error = (status == GenerationStatus::Error)
        .then(|| format!("{} of {} sections failed", failed, statuses.len()));

    conn.execute(
        "UPDATE codexes SET
            status = ?2,
            error = ?3,
            completed_at = CASE WHEN ?2 = 'completed'
                THEN COALESCE(completed_at, datetime('now')) ELSE NULL END
         WHERE id = ?1",
        params![codex_id, status.as_str(), error],
    )?;
    Ok(status)
}

/// Recomputes and stores a run's status from its codexes.
///
/// A run that fails ends with an error of the form `"<n> of <m> codexes
/// failed"`. `completed_at` is set once the run reaches a terminal status.
pub fn refresh_run_status(conn: &Connection, run_id: &str) -> Result<GenerationStatus, GenerationError> {
    let statuses = child_statuses(conn, "SELECT status FROM codexes WHERE run_id = ?1", run_id)?;
    let status = derive_run_status(&statuses);
    let failed = statuses.iter().filter(|s| **s == GenerationStatus::Error).count();
    let error = (status == GenerationStatus::Error)
        .then(|| format!("{} of {} codexes failed", failed, statuses.len()));

    conn.execute(
        "UPDATE persona_runs SET
            status = ?2,
            error = ?3,
            completed_at = CASE WHEN ?2 IN ('completed', 'error')
                THEN datetime('now') ELSE NULL END
         WHERE id = ?1",
        params![run_id, status.as_str(), error],
    )?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use GenerationStatus::*;

    #[test]
    fn all_completed_is_completed() {
        assert_eq!(derive_codex_status(&[Completed, Completed]), Completed);
        assert_eq!(derive_codex_status(&[]), Completed);
    }

    #[test]
    fn generating_wins_over_error() {
        assert_eq!(derive_codex_status(&[Error, Generating, Completed]), Generating);
    }

    #[test]
    fn error_without_generating_is_error() {
        assert_eq!(derive_codex_status(&[Completed, Error, Pending]), Error);
    }

    #[test]
    fn otherwise_pending() {
        assert_eq!(derive_run_status(&[Completed, Pending]), Pending);
        assert_eq!(derive_run_status(&[Pending]), Pending);
    }
}
