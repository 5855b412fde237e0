//! Persistence operations for the usage event log.
//!
//! All writes go through [`emit_event`], which serialises the payload,
//! assigns a monotonically increasing sequence number, and inserts into
//! the `usage_events` table in a single statement.
//!
//! Reads go through [`query_events`] for paging and [`usage_summary`] /
//! [`daily_counts`] for the admin dashboard aggregates.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::ObserveError;
use crate::event::{EventPayload, UsageEvent};

/// Writes a single event to the usage event log.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure or
/// `ObserveError::Serialization` if the payload cannot be serialised.
pub fn emit_event(
    conn: &Connection,
    user_id: Option<&str>,
    entity_id: &str,
    payload: &EventPayload,
) -> Result<UsageEvent, ObserveError> {
    let payload_json = serde_json::to_string(payload)?;
    let event_type = payload.event_type();
    let entity_type = payload.entity_type();

    // The sequence number is computed inside the INSERT so two writers can
    // never observe the same MAX(seq).
    let (id, seq, occurred_at) = conn.query_row(
        "INSERT INTO usage_events
            (seq, event_type, user_id, entity_type, entity_id, payload_json, occurred_at)
         VALUES (
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM usage_events),
            ?1, ?2, ?3, ?4, ?5,
            datetime('now')
         )
         RETURNING id, seq, occurred_at",
        params![event_type, user_id, entity_type, entity_id, payload_json],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?)),
    )?;
    tracing::debug!(event_type, seq, entity_id, "usage event recorded");

    Ok(UsageEvent {
        id,
        seq,
        event_type: event_type.to_string(),
        user_id: user_id.map(str::to_string),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        payload_json,
        occurred_at,
    })
}

/// Filter criteria for querying the usage event log.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event type string.
    pub event_type: Option<String>,
    /// Filter by acting account.
    pub user_id: Option<String>,
    /// Filter by entity ID.
    pub entity_id: Option<String>,
    /// Return events that occurred at or after this timestamp.
    pub since: Option<String>,
    /// Return events with a sequence number greater than this cursor.
    pub after_seq: Option<i64>,
    /// Maximum number of events to return (default: 100).
    pub limit: Option<i64>,
}

/// Queries the usage event log with optional filters.
///
/// Results are returned in sequence order (oldest first), bounded by
/// `filter.limit`. Use `filter.after_seq` as a pagination cursor.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure.
pub fn query_events(
    conn: &Connection,
    filter: &EventFilter,
) -> Result<Vec<UsageEvent>, ObserveError> {
    // WHERE clauses and bind parameters are collected separately so nothing
    // is interpolated.
    let mut clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut idx = 1u32;

    if let Some(ref et) = filter.event_type {
        clauses.push(format!("event_type = ?{idx}"));
        param_values.push(Box::new(et.clone()));
        idx += 1;
    }

    if let Some(ref user_id) = filter.user_id {
        clauses.push(format!("user_id = ?{idx}"));
        param_values.push(Box::new(user_id.clone()));
        idx += 1;
    }

    if let Some(ref ent_id) = filter.entity_id {
        clauses.push(format!("entity_id = ?{idx}"));
        param_values.push(Box::new(ent_id.clone()));
        idx += 1;
    }

    if let Some(ref since) = filter.since {
        clauses.push(format!("occurred_at >= ?{idx}"));
        param_values.push(Box::new(since.clone()));
        idx += 1;
    }

    if let Some(after) = filter.after_seq {
        clauses.push(format!("seq > ?{idx}"));
        param_values.push(Box::new(after));
        idx += 1;
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT id, seq, event_type, user_id, entity_type, entity_id, payload_json, occurred_at
         FROM usage_events
         {where_clause}
         ORDER BY seq ASC
         LIMIT ?{idx}"
    );
    param_values.push(Box::new(filter.limit.unwrap_or(100)));

    let params_refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|p| &**p).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok(UsageEvent {
            id: row.get(0)?,
            seq: row.get(1)?,
            event_type: row.get(2)?,
            user_id: row.get(3)?,
            entity_type: row.get(4)?,
            entity_id: row.get(5)?,
            payload_json: row.get(6)?,
            occurred_at: row.get(7)?,
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }

    Ok(events)
}

/// Number of events of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventCount {
    pub event_type: String,
    pub count: i64,
}

/// Dashboard aggregates over a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    /// Lower bound of the window, if any.
    pub since: Option<String>,
    /// Event counts, most frequent first.
    pub totals_by_type: Vec<EventCount>,
    /// Distinct accounts with at least one event.
    pub active_users: i64,
    pub runs_created: i64,
    pub codexes_completed: i64,
    pub codexes_failed: i64,
    pub pdf_exports: i64,
    /// Tokens spent on completed codexes.
    pub tokens_used: i64,
}

/// Aggregates the event log since `since` (all time when `None`).
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure.
pub fn usage_summary(conn: &Connection, since: Option<&str>) -> Result<UsageSummary, ObserveError> {
    let lower = since.unwrap_or("0000-00-00");

    let mut stmt = conn.prepare(
        "SELECT event_type, COUNT(*) FROM usage_events
         WHERE occurred_at >= ?1
         GROUP BY event_type
         ORDER BY COUNT(*) DESC, event_type ASC",
    )?;
    let rows = stmt.query_map([lower], |row| {
        Ok(EventCount {
            event_type: row.get(0)?,
            count: row.get(1)?,
        })
    })?;
    let mut totals_by_type = Vec::new();
    for row in rows {
        totals_by_type.push(row?);
    }

    let count_of = |event_type: &str| {
        totals_by_type
            .iter()
            .find(|c| c.event_type == event_type)
            .map(|c| c.count)
            .unwrap_or(0)
    };
    let runs_created = count_of("RUN_CREATED");
    let codexes_completed = count_of("CODEX_COMPLETED");
    let codexes_failed = count_of("CODEX_FAILED");
    let pdf_exports = count_of("PDF_EXPORTED");

    let active_users: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT user_id) FROM usage_events
         WHERE occurred_at >= ?1 AND user_id IS NOT NULL",
        [lower],
        |row| row.get(0),
    )?;

    let tokens_used: i64 = conn.query_row(
        "SELECT COALESCE(SUM(json_extract(payload_json, '$.tokens_used')), 0)
         FROM usage_events
         WHERE occurred_at >= ?1 AND event_type = 'CODEX_COMPLETED'",
        [lower],
        |row| row.get(0),
    )?;

    Ok(UsageSummary {
        since: since.map(str::to_string),
        totals_by_type,
        active_users,
        runs_created,
        codexes_completed,
        codexes_failed,
        pdf_exports,
        tokens_used,
    })
}

/// Events of one type on one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD`.
    pub day: String,
    pub count: i64,
}

/// Per-day counts of `event_type` over the last `days` days, oldest first.
/// Days without events are omitted.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure.
pub fn daily_counts(
    conn: &Connection,
    event_type: &str,
    days: u32,
) -> Result<Vec<DailyCount>, ObserveError> {
    let mut stmt = conn.prepare(
        "SELECT date(occurred_at) AS day, COUNT(*) FROM usage_events
         WHERE event_type = ?1 AND occurred_at >= datetime('now', ?2)
         GROUP BY day
         ORDER BY day ASC",
    )?;
    let rows = stmt.query_map(params![event_type, format!("-{} days", days)], |row| {
        Ok(DailyCount {
            day: row.get(0)?,
            count: row.get(1)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
