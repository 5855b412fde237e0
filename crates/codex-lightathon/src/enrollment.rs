//! Enrollments, mission completion and scoring.

use crate::missions::{derive_missions, SourceSection};
use crate::LightathonError;
use chrono::NaiveDate;
use codex_observe::{emit_event, EventPayload};
use codex_types::{EnrollmentStatus, LightathonPolicy, LIGHTATHON_DAYS};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enrollment {
    pub id: String,
    pub user_id: String,
    pub codex_id: String,
    pub status: EnrollmentStatus,
    pub start_date: NaiveDate,
    pub total_points: i64,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mission {
    pub day: u32,
    pub title: String,
    pub description: String,
    pub completed_at: Option<String>,
    pub points_awarded: i64,
}

impl Mission {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Result of [`complete_mission`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissionOutcome {
    pub day: u32,
    /// Points for this mission, including streak and completion bonuses.
    pub points_awarded: i64,
    pub total_points: i64,
    pub streak: u32,
    /// Whether this mission finished the Lightathon.
    pub finished: bool,
}

/// An enrollment with its missions and derived counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub enrollment: Enrollment,
    pub missions: Vec<Mission>,
    pub current_day: u32,
    pub completed_count: u32,
    pub streak: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: String,
    pub display_name: String,
    pub total_points: i64,
    pub completed_missions: u32,
}

const ENROLLMENT_COLUMNS: &str =
    "id, user_id, codex_id, status, start_date, total_points, created_at, completed_at";

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn map_row_to_enrollment(row: &Row) -> rusqlite::Result<Enrollment> {
    let status: String = row.get(3)?;
    let start_date: String = row.get(4)?;
    Ok(Enrollment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        codex_id: row.get(2)?,
        status: status.parse().map_err(|e| conversion_error(3, e))?,
        start_date: start_date
            .parse::<NaiveDate>()
            .map_err(|e| conversion_error(4, e))?,
        total_points: row.get(5)?,
        created_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

/// Day of the Lightathon `today` falls on: 0 before the start date, then
/// 1 through 21, staying at 21 afterwards.
pub fn current_day(start_date: NaiveDate, today: NaiveDate) -> u32 {
    let elapsed = (today - start_date).num_days();
    if elapsed < 0 {
        0
    } else {
        u32::try_from(elapsed + 1)
            .unwrap_or(LIGHTATHON_DAYS)
            .min(LIGHTATHON_DAYS)
    }
}

/// Consecutive completed days ending at `current_day`, or at the day before
/// when today's mission is not done yet.
pub fn streak(missions: &[Mission], current_day: u32) -> u32 {
    let done = |day: u32| missions.iter().any(|m| m.day == day && m.is_completed());
    let mut day = if done(current_day) {
        current_day
    } else {
        current_day.saturating_sub(1)
    };
    let mut count = 0;
    while day >= 1 && done(day) {
        count += 1;
        day -= 1;
    }
    count
}

/// Starts a Lightathon for one of the user's completed codexes.
///
/// # Errors
///
/// Returns [`LightathonError::NotEligible`] unless the codex exists, belongs
/// to the user and is completed, and [`LightathonError::AlreadyEnrolled`]
/// if the user already has an active enrollment.
pub fn enroll(
    conn: &Connection,
    user_id: &str,
    codex_id: &str,
    start_date: NaiveDate,
) -> Result<Enrollment, LightathonError> {
    let codex: Option<(String, String, String)> = conn
        .query_row(
            "SELECT c.title, c.status, r.user_id FROM codexes c
             JOIN persona_runs r ON r.id = c.run_id
             WHERE c.id = ?1",
            [codex_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((codex_title, status, owner)) = codex else {
        return Err(LightathonError::NotEligible);
    };
    if owner != user_id || status != "completed" {
        return Err(LightathonError::NotEligible);
    }
    if active_enrollment(conn, user_id)?.is_some() {
        return Err(LightathonError::AlreadyEnrolled);
    }

    let mut stmt = conn.prepare(
        "SELECT title, COALESCE(content, '') FROM codex_sections
         WHERE codex_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map([codex_id], |row| {
        Ok(SourceSection {
            title: row.get(0)?,
            content: row.get(1)?,
        })
    })?;
    let mut sections = Vec::new();
    for row in rows {
        sections.push(row?);
    }
    let drafts = derive_missions(&codex_title, &sections);

    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO lightathon_enrollments (id, user_id, codex_id, start_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, user_id, codex_id, start_date.to_string()],
    )
    .map_err(|e| match e {
        // The partial unique index closes the race between the check above
        // and this insert.
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ffi::ErrorCode::ConstraintViolation =>
        {
            LightathonError::AlreadyEnrolled
        }
        other => LightathonError::Database(other),
    })?;
    for draft in &drafts {
        tx.execute(
            "INSERT INTO lightathon_missions (enrollment_id, day, title, description)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, draft.day, draft.title, draft.description],
        )?;
    }
    emit_event(
        &tx,
        Some(user_id),
        &id,
        &EventPayload::LightathonEnrolled {
            enrollment_id: id.clone(),
            codex_id: codex_id.to_string(),
        },
    )?;
    tx.commit()?;

    tracing::info!(enrollment_id = %id, user_id, codex_id, %start_date, "lightathon enrollment created");
    get_enrollment(conn, &id)
}

/// Retrieves an enrollment by ID.
pub fn get_enrollment(conn: &Connection, enrollment_id: &str) -> Result<Enrollment, LightathonError> {
    conn.query_row(
        &format!("SELECT {ENROLLMENT_COLUMNS} FROM lightathon_enrollments WHERE id = ?1"),
        [enrollment_id],
        map_row_to_enrollment,
    )
    .optional()?
    .ok_or(LightathonError::NotFound)
}

fn owned_enrollment(
    conn: &Connection,
    enrollment_id: &str,
    user_id: &str,
) -> Result<Enrollment, LightathonError> {
    let enrollment = get_enrollment(conn, enrollment_id)?;
    if enrollment.user_id != user_id {
        return Err(LightathonError::NotFound);
    }
    Ok(enrollment)
}

/// The user's active enrollment, if any.
pub fn active_enrollment(conn: &Connection, user_id: &str) -> Result<Option<Enrollment>, LightathonError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {ENROLLMENT_COLUMNS} FROM lightathon_enrollments
                 WHERE user_id = ?1 AND status = 'active'"
            ),
            [user_id],
            map_row_to_enrollment,
        )
        .optional()?)
}

/// Missions of an enrollment in day order.
pub fn list_missions(conn: &Connection, enrollment_id: &str) -> Result<Vec<Mission>, LightathonError> {
    let mut stmt = conn.prepare(
        "SELECT day, title, description, completed_at, points_awarded
         FROM lightathon_missions WHERE enrollment_id = ?1 ORDER BY day ASC",
    )?;
    let rows = stmt.query_map([enrollment_id], |row| {
        Ok(Mission {
            day: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            completed_at: row.get(3)?,
            points_awarded: row.get(4)?,
        })
    })?;
    let mut missions = Vec::new();
    for row in rows {
        missions.push(row?);
    }
    Ok(missions)
}

/// Marks one day's mission as done and awards points.
///
/// # Errors
///
/// Returns [`LightathonError::NotFound`] for another user's enrollment,
/// [`LightathonError::NotActive`] for finished or abandoned ones,
/// [`LightathonError::DayLocked`] for days not yet reached, and
/// [`LightathonError::AlreadyCompleted`] for a second completion.
pub fn complete_mission(
    conn: &Connection,
    enrollment_id: &str,
    user_id: &str,
    day: u32,
    today: NaiveDate,
    policy: &LightathonPolicy,
) -> Result<MissionOutcome, LightathonError> {
    // Take the write lock before reading so concurrent completions of the
    // same enrollment see each other's missions.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let enrollment = owned_enrollment(&tx, enrollment_id, user_id)?;
    if enrollment.status != EnrollmentStatus::Active {
        return Err(LightathonError::NotActive);
    }
    let unlocked = current_day(enrollment.start_date, today);
    if day == 0 || day > LIGHTATHON_DAYS || day > unlocked {
        return Err(LightathonError::DayLocked(day));
    }

    let missions = list_missions(&tx, enrollment_id)?;
    let done = |d: u32| missions.iter().any(|m| m.day == d && m.is_completed());
    if done(day) {
        return Err(LightathonError::AlreadyCompleted(day));
    }

    let mut points = i64::from(policy.mission_points);
    if day > 1 && done(day - 1) {
        points += i64::from(policy.streak_bonus);
    }
    let completed_before = missions.iter().filter(|m| m.is_completed()).count() as u32;
    let finished = completed_before + 1 == LIGHTATHON_DAYS;
    if finished {
        points += i64::from(policy.completion_bonus);
    }

    let changed = tx.execute(
        "UPDATE lightathon_missions SET completed_at = datetime('now'), points_awarded = ?3
         WHERE enrollment_id = ?1 AND day = ?2 AND completed_at IS NULL",
        params![enrollment_id, day, points],
    )?;
    if changed == 0 {
        return Err(LightathonError::AlreadyCompleted(day));
    }
    tx.execute(
        "UPDATE lightathon_enrollments SET
            total_points = total_points + ?2,
            status = CASE WHEN ?3 THEN 'completed' ELSE status END,
            completed_at = CASE WHEN ?3 THEN datetime('now') ELSE completed_at END
         WHERE id = ?1",
        params![enrollment_id, points, finished],
    )?;
    emit_event(
        &tx,
        Some(user_id),
        enrollment_id,
        &EventPayload::MissionCompleted {
            enrollment_id: enrollment_id.to_string(),
            day,
            points: u32::try_from(points).unwrap_or(u32::MAX),
        },
    )?;
    let missions = list_missions(&tx, enrollment_id)?;
    let total_points = get_enrollment(&tx, enrollment_id)?.total_points;
    tx.commit()?;

    let outcome = MissionOutcome {
        day,
        points_awarded: points,
        total_points,
        streak: streak(&missions, unlocked),
        finished,
    };
    tracing::info!(
        enrollment_id,
        day,
        points,
        total_points,
        finished,
        "lightathon mission completed"
    );
    Ok(outcome)
}

/// Full view of an enrollment as of `today`.
pub fn progress(
    conn: &Connection,
    enrollment_id: &str,
    today: NaiveDate,
) -> Result<Progress, LightathonError> {
    let enrollment = get_enrollment(conn, enrollment_id)?;
    let missions = list_missions(conn, enrollment_id)?;
    let day = current_day(enrollment.start_date, today);
    Ok(Progress {
        completed_count: missions.iter().filter(|m| m.is_completed()).count() as u32,
        streak: streak(&missions, day),
        current_day: day,
        missions,
        enrollment,
    })
}

/// Gives up an active enrollment so a new one can be started.
pub fn abandon(conn: &Connection, enrollment_id: &str, user_id: &str) -> Result<Enrollment, LightathonError> {
    let enrollment = owned_enrollment(conn, enrollment_id, user_id)?;
    if enrollment.status != EnrollmentStatus::Active {
        return Err(LightathonError::NotActive);
    }
    conn.execute(
        "UPDATE lightathon_enrollments SET status = 'abandoned' WHERE id = ?1",
        [enrollment_id],
    )?;
    tracing::info!(enrollment_id, user_id, "lightathon abandoned");
    get_enrollment(conn, enrollment_id)
}

/// Top participants by points. Each user appears once, with their best
/// non-abandoned enrollment.
pub fn leaderboard(conn: &Connection, limit: usize) -> Result<Vec<LeaderboardEntry>, LightathonError> {
    let mut stmt = conn.prepare(
        "SELECT e.user_id, u.display_name, e.total_points,
            (SELECT COUNT(*) FROM lightathon_missions m
             WHERE m.enrollment_id = e.id AND m.completed_at IS NOT NULL)
         FROM lightathon_enrollments e
         JOIN users u ON u.id = e.user_id
         WHERE e.status != 'abandoned' AND u.active = 1
         ORDER BY e.total_points DESC, e.created_at ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, u32>(3)?,
        ))
    })?;

    let mut entries: Vec<LeaderboardEntry> = Vec::new();
    for row in rows {
        let (user_id, display_name, total_points, completed_missions) = row?;
        if entries.len() >= limit {
            break;
        }
        if entries.iter().any(|e| e.user_id == user_id) {
            continue;
        }
        entries.push(LeaderboardEntry {
            rank: entries.len() as u32 + 1,
            user_id,
            display_name,
            total_points,
            completed_missions,
        });
    }
    Ok(entries)
}
