//! The 21-day Lightathon.
//!
//! A participant enrolls with one of their completed codexes and receives a
//! mission for each of the 21 days, derived from the codex's sections.
//! Missions unlock one per day from the start date, earn points, and earn a
//! streak bonus when the previous day's mission is also done.

mod enrollment;
mod missions;

pub use enrollment::{
    abandon, active_enrollment, complete_mission, current_day, enroll, get_enrollment,
    leaderboard, list_missions, progress, streak, Enrollment, LeaderboardEntry, Mission,
    MissionOutcome, Progress,
};
pub use missions::{derive_missions, first_sentence, MissionDraft, SourceSection};

use thiserror::Error;

/// Errors produced by Lightathon operations.
#[derive(Debug, Error)]
pub enum LightathonError {
    /// The codex is missing, not owned by the participant, or not completed.
    #[error("codex is not eligible for a lightathon")]
    NotEligible,
    #[error("an active lightathon already exists for this user")]
    AlreadyEnrolled,
    #[error("enrollment not found")]
    NotFound,
    #[error("enrollment is not active")]
    NotActive,
    /// The mission's day has not been reached yet, or is outside 1..=21.
    #[error("mission for day {0} is not unlocked")]
    DayLocked(u32),
    #[error("mission for day {0} is already completed")]
    AlreadyCompleted(u32),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("analytics error: {0}")]
    Observe(#[from] codex_observe::ObserveError),
}
