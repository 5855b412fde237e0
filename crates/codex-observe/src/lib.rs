//! Usage analytics for CodeXAlpha.
//!
//! Implements the append-only usage event log behind the admin analytics
//! screens. Every significant product action (sign-ups, persona runs, codex
//! completions and failures, share link views, PDF exports, Lightathon
//! progress and admin changes) is recorded with a monotonically increasing
//! sequence number so the log can be paged and aggregated.
//!
//! # Usage
//!
//! ```rust,ignore
//! use codex_observe::{emit_event, EventPayload};
//!
//! emit_event(
//!     &conn,
//!     Some(&user.id),
//!     &run.id,
//!     &EventPayload::RunCreated {
//!         run_id: run.id.clone(),
//!         codex_count: 5,
//!         source_kind: "questionnaire".to_string(),
//!     },
//! )?;
//! ```

mod error;
mod event;
mod store;

pub use error::ObserveError;
pub use event::{EventPayload, UsageEvent};
pub use store::{
    daily_counts, emit_event, query_events, usage_summary, DailyCount, EventCount, EventFilter,
    UsageSummary,
};
