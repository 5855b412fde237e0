//! Event payload and record types for the usage event log.

use serde::{Deserialize, Serialize};

/// Structured event payloads for each event type.
///
/// Payloads are serialised to JSON and stored in the `payload_json` column
/// of the `usage_events` table. Each variant corresponds to an
/// `event_type` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    // ── Accounts ─────────────────────────────────────────────────────
    /// A new account was created.
    UserSignedUp {
        /// Domain part of the email, for cohort reporting.
        email_domain: String,
    },

    /// An account logged in.
    UserLoggedIn {},

    // ── Generation ───────────────────────────────────────────────────
    /// A persona run was submitted.
    RunCreated {
        run_id: String,
        codex_count: u32,
        /// `questionnaire` or `transcript`.
        source_kind: String,
    },

    /// Every section of a codex was generated.
    CodexCompleted {
        codex_id: String,
        run_id: String,
        /// Tokens spent across all sections of the codex.
        tokens_used: i64,
    },

    /// A codex finished with at least one failed section.
    CodexFailed {
        codex_id: String,
        run_id: String,
        failed_sections: u32,
    },

    /// A section exhausted its attempts.
    SectionFailed {
        section_id: String,
        codex_id: String,
        attempts: u32,
        error: String,
    },

    // ── Sharing and export ───────────────────────────────────────────
    /// A share link was created.
    ShareLinkCreated {
        share_link_id: String,
        codex_id: String,
        password_protected: bool,
    },

    /// A share link was opened.
    ShareLinkViewed {
        share_link_id: String,
        codex_id: String,
    },

    /// A codex was exported to PDF.
    PdfExported {
        codex_id: String,
        via_share_link: bool,
    },

    // ── Lightathon ───────────────────────────────────────────────────
    /// A participant started a Lightathon.
    LightathonEnrolled {
        enrollment_id: String,
        codex_id: String,
    },

    /// A daily mission was completed.
    MissionCompleted {
        enrollment_id: String,
        day: u32,
        points: u32,
    },

    // ── Admin ────────────────────────────────────────────────────────
    /// An administrator changed settings or another account.
    AdminAction {
        action: String,
        target: Option<String>,
        description: String,
    },
}

impl EventPayload {
    /// Returns the canonical `event_type` string for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserSignedUp { .. } => "USER_SIGNED_UP",
            Self::UserLoggedIn { .. } => "USER_LOGGED_IN",
            Self::RunCreated { .. } => "RUN_CREATED",
            Self::CodexCompleted { .. } => "CODEX_COMPLETED",
            Self::CodexFailed { .. } => "CODEX_FAILED",
            Self::SectionFailed { .. } => "SECTION_FAILED",
            Self::ShareLinkCreated { .. } => "SHARE_LINK_CREATED",
            Self::ShareLinkViewed { .. } => "SHARE_LINK_VIEWED",
            Self::PdfExported { .. } => "PDF_EXPORTED",
            Self::LightathonEnrolled { .. } => "LIGHTATHON_ENROLLED",
            Self::MissionCompleted { .. } => "MISSION_COMPLETED",
            Self::AdminAction { .. } => "ADMIN_ACTION",
        }
    }

    /// Returns the `entity_type` string for this payload.
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::UserSignedUp { .. } | Self::UserLoggedIn { .. } => "user",
            Self::RunCreated { .. } => "persona_run",
            Self::CodexCompleted { .. } | Self::CodexFailed { .. } | Self::PdfExported { .. } => {
                "codex"
            }
            Self::SectionFailed { .. } => "codex_section",
            Self::ShareLinkCreated { .. } | Self::ShareLinkViewed { .. } => "shared_link",
            Self::LightathonEnrolled { .. } | Self::MissionCompleted { .. } => {
                "lightathon_enrollment"
            }
            Self::AdminAction { .. } => "admin",
        }
    }
}

/// A persisted usage event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Auto-incremented row ID.
    pub id: i64,
    /// Monotonically increasing sequence number.
    pub seq: i64,
    pub event_type: String,
    /// Account that caused the event, when there is one.
    pub user_id: Option<String>,
    pub entity_type: String,
    pub entity_id: String,
    /// Serialised [`EventPayload`].
    pub payload_json: String,
    /// ISO 8601 timestamp.
    pub occurred_at: String,
}
