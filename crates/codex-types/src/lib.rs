//! Shared types, error definitions, and constants for CodeXAlpha.
//!
//! This crate provides the foundational types used across all `codex-*`
//! crates: account roles, the generation status lifecycle shared by runs,
//! codexes and sections, Lightathon enrollment states, and the runtime
//! policy and branding structures that administrators edit.
//!
//! No crate in the workspace depends on anything *except* `codex-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

pub mod branding;
pub mod policy;

pub use branding::{Branding, BrandingError};
pub use policy::{
    AppPolicy, GenerationPolicy, LightathonPolicy, PolicyError, RateLimitConfig, SharePolicy,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of days in a Lightathon.
pub const LIGHTATHON_DAYS: u32 = 21;

/// Error returned when a stored label does not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} label: {label}")]
pub struct ParseLabelError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The offending label.
    pub label: String,
}

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A regular customer account.
    User,
    /// Console operator with access to every account and the admin API.
    Admin,
}

impl Role {
    /// Returns the canonical string label stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(ParseLabelError {
                kind: "role",
                label: s.to_string(),
            }),
        }
    }
}

/// Lifecycle of a persona run, a codex, or a codex section.
///
/// ```text
/// pending -> generating -> completed
///                       \-> error -> (retry) pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    /// Waiting to be generated.
    Pending,
    /// An AI call is in flight.
    Generating,
    /// Content is available.
    Completed,
    /// The last attempt failed.
    Error,
}

impl GenerationStatus {
    /// Returns the canonical string label stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether no more work is scheduled for an item in this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenerationStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(ParseLabelError {
                kind: "generation status",
                label: s.to_string(),
            }),
        }
    }
}

/// State of a Lightathon enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    /// Missions are being worked through.
    Active,
    /// All 21 missions are done.
    Completed,
    /// The participant left early.
    Abandoned,
}

impl EnrollmentStatus {
    /// Returns the canonical string label stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(ParseLabelError {
                kind: "enrollment status",
                label: s.to_string(),
            }),
        }
    }
}
