//! Runtime policy configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Defines the operational policy of a CodeXAlpha deployment.
///
/// This struct is serialized to JSON and stored in the `app_settings` and
/// `policy_versions` tables. Administrators replace it wholesale through the
/// admin API; every field has a default so older stored documents still load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppPolicy {
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Codex generation tunables.
    #[serde(default)]
    pub generation: GenerationPolicy,
    /// Share link hardening.
    #[serde(default)]
    pub share: SharePolicy,
    /// Lightathon scoring.
    #[serde(default)]
    pub lightathon: LightathonPolicy,
}

/// Configuration for API rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Max requests per minute for signup and login.
    pub auth_limit: u32,
    /// Max requests per minute for share link unlocks.
    pub unlock_limit: u32,
    /// Max requests per minute for other endpoints.
    pub default_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_limit: 10,
            unlock_limit: 20,
            default_limit: 120,
        }
    }
}

/// Codex generation tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationPolicy {
    /// Number of sections generated concurrently.
    pub batch_size: usize,
    /// Attempts per section before it is marked `error`.
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    /// Sections stuck in `generating` longer than this are reset.
    pub stale_after_seconds: u64,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_attempts: 3,
            retry_backoff_ms: 500,
            stale_after_seconds: 900,
        }
    }
}

/// Share link hardening.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharePolicy {
    /// PBKDF2-HMAC-SHA256 rounds for link passwords.
    pub pbkdf2_iterations: u32,
    /// Failed password attempts allowed per link and client inside the window.
    pub max_failed_attempts: u32,
    /// Length of the failed-attempt window.
    pub attempt_window_minutes: u32,
    /// Lifetime of an access grant issued after a successful unlock.
    pub access_ttl_minutes: u32,
    /// Upper bound for a link's `expires_in_days`.
    pub max_expiry_days: u32,
}

impl Default for SharePolicy {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: 100_000,
            max_failed_attempts: 5,
            attempt_window_minutes: 15,
            access_ttl_minutes: 60,
            max_expiry_days: 365,
        }
    }
}

/// Lightathon scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LightathonPolicy {
    /// Points for completing any mission.
    pub mission_points: u32,
    /// Extra points when the previous day's mission is also complete.
    pub streak_bonus: u32,
    /// Extra points for finishing all 21 missions.
    pub completion_bonus: u32,
}

impl Default for LightathonPolicy {
    fn default() -> Self {
        Self {
            mission_points: 10,
            streak_bonus: 5,
            completion_bonus: 50,
        }
    }
}

/// A policy field outside its accepted range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid policy: {0}")]
pub struct PolicyError(pub String);

impl AppPolicy {
    /// Checks that every tunable is inside its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let g = &self.generation;
        if !(1..=20).contains(&g.batch_size) {
            return Err(PolicyError(format!(
                "generation.batch_size must be within 1..=20, got {}",
                g.batch_size
            )));
        }
        if !(1..=10).contains(&g.max_attempts) {
            return Err(PolicyError(format!(
                "generation.max_attempts must be within 1..=10, got {}",
                g.max_attempts
            )));
        }
        let s = &self.share;
        if s.pbkdf2_iterations < 10_000 {
            return Err(PolicyError(
                "share.pbkdf2_iterations must be at least 10000".to_string(),
            ));
        }
        if s.max_failed_attempts == 0 || s.attempt_window_minutes == 0 {
            return Err(PolicyError(
                "share attempt limit and window must be non-zero".to_string(),
            ));
        }
        if s.access_ttl_minutes == 0 || s.max_expiry_days == 0 {
            return Err(PolicyError(
                "share access ttl and max expiry must be non-zero".to_string(),
            ));
        }
        let r = &self.rate_limit;
        if r.auth_limit == 0 || r.unlock_limit == 0 || r.default_limit == 0 {
            return Err(PolicyError("rate limits must be non-zero".to_string()));
        }
        Ok(())
    }
}
