//! Public share links for completed codexes.
//!
//! A share link is an unguessable token (only its SHA-256 is stored) that
//! opens one codex without an account. Links can expire, be revoked, and be
//! protected by a password. Password checks are rate limited per link and
//! client by counting recent failed rows in `share_link_attempts`; a correct
//! password is exchanged for a short-lived signed [`AccessGrant`] so the
//! password is not resent with every request.

mod grant;
mod links;

pub use grant::{issue_access_grant, verify_access_grant, AccessGrant};
pub use links::{
    create_share_link, get_link, list_links_for_codex, prune_attempts, record_view,
    resolve_token, revoke_link, verify_link_password, NewShareLink, ShareLink,
};

use thiserror::Error;

/// Errors produced by share link operations.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Unknown token or link ID.
    #[error("share link not found")]
    NotFound,
    /// Only completed codexes can be shared.
    #[error("codex is not ready to share")]
    NotReady,
    #[error("share link has been revoked")]
    Revoked,
    #[error("share link has expired")]
    Expired,
    #[error("incorrect password")]
    InvalidPassword,
    /// Too many recent failed password attempts from this client.
    #[error("too many failed attempts, try again later")]
    RateLimited,
    /// Missing, forged or expired access grant.
    #[error("access grant is invalid or expired")]
    AccessDenied,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("analytics error: {0}")]
    Observe(#[from] codex_observe::ObserveError),
}
