//! Accounts, sessions and password hashing for CodeXAlpha.
//!
//! Accounts live in the `users` table; the first account created on a fresh
//! database becomes the administrator. Sessions are opaque bearer tokens of
//! which only the SHA-256 digest is persisted. Passwords (account passwords
//! and share link passwords alike) are stored as salted PBKDF2-HMAC-SHA256
//! strings produced by [`hash_password`].

pub mod password;
pub mod sessions;
pub mod users;

pub use password::{hash_password, verify_password};
pub use sessions::{
    create_session, purge_expired_sessions, revoke_session, revoke_user_sessions,
    user_for_session,
};
pub use users::{
    authenticate, create_user, get_user, list_users, normalize_email, set_active, set_role,
    update_display_name, NewUser, User,
};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors produced by account and session operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The email address is malformed.
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    /// The password does not meet length requirements.
    #[error("password must be between 8 and 256 characters")]
    WeakPassword,
    /// The display name is empty or too long.
    #[error("display name must be between 1 and 100 characters")]
    InvalidDisplayName,
    /// Another account already uses this email.
    #[error("an account with this email already exists")]
    EmailTaken,
    /// Unknown email or wrong password.
    #[error("invalid email or password")]
    InvalidCredentials,
    /// The account has been deactivated.
    #[error("account is deactivated")]
    Inactive,
    /// No account with this ID.
    #[error("user not found: {0}")]
    UserNotFound(String),
    /// The session token is unknown or expired.
    #[error("session is invalid or expired")]
    SessionInvalid,
    /// The change would leave no active administrator.
    #[error("cannot remove the last active administrator")]
    LastAdmin,
    /// An underlying SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Lower-case hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Generates a random 256-bit token rendered as 64 hex characters.
pub fn random_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
