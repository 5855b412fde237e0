//! Bearer-token sessions.

use crate::users::{get_user, User};
use crate::{random_token, sha256_hex, IdentityError};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Opens a session for `user_id` and returns the raw bearer token.
///
/// Only the SHA-256 of the token is stored.
pub fn create_session(
    conn: &Connection,
    user_id: &str,
    ttl_hours: u32,
) -> Result<String, IdentityError> {
    let token = random_token();
    conn.execute(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at)
         VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![
            Uuid::new_v4().to_string(),
            user_id,
            sha256_hex(&token),
            format!("+{} hours", ttl_hours),
        ],
    )?;
    Ok(token)
}

/// Resolves a bearer token to its active account.
///
/// # Errors
///
/// Returns [`IdentityError::SessionInvalid`] for unknown or expired tokens,
/// and [`IdentityError::Inactive`] if the account was deactivated.
pub fn user_for_session(conn: &Connection, token: &str) -> Result<User, IdentityError> {
    let user_id: Option<String> = conn
        .query_row(
            "SELECT user_id FROM sessions
             WHERE token_hash = ?1 AND expires_at > datetime('now')",
            [sha256_hex(token)],
            |row| row.get(0),
        )
        .optional()?;

    let user_id = user_id.ok_or(IdentityError::SessionInvalid)?;
    let user = get_user(conn, &user_id)?;
    if !user.active {
        return Err(IdentityError::Inactive);
    }
    Ok(user)
}

/// Deletes the session for `token`. Returns whether a session existed.
pub fn revoke_session(conn: &Connection, token: &str) -> Result<bool, IdentityError> {
    let deleted = conn.execute(
        "DELETE FROM sessions WHERE token_hash = ?1",
        [sha256_hex(token)],
    )?;
    Ok(deleted > 0)
}

/// Deletes every session of an account.
pub fn revoke_user_sessions(conn: &Connection, user_id: &str) -> Result<usize, IdentityError> {
    Ok(conn.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])?)
}

/// Deletes expired sessions. Returns the number removed.
pub fn purge_expired_sessions(conn: &Connection) -> Result<usize, IdentityError> {
    Ok(conn.execute(
        "DELETE FROM sessions WHERE expires_at <= datetime('now')",
        [],
    )?)
}
