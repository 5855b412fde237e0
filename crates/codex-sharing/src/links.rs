//! Share link records and password verification.

use crate::ShareError;
use codex_identity::{hash_password, random_token, sha256_hex, verify_password};
use codex_observe::{emit_event, EventPayload};
use codex_types::SharePolicy;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 4;
const MAX_PASSWORD_LEN: usize = 128;

/// A share link as shown to its owner. The token itself is only returned
/// once, by [`create_share_link`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareLink {
    pub id: String,
    pub codex_id: String,
    pub created_by: String,
    pub password_protected: bool,
    pub expires_at: Option<String>,
    pub revoked: bool,
    pub view_count: i64,
    pub last_viewed_at: Option<String>,
    pub created_at: String,
    /// Whether `expires_at` has passed, as of the query.
    pub expired: bool,
    #[serde(skip)]
    password_hash: Option<String>,
}

/// Input for [`create_share_link`].
#[derive(Debug, Clone, Default)]
pub struct NewShareLink {
    pub codex_id: String,
    pub created_by: String,
    pub password: Option<String>,
    /// `None` creates a link that never expires.
    pub expires_in_days: Option<u32>,
}

const LINK_COLUMNS: &str = "id, codex_id, created_by, password_hash, expires_at, revoked, \
     view_count, last_viewed_at, created_at, \
     (expires_at IS NOT NULL AND expires_at <= datetime('now'))";

fn map_row_to_link(row: &Row) -> rusqlite::Result<ShareLink> {
    let password_hash: Option<String> = row.get(3)?;
    Ok(ShareLink {
        id: row.get(0)?,
        codex_id: row.get(1)?,
        created_by: row.get(2)?,
        password_protected: password_hash.is_some(),
        expires_at: row.get(4)?,
        revoked: row.get(5)?,
        view_count: row.get(6)?,
        last_viewed_at: row.get(7)?,
        created_at: row.get(8)?,
        expired: row.get(9)?,
        password_hash,
    })
}

/// Creates a share link and returns it with its plaintext token.
///
/// # Errors
///
/// Returns [`ShareError::NotFound`] for an unknown codex,
/// [`ShareError::NotReady`] unless the codex is completed, and
/// [`ShareError::InvalidInput`] for an out-of-range expiry or password.
pub fn create_share_link(
    conn: &Connection,
    new_link: &NewShareLink,
    policy: &SharePolicy,
) -> Result<(ShareLink, String), ShareError> {
    let status: String = conn
        .query_row(
            "SELECT status FROM codexes WHERE id = ?1",
            [&new_link.codex_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(ShareError::NotFound)?;
    if status != "completed" {
        return Err(ShareError::NotReady);
    }

    if let Some(days) = new_link.expires_in_days {
        if days == 0 || days > policy.max_expiry_days {
            return Err(ShareError::InvalidInput(format!(
                "expiry must be between 1 and {} days",
                policy.max_expiry_days
            )));
        }
    }

    let password_hash = match new_link.password.as_deref() {
        Some(password) => {
            let len = password.chars().count();
            if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
                return Err(ShareError::InvalidInput(format!(
                    "password must be {} to {} characters",
                    MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
                )));
            }
            Some(hash_password(password, policy.pbkdf2_iterations))
        }
        None => None,
    };

    let id = Uuid::new_v4().to_string();
    let token = random_token();
    let expires_modifier = new_link.expires_in_days.map(|d| format!("+{} days", d));

    conn.execute(
        "INSERT INTO shared_links (id, codex_id, created_by, token_hash, password_hash, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5,
            CASE WHEN ?6 IS NULL THEN NULL ELSE datetime('now', ?6) END)",
        params![
            id,
            new_link.codex_id,
            new_link.created_by,
            sha256_hex(&token),
            password_hash,
            expires_modifier,
        ],
    )?;

    emit_event(
        conn,
        Some(&new_link.created_by),
        &id,
        &EventPayload::ShareLinkCreated {
            share_link_id: id.clone(),
            codex_id: new_link.codex_id.clone(),
            password_protected: password_hash.is_some(),
        },
    )?;

    tracing::info!(
        share_link_id = %id,
        codex_id = %new_link.codex_id,
        password_protected = password_hash.is_some(),
        expires_in_days = ?new_link.expires_in_days,
        "share link created"
    );
    Ok((get_link(conn, &id)?, token))
}

/// Retrieves a link by ID.
pub fn get_link(conn: &Connection, link_id: &str) -> Result<ShareLink, ShareError> {
    conn.query_row(
        &format!("SELECT {LINK_COLUMNS} FROM shared_links WHERE id = ?1"),
        [link_id],
        map_row_to_link,
    )
    .optional()?
    .ok_or(ShareError::NotFound)
}

/// Looks up the link a public token opens.
///
/// # Errors
///
/// Returns [`ShareError::NotFound`], [`ShareError::Revoked`] or
/// [`ShareError::Expired`].
pub fn resolve_token(conn: &Connection, token: &str) -> Result<ShareLink, ShareError> {
    let link = conn
        .query_row(
            &format!("SELECT {LINK_COLUMNS} FROM shared_links WHERE token_hash = ?1"),
            [sha256_hex(token.trim())],
            map_row_to_link,
        )
        .optional()?
        .ok_or(ShareError::NotFound)?;

    if link.revoked {
        return Err(ShareError::Revoked);
    }
    if link.expired {
        return Err(ShareError::Expired);
    }
    Ok(link)
}

/// Checks a password for a protected link and records the attempt.
///
/// Links without a password always pass. When the client already has
/// `max_failed_attempts` failures inside the attempt window the password is
/// not checked at all.
///
/// # Errors
///
/// Returns [`ShareError::RateLimited`] or [`ShareError::InvalidPassword`].
pub fn verify_link_password(
    conn: &Connection,
    link: &ShareLink,
    password: &str,
    client_key: &str,
    policy: &SharePolicy,
) -> Result<(), ShareError> {
    let Some(ref password_hash) = link.password_hash else {
        return Ok(());
    };

    let recent_failures: u32 = conn.query_row(
        "SELECT COUNT(*) FROM share_link_attempts
         WHERE share_link_id = ?1 AND client_key = ?2 AND succeeded = 0
           AND attempted_at > datetime('now', ?3)",
        params![
            link.id,
            client_key,
            format!("-{} minutes", policy.attempt_window_minutes)
        ],
        |row| row.get(0),
    )?;
    if recent_failures >= policy.max_failed_attempts {
        tracing::warn!(share_link_id = %link.id, client_key, "share password rate limited");
        return Err(ShareError::RateLimited);
    }

    let ok = verify_password(password, password_hash);
    conn.execute(
        "INSERT INTO share_link_attempts (share_link_id, client_key, succeeded) VALUES (?1, ?2, ?3)",
        params![link.id, client_key, ok],
    )?;

    if ok {
        Ok(())
    } else {
        Err(ShareError::InvalidPassword)
    }
}

/// Counts a view of the link.
pub fn record_view(conn: &Connection, link: &ShareLink) -> Result<(), ShareError> {
    conn.execute(
        "UPDATE shared_links SET view_count = view_count + 1, last_viewed_at = datetime('now')
         WHERE id = ?1",
        [&link.id],
    )?;
    emit_event(
        conn,
        None,
        &link.id,
        &EventPayload::ShareLinkViewed {
            share_link_id: link.id.clone(),
            codex_id: link.codex_id.clone(),
        },
    )?;
    Ok(())
}

/// Lists the links of a codex, newest first.
pub fn list_links_for_codex(conn: &Connection, codex_id: &str) -> Result<Vec<ShareLink>, ShareError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LINK_COLUMNS} FROM shared_links WHERE codex_id = ?1
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map([codex_id], map_row_to_link)?;
    let mut links = Vec::new();
    for row in rows {
        links.push(row?);
    }
    Ok(links)
}

/// Revokes a link. Revoking twice is not an error.
pub fn revoke_link(conn: &Connection, link_id: &str) -> Result<ShareLink, ShareError> {
    let changed = conn.execute("UPDATE shared_links SET revoked = 1 WHERE id = ?1", [link_id])?;
    if changed == 0 {
        return Err(ShareError::NotFound);
    }
    tracing::info!(share_link_id = link_id, "share link revoked");
    get_link(conn, link_id)
}

/// Deletes password attempt rows older than `older_than_minutes`.
pub fn prune_attempts(conn: &Connection, older_than_minutes: u32) -> Result<usize, ShareError> {
    let deleted = conn.execute(
        "DELETE FROM share_link_attempts WHERE attempted_at < datetime('now', ?1)",
        [format!("-{} minutes", older_than_minutes)],
    )?;
    Ok(deleted)
}
