//! Account registry.
//!
//! Manages the `users` table: sign-up, credential checks, and the admin
//! operations that change roles or deactivate accounts.

use crate::password::{hash_password, verify_password};
use crate::IdentityError;
use codex_types::Role;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

const MAX_EMAIL_LEN: usize = 254;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 256;
const MAX_DISPLAY_NAME_LEN: usize = 100;

const USER_COLUMNS: &str =
    "id, email, display_name, role, active, created_at, updated_at, last_login_at";

/// An account record. The password hash never leaves this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
    pub last_login_at: Option<String>,
}

impl User {
    /// Whether this account may use the admin console.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin && self.active
    }
}

/// Sign-up input.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

/// Trims and lower-cases an email address, rejecting obviously malformed ones.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidEmail`] if the address has no single `@`
/// separating non-empty parts, contains whitespace, or is too long.
pub fn normalize_email(email: &str) -> Result<String, IdentityError> {
    let email = email.trim().to_lowercase();
    let invalid = || IdentityError::InvalidEmail(email.clone());

    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return Err(invalid());
    }
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    Ok(email)
}

fn validate_display_name(name: &str) -> Result<String, IdentityError> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_DISPLAY_NAME_LEN {
        return Err(IdentityError::InvalidDisplayName);
    }
    Ok(name.to_string())
}

fn map_row_to_user(row: &Row) -> rusqlite::Result<User> {
    let role_str: String = row.get(3)?;
    let role = role_str.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        role,
        active: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        last_login_at: row.get(7)?,
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ffi::ErrorCode::ConstraintViolation
    )
}

/// Creates a new account.
///
/// The first account in the database becomes an administrator. The founder
/// check and insert are one SQL statement, so two concurrent sign-ups on an
/// empty database cannot both become admin.
///
/// # Errors
///
/// Returns validation errors for bad input and [`IdentityError::EmailTaken`]
/// if the email is already registered.
pub fn create_user(
    conn: &Connection,
    new_user: &NewUser,
    iterations: u32,
) -> Result<User, IdentityError> {
    let email = normalize_email(&new_user.email)?;
    let display_name = validate_display_name(&new_user.display_name)?;
    let password_len = new_user.password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password_len) {
        return Err(IdentityError::WeakPassword);
    }

    let id = Uuid::new_v4().to_string();
    let password_hash = hash_password(&new_user.password, iterations);

    conn.execute(
        "INSERT INTO users (id, email, display_name, password_hash, role)
         VALUES (?1, ?2, ?3, ?4,
            (SELECT CASE WHEN COUNT(*) = 0 THEN 'admin' ELSE 'user' END FROM users))",
        params![id, email, display_name, password_hash],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            IdentityError::EmailTaken
        } else {
            IdentityError::Database(e)
        }
    })?;

    let user = get_user(conn, &id)?;
    tracing::info!(user_id = %user.id, role = %user.role, "account created");
    Ok(user)
}

/// Retrieves an account by ID.
///
/// # Errors
///
/// Returns [`IdentityError::UserNotFound`] if no such account exists.
pub fn get_user(conn: &Connection, user_id: &str) -> Result<User, IdentityError> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [user_id],
        map_row_to_user,
    )
    .optional()?
    .ok_or_else(|| IdentityError::UserNotFound(user_id.to_string()))
}

/// Checks an email/password pair and records the login time.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidCredentials`] for an unknown email or a
/// wrong password, and [`IdentityError::Inactive`] for deactivated accounts.
pub fn authenticate(conn: &Connection, email: &str, password: &str) -> Result<User, IdentityError> {
    let email = normalize_email(email).map_err(|_| IdentityError::InvalidCredentials)?;

    let found: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE email = ?1",
            [&email],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (user_id, password_hash) = found.ok_or(IdentityError::InvalidCredentials)?;
    if !verify_password(password, &password_hash) {
        return Err(IdentityError::InvalidCredentials);
    }

    let user = get_user(conn, &user_id)?;
    if !user.active {
        return Err(IdentityError::Inactive);
    }

    conn.execute(
        "UPDATE users SET last_login_at = datetime('now') WHERE id = ?1",
        [&user_id],
    )?;

    get_user(conn, &user_id)
}

/// Lists every account, newest first.
pub fn list_users(conn: &Connection) -> Result<Vec<User>, IdentityError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, email ASC"
    ))?;
    let rows = stmt.query_map([], map_row_to_user)?;
    let mut users = Vec::new();
    for row in rows {
        users.push(row?);
    }
    Ok(users)
}

/// Changes the display name of an account.
pub fn update_display_name(
    conn: &Connection,
    user_id: &str,
    display_name: &str,
) -> Result<User, IdentityError> {
    let display_name = validate_display_name(display_name)?;
    let changed = conn.execute(
        "UPDATE users SET display_name = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![display_name, user_id],
    )?;
    if changed == 0 {
        return Err(IdentityError::UserNotFound(user_id.to_string()));
    }
    get_user(conn, user_id)
}

fn other_active_admins(conn: &Connection, user_id: &str) -> Result<i64, IdentityError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = 'admin' AND active = 1 AND id != ?1",
        [user_id],
        |row| row.get(0),
    )?)
}

/// Changes the role of an account.
///
/// # Errors
///
/// Returns [`IdentityError::LastAdmin`] when demoting the only active admin.
pub fn set_role(conn: &Connection, user_id: &str, role: Role) -> Result<User, IdentityError> {
    let current = get_user(conn, user_id)?;
    if current.is_admin() && role != Role::Admin && other_active_admins(conn, user_id)? == 0 {
        return Err(IdentityError::LastAdmin);
    }

    conn.execute(
        "UPDATE users SET role = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![role.as_str(), user_id],
    )?;
    get_user(conn, user_id)
}

/// Activates or deactivates an account. Deactivation revokes every session.
///
/// # Errors
///
/// Returns [`IdentityError::LastAdmin`] when deactivating the only active admin.
pub fn set_active(conn: &Connection, user_id: &str, active: bool) -> Result<User, IdentityError> {
    let current = get_user(conn, user_id)?;
    if current.is_admin() && !active && other_active_admins(conn, user_id)? == 0 {
        return Err(IdentityError::LastAdmin);
    }

    conn.execute(
        "UPDATE users SET active = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![active, user_id],
    )?;
    if !active {
        crate::sessions::revoke_user_sessions(conn, user_id)?;
    }
    get_user(conn, user_id)
}
