//! Persisted runtime settings: the active policy and branding.
//!
//! Both live as JSON documents in `app_settings`. Every policy change is
//! also appended to `policy_versions`.

use codex_types::{AppPolicy, Branding};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const POLICY_KEY: &str = "policy";
const BRANDING_KEY: &str = "branding";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("stored setting is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A stored policy revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub version_id: String,
    pub changed_by: Option<String>,
    pub created_at: String,
    pub policy: AppPolicy,
}

fn load_setting<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>, SettingsError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM app_settings WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(SettingsError::from)
}

fn store_setting<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<(), SettingsError> {
    let json = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO app_settings (key, value_json, updated_at) VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
        params![key, json],
    )?;
    Ok(())
}

/// The stored policy, or the defaults if none was saved yet.
pub fn load_policy(conn: &Connection) -> Result<AppPolicy, SettingsError> {
    Ok(load_setting(conn, POLICY_KEY)?.unwrap_or_default())
}

/// Stores `policy` as the active policy and records a new version.
/// Returns the version ID.
pub fn save_policy(
    conn: &Connection,
    policy: &AppPolicy,
    changed_by: Option<&str>,
) -> Result<String, SettingsError> {
    let version_id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    store_setting(&tx, POLICY_KEY, policy)?;
    tx.execute(
        "INSERT INTO policy_versions (version_id, policy_json, changed_by) VALUES (?1, ?2, ?3)",
        params![version_id, serde_json::to_string(policy)?, changed_by],
    )?;
    tx.commit()?;
    Ok(version_id)
}

/// Most recent policy versions, newest first.
pub fn policy_history(conn: &Connection, limit: i64) -> Result<Vec<PolicyVersion>, SettingsError> {
    let mut stmt = conn.prepare(
        "SELECT version_id, changed_by, created_at, policy_json FROM policy_versions
         ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut versions = Vec::new();
    for row in rows {
        let (version_id, changed_by, created_at, json) = row?;
        versions.push(PolicyVersion {
            version_id,
            changed_by,
            created_at,
            policy: serde_json::from_str(&json)?,
        });
    }
    Ok(versions)
}

/// The stored branding, or the defaults.
pub fn load_branding(conn: &Connection) -> Result<Branding, SettingsError> {
    Ok(load_setting(conn, BRANDING_KEY)?.unwrap_or_default())
}

pub fn save_branding(conn: &Connection, branding: &Branding) -> Result<(), SettingsError> {
    store_setting(conn, BRANDING_KEY, branding)
}
