//! Schema migrations compiled into the binary.
//!
//! Every entry of [`MIGRATIONS`] is applied at most once per database, in
//! list order, and recorded by name in `_codex_migrations`.

use rusqlite::Connection;
use std::collections::HashSet;
use thiserror::Error;

/// `(name, sql)` pairs in application order. Append only.
const MIGRATIONS: &[(&str, &str)] = &[
    ("000_init", include_str!("migrations/000_init.sql")),
    ("001_users", include_str!("migrations/001_users.sql")),
    ("002_codex_templates", include_str!("migrations/002_codex_templates.sql")),
    ("003_seed_templates", include_str!("migrations/003_seed_templates.sql")),
    ("004_persona_runs", include_str!("migrations/004_persona_runs.sql")),
    ("005_shared_links", include_str!("migrations/005_shared_links.sql")),
    ("006_lightathon", include_str!("migrations/006_lightathon.sql")),
    ("007_settings", include_str!("migrations/007_settings.sql")),
    ("008_usage_events", include_str!("migrations/008_usage_events.sql")),
];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _codex_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to read applied migrations: {0}")]
    StateQuery(rusqlite::Error),
}

/// Applies every migration not yet recorded and returns how many ran.
///
/// Each migration and its tracking row commit in one transaction, so a
/// failing migration leaves no partial schema behind.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn applied_names(conn: &Connection) -> Result<HashSet<String>, rusqlite::Error> {
    conn.execute_batch(TRACKING_TABLE)?;
    let mut stmt = conn.prepare("SELECT name FROM _codex_migrations")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}

fn apply(conn: &Connection, migrations: &[(&str, &str)]) -> Result<usize, MigrationError> {
    let done = applied_names(conn).map_err(MigrationError::StateQuery)?;
    let pending: Vec<_> = migrations
        .iter()
        .filter(|(name, _)| !done.contains(*name))
        .collect();

    for (name, sql) in &pending {
        tracing::info!(migration = *name, "applying migration");
        let result = conn.unchecked_transaction().and_then(|tx| {
            tx.execute_batch(sql)?;
            tx.execute("INSERT INTO _codex_migrations (name) VALUES (?1)", [name])?;
            tx.commit()
        });
        result.map_err(|source| MigrationError::ExecutionFailed {
            name: name.to_string(),
            source,
        })?;
    }

    if pending.is_empty() {
        tracing::debug!("schema up to date");
    }
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    const MIGRATION_COUNT: usize = 9;

    #[test]
    fn run_migrations_on_fresh_db() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, MIGRATION_COUNT);

        let count: usize = conn
            .query_row("SELECT COUNT(*) FROM _codex_migrations", [], |row| {
                row.get(0)
            })
            .expect("should query migration count");
        assert_eq!(count, MIGRATION_COUNT);
    }

    #[test]
    fn run_migrations_idempotent() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");

        let first = run_migrations(&conn).expect("first run should succeed");
        assert_eq!(first, MIGRATION_COUNT);

        let second = run_migrations(&conn).expect("second run should succeed");
        assert_eq!(second, 0, "no new migrations to apply");
    }

    #[test]
    fn verify_template_seeds() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        run_migrations(&conn).expect("migrations should succeed");

        let template_count: i32 = conn
            .query_row("SELECT COUNT(*) FROM codex_templates", [], |row| row.get(0))
            .expect("should query codex_templates count");
        assert_eq!(template_count, 5);

        let niche_sections: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM template_sections ts
                 JOIN codex_templates t ON t.id = ts.template_id
                 WHERE t.slug = 'niche-clarity'",
                [],
                |row| row.get(0),
            )
            .expect("should query niche sections");
        assert_eq!(niche_sections, 4);

        let section_count: i32 = conn
            .query_row("SELECT COUNT(*) FROM template_sections", [], |row| row.get(0))
            .expect("should query template_sections count");
        assert_eq!(section_count, 19);
    }

    #[test]
    fn migration_side_effects_rollback_when_tracking_insert_fails() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let migrations = [(
            "001_tracking_insert_conflict",
            "CREATE TABLE rollback_probe (id INTEGER PRIMARY KEY);
             INSERT INTO _codex_migrations (name) VALUES ('001_tracking_insert_conflict');",
        )];

        let err = apply(&conn, &migrations)
            .expect_err("tracking insert conflict should fail migration");

        match err {
            MigrationError::ExecutionFailed { name, .. } => {
                assert_eq!(name, "001_tracking_insert_conflict")
            }
            other => panic!("unexpected error type: {other:?}"),
        }

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'rollback_probe')",
                [],
                |row| row.get(0),
            )
            .expect("should query sqlite_master");

        assert!(
            !exists,
            "schema side effects should be rolled back when tracking insert fails"
        );
    }

    #[test]
    fn one_active_enrollment_per_user_is_enforced() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        run_migrations(&conn).expect("migrations should succeed");

        conn.execute_batch(
            "INSERT INTO users (id, email, display_name, password_hash) VALUES ('u1', 'a@b.co', 'A', 'x');
             INSERT INTO persona_runs (id, user_id, title, source_kind, source_json) VALUES ('r1', 'u1', 'Run', 'transcript', '{}');
             INSERT INTO codexes (id, run_id, template_id, title, position) VALUES ('c1', 'r1', 1, 'Niche', 1);
             INSERT INTO lightathon_enrollments (id, user_id, codex_id, start_date) VALUES ('e1', 'u1', 'c1', '2026-01-01');",
        )
        .expect("seed should succeed");

        let second = conn.execute(
            "INSERT INTO lightathon_enrollments (id, user_id, codex_id, start_date) VALUES ('e2', 'u1', 'c1', '2026-01-02')",
            [],
        );
        assert!(second.is_err(), "second active enrollment must be rejected");

        conn.execute(
            "UPDATE lightathon_enrollments SET status = 'abandoned' WHERE id = 'e1'",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO lightathon_enrollments (id, user_id, codex_id, start_date) VALUES ('e2', 'u1', 'c1', '2026-01-02')",
            [],
        )
        .expect("new enrollment after abandoning should succeed");
    }
}
