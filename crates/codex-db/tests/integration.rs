use codex_db::{create_pool, run_migrations, DbRuntimeSettings};

#[test]
fn file_backed_db_initialization_works() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("codex.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default())
        .expect("failed to create pool");

    {
        let conn = pool.get().expect("failed to get connection");
        let applied = run_migrations(&conn).expect("failed to run migrations");
        assert!(applied > 0);
    }

    // A second pooled connection sees the same schema.
    let conn = pool.get().expect("failed to get connection");
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
        .expect("failed to prepare table query");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("failed to execute table query")
        .map(|r| r.expect("failed to read table name"))
        .collect();

    for expected in [
        "_codex_migrations",
        "app_settings",
        "codex_sections",
        "codex_templates",
        "codexes",
        "lightathon_enrollments",
        "lightathon_missions",
        "persona_runs",
        "policy_versions",
        "sessions",
        "share_link_attempts",
        "shared_links",
        "template_sections",
        "usage_events",
        "users",
    ] {
        assert!(
            tables.iter().any(|t| t == expected),
            "missing table {expected}, have {tables:?}"
        );
    }
}

#[test]
fn reopening_does_not_reapply_migrations() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("codex.db");
    let path = path.to_str().unwrap();

    {
        let pool = create_pool(path, DbRuntimeSettings::default()).unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }

    let pool = create_pool(path, DbRuntimeSettings::default()).unwrap();
    let conn = pool.get().unwrap();
    assert_eq!(run_migrations(&conn).unwrap(), 0);
}
