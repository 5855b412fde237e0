use codex_ai::MockProvider;
use codex_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use codex_generation::{
    create_run, get_codex, get_run, get_section, list_codexes, list_sections, recover_interrupted,
    runs_awaiting_generation, Answer, GenerationError, GenerationEvent, Generator, NewRun,
    PromptOptions, RunSource,
};
use codex_types::{AppPolicy, GenerationStatus};
use std::sync::{Arc, RwLock};
use std::time::Duration;

fn setup_pool() -> DbPool {
    let pool = create_pool(":memory:", DbRuntimeSettings::default()).unwrap();
    let conn = pool.get().unwrap();
    run_migrations(&conn).unwrap();
    conn.execute(
        "INSERT INTO users (id, email, display_name, password_hash) VALUES ('u1', 'coach@example.com', 'Coach', 'x')",
        [],
    )
    .unwrap();
    pool
}

fn new_run(pool: &DbPool, template_ids: Option<Vec<i64>>) -> String {
    let conn = pool.get().unwrap();
    create_run(
        &conn,
        "u1",
        &NewRun {
            title: "Launch".to_string(),
            source: RunSource::Questionnaire {
                answers: vec![Answer {
                    question: "Who do you serve?".to_string(),
                    answer: "Agency owners who want to scale".to_string(),
                }],
            },
            template_ids,
        },
    )
    .unwrap()
    .id
}

fn policy(batch_size: usize, max_attempts: u32) -> Arc<RwLock<AppPolicy>> {
    let mut policy = AppPolicy::default();
    policy.generation.batch_size = batch_size;
    policy.generation.max_attempts = max_attempts;
    policy.generation.retry_backoff_ms = 1;
    Arc::new(RwLock::new(policy))
}

fn generator(pool: &DbPool, provider: Arc<MockProvider>, batch_size: usize, max_attempts: u32) -> Generator {
    Generator::new(
        pool.clone(),
        provider,
        policy(batch_size, max_attempts),
        PromptOptions::default(),
    )
}

fn count_events(pool: &DbPool, event_type: &str) -> i64 {
    pool.get()
        .unwrap()
        .query_row(
            "SELECT COUNT(*) FROM usage_events WHERE event_type = ?1",
            [event_type],
            |row| row.get(0),
        )
        .unwrap()
}

#[tokio::test]
async fn run_completes_every_section() {
    let pool = setup_pool();
    let run_id = new_run(&pool, None);
    let provider = Arc::new(MockProvider::new());

    let run = generator(&pool, provider.clone(), 5, 3)
        .run(&run_id)
        .await
        .unwrap();

    assert_eq!(run.status, GenerationStatus::Completed);
    assert!(run.started_at.is_some());
    assert!(run.completed_at.is_some());
    assert!(run.error.is_none());
    assert_eq!(provider.calls(), 19);

    let conn = pool.get().unwrap();
    for codex in list_codexes(&conn, &run_id).unwrap() {
        assert_eq!(codex.status, GenerationStatus::Completed);
        for section in list_sections(&conn, &codex.id).unwrap() {
            assert_eq!(section.status, GenerationStatus::Completed);
            assert_eq!(section.attempts, 1);
            assert!(section.tokens_used > 0);
            let content = section.content.unwrap();
            assert!(content.starts_with(&format!("## {}", section.title)));
        }
    }
    drop(conn);

    assert_eq!(count_events(&pool, "CODEX_COMPLETED"), 5);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let pool = setup_pool();
    let run_id = new_run(&pool, Some(vec![1]));
    let provider = Arc::new(MockProvider::new().fail_first(2));

    let run = generator(&pool, provider.clone(), 5, 3)
        .run(&run_id)
        .await
        .unwrap();

    assert_eq!(run.status, GenerationStatus::Completed);
    assert_eq!(provider.calls(), 6);

    let conn = pool.get().unwrap();
    let codex = list_codexes(&conn, &run_id).unwrap().remove(0);
    let attempts: u32 = list_sections(&conn, &codex.id)
        .unwrap()
        .iter()
        .map(|s| s.attempts)
        .sum();
    assert_eq!(attempts, 6);
}

#[tokio::test]
async fn exhausted_section_fails_codex_and_run() {
    let pool = setup_pool();
    let run_id = new_run(&pool, Some(vec![1, 2]));
    let provider = Arc::new(MockProvider::new().fail_when_contains("Section: Problem Landscape"));

    let run = generator(&pool, provider.clone(), 5, 3)
        .run(&run_id)
        .await
        .unwrap();

    assert_eq!(run.status, GenerationStatus::Error);
    assert_eq!(run.error.as_deref(), Some("1 of 2 codexes failed"));
    // 8 sections, one of them attempted three times.
    assert_eq!(provider.calls(), 10);

    let conn = pool.get().unwrap();
    let codexes = list_codexes(&conn, &run_id).unwrap();
    assert_eq!(codexes[0].status, GenerationStatus::Error);
    assert_eq!(codexes[0].error.as_deref(), Some("1 of 4 sections failed"));
    assert_eq!(codexes[1].status, GenerationStatus::Completed);

    let failed = list_sections(&conn, &codexes[0].id)
        .unwrap()
        .into_iter()
        .find(|s| s.title == "Problem Landscape")
        .unwrap();
    assert_eq!(failed.status, GenerationStatus::Error);
    assert_eq!(failed.attempts, 3);
    assert!(failed.error.unwrap().contains("500"));
    drop(conn);

    assert_eq!(count_events(&pool, "SECTION_FAILED"), 1);
    assert_eq!(count_events(&pool, "CODEX_FAILED"), 1);
}

#[tokio::test]
async fn retry_codex_regenerates_failed_sections() {
    let pool = setup_pool();
    let run_id = new_run(&pool, Some(vec![1]));
    let provider = Arc::new(MockProvider::new().fail_first(1));
    let generator = generator(&pool, provider.clone(), 5, 1);

    let run = generator.run(&run_id).await.unwrap();
    assert_eq!(run.status, GenerationStatus::Error);
    assert_eq!(provider.calls(), 4);

    let codex_id = {
        let conn = pool.get().unwrap();
        list_codexes(&conn, &run_id).unwrap().remove(0).id
    };
    let codex = generator.retry_codex(&codex_id).await.unwrap();
    assert_eq!(codex.status, GenerationStatus::Completed);
    assert!(codex.error.is_none());
    // Only the failed section is generated again.
    assert_eq!(provider.calls(), 5);

    let conn = pool.get().unwrap();
    let run = get_run(&conn, &run_id).unwrap();
    assert_eq!(run.status, GenerationStatus::Completed);
    assert!(run.error.is_none());
}

#[tokio::test]
async fn regenerate_section_replaces_content() {
    let pool = setup_pool();
    let run_id = new_run(&pool, Some(vec![4]));
    let provider = Arc::new(MockProvider::new());
    let generator = generator(&pool, provider.clone(), 5, 3);
    generator.run(&run_id).await.unwrap();

    let section_id = {
        let conn = pool.get().unwrap();
        let codex = list_codexes(&conn, &run_id).unwrap().remove(0);
        let section = list_sections(&conn, &codex.id).unwrap().remove(1);
        conn.execute(
            "UPDATE codex_sections SET content = 'stale' WHERE id = ?1",
            [&section.id],
        )
        .unwrap();
        section.id
    };

    let section = generator.regenerate_section(&section_id).await.unwrap();
    assert_eq!(section.status, GenerationStatus::Completed);
    assert_ne!(section.content.as_deref(), Some("stale"));
    assert_eq!(provider.calls(), 4);

    let conn = pool.get().unwrap();
    assert_eq!(
        get_codex(&conn, &section.codex_id).unwrap().status,
        GenerationStatus::Completed
    );
}

#[tokio::test]
async fn busy_codex_and_run_are_rejected() {
    let pool = setup_pool();
    let run_id = new_run(&pool, Some(vec![1]));
    let generator = generator(&pool, Arc::new(MockProvider::new()), 5, 3);

    let codex_id = {
        let conn = pool.get().unwrap();
        let codex = list_codexes(&conn, &run_id).unwrap().remove(0);
        conn.execute(
            "UPDATE codexes SET status = 'generating' WHERE id = ?1",
            [&codex.id],
        )
        .unwrap();
        conn.execute(
            "UPDATE persona_runs SET status = 'generating' WHERE id = ?1",
            [&run_id],
        )
        .unwrap();
        codex.id
    };

    assert!(matches!(
        generator.retry_codex(&codex_id).await,
        Err(GenerationError::Busy(_))
    ));
    assert!(matches!(
        generator.run(&run_id).await,
        Err(GenerationError::Busy(_))
    ));
    assert!(matches!(
        generator.run("missing").await,
        Err(GenerationError::NotFound(_))
    ));
}

#[tokio::test]
async fn batches_run_one_after_another() {
    let pool = setup_pool();
    let run_id = new_run(&pool, Some(vec![1]));
    let provider = Arc::new(MockProvider::new().with_delay(Duration::from_millis(50)));
    let generator = generator(&pool, provider, 2, 3);
    let mut rx = generator.subscribe();

    let run = generator.run(&run_id).await.unwrap();
    assert_eq!(run.status, GenerationStatus::Completed);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(GenerationEvent::RunStarted { .. })));
    assert!(events.last().unwrap().is_final());
    assert!(events.iter().all(|e| e.run_id() == run_id));

    let started: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, GenerationEvent::SectionStarted { .. }))
        .map(|(i, _)| i)
        .collect();
    let completed: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, GenerationEvent::SectionCompleted { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(started.len(), 4);
    assert_eq!(completed.len(), 4);
    // Both sections of the first batch start before either finishes, and the
    // second batch waits for the first.
    assert!(started[1] < completed[0]);
    assert!(started[2] > completed[1]);
}

#[tokio::test]
async fn recovery_resets_interrupted_sections() {
    let pool = setup_pool();
    let run_id = new_run(&pool, Some(vec![1]));

    let section_id = {
        let conn = pool.get().unwrap();
        let codex = list_codexes(&conn, &run_id).unwrap().remove(0);
        let section = list_sections(&conn, &codex.id).unwrap().remove(0);
        conn.execute(
            "UPDATE codex_sections SET status = 'generating' WHERE id = ?1",
            [&section.id],
        )
        .unwrap();
        conn.execute(
            "UPDATE codexes SET status = 'generating' WHERE id = ?1",
            [&codex.id],
        )
        .unwrap();
        conn.execute(
            "UPDATE persona_runs SET status = 'generating' WHERE id = ?1",
            [&run_id],
        )
        .unwrap();
        section.id
    };

    let conn = pool.get().unwrap();

    // A fresh section is not stale yet.
    assert!(recover_interrupted(&conn, 3_600).unwrap().is_empty());
    assert_eq!(
        get_section(&conn, &section_id).unwrap().status,
        GenerationStatus::Generating
    );

    let resumable = recover_interrupted(&conn, 0).unwrap();
    assert_eq!(resumable, vec![run_id.clone()]);
    assert_eq!(
        get_section(&conn, &section_id).unwrap().status,
        GenerationStatus::Pending
    );
    assert_eq!(get_run(&conn, &run_id).unwrap().status, GenerationStatus::Pending);
    assert_eq!(runs_awaiting_generation(&conn).unwrap(), vec![run_id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_recovery_leaves_runs_in_flight_alone() {
    let pool = setup_pool();
    let run_id = new_run(&pool, Some(vec![1]));
    let provider = Arc::new(MockProvider::new().with_delay(Duration::from_millis(300)));
    let gen = generator(&pool, provider.clone(), 1, 1);

    let task = tokio::spawn({
        let gen = gen.clone();
        let run_id = run_id.clone();
        async move { gen.run(&run_id).await }
    });

    let mut in_progress = None;
    for _ in 0..400 {
        in_progress = pool
            .get()
            .unwrap()
            .query_row(
                "SELECT id FROM codex_sections WHERE status = 'generating' LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .ok();
        if in_progress.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let section_id = in_progress.expect("a section should start generating");
    assert!(gen.active_runs().contains(&run_id));

    // Even a zero threshold must not touch a run that is being generated.
    assert!(gen.recover_stale(0).await.unwrap().is_empty());
    {
        let conn = pool.get().unwrap();
        assert_ne!(
            get_section(&conn, &section_id).unwrap().status,
            GenerationStatus::Pending
        );
    }

    let run = task.await.unwrap().unwrap();
    assert_eq!(run.status, GenerationStatus::Completed);
    let total_sections: i64 = pool
        .get()
        .unwrap()
        .query_row(
            "SELECT COUNT(*) FROM codex_sections s JOIN codexes c ON c.id = s.codex_id
             WHERE c.run_id = ?1",
            [&run_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(provider.calls(), total_sections as usize);
    assert!(gen.active_runs().is_empty());
}
