//! Persona runs, codexes and sections.

use crate::templates::list_templates;
use crate::{parse_status, GenerationError};
use codex_observe::{emit_event, EventPayload};
use codex_types::GenerationStatus;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_RUN_TITLE_LEN: usize = 200;
const MAX_TRANSCRIPT_LEN: usize = 200_000;
const MAX_ANSWERS: usize = 200;

/// A single questionnaire entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
}

/// The founder material a run is generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunSource {
    Questionnaire { answers: Vec<Answer> },
    Transcript { transcript: String },
}

impl RunSource {
    /// Value stored in `persona_runs.source_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Questionnaire { .. } => "questionnaire",
            Self::Transcript { .. } => "transcript",
        }
    }
}

/// Input for [`create_run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRun {
    pub title: String,
    pub source: RunSource,
    /// Templates to generate. `None` or an empty list selects every active
    /// template.
    #[serde(default)]
    pub template_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonaRun {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub source: RunSource,
    pub status: GenerationStatus,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Codex {
    pub id: String,
    pub run_id: String,
    pub template_id: i64,
    pub title: String,
    pub position: i64,
    pub status: GenerationStatus,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodexSection {
    pub id: String,
    pub codex_id: String,
    pub position: i64,
    pub title: String,
    pub instructions: String,
    pub status: GenerationStatus,
    /// Generated markdown, present once the section has completed.
    pub content: Option<String>,
    pub attempts: u32,
    pub tokens_used: i64,
    pub error: Option<String>,
    pub updated_at: String,
}

/// Filter for [`list_runs`].
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub user_id: Option<String>,
    pub status: Option<GenerationStatus>,
    /// Maximum rows (default 50).
    pub limit: Option<i64>,
}

const RUN_COLUMNS: &str =
    "id, user_id, title, source_json, status, error, created_at, started_at, completed_at";
const CODEX_COLUMNS: &str =
    "id, run_id, template_id, title, position, status, error, created_at, completed_at";
pub(crate) const SECTION_COLUMNS: &str =
    "id, codex_id, position, title, instructions, status, content, attempts, tokens_used, error, updated_at";

fn map_row_to_run(row: &Row) -> rusqlite::Result<PersonaRun> {
    let source_json: String = row.get(3)?;
    let source = serde_json::from_str(&source_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(PersonaRun {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        source,
        status: parse_status(4, row.get(4)?)?,
        error: row.get(5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn map_row_to_codex(row: &Row) -> rusqlite::Result<Codex> {
    Ok(Codex {
        id: row.get(0)?,
        run_id: row.get(1)?,
        template_id: row.get(2)?,
        title: row.get(3)?,
        position: row.get(4)?,
        status: parse_status(5, row.get(5)?)?,
        error: row.get(6)?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

pub(crate) fn map_row_to_section(row: &Row) -> rusqlite::Result<CodexSection> {
    Ok(CodexSection {
        id: row.get(0)?,
        codex_id: row.get(1)?,
        position: row.get(2)?,
        title: row.get(3)?,
        instructions: row.get(4)?,
        status: parse_status(5, row.get(5)?)?,
        content: row.get(6)?,
        attempts: row.get(7)?,
        tokens_used: row.get(8)?,
        error: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn normalize_source(source: &RunSource) -> Result<RunSource, GenerationError> {
    match source {
        RunSource::Questionnaire { answers } => {
            if answers.len() > MAX_ANSWERS {
                return Err(GenerationError::InvalidInput(format!(
                    "at most {} answers are accepted",
                    MAX_ANSWERS
                )));
            }
            let answers: Vec<Answer> = answers
                .iter()
                .filter(|a| !a.answer.trim().is_empty())
                .map(|a| Answer {
                    question: a.question.trim().to_string(),
                    answer: a.answer.trim().to_string(),
                })
                .collect();
            if answers.is_empty() {
                return Err(GenerationError::InvalidInput(
                    "at least one question must be answered".to_string(),
                ));
            }
            Ok(RunSource::Questionnaire { answers })
        }
        RunSource::Transcript { transcript } => {
            let transcript = transcript.trim();
            if transcript.is_empty() || transcript.chars().count() > MAX_TRANSCRIPT_LEN {
                return Err(GenerationError::InvalidInput(format!(
                    "transcript must be 1 to {} characters",
                    MAX_TRANSCRIPT_LEN
                )));
            }
            Ok(RunSource::Transcript {
                transcript: transcript.to_string(),
            })
        }
    }
}

/// Creates a run with one pending codex per selected template and one
/// pending section per template section, in a single transaction.
///
/// # Errors
///
/// Returns [`GenerationError::InvalidInput`] for a bad title, empty source
/// material, or a template selection naming unknown or inactive templates.
pub fn create_run(
    conn: &Connection,
    user_id: &str,
    new_run: &NewRun,
) -> Result<PersonaRun, GenerationError> {
    let title = new_run.title.trim();
    let title_len = title.chars().count();
    if title_len == 0 || title_len > MAX_RUN_TITLE_LEN {
        return Err(GenerationError::InvalidInput(format!(
            "title must be 1 to {} characters",
            MAX_RUN_TITLE_LEN
        )));
    }
    let source = normalize_source(&new_run.source)?;

    let active = list_templates(conn, true)?;
    let selected: Vec<_> = match new_run.template_ids.as_deref() {
        None | Some([]) => active,
        Some(ids) => {
            if let Some(unknown) = ids.iter().find(|id| !active.iter().any(|t| t.id == **id)) {
                return Err(GenerationError::InvalidInput(format!(
                    "template {} does not exist or is inactive",
                    unknown
                )));
            }
            active.into_iter().filter(|t| ids.contains(&t.id)).collect()
        }
    };
    if selected.is_empty() {
        return Err(GenerationError::InvalidInput(
            "no active templates are available".to_string(),
        ));
    }

    let run_id = Uuid::new_v4().to_string();
    let source_json = serde_json::to_string(&source)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO persona_runs (id, user_id, title, source_kind, source_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![run_id, user_id, title, source.kind(), source_json],
    )?;

    for (position, template) in selected.iter().enumerate() {
        let codex_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO codexes (id, run_id, template_id, title, position)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![codex_id, run_id, template.id, template.title, position as i64 + 1],
        )?;
        for section in &template.sections {
            tx.execute(
                "INSERT INTO codex_sections (id, codex_id, position, title, instructions)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    codex_id,
                    section.position,
                    section.title,
                    section.instructions
                ],
            )?;
        }
    }

    emit_event(
        &tx,
        Some(user_id),
        &run_id,
        &EventPayload::RunCreated {
            run_id: run_id.clone(),
            codex_count: selected.len() as u32,
            source_kind: source.kind().to_string(),
        },
    )?;

    tx.commit()?;

    tracing::info!(
        run_id = %run_id,
        user_id,
        codexes = selected.len(),
        source_kind = source.kind(),
        "persona run created"
    );
    get_run(conn, &run_id)
}

/// Retrieves a run by ID.
pub fn get_run(conn: &Connection, run_id: &str) -> Result<PersonaRun, GenerationError> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM persona_runs WHERE id = ?1"),
        [run_id],
        map_row_to_run,
    )
    .optional()?
    .ok_or_else(|| GenerationError::NotFound(format!("run {}", run_id)))
}

/// Lists runs newest first.
pub fn list_runs(conn: &Connection, filter: &RunFilter) -> Result<Vec<PersonaRun>, GenerationError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RUN_COLUMNS} FROM persona_runs
         WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3"
    ))?;
    let rows = stmt.query_map(
        params![
            filter.user_id,
            filter.status.map(|s| s.as_str()),
            filter.limit.unwrap_or(50)
        ],
        map_row_to_run,
    )?;
    let mut runs = Vec::new();
    for row in rows {
        runs.push(row?);
    }
    Ok(runs)
}

/// Deletes a run together with its codexes, sections and share links.
///
/// # Errors
///
/// Returns [`GenerationError::Busy`] while the run is generating and
/// [`GenerationError::NotFound`] if it does not exist.
pub fn delete_run(conn: &Connection, run_id: &str) -> Result<(), GenerationError> {
    let run = get_run(conn, run_id)?;
    if run.status == GenerationStatus::Generating {
        return Err(GenerationError::Busy(format!("run {}", run_id)));
    }
    conn.execute("DELETE FROM persona_runs WHERE id = ?1", [run_id])?;
    tracing::info!(run_id, "persona run deleted");
    Ok(())
}

/// Retrieves a codex by ID.
pub fn get_codex(conn: &Connection, codex_id: &str) -> Result<Codex, GenerationError> {
    conn.query_row(
        &format!("SELECT {CODEX_COLUMNS} FROM codexes WHERE id = ?1"),
        [codex_id],
        map_row_to_codex,
    )
    .optional()?
    .ok_or_else(|| GenerationError::NotFound(format!("codex {}", codex_id)))
}

/// Lists the codexes of a run in position order.
pub fn list_codexes(conn: &Connection, run_id: &str) -> Result<Vec<Codex>, GenerationError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CODEX_COLUMNS} FROM codexes WHERE run_id = ?1 ORDER BY position ASC"
    ))?;
    let rows = stmt.query_map([run_id], map_row_to_codex)?;
    let mut codexes = Vec::new();
    for row in rows {
        codexes.push(row?);
    }
    Ok(codexes)
}

/// Lists the sections of a codex in position order.
pub fn list_sections(conn: &Connection, codex_id: &str) -> Result<Vec<CodexSection>, GenerationError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SECTION_COLUMNS} FROM codex_sections WHERE codex_id = ?1 ORDER BY position ASC"
    ))?;
    let rows = stmt.query_map([codex_id], map_row_to_section)?;
    let mut sections = Vec::new();
    for row in rows {
        sections.push(row?);
    }
    Ok(sections)
}

/// Retrieves a section by ID.
pub fn get_section(conn: &Connection, section_id: &str) -> Result<CodexSection, GenerationError> {
    conn.query_row(
        &format!("SELECT {SECTION_COLUMNS} FROM codex_sections WHERE id = ?1"),
        [section_id],
        map_row_to_section,
    )
    .optional()?
    .ok_or_else(|| GenerationError::NotFound(format!("section {}", section_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        codex_db::run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (id, email, display_name, password_hash) VALUES ('u1', 'a@b.co', 'A', 'x')",
            [],
        )
        .unwrap();
        conn
    }

    fn questionnaire(answer: &str) -> RunSource {
        RunSource::Questionnaire {
            answers: vec![
                Answer {
                    question: "Who do you serve?".to_string(),
                    answer: answer.to_string(),
                },
                Answer {
                    question: "Skipped".to_string(),
                    answer: "   ".to_string(),
                },
            ],
        }
    }

    #[test]
    fn create_run_builds_codexes_and_sections() {
        let conn = setup_db();
        let run = create_run(
            &conn,
            "u1",
            &NewRun {
                title: "  Spring launch ".to_string(),
                source: questionnaire("Burned-out agency owners"),
                template_ids: None,
            },
        )
        .unwrap();

        assert_eq!(run.title, "Spring launch");
        assert_eq!(run.status, GenerationStatus::Pending);
        match &run.source {
            RunSource::Questionnaire { answers } => assert_eq!(answers.len(), 1),
            other => panic!("unexpected source {other:?}"),
        }

        let codexes = list_codexes(&conn, &run.id).unwrap();
        assert_eq!(codexes.len(), 5);
        assert_eq!(codexes[0].title, "Niche Clarity");
        assert_eq!(codexes[0].position, 1);
        assert!(codexes.iter().all(|c| c.status == GenerationStatus::Pending));

        let total: usize = codexes
            .iter()
            .map(|c| list_sections(&conn, &c.id).unwrap().len())
            .sum();
        assert_eq!(total, 19);

        let events: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM usage_events WHERE event_type = 'RUN_CREATED'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(events, 1);
    }

    #[test]
    fn template_selection_is_validated() {
        let conn = setup_db();
        let run = create_run(
            &conn,
            "u1",
            &NewRun {
                title: "Offer only".to_string(),
                source: RunSource::Transcript {
                    transcript: "We help dentists fill their calendars.".to_string(),
                },
                template_ids: Some(vec![3]),
            },
        )
        .unwrap();
        let codexes = list_codexes(&conn, &run.id).unwrap();
        assert_eq!(codexes.len(), 1);
        assert_eq!(codexes[0].template_id, 3);

        let err = create_run(
            &conn,
            "u1",
            &NewRun {
                title: "Bad".to_string(),
                source: questionnaire("x"),
                template_ids: Some(vec![1, 42]),
            },
        )
        .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidInput(_)));
    }

    #[test]
    fn rejects_empty_material() {
        let conn = setup_db();
        for source in [
            questionnaire("  "),
            RunSource::Transcript {
                transcript: "\n\n".to_string(),
            },
        ] {
            let err = create_run(
                &conn,
                "u1",
                &NewRun {
                    title: "Empty".to_string(),
                    source,
                    template_ids: None,
                },
            )
            .unwrap_err();
            assert!(matches!(err, GenerationError::InvalidInput(_)));
        }

        let err = create_run(
            &conn,
            "u1",
            &NewRun {
                title: " ".to_string(),
                source: questionnaire("ok"),
                template_ids: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidInput(_)));
    }

    #[test]
    fn list_filters_and_delete_cascades() {
        let conn = setup_db();
        let run = create_run(
            &conn,
            "u1",
            &NewRun {
                title: "One".to_string(),
                source: questionnaire("coaches"),
                template_ids: Some(vec![1]),
            },
        )
        .unwrap();

        let mine = list_runs(
            &conn,
            &RunFilter {
                user_id: Some("u1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(mine.len(), 1);

        let completed = list_runs(
            &conn,
            &RunFilter {
                status: Some(GenerationStatus::Completed),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(completed.is_empty());

        let codex = list_codexes(&conn, &run.id).unwrap().remove(0);
        let section = list_sections(&conn, &codex.id).unwrap().remove(0);
        assert_eq!(get_section(&conn, &section.id).unwrap().title, "Core Niche Statement");

        delete_run(&conn, &run.id).unwrap();
        assert!(matches!(get_run(&conn, &run.id), Err(GenerationError::NotFound(_))));
        assert!(matches!(get_codex(&conn, &codex.id), Err(GenerationError::NotFound(_))));
        assert!(matches!(get_section(&conn, &section.id), Err(GenerationError::NotFound(_))));
    }

    #[test]
    fn cannot_delete_generating_run() {
        let conn = setup_db();
        let run = create_run(
            &conn,
            "u1",
            &NewRun {
                title: "Busy".to_string(),
                source: questionnaire("coaches"),
                template_ids: None,
            },
        )
        .unwrap();
        conn.execute(
            "UPDATE persona_runs SET status = 'generating' WHERE id = ?1",
            [&run.id],
        )
        .unwrap();
        assert!(matches!(delete_run(&conn, &run.id), Err(GenerationError::Busy(_))));
    }
}
