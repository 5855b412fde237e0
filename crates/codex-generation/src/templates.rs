//! Codex template catalogue.
//!
//! Templates are seeded by migrations and edited from the admin console.
//! Editing a template never touches codexes that were already created from
//! it: section titles and instructions are copied into each codex at run
//! creation time.

use crate::GenerationError;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

const MAX_TITLE_LEN: usize = 120;
const MAX_DESCRIPTION_LEN: usize = 1_000;
const MAX_SYSTEM_PROMPT_LEN: usize = 20_000;

/// A codex template with its ordered sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub system_prompt: String,
    pub sort_order: i64,
    pub active: bool,
    pub updated_at: String,
    pub sections: Vec<TemplateSection>,
}

/// One section a template asks the provider to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSection {
    pub id: i64,
    pub position: i64,
    pub title: String,
    pub instructions: String,
}

/// Admin edit of a template. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub sort_order: Option<i64>,
    pub active: Option<bool>,
}

fn map_row_to_template(row: &Row) -> rusqlite::Result<Template> {
    Ok(Template {
        id: row.get(0)?,
        slug: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        system_prompt: row.get(4)?,
        sort_order: row.get(5)?,
        active: row.get(6)?,
        updated_at: row.get(7)?,
        sections: Vec::new(),
    })
}

const TEMPLATE_COLUMNS: &str =
    "id, slug, title, description, system_prompt, sort_order, active, updated_at";

fn load_sections(conn: &Connection, template_id: i64) -> Result<Vec<TemplateSection>, GenerationError> {
    let mut stmt = conn.prepare(
        "SELECT id, position, title, instructions FROM template_sections
         WHERE template_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map([template_id], |row| {
        Ok(TemplateSection {
            id: row.get(0)?,
            position: row.get(1)?,
            title: row.get(2)?,
            instructions: row.get(3)?,
        })
    })?;
    let mut sections = Vec::new();
    for row in rows {
        sections.push(row?);
    }
    Ok(sections)
}

/// Lists templates in display order, optionally only the active ones.
pub fn list_templates(conn: &Connection, active_only: bool) -> Result<Vec<Template>, GenerationError> {
    let sql = if active_only {
        format!(
            "SELECT {TEMPLATE_COLUMNS} FROM codex_templates WHERE active = 1
             ORDER BY sort_order ASC, id ASC"
        )
    } else {
        format!("SELECT {TEMPLATE_COLUMNS} FROM codex_templates ORDER BY sort_order ASC, id ASC")
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], map_row_to_template)?;

    let mut templates = Vec::new();
    for row in rows {
        let mut template = row?;
        template.sections = load_sections(conn, template.id)?;
        templates.push(template);
    }
    Ok(templates)
}

/// Retrieves a template with its sections.
///
/// # Errors
///
/// Returns [`GenerationError::NotFound`] if the template does not exist.
pub fn get_template(conn: &Connection, template_id: i64) -> Result<Template, GenerationError> {
    let mut template = conn
        .query_row(
            &format!("SELECT {TEMPLATE_COLUMNS} FROM codex_templates WHERE id = ?1"),
            [template_id],
            map_row_to_template,
        )
        .optional()?
        .ok_or_else(|| GenerationError::NotFound(format!("template {}", template_id)))?;
    template.sections = load_sections(conn, template_id)?;
    Ok(template)
}

fn check_text(field: &str, value: &str, max: usize, allow_empty: bool) -> Result<(), GenerationError> {
    let len = value.trim().chars().count();
    if (!allow_empty && len == 0) || value.chars().count() > max {
        return Err(GenerationError::InvalidInput(format!(
            "{} must be {} to {} characters",
            field,
            if allow_empty { 0 } else { 1 },
            max
        )));
    }
    Ok(())
}

/// Applies an admin edit to a template.
///
/// # Errors
///
/// Returns [`GenerationError::InvalidInput`] for empty or oversized text and
/// [`GenerationError::NotFound`] if the template does not exist.
pub fn update_template(
    conn: &Connection,
    template_id: i64,
    update: &TemplateUpdate,
) -> Result<Template, GenerationError> {
    if let Some(ref title) = update.title {
        check_text("title", title, MAX_TITLE_LEN, false)?;
    }
    if let Some(ref description) = update.description {
        check_text("description", description, MAX_DESCRIPTION_LEN, true)?;
    }
    if let Some(ref prompt) = update.system_prompt {
        check_text("system_prompt", prompt, MAX_SYSTEM_PROMPT_LEN, false)?;
    }

    let changed = conn.execute(
        "UPDATE codex_templates SET
            title = COALESCE(?2, title),
            description = COALESCE(?3, description),
            system_prompt = COALESCE(?4, system_prompt),
            sort_order = COALESCE(?5, sort_order),
            active = COALESCE(?6, active),
            updated_at = datetime('now')
         WHERE id = ?1",
        params![
            template_id,
            update.title.as_deref().map(str::trim),
            update.description.as_deref().map(str::trim),
            update.system_prompt.as_deref(),
            update.sort_order,
            update.active,
        ],
    )?;
    if changed == 0 {
        return Err(GenerationError::NotFound(format!("template {}", template_id)));
    }

    tracing::info!(template_id, "template updated");
    get_template(conn, template_id)
}
