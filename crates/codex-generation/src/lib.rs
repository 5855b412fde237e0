//! Codex generation for CodeXAlpha.
//!
//! A *persona run* captures a founder's questionnaire answers or call
//! transcript. Each run produces one *codex* per selected template, and each
//! codex is made of sections that are written by an AI provider. This crate
//! owns the template catalogue, the run/codex/section records, the status
//! derivation rules and the [`Generator`] that drives the provider.
//!
//! Section, codex and run status all use [`GenerationStatus`]. Section
//! status is authoritative; codex and run status are derived from it with
//! [`derive_codex_status`] and [`derive_run_status`].

mod generator;
mod prompt;
mod runs;
mod status;
mod templates;

pub use generator::{
    recover_interrupted, runs_awaiting_generation, GenerationEvent, Generator,
};
pub use prompt::{build_prompt, PromptOptions};
pub use runs::{
    create_run, delete_run, get_codex, get_run, get_section, list_codexes, list_runs,
    list_sections, Answer, Codex, CodexSection, NewRun, PersonaRun, RunFilter, RunSource,
};
pub use status::{derive_codex_status, derive_run_status, refresh_codex_status, refresh_run_status};
pub use templates::{
    get_template, list_templates, update_template, Template, TemplateSection, TemplateUpdate,
};

use codex_types::GenerationStatus;
use thiserror::Error;

/// Errors produced by generation operations.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The referenced run, codex, section or template does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The codex or run is already being generated.
    #[error("generation already in progress for {0}")]
    Busy(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("analytics error: {0}")]
    Observe(#[from] codex_observe::ObserveError),
    /// A blocking database task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

pub(crate) fn parse_status(idx: usize, raw: String) -> rusqlite::Result<GenerationStatus> {
    raw.parse::<GenerationStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
