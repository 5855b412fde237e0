//! Codex to PDF export.
//!
//! Rendering happens in two passes. [`layout`](crate::layout) turns an
//! [`ExportDocument`] into positioned lines on A4 pages; the renderer then
//! draws those lines with the PDF built-in Helvetica fonts. Only a light
//! subset of markdown is understood: `#` headings, `-`/`*` bullets, and
//! emphasis markers, which are stripped.

mod layout;
mod render;
mod text;

pub use render::render_pdf;
pub use text::{export_filename, sanitize_text, wrap_text};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A codex ready to be exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Product name shown above the title.
    pub brand_name: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub sections: Vec<ExportSection>,
    /// Text printed at the bottom of every page next to the page number.
    pub footer: Option<String>,
}

/// One section; `body` is markdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSection {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("pdf rendering failed: {0}")]
    Pdf(String),
}
