//! Prompt construction for section generation.

use crate::runs::{CodexSection, RunSource};
use crate::templates::Template;
use codex_ai::{AiConfig, CompletionRequest};

const FORMAT_RULES: &str = "\
Write in clear, confident English addressed to the founder as \"you\".
Format the answer as GitHub-flavoured markdown: start with a level-two heading \
repeating the section title, use short paragraphs and `-` bullet lists, and do \
not use tables or code blocks.
Use only facts the founder provided. Where something is missing, make a \
reasonable recommendation and label it as a suggestion.";

/// Sampling settings applied to every section request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromptOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

impl From<&AiConfig> for PromptOptions {
    fn from(config: &AiConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

fn format_source(source: &RunSource) -> String {
    match source {
        RunSource::Questionnaire { answers } => {
            let mut out = String::from("Questionnaire answers:\n");
            for a in answers {
                out.push_str(&format!("Q: {}\nA: {}\n\n", a.question, a.answer));
            }
            out
        }
        RunSource::Transcript { transcript } => format!("Call transcript:\n{}\n", transcript),
    }
}

/// Builds the completion request for one section of a codex.
///
/// The system prompt is the template's prompt followed by the shared
/// formatting rules. The user prompt carries the founder material and a
/// `Section: <title>` line naming the section to write.
pub fn build_prompt(
    template: &Template,
    source: &RunSource,
    section: &CodexSection,
    options: &PromptOptions,
) -> CompletionRequest {
    let system = format!("{}\n\n{}", template.system_prompt.trim(), FORMAT_RULES);

    let mut user = format!("Codex: {}\n", template.title);
    if !template.description.trim().is_empty() {
        user.push_str(&format!("Purpose: {}\n", template.description.trim()));
    }
    user.push('\n');
    user.push_str(&format_source(source));
    user.push_str(&format!("\nSection: {}\n", section.title));
    if !section.instructions.trim().is_empty() {
        user.push_str(&format!("Instructions: {}\n", section.instructions.trim()));
    }
    user.push_str("\nWrite only this section of the codex.");

    CompletionRequest {
        system,
        user,
        temperature: options.temperature,
        max_tokens: options.max_tokens,
    }
}
