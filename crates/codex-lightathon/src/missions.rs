//! Deterministic mission derivation.
//!
//! Week one asks the participant to reflect on each section, week two to
//! apply it, week three to share it. Sections are cycled in order, so a
//! four-section codex covers every section at least five times.

use codex_types::LIGHTATHON_DAYS;
use serde::Serialize;

const MAX_SENTENCE_CHARS: usize = 280;

/// A codex section as input for mission derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSection {
    pub title: String,
    pub content: String,
}

/// A mission before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissionDraft {
    pub day: u32,
    pub title: String,
    pub description: String,
}

/// First sentence of a markdown body, skipping headings and list markers,
/// capped at 280 characters.
pub fn first_sentence(markdown: &str) -> String {
    let text = markdown
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.trim_start_matches(|c: char| c == '-' || c == '*' || c == '>')
                .trim_start()
        })
        .collect::<Vec<_>>()
        .join(" ")
        .replace(['*', '_', '`'], "");

    let mut end = text.len();
    let mut prev_terminal = false;
    for (idx, ch) in text.char_indices() {
        if prev_terminal && ch.is_whitespace() {
            end = idx;
            break;
        }
        prev_terminal = matches!(ch, '.' | '!' | '?');
    }
    let sentence = text[..end].trim();

    if sentence.chars().count() <= MAX_SENTENCE_CHARS {
        sentence.to_string()
    } else {
        let mut cut: String = sentence.chars().take(MAX_SENTENCE_CHARS - 1).collect();
        cut.push('…');
        cut
    }
}

fn framing(day: u32, section_title: &str) -> (String, String) {
    match (day - 1) / 7 {
        0 => (
            format!("Reflect on {}", section_title),
            "Spend ten minutes journaling on what feels most true here and what you would change."
                .to_string(),
        ),
        1 => (
            format!("Apply {}", section_title),
            "Turn this into one concrete action and complete it today.".to_string(),
        ),
        _ => (
            format!("Share {}", section_title),
            "Share this idea with someone in your audience and note how they react.".to_string(),
        ),
    }
}

/// Builds the 21 missions for a codex.
///
/// Without sections every mission falls back to the codex title.
pub fn derive_missions(codex_title: &str, sections: &[SourceSection]) -> Vec<MissionDraft> {
    (1..=LIGHTATHON_DAYS)
        .map(|day| {
            let (section_title, sentence) = match sections.len() {
                0 => (codex_title.to_string(), String::new()),
                n => {
                    let section = &sections[(day as usize - 1) % n];
                    (section.title.clone(), first_sentence(&section.content))
                }
            };
            let (title, prompt) = framing(day, &section_title);
            let description = if sentence.is_empty() {
                prompt
            } else {
                format!("{} Key idea: \"{}\"", prompt, sentence)
            };
            MissionDraft {
                day,
                title: format!("Day {}: {}", day, title),
                description,
            }
        })
        .collect()
}
