//! Page layout: markdown blocks to positioned lines.
//!
//! Coordinates are millimetres from the bottom-left corner, as PDF expects.

use crate::text::{sanitize_text, wrap_text};
use crate::ExportDocument;

pub(crate) const PAGE_WIDTH_MM: f32 = 210.0;
pub(crate) const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const TOP_MM: f32 = PAGE_HEIGHT_MM - MARGIN_MM;
/// Lowest baseline for body text; the footer sits below it.
const BOTTOM_MM: f32 = MARGIN_MM + 8.0;
const FOOTER_Y_MM: f32 = 12.0;
/// Rough millimetres per character for Helvetica at 1pt.
const CHAR_WIDTH_PER_PT: f32 = 0.19;
const BULLET_INDENT_MM: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Style {
    Brand,
    Title,
    Subtitle,
    SectionHeading,
    SubHeading,
    Body,
    Bullet,
    Footer,
}

impl Style {
    pub(crate) fn size_pt(self) -> f32 {
        match self {
            Self::Brand => 10.0,
            Self::Title => 24.0,
            Self::Subtitle => 13.0,
            Self::SectionHeading => 16.0,
            Self::SubHeading => 12.5,
            Self::Body | Self::Bullet => 11.0,
            Self::Footer => 8.0,
        }
    }

    pub(crate) fn bold(self) -> bool {
        matches!(
            self,
            Self::Brand | Self::Title | Self::SectionHeading | Self::SubHeading
        )
    }

    fn line_height_mm(self) -> f32 {
        self.size_pt() * 0.5
    }

    fn indent_mm(self) -> f32 {
        match self {
            Self::Bullet => BULLET_INDENT_MM,
            _ => 0.0,
        }
    }

    fn max_chars(self) -> usize {
        let width = PAGE_WIDTH_MM - 2.0 * MARGIN_MM - self.indent_mm();
        let per_char = self.size_pt() * CHAR_WIDTH_PER_PT;
        let chars = (width / per_char) as usize;
        // Bold glyphs run wider.
        if self.bold() {
            chars * 9 / 10
        } else {
            chars
        }
    }
}

/// One line of text at a fixed position.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlacedLine {
    pub text: String,
    pub style: Style,
    pub x_mm: f32,
    pub y_mm: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PageLayout {
    pub number: usize,
    pub lines: Vec<PlacedLine>,
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Heading(String),
    Paragraph(String),
    Bullet(String),
}

fn strip_emphasis(line: &str) -> String {
    line.replace("**", "")
        .replace("__", "")
        .replace(['*', '`'], "")
}

/// Splits a markdown body into headings, paragraphs and bullets.
///
/// Consecutive plain lines join into one paragraph; blank lines end it.
fn parse_blocks(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph = String::new();

    let flush = |paragraph: &mut String, blocks: &mut Vec<Block>| {
        if !paragraph.is_empty() {
            blocks.push(Block::Paragraph(std::mem::take(paragraph)));
        }
    };

    for raw in markdown.lines() {
        let line = raw.trim();
        if line.is_empty() {
            flush(&mut paragraph, &mut blocks);
        } else if line.starts_with('#') {
            flush(&mut paragraph, &mut blocks);
            let text = strip_emphasis(line.trim_start_matches('#').trim());
            if !text.is_empty() {
                blocks.push(Block::Heading(text));
            }
        } else if let Some(item) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Bullet(strip_emphasis(item.trim())));
        } else {
            if !paragraph.is_empty() {
                paragraph.push(' ');
            }
            paragraph.push_str(&strip_emphasis(line));
        }
    }
    flush(&mut paragraph, &mut blocks);
    blocks
}

struct Cursor {
    pages: Vec<PageLayout>,
    y: f32,
}

impl Cursor {
    fn new() -> Self {
        Self {
            pages: vec![PageLayout {
                number: 1,
                lines: Vec::new(),
            }],
            y: TOP_MM,
        }
    }

    fn new_page(&mut self) {
        let number = self.pages.len() + 1;
        self.pages.push(PageLayout {
            number,
            lines: Vec::new(),
        });
        self.y = TOP_MM;
    }

    fn gap(&mut self, mm: f32) {
        if self.y < TOP_MM {
            self.y -= mm;
        }
    }

    /// Makes sure `lines` lines of `style` fit, breaking the page if not.
    fn reserve(&mut self, style: Style, lines: usize) {
        let needed = style.line_height_mm() * lines as f32;
        if self.y - needed < BOTTOM_MM && self.y < TOP_MM {
            self.new_page();
        }
    }

    fn write(&mut self, text: &str, style: Style) {
        let text = sanitize_text(text);
        let lines = wrap_text(&text, style.max_chars());
        for (i, line) in lines.into_iter().enumerate() {
            self.reserve(style, 1);
            self.y -= style.line_height_mm();
            let indent = style.indent_mm();
            let (x, line) = match (style, i) {
                (Style::Bullet, 0) => (MARGIN_MM, format!("-  {}", line)),
                _ => (MARGIN_MM + indent, line),
            };
            if let Some(page) = self.pages.last_mut() {
                page.lines.push(PlacedLine {
                    text: line,
                    style,
                    x_mm: x,
                    y_mm: self.y,
                });
            }
        }
    }
}

/// Lays out the whole document. Always yields at least one page, and every
/// page carries a footer line.
pub(crate) fn layout(doc: &ExportDocument) -> Vec<PageLayout> {
    let mut cursor = Cursor::new();

    cursor.write(&doc.brand_name, Style::Brand);
    cursor.gap(6.0);
    cursor.write(&doc.title, Style::Title);
    if let Some(subtitle) = doc.subtitle.as_deref().filter(|s| !s.trim().is_empty()) {
        cursor.gap(2.0);
        cursor.write(subtitle, Style::Subtitle);
    }
    cursor.gap(8.0);

    for section in &doc.sections {
        // Keep a heading together with at least two lines of its body.
        cursor.reserve(Style::SectionHeading, 3);
        cursor.gap(4.0);
        cursor.write(&section.title, Style::SectionHeading);
        cursor.gap(2.0);
        for block in parse_blocks(&section.body) {
            match block {
                Block::Heading(text) => {
                    cursor.reserve(Style::SubHeading, 3);
                    cursor.gap(2.0);
                    cursor.write(&text, Style::SubHeading);
                }
                Block::Paragraph(text) => cursor.write(&text, Style::Body),
                Block::Bullet(text) => cursor.write(&text, Style::Bullet),
            }
            cursor.gap(2.0);
        }
    }

    let footer = doc
        .footer
        .as_deref()
        .map(sanitize_text)
        .filter(|f| !f.trim().is_empty());
    let total = cursor.pages.len();
    for page in &mut cursor.pages {
        let label = match &footer {
            Some(f) => format!("{}  |  Page {} of {}", f, page.number, total),
            None => format!("Page {} of {}", page.number, total),
        };
        page.lines.push(PlacedLine {
            text: label,
            style: Style::Footer,
            x_mm: MARGIN_MM,
            y_mm: FOOTER_Y_MM,
        });
    }
    cursor.pages
}
