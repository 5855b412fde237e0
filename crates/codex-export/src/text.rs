//! Text helpers shared by layout and callers.

/// Replaces characters the built-in PDF fonts cannot show.
///
/// Typographic punctuation is mapped to its ASCII look-alike; anything else
/// outside printable ASCII becomes `?`. Tabs become spaces.
pub fn sanitize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\u{2018}' | '\u{2019}' | '\u{201B}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201F}' | '\u{2033}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push('-'),
            '\u{2022}' | '\u{25CF}' | '\u{00B7}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' | '\t' => out.push(' '),
            '\u{00E9}' | '\u{00E8}' | '\u{00EA}' => out.push('e'),
            '\u{00E1}' | '\u{00E0}' | '\u{00E2}' | '\u{00E4}' => out.push('a'),
            '\u{00F3}' | '\u{00F6}' | '\u{00F4}' => out.push('o'),
            '\u{00FA}' | '\u{00FC}' => out.push('u'),
            '\u{00ED}' => out.push('i'),
            '\u{00F1}' => out.push('n'),
            '\u{00E7}' => out.push('c'),
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            c if c.is_control() => {}
            _ => out.push('?'),
        }
    }
    out
}

/// Greedy word wrap to at most `max_chars` characters per line.
///
/// Words longer than a line are split. Runs of whitespace collapse to one
/// space; an empty input yields no lines.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }

        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > max_chars {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// File name for a downloaded codex: a lower-case slug of the title plus
/// `.pdf`.
pub fn export_filename(title: &str) -> String {
    let mut slug = String::new();
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let mut slug: String = slug.trim_end_matches('-').chars().take(80).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("codex");
    }
    format!("{}.pdf", slug)
}
