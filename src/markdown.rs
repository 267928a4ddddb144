//! Fence-aware markdown structure helpers.
//!
//! Everything here works line by line with a [`FenceTracker`] so that a line
//! such as `# not a heading` inside a fenced code block is never mistaken for
//! document structure.
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`parse_heading`] | Recognise an ATX heading line |
//! | [`slugify`] | Anchor-safe form of a heading title |
//! | [`plain_text`] | Formatting-stripped projection used for scoring |
//! | [`tokenize`] | Lowercased word tokens for lexical matching |

/// Classification of a single line relative to fenced code blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// An opening or closing fence marker (```` ``` ```` or `~~~`).
    FenceMarker,
    /// A line inside a fenced block.
    Code,
    /// Ordinary markdown.
    Text,
}

/// Tracks whether the current line sits inside a fenced code block.
///
/// A fence closes only on the same marker character repeated at least as
/// many times as the opener, with nothing but whitespace after it.
#[derive(Debug, Default)]
pub struct FenceTracker {
    open: Option<(char, usize)>,
}

impl FenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_fence(&self) -> bool {
        self.open.is_some()
    }

    /// Feed the next line and classify it.
    pub fn observe(&mut self, line: &str) -> LineKind {
        let marker = fence_marker(line);
        match (self.open, marker) {
            (None, Some((ch, len, _))) => {
                self.open = Some((ch, len));
                LineKind::FenceMarker
            }
            (Some((open_ch, open_len)), Some((ch, len, rest)))
                if ch == open_ch && len >= open_len && rest.trim().is_empty() =>
            {
                self.open = None;
                LineKind::FenceMarker
            }
            (Some(_), _) => LineKind::Code,
            (None, None) => LineKind::Text,
        }
    }
}

/// Returns `(marker char, run length, remainder)` for a fence line.
fn fence_marker(line: &str) -> Option<(char, usize, &str)> {
    let body = strip_indent(line)?;
    let ch = body.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = body.chars().take_while(|c| *c == ch).count();
    if len < 3 {
        return None;
    }
    // `len` counts single-byte ASCII markers, so it is also a byte offset.
    Some((ch, len, &body[len..]))
}

/// Strip up to three leading spaces; four or more means an indented code line.
fn strip_indent(line: &str) -> Option<&str> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        None
    } else {
        Some(&line[indent..])
    }
}

/// Parse an ATX heading (`#` through `######`) into `(level, title)`.
///
/// Callers must skip lines inside fences; this function only looks at the
/// line itself.
pub fn parse_heading(line: &str) -> Option<(u8, String)> {
    let body = strip_indent(line.trim_end_matches(['\r', '\n']))?;
    let level = body.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &body[level..];
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }
    let mut title = rest.trim();
    // Optional closing sequence: `## Title ##`
    let without_closing = title.trim_end_matches('#');
    if without_closing.len() != title.len()
        && (without_closing.is_empty() || without_closing.ends_with([' ', '\t']))
    {
        title = without_closing.trim_end();
    }
    if title.is_empty() {
        return None;
    }
    Some((level as u8, title.to_string()))
}

/// Convert a heading title into a URL-fragment-safe anchor.
///
/// ```rust
/// use docs_harness::markdown::slugify;
///
/// assert_eq!(slugify("Retry Policy (v2)"), "retry-policy-v2");
/// assert_eq!(slugify("!!!"), "section");
/// ```
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' || ch == '.' || ch == '/' {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

/// Lowercased word tokens: runs of alphanumerics and underscores.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Formatting-stripped projection of a markdown fragment.
///
/// Fence markers are dropped, code lines are kept verbatim, and inline
/// markup (emphasis, code ticks, links, images, HTML tags, heading and list
/// markers, table pipes) is removed from ordinary lines. Runs of blank lines
/// collapse to one.
pub fn plain_text(markdown: &str) -> String {
    let mut tracker = FenceTracker::new();
    let mut out: Vec<String> = Vec::new();

    for line in markdown.lines() {
        let projected = match tracker.observe(line) {
            LineKind::FenceMarker => continue,
            LineKind::Code => line.trim_end().to_string(),
            LineKind::Text if is_table_separator(line.trim()) => continue,
            LineKind::Text => strip_line(line),
        };
        if projected.trim().is_empty() {
            if out.last().is_some_and(|l| !l.is_empty()) {
                out.push(String::new());
            }
            continue;
        }
        out.push(projected);
    }

    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

fn strip_line(line: &str) -> String {
    if let Some((_, title)) = parse_heading(line) {
        return strip_inline(&title);
    }
    let mut body = line.trim();
    while let Some(rest) = body.strip_prefix('>') {
        body = rest.trim_start();
    }
    body = strip_list_marker(body);
    strip_inline(body)
}

fn is_table_separator(line: &str) -> bool {
    line.contains('-') && line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn strip_list_marker(line: &str) -> &str {
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest;
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest;
        }
    }
    line
}

/// Remove inline markup from a single line of prose.
fn strip_inline(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '!' if chars.get(i + 1) == Some(&'[') => {
                i += 1;
            }
            '[' => {
                if let Some((label, next)) = link_parts(&chars, i) {
                    out.push_str(&strip_inline(&label));
                    i = next;
                    continue;
                }
                out.push(ch);
                i += 1;
            }
            // HTML tags only; `Vec<u8>` keeps its generics.
            '<' if looks_like_tag(&chars, i) => {
                match chars[i..].iter().position(|c| *c == '>') {
                    Some(end) => i += end + 1,
                    None => {
                        out.push(ch);
                        i += 1;
                    }
                }
            }
            '*' | '`' => i += 1,
            '~' if chars.get(i + 1) == Some(&'~') => i += 2,
            '_' if chars.get(i + 1) == Some(&'_') => i += 2,
            '|' => {
                out.push(' ');
                i += 1;
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_tag(chars: &[char], at: usize) -> bool {
    let after_word = at > 0 && chars[at - 1].is_alphanumeric();
    let opens = matches!(chars.get(at + 1), Some(c) if *c == '/' || *c == '!' || c.is_ascii_lowercase());
    !after_word && opens
}

/// For `[label](target)` starting at `start`, return the label and the index
/// just past the closing parenthesis.
fn link_parts(chars: &[char], start: usize) -> Option<(String, usize)> {
    let close = start + chars[start..].iter().position(|c| *c == ']')?;
    if chars.get(close + 1) != Some(&'(') {
        return None;
    }
    let end = close + 1 + chars[close + 1..].iter().position(|c| *c == ')')?;
    let label: String = chars[start + 1..close].iter().collect();
    Some((label, end + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heading_levels() {
        assert_eq!(parse_heading("# Title"), Some((1, "Title".into())));
        assert_eq!(parse_heading("### Deep ###"), Some((3, "Deep".into())));
        assert_eq!(parse_heading("   ## Indented"), Some((2, "Indented".into())));
        assert_eq!(parse_heading("C# is a language"), None);
        assert_eq!(parse_heading("#hashtag"), None);
        assert_eq!(parse_heading("    # code"), None);
        assert_eq!(parse_heading("####### seven"), None);
        assert_eq!(parse_heading("## Issue #42"), Some((2, "Issue #42".into())));
    }

    #[test]
    fn test_fence_tracker_ignores_inner_markers() {
        let mut t = FenceTracker::new();
        assert_eq!(t.observe("````md"), LineKind::FenceMarker);
        assert_eq!(t.observe("```"), LineKind::Code);
        assert_eq!(t.observe("# inside"), LineKind::Code);
        assert_eq!(t.observe("````"), LineKind::FenceMarker);
        assert!(!t.in_fence());
        assert_eq!(t.observe("# outside"), LineKind::Text);
    }

    #[test]
    fn test_tilde_fence_not_closed_by_backticks() {
        let mut t = FenceTracker::new();
        t.observe("~~~");
        assert_eq!(t.observe("```"), LineKind::Code);
        assert_eq!(t.observe("~~~"), LineKind::FenceMarker);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Getting Started"), "getting-started");
        assert_eq!(slugify("  API -- Reference  "), "api-reference");
        assert_eq!(slugify("retry_policy"), "retry-policy");
        assert_eq!(slugify("Ünïcode Héading"), "ünïcode-héading");
    }

    #[test]
    fn test_plain_text_strips_markup_but_keeps_code() {
        let md = "## Setup\n\nUse **bold** and [the docs](https://x.y) with `code`.\n\n```rust\nlet x = 1; // *not* stripped\n```\n";
        let text = plain_text(md);
        assert!(text.starts_with("Setup"));
        assert!(text.contains("Use bold and the docs with code."));
        assert!(text.contains("let x = 1; // *not* stripped"));
        assert!(!text.contains("```"));
        assert!(!text.contains("https://"));
    }

    #[test]
    fn test_plain_text_lists_and_tables() {
        let md = "- first\n1. second\n> quoted\n| a | b |\n|---|---|\n| 1 | 2 |";
        let text = plain_text(md);
        assert_eq!(text, "first\nsecond\nquoted\na b\n1 2");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Retry the HTTP request, retry_policy=3!"),
            vec!["retry", "the", "http", "request", "retry_policy", "3"]
        );
    }
}
