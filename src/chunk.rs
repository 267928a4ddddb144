//! Heading-aware markdown chunker.
//!
//! Splits a document into [`Chunk`]s at the heading level named by the
//! resolved [`ChunkingStrategy`]. Heading detection runs through a
//! [`FenceTracker`], so a `#` line inside a fenced code block never opens a
//! chunk, and oversized chunks are only cut at paragraph boundaries that lie
//! outside fences.
//!
//! # Algorithm
//!
//! 1. Walk the lines, maintaining a stack of enclosing headings.
//! 2. Open a new section at every heading whose level is at or above the
//!    split level (`chunk_by = file` keeps one section).
//! 3. Split sections longer than `max_chunk_size` characters at the last
//!    blank line outside a fence at or before the limit.
//! 4. Merge a final chunk shorter than `min_chunk_size` into its predecessor.
//! 5. Derive `chunk_id`, `breadcrumb`, `content_text`, and assign
//!    `chunk_index` in document order.
//!
//! # Example
//!
//! ```rust
//! use docs_harness::chunk::build_chunks;
//! use docs_harness::models::{ChunkingStrategy, Metadata};
//!
//! let md = "# Guide\n\nIntro.\n\n## Install\n\nRun it.\n";
//! let chunks = build_chunks("guide.md", md, &ChunkingStrategy::default(), &Metadata::new());
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].chunk_id, "guide.md#guide/install");
//! assert_eq!(chunks[1].breadcrumb, "Guide > Install");
//! ```

use std::collections::HashSet;
use std::path::Path;

use crate::markdown::{parse_heading, plain_text, slugify, FenceTracker, LineKind};
use crate::models::{Chunk, ChunkingStrategy, Metadata};

/// A heading on the current path: `(level, title)`.
type PathEntry = (u8, String);

/// A contiguous run of lines that will become one or more chunks.
struct Section {
    path: Vec<PathEntry>,
    content: String,
}

/// A chunk before ids and indices are assigned.
struct Draft {
    path: Vec<PathEntry>,
    part: usize,
    content: String,
}

/// Split a markdown document into ordered, addressable chunks.
///
/// `filepath` is the corpus-relative path used as the id prefix; `metadata`
/// is copied onto every chunk. Blank documents produce no chunks.
pub fn build_chunks(
    filepath: &str,
    markdown: &str,
    strategy: &ChunkingStrategy,
    metadata: &Metadata,
) -> Vec<Chunk> {
    let sections = split_sections(markdown, strategy.chunk_by.split_level());

    let mut drafts: Vec<Draft> = Vec::new();
    for section in sections {
        let pieces = match strategy.max_chunk_size {
            Some(max) => split_oversized(&section.content, max),
            None => vec![section.content.clone()],
        };
        for (i, piece) in pieces.into_iter().enumerate() {
            drafts.push(Draft {
                path: section.path.clone(),
                part: i + 1,
                content: piece,
            });
        }
    }

    if let Some(min) = strategy.min_chunk_size {
        if drafts.len() >= 2 && drafts.last().is_some_and(|d| d.content.chars().count() < min) {
            if let (Some(last), Some(prev)) = (drafts.pop(), drafts.last_mut()) {
                prev.content = format!("{}\n\n{}", prev.content.trim_end(), last.content);
            }
        }
    }

    let stem = Path::new(filepath)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filepath.to_string());

    let mut issued: HashSet<String> = HashSet::new();
    drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| {
            let path = effective_path(&draft);
            let (heading_level, heading) = path
                .last()
                .cloned()
                .unwrap_or_else(|| (0, stem.clone()));

            let mut anchor = if path.is_empty() {
                slugify(&stem)
            } else {
                path.iter()
                    .map(|(_, title)| slugify(title))
                    .collect::<Vec<_>>()
                    .join("/")
            };
            if draft.part > 1 {
                anchor = format!("{}-part{}", anchor, draft.part);
            }
            if issued.contains(&anchor) {
                let base = anchor;
                let mut n = 2;
                anchor = format!("{}-{}", base, n);
                while issued.contains(&anchor) {
                    n += 1;
                    anchor = format!("{}-{}", base, n);
                }
            }
            issued.insert(anchor.clone());

            Chunk {
                chunk_id: format!("{}#{}", filepath, anchor),
                filepath: filepath.to_string(),
                heading,
                heading_level,
                content_text: plain_text(&draft.content),
                content: draft.content,
                breadcrumb: path
                    .iter()
                    .map(|(_, title)| title.as_str())
                    .collect::<Vec<_>>()
                    .join(" > "),
                chunk_index: index,
                metadata: metadata.clone(),
            }
        })
        .collect()
}

/// Headings that name a draft. Sections without an opening heading (the
/// preamble, or `chunk_by = file`) borrow the first heading they contain.
fn effective_path(draft: &Draft) -> Vec<PathEntry> {
    if !draft.path.is_empty() {
        return draft.path.clone();
    }
    let mut tracker = FenceTracker::new();
    for line in draft.content.lines() {
        if tracker.observe(line) == LineKind::Text {
            if let Some(entry) = parse_heading(line) {
                return vec![entry];
            }
        }
    }
    Vec::new()
}

/// Cut a document into sections at headings of level `<= split_level`.
fn split_sections(markdown: &str, split_level: Option<u8>) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut stack: Vec<PathEntry> = Vec::new();
    let mut tracker = FenceTracker::new();
    let mut current = Section {
        path: Vec::new(),
        content: String::new(),
    };

    for line in markdown.split_inclusive('\n') {
        if tracker.observe(line) == LineKind::Text {
            if let Some((level, title)) = parse_heading(line) {
                while stack.last().is_some_and(|(l, _)| *l >= level) {
                    stack.pop();
                }
                stack.push((level, title));

                if split_level.is_some_and(|max| level <= max) {
                    let finished = std::mem::replace(
                        &mut current,
                        Section {
                            path: stack.clone(),
                            content: String::new(),
                        },
                    );
                    sections.push(finished);
                }
            }
        }
        current.content.push_str(line);
    }
    sections.push(current);

    sections
        .into_iter()
        .filter_map(|s| {
            let content = tidy(&s.content);
            if content.trim().is_empty() {
                None
            } else {
                Some(Section {
                    path: s.path,
                    content,
                })
            }
        })
        .collect()
}

/// Drop leading blank lines and trailing whitespace, keeping indentation.
fn tidy(content: &str) -> String {
    let mut start = 0;
    for line in content.split_inclusive('\n') {
        if line.trim().is_empty() {
            start += line.len();
        } else {
            break;
        }
    }
    content[start..].trim_end().to_string()
}

/// Split `content` into pieces of at most `max_chars` characters, cutting
/// only after blank lines outside fenced code blocks.
///
/// When no boundary exists at or before the limit, the first boundary after
/// it is used; a piece with no boundary at all is left whole.
fn split_oversized(content: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || content.chars().count() <= max_chars {
        return vec![content.to_string()];
    }

    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut tracker = FenceTracker::new();
    let boundary: Vec<bool> = lines
        .iter()
        .map(|line| tracker.observe(line) == LineKind::Text && line.trim().is_empty())
        .collect();
    let widths: Vec<usize> = lines.iter().map(|l| l.chars().count()).collect();

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let remaining: usize = widths[start..].iter().sum();
        if remaining <= max_chars {
            push_piece(&mut pieces, &lines[start..]);
            break;
        }

        let mut acc = 0;
        let mut last_fit = None;
        let mut first_over = None;
        for i in start..lines.len() {
            acc += widths[i];
            if boundary[i] && i > start {
                if acc <= max_chars {
                    last_fit = Some(i);
                } else {
                    first_over = Some(i);
                    break;
                }
            }
        }

        match last_fit.or(first_over) {
            Some(cut) => {
                push_piece(&mut pieces, &lines[start..=cut]);
                start = cut + 1;
            }
            None => {
                push_piece(&mut pieces, &lines[start..]);
                break;
            }
        }
    }

    if pieces.is_empty() {
        pieces.push(content.to_string());
    }
    pieces
}

fn push_piece(pieces: &mut Vec<String>, lines: &[&str]) {
    let piece = tidy(&lines.concat());
    if !piece.trim().is_empty() {
        pieces.push(piece);
    }
}
