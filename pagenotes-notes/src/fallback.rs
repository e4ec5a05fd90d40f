use html_escape::encode_text;
use once_cell::sync::Lazy;
use pagenotes_core::Compactness;
use regex::Regex;

use crate::sanitize::Sanitizer;

static PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Page \d+$").expect("valid page marker pattern"));

const MAX_SECTION_HEADING_CHARS: usize = 60;
const MIN_SECTION_HEADING_LETTERS: usize = 3;

/// Text between two page markers. `marker` is `None` for text that precedes
/// the first marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChunk<'a> {
    pub marker: Option<&'a str>,
    pub lines: Vec<&'a str>,
}

/// Lines of extracted text. A lone `\r` breaks a line just like `\n` and
/// `\r\n` do.
pub fn source_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().flat_map(|line| line.split('\r'))
}

pub fn split_pages(raw: &str) -> Vec<PageChunk<'_>> {
    let mut chunks = Vec::new();
    let mut current = PageChunk {
        marker: None,
        lines: Vec::new(),
    };
    for line in source_lines(raw) {
        let trimmed = line.trim();
        if PAGE_MARKER.is_match(trimmed) {
            if current.marker.is_some() || !current.lines.is_empty() {
                chunks.push(current);
            }
            current = PageChunk {
                marker: Some(trimmed),
                lines: Vec::new(),
            };
        } else {
            current.lines.push(line);
        }
    }
    if current.marker.is_some() || !current.lines.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Splits one line after `.`, `!` or `?` when whitespace follows.
pub fn sentence_segments(line: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = line.char_indices().peekable();
    while let Some((_, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next_index, next)) = chars.peek() {
            if next.is_whitespace() {
                pieces.push(&line[start..next_index]);
                start = next_index;
            }
        }
    }
    pieces.push(&line[start..]);
    pieces
        .into_iter()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect()
}

/// Every trimmed, non-empty sentence segment of `text`. Line breaks always
/// end a segment.
pub fn segments(text: &str) -> Vec<&str> {
    source_lines(text).flat_map(sentence_segments).collect()
}

/// Short lines written entirely in capitals read as section titles.
pub fn is_section_heading(line: &str) -> bool {
    if line.chars().count() > MAX_SECTION_HEADING_CHARS {
        return false;
    }
    let letters = line.chars().filter(|ch| ch.is_alphabetic()).count();
    letters >= MIN_SECTION_HEADING_LETTERS && !line.chars().any(char::is_lowercase)
}

/// Builds notes from extracted text without any remote help. Content is
/// escaped and kept in full; only structure is added.
#[derive(Debug, Clone)]
pub struct FallbackGenerator {
    title: Option<String>,
    sanitizer: Sanitizer,
}

impl FallbackGenerator {
    pub fn new(title: Option<String>, compactness: Compactness) -> Self {
        Self {
            title: title.filter(|title| !title.trim().is_empty()),
            sanitizer: Sanitizer::new(compactness),
        }
    }

    pub fn generate(&self, raw: &str) -> String {
        let mut markup = String::new();
        if let Some(title) = &self.title {
            markup.push_str(&format!("<h1>{}</h1>\n", encode_text(title.trim())));
        }
        for chunk in split_pages(raw) {
            if let Some(marker) = chunk.marker {
                markup.push_str(&format!("<h2>{}</h2>\n", encode_text(marker)));
            }
            for line in chunk.lines {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if is_section_heading(line) {
                    markup.push_str(&format!("<h3>{}</h3>\n", encode_text(line)));
                    continue;
                }
                for segment in sentence_segments(line) {
                    markup.push_str(&format!("<p>{}</p>\n", encode_text(segment)));
                }
            }
        }
        self.sanitizer.sanitize(&markup)
    }
}
