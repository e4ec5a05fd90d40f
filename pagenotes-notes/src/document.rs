use html_escape::encode_text;
use pagenotes_core::PageRange;
use tracing::debug;

use crate::fallback::FallbackGenerator;
use crate::pipeline::GenerationPath;
use crate::sanitize::{plain_text, Sanitizer};

pub const RAW_VIEW_HEADING: &str = "Raw extracted text";

/// The notes produced for one page range, plus the text they came from.
///
/// Only the editing surface mutates a document once a run has produced it;
/// every edit goes through the sanitizer so the stored markup stays
/// canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesDocument {
    markup: String,
    generated: String,
    source_text: String,
    range: PageRange,
    path: GenerationPath,
    sanitizer: Sanitizer,
}

impl NotesDocument {
    pub fn new(
        markup: String,
        source_text: String,
        range: PageRange,
        path: GenerationPath,
        sanitizer: Sanitizer,
    ) -> Self {
        Self {
            generated: markup.clone(),
            markup,
            source_text,
            range,
            path,
            sanitizer,
        }
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn range(&self) -> PageRange {
        self.range
    }

    pub fn generation_path(&self) -> GenerationPath {
        self.path
    }

    pub fn is_edited(&self) -> bool {
        self.markup != self.generated
    }

    /// Stores markup coming back from the editing surface. Returns whether
    /// the stored markup changed.
    pub fn apply_edit(&mut self, markup: &str) -> bool {
        let sanitized = self.sanitizer.sanitize(markup);
        if sanitized == self.markup {
            return false;
        }
        debug!(bytes = sanitized.len(), "notes edited");
        self.markup = sanitized;
        true
    }

    /// Drops edits and restores what the last run produced.
    pub fn revert_edits(&mut self) {
        self.markup = self.generated.clone();
    }

    /// Rebuilds the notes locally from the retained source text.
    pub fn reset_from_source(&mut self, fallback: &FallbackGenerator) {
        let markup = fallback.generate(&self.source_text);
        self.generated = markup.clone();
        self.markup = markup;
        self.path = GenerationPath::Fallback;
    }

    /// A read-only view of the extracted text, escaped and preformatted.
    pub fn raw_view_markup(&self) -> String {
        format!(
            "<h1>{RAW_VIEW_HEADING}</h1>\n<p>{}</p>\n<pre>{}</pre>",
            encode_text(&self.range.describe()),
            encode_text(&self.source_text)
        )
    }

    pub fn plain_text(&self) -> String {
        plain_text(&self.sanitizer.parse(&self.markup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagenotes_core::Compactness;

    fn document() -> NotesDocument {
        let range = PageRange::selected(2, 3, 10).unwrap();
        NotesDocument::new(
            "<h1>Notes</h1>\n<p>Body</p>".to_string(),
            "Page 2\nBody <text>\n\nPage 3\nMore.".to_string(),
            range,
            GenerationPath::Remote,
            Sanitizer::default(),
        )
    }

    #[test]
    fn edits_are_sanitized_and_tracked() {
        let mut doc = document();
        assert!(!doc.is_edited());
        assert!(doc.apply_edit("<h1>Notes</h1><p>Body <span>edited</span></p><p></p>"));
        assert_eq!(doc.markup(), "<h1>Notes</h1>\n<p>Body edited</p>");
        assert!(doc.is_edited());
        assert!(!doc.apply_edit("<h1>Notes</h1>\n<p>Body edited</p>"));

        doc.revert_edits();
        assert!(!doc.is_edited());
        assert_eq!(doc.markup(), "<h1>Notes</h1>\n<p>Body</p>");
    }

    #[test]
    fn reset_regenerates_from_source_text() {
        let mut doc = document();
        doc.apply_edit("<p>scratch</p>");
        doc.reset_from_source(&FallbackGenerator::new(None, Compactness::Compact));
        assert_eq!(
            doc.markup(),
            "<h2>Page 2</h2>\n<p>Body &lt;text&gt;</p>\n<h2>Page 3</h2>\n<p>More.</p>"
        );
        assert_eq!(doc.generation_path(), GenerationPath::Fallback);
        assert!(!doc.is_edited());
    }

    #[test]
    fn raw_view_escapes_source() {
        let raw = document().raw_view_markup();
        assert!(raw.starts_with("<h1>Raw extracted text</h1>\n<p>pages 2-3</p>"));
        assert!(raw.contains("Body &lt;text&gt;"));
    }

    #[test]
    fn plain_text_strips_markup() {
        assert_eq!(document().plain_text(), "Notes\nBody");
    }
}
