//! Snapshot exports of a notes document.

use std::path::Path;

use html_escape::encode_text;

use crate::document::NotesDocument;

const STYLESHEET: &str = "body{font-family:Arial,sans-serif;line-height:1.6;max-width:800px;margin:0 auto;padding:20px;}\
h1{color:rgb(71,0,0);text-decoration:underline;}\
h2{color:rgb(26,1,157);text-decoration:underline;}\
h3{color:rgb(52,73,94);text-decoration:underline;}\
p{margin:0 0 6px;}\
ul,ol{margin:4px 0 6px;padding-left:15px;}\
li{margin-bottom:4px;}\
li[data-indent=\"1\"]{margin-left:1.5em;}\
li[data-indent=\"2\"]{margin-left:3em;}\
li[data-indent=\"3\"]{margin-left:4.5em;}\
li[data-indent=\"4\"]{margin-left:6em;}\
pre{background:#f5f5f5;border:1px solid #ddd;padding:10px;white-space:pre-wrap;}";

const MAX_STEM_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    PlainText,
    Html,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::PlainText => "txt",
            ExportFormat::Html => "html",
        }
    }
}

pub fn export(document: &NotesDocument, format: ExportFormat, title: &str) -> String {
    match format {
        ExportFormat::PlainText => export_plain_text(document),
        ExportFormat::Html => export_html(document, title),
    }
}

pub fn export_plain_text(document: &NotesDocument) -> String {
    let mut text = document.plain_text();
    text.push('\n');
    text
}

/// A standalone HTML page with the stylesheet inlined.
pub fn export_html(document: &NotesDocument, title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{STYLESHEET}</style>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        encode_text(title),
        document.markup()
    )
}

/// `<stem>-notes.<ext>` with anything outside `[A-Za-z0-9._-]` replaced.
pub fn suggested_file_name(source: &Path, format: ExportFormat) -> String {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "document".to_string());
    let safe: String = stem
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .take(MAX_STEM_CHARS)
        .collect();
    format!("{safe}-notes.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::GenerationPath;
    use crate::sanitize::Sanitizer;
    use pagenotes_core::PageRange;

    fn document() -> NotesDocument {
        NotesDocument::new(
            "<h1>Notes</h1>\n<ul>\n<li>A &amp; B</li>\n<li data-indent=\"1\">C</li>\n</ul>"
                .to_string(),
            "source".to_string(),
            PageRange::full(1),
            GenerationPath::Fallback,
            Sanitizer::default(),
        )
    }

    #[test]
    fn plain_text_export_is_readable() {
        assert_eq!(export_plain_text(&document()), "Notes\n- A & B\n  - C\n");
    }

    #[test]
    fn html_export_is_self_contained() {
        let html = export(&document(), ExportFormat::Html, "Lecture <3>");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Lecture &lt;3&gt;</title>"));
        assert!(html.contains("h1{color:rgb(71,0,0)"));
        assert!(html.contains("<li data-indent=\"1\">C</li>"));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(
            suggested_file_name(Path::new("/tmp/My Lecture (v2).pdf"), ExportFormat::Html),
            "My_Lecture__v2_-notes.html"
        );
        assert_eq!(
            suggested_file_name(Path::new("/"), ExportFormat::PlainText),
            "document-notes.txt"
        );
    }
}
