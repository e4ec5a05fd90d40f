//! Canonicalizing repair pass over loose note markup.
//!
//! Input is tokenized into a small set of recognised tags and text, repaired
//! into a flat block model and serialized back in one canonical layout. The
//! canonical layout parses back into the same model, so sanitizing sanitized
//! markup is a no-op.

use once_cell::sync::Lazy;
use pagenotes_core::Compactness;
use regex::Regex;

static TAG_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<(/?)([A-Za-z][A-Za-z0-9]*)(\s[^<>]*|/)?>").expect("valid tag pattern")
});

static TAG_ANY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9]*)(\s[^<>]*|/)?>").expect("valid tag pattern")
});

static ENTITY_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});")
        .expect("valid entity pattern")
});

static INDENT_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)data-indent\s*=\s*["']?(\d+)"#).expect("valid attribute pattern")
});

pub const MAX_INDENT: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagKind {
    Heading(u8),
    Paragraph,
    UnorderedList,
    OrderedList,
    ListItem,
    Strong,
    Emphasis,
    Break,
    /// Presentational wrappers whose content is kept.
    Wrapper,
    /// Elements removed together with their content.
    Dropped,
    Unknown,
}

impl TagKind {
    pub(crate) fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "h1" => TagKind::Heading(1),
            "h2" => TagKind::Heading(2),
            "h3" | "h4" | "h5" | "h6" => TagKind::Heading(3),
            "p" | "div" => TagKind::Paragraph,
            "ul" => TagKind::UnorderedList,
            "ol" => TagKind::OrderedList,
            "li" => TagKind::ListItem,
            "strong" | "b" => TagKind::Strong,
            "em" | "i" => TagKind::Emphasis,
            "br" => TagKind::Break,
            "span" | "u" | "a" | "font" | "mark" | "small" | "sub" | "sup" | "s" | "del"
            | "ins" | "code" | "pre" | "blockquote" | "section" | "article" | "header"
            | "footer" | "main" | "body" | "html" | "table" | "thead" | "tbody" | "tr"
            | "td" | "th" => TagKind::Wrapper,
            "script" | "style" | "head" | "title" => TagKind::Dropped,
            _ => TagKind::Unknown,
        }
    }

    fn is_recognised(self) -> bool {
        self != TagKind::Unknown
    }
}

/// Escapes `<`, `>` and bare `&`; existing entities are left alone.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (index, ch) in text.char_indices() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' if !ENTITY_AT.is_match(&text[index..]) => out.push_str("&amp;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes everything in `line` that is not a recognised tag.
pub(crate) fn escape_stray(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last = 0;
    for caps in TAG_ANY.captures_iter(line) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        if !TagKind::from_name(name.as_str()).is_recognised() {
            continue;
        }
        out.push_str(&escape_text(&line[last..whole.start()]));
        out.push_str(whole.as_str());
        last = whole.end();
    }
    out.push_str(&escape_text(&line[last..]));
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text { text: String, strong: bool, em: bool },
    Break,
}

impl Inline {
    fn is_blank_text(&self) -> bool {
        matches!(self, Inline::Text { text, .. } if text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub indent: u8,
    pub content: Vec<Inline>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, content: Vec<Inline> },
    Paragraph(Vec<Inline>),
    List { ordered: bool, items: Vec<ListItem> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Open { kind: TagKind, attrs: &'a str },
    Close(TagKind),
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;

    while let Some(offset) = input[pos..].find('<') {
        let at = pos + offset;
        let rest = &input[at..];

        if rest.starts_with("<!--") {
            push_text(&mut tokens, &input[text_start..at]);
            let end = rest.find("-->").map_or(input.len(), |end| at + end + 3);
            pos = end;
            text_start = end;
            continue;
        }

        let Some(caps) = TAG_AT.captures(rest) else {
            pos = at + 1;
            continue;
        };
        push_text(&mut tokens, &input[text_start..at]);

        let whole_len = caps.get(0).map_or(1, |m| m.as_str().len());
        let closing = caps.get(1).map_or(false, |m| !m.as_str().is_empty());
        let name = caps.get(2).map_or("", |m| m.as_str());
        let attrs = caps.get(3).map_or("", |m| m.as_str());
        let kind = TagKind::from_name(name);

        let mut end = at + whole_len;
        if closing {
            tokens.push(Token::Close(kind));
        } else if kind == TagKind::Dropped {
            end = skip_dropped(input, end, name);
        } else {
            tokens.push(Token::Open { kind, attrs });
        }
        pos = end;
        text_start = end;
    }
    push_text(&mut tokens, &input[text_start..]);
    tokens
}

fn push_text<'a>(tokens: &mut Vec<Token<'a>>, text: &'a str) {
    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
}

/// Returns the offset just past the closing tag of a dropped element, or the
/// end of input when it is never closed.
fn skip_dropped(input: &str, from: usize, name: &str) -> usize {
    let lower = input[from..].to_ascii_lowercase();
    let needle = format!("</{}", name.to_ascii_lowercase());
    match lower.find(&needle) {
        Some(close) => {
            let after = from + close + needle.len();
            input[after..]
                .find('>')
                .map_or(input.len(), |gt| after + gt + 1)
        }
        None => input.len(),
    }
}

fn normalize_text(raw: &str) -> String {
    let flattened = raw.replace("\r\n", " ").replace(&['\n', '\r'][..], " ");
    escape_text(&flattened)
}

fn parse_indent(attrs: &str) -> u8 {
    INDENT_ATTR
        .captures(attrs)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map_or(0, |value| value.min(u32::from(MAX_INDENT)) as u8)
}

/// Repeats the inline cleanup until nothing changes: blank runs next to
/// breaks go, same-styled runs merge, break runs are capped, edge breaks go
/// and the outer text is trimmed.
fn normalize_inline(mut content: Vec<Inline>, max_breaks: usize) -> Vec<Inline> {
    loop {
        let before = content.clone();

        let mut kept: Vec<Inline> = Vec::with_capacity(content.len());
        for (index, inline) in content.iter().enumerate() {
            let empty = matches!(inline, Inline::Text { text, .. } if text.is_empty());
            let next_to_break = matches!(content.get(index + 1), Some(Inline::Break))
                || (index > 0 && matches!(content.get(index - 1), Some(Inline::Break)));
            if empty || (inline.is_blank_text() && next_to_break) {
                continue;
            }
            kept.push(inline.clone());
        }

        let mut merged: Vec<Inline> = Vec::with_capacity(kept.len());
        let mut breaks = 0;
        for inline in kept {
            match inline {
                Inline::Break => {
                    breaks += 1;
                    if breaks <= max_breaks {
                        merged.push(Inline::Break);
                    }
                }
                Inline::Text { text, strong, em } => {
                    breaks = 0;
                    if let Some(Inline::Text {
                        text: previous,
                        strong: prev_strong,
                        em: prev_em,
                    }) = merged.last_mut()
                    {
                        if *prev_strong == strong && *prev_em == em {
                            previous.push_str(&text);
                            continue;
                        }
                    }
                    merged.push(Inline::Text { text, strong, em });
                }
            }
        }

        while matches!(merged.first(), Some(Inline::Break)) {
            merged.remove(0);
        }
        while matches!(merged.last(), Some(Inline::Break)) {
            merged.pop();
        }
        if let Some(Inline::Text { text, .. }) = merged.first_mut() {
            *text = text.trim_start().to_string();
        }
        if let Some(Inline::Text { text, .. }) = merged.last_mut() {
            *text = text.trim_end().to_string();
        }

        if merged == before {
            return merged;
        }
        content = merged;
    }
}

enum OpenBlock {
    Paragraph(Vec<Inline>),
    Heading(u8, Vec<Inline>),
}

struct OpenList {
    ordered: bool,
    depth: u8,
    items: Vec<ListItem>,
    item: Option<ListItem>,
}

struct TreeBuilder {
    max_breaks: usize,
    blocks: Vec<Block>,
    open: Option<OpenBlock>,
    list: Option<OpenList>,
    strong: usize,
    em: usize,
}

impl TreeBuilder {
    fn new(max_breaks: usize) -> Self {
        Self {
            max_breaks,
            blocks: Vec::new(),
            open: None,
            list: None,
            strong: 0,
            em: 0,
        }
    }

    fn container(&mut self) -> Option<&mut Vec<Inline>> {
        if let Some(list) = self.list.as_mut() {
            return list.item.as_mut().map(|item| &mut item.content);
        }
        match self.open.as_mut() {
            Some(OpenBlock::Paragraph(content)) | Some(OpenBlock::Heading(_, content)) => {
                Some(content)
            }
            None => None,
        }
    }

    fn text(&mut self, raw: &str) {
        let text = normalize_text(raw);
        let blank = text.trim().is_empty();
        if self.container().is_none() {
            if blank {
                return;
            }
            if let Some(list) = self.list.as_mut() {
                list.item = Some(ListItem {
                    indent: list.depth.min(MAX_INDENT),
                    content: Vec::new(),
                });
            } else {
                self.open = Some(OpenBlock::Paragraph(Vec::new()));
            }
        }
        let inline = Inline::Text {
            text,
            strong: self.strong > 0,
            em: self.em > 0,
        };
        if let Some(content) = self.container() {
            content.push(inline);
        }
    }

    fn line_break(&mut self) {
        if let Some(content) = self.container() {
            content.push(Inline::Break);
        }
    }

    fn open_tag(&mut self, kind: TagKind, attrs: &str) {
        match kind {
            TagKind::Heading(level) => {
                self.flush_list();
                self.flush_open();
                self.open = Some(OpenBlock::Heading(level, Vec::new()));
            }
            TagKind::Paragraph => {
                if let Some(list) = self.list.as_ref() {
                    if list.item.is_some() {
                        return;
                    }
                    self.flush_list();
                }
                self.flush_open();
                self.open = Some(OpenBlock::Paragraph(Vec::new()));
            }
            TagKind::UnorderedList | TagKind::OrderedList => {
                self.flush_open();
                if self.list.is_some() {
                    self.flush_item();
                    if let Some(list) = self.list.as_mut() {
                        list.depth = list.depth.saturating_add(1);
                    }
                } else {
                    self.list = Some(OpenList {
                        ordered: kind == TagKind::OrderedList,
                        depth: 0,
                        items: Vec::new(),
                        item: None,
                    });
                }
            }
            TagKind::ListItem => {
                self.flush_open();
                if self.list.is_none() {
                    self.list = Some(OpenList {
                        ordered: false,
                        depth: 0,
                        items: Vec::new(),
                        item: None,
                    });
                }
                self.flush_item();
                if let Some(list) = self.list.as_mut() {
                    let indent = parse_indent(attrs).saturating_add(list.depth);
                    list.item = Some(ListItem {
                        indent: indent.min(MAX_INDENT),
                        content: Vec::new(),
                    });
                }
            }
            TagKind::Strong => self.strong += 1,
            TagKind::Emphasis => self.em += 1,
            TagKind::Break => self.line_break(),
            TagKind::Wrapper | TagKind::Dropped | TagKind::Unknown => {}
        }
    }

    fn close_tag(&mut self, kind: TagKind) {
        match kind {
            TagKind::Heading(_) => {
                if matches!(self.open, Some(OpenBlock::Heading(..))) {
                    self.flush_open();
                }
            }
            TagKind::Paragraph => {
                let in_item = self
                    .list
                    .as_ref()
                    .map_or(false, |list| list.item.is_some());
                if in_item {
                    self.line_break();
                } else if matches!(self.open, Some(OpenBlock::Paragraph(_))) {
                    self.flush_open();
                }
            }
            TagKind::UnorderedList | TagKind::OrderedList => {
                self.flush_item();
                match self.list.as_ref().map(|list| list.depth) {
                    Some(0) => self.flush_list(),
                    Some(_) => {
                        if let Some(list) = self.list.as_mut() {
                            list.depth -= 1;
                        }
                    }
                    None => {}
                }
            }
            TagKind::ListItem => self.flush_item(),
            TagKind::Strong => self.strong = self.strong.saturating_sub(1),
            TagKind::Emphasis => self.em = self.em.saturating_sub(1),
            TagKind::Break => self.line_break(),
            TagKind::Wrapper | TagKind::Dropped | TagKind::Unknown => {}
        }
    }

    fn reset_emphasis(&mut self) {
        self.strong = 0;
        self.em = 0;
    }

    fn flush_open(&mut self) {
        let Some(open) = self.open.take() else {
            return;
        };
        self.reset_emphasis();
        let block = match open {
            OpenBlock::Paragraph(content) => {
                let content = normalize_inline(content, self.max_breaks);
                (!content.is_empty()).then_some(Block::Paragraph(content))
            }
            OpenBlock::Heading(level, content) => {
                let content = normalize_inline(content, self.max_breaks);
                (!content.is_empty()).then_some(Block::Heading { level, content })
            }
        };
        self.blocks.extend(block);
    }

    fn flush_item(&mut self) {
        let max_breaks = self.max_breaks;
        let Some(list) = self.list.as_mut() else {
            return;
        };
        let Some(item) = list.item.take() else {
            return;
        };
        let content = normalize_inline(item.content, max_breaks);
        if !content.is_empty() {
            list.items.push(ListItem {
                indent: item.indent,
                content,
            });
        }
        self.reset_emphasis();
    }

    fn flush_list(&mut self) {
        self.flush_item();
        if let Some(list) = self.list.take() {
            if !list.items.is_empty() {
                self.blocks.push(Block::List {
                    ordered: list.ordered,
                    items: list.items,
                });
            }
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush_open();
        self.flush_list();
        self.blocks
    }
}

/// Stage four of the notes pipeline, parameterized by spacing compactness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sanitizer {
    compactness: Compactness,
}

impl Sanitizer {
    pub fn new(compactness: Compactness) -> Self {
        Self { compactness }
    }

    pub fn compactness(&self) -> Compactness {
        self.compactness
    }

    fn max_breaks(&self) -> usize {
        match self.compactness {
            Compactness::Dense | Compactness::Compact => 1,
            Compactness::Relaxed => 2,
        }
    }

    fn separator(&self) -> &'static str {
        match self.compactness {
            Compactness::Dense => "",
            Compactness::Compact | Compactness::Relaxed => "\n",
        }
    }

    pub fn sanitize(&self, markup: &str) -> String {
        self.render(&self.parse(markup))
    }

    pub fn parse(&self, markup: &str) -> Vec<Block> {
        let mut builder = TreeBuilder::new(self.max_breaks());
        for token in tokenize(markup) {
            match token {
                Token::Text(text) => builder.text(text),
                Token::Open { kind, attrs } => builder.open_tag(kind, attrs),
                Token::Close(kind) => builder.close_tag(kind),
            }
        }
        builder.finish()
    }

    pub fn render(&self, blocks: &[Block]) -> String {
        let separator = self.separator();
        let mut parts = Vec::with_capacity(blocks.len());
        for block in blocks {
            match block {
                Block::Heading { level, content } => {
                    parts.push(format!("<h{level}>{}</h{level}>", render_inline(content)));
                }
                Block::Paragraph(content) => {
                    parts.push(format!("<p>{}</p>", render_inline(content)));
                }
                Block::List { ordered, items } => {
                    let tag = if *ordered { "ol" } else { "ul" };
                    let mut lines = Vec::with_capacity(items.len() + 2);
                    lines.push(format!("<{tag}>"));
                    for item in items {
                        let attr = if item.indent > 0 {
                            format!(" data-indent=\"{}\"", item.indent)
                        } else {
                            String::new()
                        };
                        lines.push(format!("<li{attr}>{}</li>", render_inline(&item.content)));
                    }
                    lines.push(format!("</{tag}>"));
                    parts.push(lines.join(separator));
                }
            }
        }
        parts.join(separator)
    }
}

fn render_inline(content: &[Inline]) -> String {
    let mut out = String::new();
    for inline in content {
        match inline {
            Inline::Break => out.push_str("<br>"),
            Inline::Text { text, strong, em } => match (strong, em) {
                (true, true) => {
                    out.push_str("<strong><em>");
                    out.push_str(text);
                    out.push_str("</em></strong>");
                }
                (true, false) => {
                    out.push_str("<strong>");
                    out.push_str(text);
                    out.push_str("</strong>");
                }
                (false, true) => {
                    out.push_str("<em>");
                    out.push_str(text);
                    out.push_str("</em>");
                }
                (false, false) => out.push_str(text),
            },
        }
    }
    out
}

fn plain_inline(content: &[Inline]) -> String {
    let mut out = String::new();
    for inline in content {
        match inline {
            Inline::Break => out.push('\n'),
            Inline::Text { text, .. } => {
                out.push_str(&html_escape::decode_html_entities(text));
            }
        }
    }
    out
}

/// Renders blocks as text: one block per line, entities decoded, list items
/// prefixed and indented.
pub fn plain_text(blocks: &[Block]) -> String {
    let mut lines = Vec::new();
    for block in blocks {
        match block {
            Block::Heading { content, .. } | Block::Paragraph(content) => {
                lines.push(plain_inline(content));
            }
            Block::List { ordered, items } => {
                for (index, item) in items.iter().enumerate() {
                    let indent = "  ".repeat(usize::from(item.indent));
                    let marker = if *ordered {
                        format!("{}.", index + 1)
                    } else {
                        "-".to_string()
                    };
                    lines.push(format!("{indent}{marker} {}", plain_inline(&item.content)));
                }
            }
        }
    }
    lines.join("\n")
}

pub fn to_plain_text(markup: &str) -> String {
    plain_text(&Sanitizer::default().parse(markup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sanitize(markup: &str) -> String {
        Sanitizer::default().sanitize(markup)
    }

    #[test]
    fn removes_empty_paragraphs_and_collapses_blank_lines() {
        let out = sanitize("<p></p>\n\n\n<h2>Intro</h2>\n\n\n<p>  </p><p>body</p>");
        assert_eq!(out, "<h2>Intro</h2>\n<p>body</p>");
    }

    #[test]
    fn closes_unclosed_headings_and_emphasis() {
        let out = sanitize("<h1>Title<p><strong>bold text</p><p>plain</p>");
        assert_eq!(out, "<h1>Title</h1>\n<p><strong>bold text</strong></p>\n<p>plain</p>");
    }

    #[test]
    fn doubly_nested_emphasis_is_flattened() {
        let out = sanitize("<p><strong><b>key</b></strong> term</p>");
        assert_eq!(out, "<p><strong>key</strong> term</p>");
    }

    #[test]
    fn block_tags_are_lifted_out_of_paragraphs() {
        let out = sanitize("<p>before<h3>Heading</h3>after<ul><li>item</li></ul></p>");
        assert_eq!(
            out,
            "<p>before</p>\n<h3>Heading</h3>\n<p>after</p>\n<ul>\n<li>item</li>\n</ul>"
        );
    }

    #[test]
    fn deep_headings_collapse_to_third_level() {
        assert_eq!(sanitize("<h5>Deep</h5>"), "<h3>Deep</h3>");
    }

    #[test]
    fn nested_lists_become_indent_hints() {
        let out = sanitize("<ul><li>a<ul><li>b</li></ul></li><li>c</li></ul>");
        assert_eq!(
            out,
            "<ul>\n<li>a</li>\n<li data-indent=\"1\">b</li>\n<li>c</li>\n</ul>"
        );
    }

    #[test]
    fn wrappers_are_unwrapped_and_scripts_dropped() {
        let out = sanitize(
            "<div><span style=\"color: red\">red</span> <u>text</u><script>alert(1)</script></div>",
        );
        assert_eq!(out, "<p>red text</p>");
    }

    #[test]
    fn stray_characters_are_escaped() {
        assert_eq!(sanitize("a < b & c > d &amp; e"), "<p>a &lt; b &amp; c &gt; d &amp; e</p>");
    }

    #[test]
    fn break_runs_follow_compactness() {
        let input = "<p>one<br><br><br>two</p><p>three</p>";
        assert_eq!(
            Sanitizer::new(Compactness::Compact).sanitize(input),
            "<p>one<br>two</p>\n<p>three</p>"
        );
        assert_eq!(
            Sanitizer::new(Compactness::Relaxed).sanitize(input),
            "<p>one<br><br>two</p>\n<p>three</p>"
        );
        assert_eq!(
            Sanitizer::new(Compactness::Dense).sanitize(input),
            "<p>one<br>two</p><p>three</p>"
        );
    }

    #[test]
    fn plain_text_decodes_and_prefixes() {
        let text = to_plain_text(
            "<h1>Notes</h1><p>A &amp; B<br>C</p><ol><li>first</li><li data-indent=\"1\">second</li></ol>",
        );
        assert_eq!(text, "Notes\nA & B\nC\n1. first\n  2. second");
    }

    fn markup_fragment() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                Just("<p>".to_string()),
                Just("</p>".to_string()),
                Just("<h2>".to_string()),
                Just("</h4>".to_string()),
                Just("<ul>".to_string()),
                Just("</ul>".to_string()),
                Just("<ol>".to_string()),
                Just("<li data-indent=\"3\">".to_string()),
                Just("</li>".to_string()),
                Just("<strong>".to_string()),
                Just("</b>".to_string()),
                Just("<em>".to_string()),
                Just("</i>".to_string()),
                Just("<br>".to_string()),
                Just("<span>".to_string()),
                Just("<script>x</script>".to_string()),
                Just("\n\n".to_string()),
                "[a-z &<>;.]{0,12}",
            ],
            0..40,
        )
        .prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn sanitizing_is_a_fixed_point(input in markup_fragment()) {
            for compactness in [Compactness::Dense, Compactness::Compact, Compactness::Relaxed] {
                let sanitizer = Sanitizer::new(compactness);
                let once = sanitizer.sanitize(&input);
                prop_assert_eq!(sanitizer.sanitize(&once), once);
            }
        }
    }
}
