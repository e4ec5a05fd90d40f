//! Line-oriented stages that turn generated text into loose markup ahead of
//! sanitation.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::sanitize::{escape_stray, MAX_INDENT};

static BOLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*([^*<>\n]+?)\*\*").expect("valid bold pattern"));

static DANGLING_BOLD_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\*\*\s*").expect("valid bold pattern"));

static DANGLING_BOLD_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\*\*$").expect("valid bold pattern"));

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s{0,3}(#+)\s+(\S.*)$").expect("valid heading pattern"));

static BULLET_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)[*\-•]\s+(\S.*)$").expect("valid bullet pattern"));

static ORDERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)\d+\.\s+(\S.*)$").expect("valid ordered item pattern"));

static BLOCK_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*</?(?:h[1-6]|p|div|ul|ol|li)(?:\s[^<>]*)?/?>").expect("valid block pattern")
});

/// Stage one: escapes stray markup characters, turns `**text**` into
/// `<strong>` and leading `#` runs into headings.
pub fn normalize_tokens(input: &str) -> String {
    input
        .lines()
        .map(normalize_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_line(line: &str) -> String {
    let escaped = escape_stray(line);
    let bolded = BOLD.replace_all(&escaped, "<strong>$1</strong>");
    let stripped = DANGLING_BOLD_START.replace(&bolded, "");
    let stripped = DANGLING_BOLD_END.replace(&stripped, "");

    match HEADING.captures(&stripped) {
        Some(caps) => {
            let level = caps[1].len().min(3);
            format!("<h{level}>{}</h{level}>", caps[2].trim())
        }
        None => stripped.into_owned(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Unordered,
    Ordered,
}

impl ListKind {
    fn tag(self) -> &'static str {
        match self {
            ListKind::Unordered => "ul",
            ListKind::Ordered => "ol",
        }
    }
}

struct ListLine<'a> {
    kind: ListKind,
    indent: u8,
    text: &'a str,
}

fn classify(line: &str) -> Option<ListLine<'_>> {
    let (kind, caps) = if let Some(caps) = BULLET_ITEM.captures(line) {
        (ListKind::Unordered, caps)
    } else {
        (ListKind::Ordered, ORDERED_ITEM.captures(line)?)
    };
    let leading = caps.get(1).map_or("", |m| m.as_str());
    let text = caps.get(2).map_or("", |m| m.as_str()).trim_end();
    Some(ListLine {
        kind,
        indent: indent_hint(leading),
        text,
    })
}

/// Two columns of leading whitespace per level; a tab counts four columns.
fn indent_hint(leading: &str) -> u8 {
    let columns: usize = leading
        .chars()
        .map(|ch| if ch == '\t' { 4 } else { 1 })
        .sum();
    (columns / 2).min(usize::from(MAX_INDENT)) as u8
}

fn render_item(item: &ListLine<'_>) -> String {
    if item.indent > 0 {
        format!("<li data-indent=\"{}\">{}</li>", item.indent, item.text)
    } else {
        format!("<li>{}</li>", item.text)
    }
}

/// Stage two: wraps runs of bullet or numbered lines in one list container
/// each. Blank lines between items of the same kind do not end a run.
pub fn structure_lists(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut index = 0;

    while index < lines.len() {
        let Some(first) = classify(lines[index]) else {
            out.push(lines[index].to_string());
            index += 1;
            continue;
        };
        let kind = first.kind;
        out.push(format!("<{}>", kind.tag()));
        out.push(render_item(&first));
        index += 1;

        loop {
            let mut next = index;
            while next < lines.len() && lines[next].trim().is_empty() {
                next += 1;
            }
            match lines.get(next).and_then(|line| classify(line)) {
                Some(item) if item.kind == kind => {
                    out.push(render_item(&item));
                    index = next + 1;
                }
                _ => break,
            }
        }
        out.push(format!("</{}>", kind.tag()));
    }
    out.join("\n")
}

/// Stage three: blank lines separate paragraphs, single line breaks inside
/// running text become `<br>`. Lines that already open or close a block are
/// passed through unwrapped.
pub fn fold_paragraphs(input: &str) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut run: Vec<&str> = Vec::new();

    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush_run(&mut run, &mut blocks);
        } else if BLOCK_LINE.is_match(trimmed) {
            flush_run(&mut run, &mut blocks);
            blocks.push(trimmed.to_string());
        } else {
            run.push(trimmed);
        }
    }
    flush_run(&mut run, &mut blocks);
    blocks.join("\n")
}

fn flush_run(run: &mut Vec<&str>, blocks: &mut Vec<String>) {
    if !run.is_empty() {
        blocks.push(format!("<p>{}</p>", run.join("<br>")));
        run.clear();
    }
}
