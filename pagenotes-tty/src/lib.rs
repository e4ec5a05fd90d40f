use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    terminal::{Clear, ClearType},
};
use pagenotes_core::{Command, PageRange, RenderImage};
use png::{BitDepth, ColorType, Encoder};
use thiserror::Error;
use tracing::debug;

const CHUNK_SIZE: usize = 4096;

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits a page as PNG and places it at the cursor, replacing the
    /// previous placement.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;
        debug!(
            width = image.width,
            height = image.height,
            bytes = buffer.len(),
            "drawing page"
        );

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(CHUNK_SIZE).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes every image placement from the screen.
    pub fn clear_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=A,q=2\u{1b}\\")?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Ends a synchronized update; the terminal paints everything buffered
    /// since [`KittyRenderer::begin_sync_update`] at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    Command(Command),
    BeginRangeInput,
    RangeInputChanged { input: String },
    RangeRejected { input: String, reason: RangeInputError },
    CancelRangeInput,
    GenerateNotes,
    CopyNotes,
    ResetNotes,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    RangeInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeInputError {
    #[error("enter a range as start-end")]
    Empty,
    #[error("{0:?} is not a page number")]
    NotANumber(String),
    #[error("page numbers start at 1")]
    Zero,
    #[error("start page {start} is after end page {end}")]
    Reversed { start: usize, end: usize },
}

/// Parses `start-end` (or a single page) as typed into the range prompt.
/// Bounds against the document are checked by the session.
pub fn parse_range_input(input: &str) -> Result<(usize, usize), RangeInputError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(RangeInputError::Empty);
    }
    let (start, end) = match input.split_once('-') {
        Some((start, end)) => (parse_page(start)?, parse_page(end)?),
        None => {
            let page = parse_page(input)?;
            (page, page)
        }
    };
    if start > end {
        return Err(RangeInputError::Reversed { start, end });
    }
    Ok((start, end))
}

fn parse_page(raw: &str) -> Result<usize, RangeInputError> {
    let raw = raw.trim();
    let page: usize = raw
        .parse()
        .map_err(|_| RangeInputError::NotANumber(raw.to_string()))?;
    if page == 0 {
        return Err(RangeInputError::Zero);
    }
    Ok(page)
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    range_buffer: String,
}

impl EventMapper {
    /// Scroll distance of one `j`/`k` press, in layout units.
    pub const SCROLL_STEP: f32 = 60.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.range_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiAction {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::RangeInput => self.map_event_range(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiAction {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiAction::None;
        };
        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiAction::None
            }
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                let count = self.take_count();
                UiAction::Command(Command::ScrollBy {
                    delta: Self::SCROLL_STEP * count as f32,
                })
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                let count = self.take_count();
                UiAction::Command(Command::ScrollBy {
                    delta: -Self::SCROLL_STEP * count as f32,
                })
            }
            (KeyCode::Char('J'), _) | (KeyCode::Char(' '), _) | (KeyCode::PageDown, _) => {
                let count = self.take_count();
                UiAction::Command(Command::NextPage { count })
            }
            (KeyCode::Char('K'), _) | (KeyCode::PageUp, _) => {
                let count = self.take_count();
                UiAction::Command(Command::PrevPage { count })
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                let page = self.take_count();
                UiAction::Command(Command::JumpTo { page })
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                let page = self.pending_count.take().unwrap_or(usize::MAX);
                self.reset_count();
                UiAction::Command(Command::JumpTo { page })
            }
            (KeyCode::Char('r'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::RangeInput);
                UiAction::BeginRangeInput
            }
            (KeyCode::Char('f'), KeyModifiers::NONE) => {
                self.reset_count();
                UiAction::Command(Command::ShowFullRange)
            }
            (KeyCode::Char('n'), KeyModifiers::NONE) => {
                self.reset_count();
                UiAction::GenerateNotes
            }
            (KeyCode::Char('y'), KeyModifiers::NONE) => {
                self.reset_count();
                UiAction::CopyNotes
            }
            (KeyCode::Char('R'), _) => {
                self.reset_count();
                UiAction::ResetNotes
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiAction::Quit
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiAction::Quit
            }
            _ => {
                self.reset_count();
                UiAction::None
            }
        }
    }

    fn map_event_range(&mut self, event: Event) -> UiAction {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiAction::None;
        };
        match (code, modifiers) {
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiAction::CancelRangeInput
            }
            (KeyCode::Enter, _) => {
                let input = std::mem::take(&mut self.range_buffer);
                self.set_mode(InputMode::Normal);
                match parse_range_input(&input) {
                    Ok((start, end)) => UiAction::Command(Command::SelectRange { start, end }),
                    Err(reason) => UiAction::RangeRejected { input, reason },
                }
            }
            (KeyCode::Backspace, _) => {
                self.range_buffer.pop();
                UiAction::RangeInputChanged {
                    input: self.range_buffer.clone(),
                }
            }
            (KeyCode::Char(c), mods)
                if (mods.is_empty() || mods == KeyModifiers::SHIFT)
                    && (c.is_ascii_digit() || c == '-' || c == ' ') =>
            {
                self.range_buffer.push(c);
                UiAction::RangeInputChanged {
                    input: self.range_buffer.clone(),
                }
            }
            _ => UiAction::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// What the user has typed but not yet committed: a count prefix or the
    /// range prompt.
    pub fn pending_input(&self) -> Option<String> {
        if self.mode == InputMode::RangeInput {
            return Some(format!("range: {}", self.range_buffer));
        }
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusLine {
    pub current_page: Option<usize>,
    pub page_count: usize,
    pub range: Option<PageRange>,
    pub pending_input: Option<String>,
    pub notes_running: bool,
    pub message: Option<String>,
}

impl StatusLine {
    /// Builds the status text, cut to `width` characters.
    pub fn render(&self, width: usize) -> String {
        let mut parts = Vec::new();
        match self.current_page {
            Some(page) => parts.push(format!("page {}/{}", page, self.page_count)),
            None => parts.push(format!("page -/{}", self.page_count)),
        }
        if let Some(range) = self.range {
            parts.push(range.describe());
        }
        if self.notes_running {
            parts.push("generating notes".to_string());
        }
        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            parts.push(message.to_string());
        }
        if let Some(pending) = self.pending_input.as_deref() {
            parts.push(pending.to_string());
        }
        parts.join(" | ").chars().take(width).collect()
    }
}

/// Writes `label` on terminal row `row`, clearing whatever was there.
pub fn write_status_line<W: Write>(writer: &mut W, row: u16, label: &str) -> io::Result<()> {
    crossterm::queue!(
        writer,
        cursor::MoveTo(0, row),
        Clear(ClearType::CurrentLine)
    )?;
    write!(writer, "{}", label)?;
    writer.flush()
}
