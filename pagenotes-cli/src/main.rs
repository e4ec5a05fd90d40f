use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::cursor;
use crossterm::event::{self, Event};
use crossterm::terminal::{self, Clear, ClearType, WindowSize};
use directories::ProjectDirs;
use pagenotes_core::config::API_KEY_ENV;
use pagenotes_core::{
    AppConfig, Command, DocumentInstance, DocumentProvider, ExtractionOrchestrator,
    OpenedDocument, PageRange, RangeEpoch, RenderImage, Session, SessionEvent,
};
use pagenotes_notes::{
    export, suggested_file_name, to_plain_text, Answerer, ChatContext, ExportFormat,
    NotesDocument, NotesPipeline, NotesWorkflow, RemoteClient, RunOutcome, RunReport,
    TextGenerator, WorkflowError,
};
use pagenotes_render::PdfiumProvider;
use pagenotes_tty::{
    parse_range_input, write_status_line, DrawParams, EventMapper, KittyRenderer, StatusLine,
    UiAction,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pagenotes",
    version,
    about = "Terminal PDF viewer that turns page ranges into study notes"
)]
struct Cli {
    /// Configuration file (defaults to config.toml in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Open a PDF in the kitty terminal viewer
    View {
        file: PathBuf,
        /// Page of the document to start on (1-based)
        #[arg(short = 'p', long = "page")]
        page: Option<usize>,
    },
    /// Extract a page range and write notes for it
    Notes {
        file: PathBuf,
        /// Pages to use, as start-end (defaults to the whole document)
        #[arg(short = 'r', long, value_parser = parse_range_arg)]
        range: Option<RangeArg>,
        #[arg(short = 'f', long, value_enum, default_value_t = FormatArg::Html)]
        format: FormatArg,
        /// File or directory to write to (defaults to stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        /// Write the extracted text instead of the notes
        #[arg(long)]
        raw: bool,
    },
    /// Ask one question about a page range
    Ask {
        file: PathBuf,
        question: String,
        #[arg(short = 'r', long, value_parser = parse_range_arg)]
        range: Option<RangeArg>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RangeArg {
    start: usize,
    end: usize,
}

fn parse_range_arg(raw: &str) -> Result<RangeArg, String> {
    parse_range_input(raw)
        .map(|(start, end)| RangeArg { start, end })
        .map_err(|err| err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Txt,
    Html,
}

impl From<FormatArg> for ExportFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Txt => ExportFormat::PlainText,
            FormatArg::Html => ExportFormat::Html,
        }
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_dirs = ProjectDirs::from("net", "pagenotes", "pagenotes")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let console = !matches!(cli.command, CliCommand::View { .. });
    let _log_guard = init_logging(&project_dirs, console)?;
    let config = load_config(cli.config.as_deref(), &project_dirs)?;

    match cli.command {
        CliCommand::View { file, page } => view(config, file, page).await,
        CliCommand::Notes {
            file,
            range,
            format,
            output,
            raw,
        } => notes(config, file, range, format.into(), output, raw).await,
        CliCommand::Ask {
            file,
            question,
            range,
        } => ask(config, file, range, &question).await,
    }
}

fn init_logging(project_dirs: &ProjectDirs, console: bool) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pagenotes.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // The viewer owns the terminal, so it only logs to the file.
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

/// An explicit `--config` must exist; the default location may be absent.
fn load_config(explicit: Option<&Path>, project_dirs: &ProjectDirs) -> Result<AppConfig> {
    let mut config = match explicit {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_optional(&project_dirs.config_dir().join("config.toml"))?,
    };
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

fn ensure_exists(file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("file does not exist: {}", file.display());
    }
    Ok(())
}

async fn open_document(file: &Path) -> Result<OpenedDocument> {
    ensure_exists(file)?;
    let provider = PdfiumProvider::new()?;
    provider
        .open(file)
        .await
        .with_context(|| format!("failed to open {:?}", file))
}

fn resolve_range(arg: Option<RangeArg>, page_count: usize) -> Result<PageRange> {
    match arg {
        None => Ok(PageRange::full(page_count)),
        Some(RangeArg { start, end }) => PageRange::selected(start, end, page_count)
            .with_context(|| format!("pages {start}-{end} do not fit a {page_count} page document")),
    }
}

fn remote_generator(config: &AppConfig) -> Option<Arc<dyn TextGenerator>> {
    RemoteClient::new(config.remote.clone()).map(|client| Arc::new(client) as Arc<dyn TextGenerator>)
}

fn build_workflow(config: &AppConfig, epoch: RangeEpoch) -> NotesWorkflow {
    let pipeline = NotesPipeline::new(&config.notes, remote_generator(config));
    NotesWorkflow::new(
        ExtractionOrchestrator::new(&config.extraction),
        Arc::new(pipeline),
        epoch,
    )
}

fn document_title(opened: &OpenedDocument) -> String {
    let info = opened.backend.info();
    info.metadata.title.clone().unwrap_or_else(|| {
        info.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Notes".to_string())
    })
}

async fn generate_notes(
    config: &AppConfig,
    opened: &OpenedDocument,
    range: Option<RangeArg>,
) -> Result<(NotesDocument, RunReport)> {
    let range = resolve_range(range, opened.backend.info().page_count)?;
    let workflow = build_workflow(config, RangeEpoch::new());
    let outcome = workflow
        .run_with(opened.text.as_ref(), range, |progress| {
            info!(
                page = progress.page,
                completed = progress.completed,
                total = progress.total,
                ok = progress.outcome.is_ok(),
                "page extracted"
            );
        })
        .await?;
    match outcome {
        RunOutcome::Applied(report) => {
            let document = workflow
                .document()
                .ok_or_else(|| anyhow!("notes run finished without a document"))?;
            Ok((document, report))
        }
        RunOutcome::Discarded => bail!("notes run was discarded"),
    }
}

fn output_target(output: Option<&Path>, source: &Path, format: ExportFormat) -> Option<PathBuf> {
    let output = output?;
    if output.is_dir() {
        Some(output.join(suggested_file_name(source, format)))
    } else {
        Some(output.to_path_buf())
    }
}

async fn notes(
    config: AppConfig,
    file: PathBuf,
    range: Option<RangeArg>,
    format: ExportFormat,
    output: Option<PathBuf>,
    raw: bool,
) -> Result<()> {
    let opened = open_document(&file).await?;
    let (document, report) = generate_notes(&config, &opened, range).await?;
    for advisory in &report.advisories {
        warn!(%advisory, "notes produced with advisory");
    }

    let body = if raw {
        match format {
            ExportFormat::Html => document.raw_view_markup(),
            ExportFormat::PlainText => format!("{}\n", document.source_text()),
        }
    } else {
        export(&document, format, &document_title(&opened))
    };

    match output_target(output.as_deref(), &file, format) {
        Some(path) => {
            fs::write(&path, body).with_context(|| format!("failed to write {:?}", path))?;
            info!(path = %path.display(), range = %report.range.describe(), "notes written");
        }
        None => {
            let mut stdout = io::stdout();
            stdout.write_all(body.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn ask(
    config: AppConfig,
    file: PathBuf,
    range: Option<RangeArg>,
    question: &str,
) -> Result<()> {
    let client = RemoteClient::new(config.remote.clone()).ok_or_else(|| {
        anyhow!("no remote credential; set remote.api_key in the config file or {API_KEY_ENV}")
    })?;
    let opened = open_document(&file).await?;
    let answer = answer_question(&config, &opened, range, &client, question).await?;
    println!("{}", to_plain_text(&answer));
    Ok(())
}

async fn answer_question(
    config: &AppConfig,
    opened: &OpenedDocument,
    range: Option<RangeArg>,
    answerer: &dyn Answerer,
    question: &str,
) -> Result<String> {
    let range = resolve_range(range, opened.backend.info().page_count)?;
    let extraction = ExtractionOrchestrator::new(&config.extraction)
        .extract(opened.text.as_ref(), &range)
        .await?;
    let mut chat = ChatContext::new();
    let reply = chat
        .ask(
            answerer,
            &extraction.text,
            question,
            config.notes.remote_timeout,
        )
        .await
        .ok_or_else(|| anyhow!("the question is empty"))?;
    Ok(reply.content.clone())
}

type RunResult = std::result::Result<RunOutcome, WorkflowError>;

async fn view(config: AppConfig, file: PathBuf, page: Option<usize>) -> Result<()> {
    ensure_exists(&file)?;
    let provider = PdfiumProvider::new()?;
    let mut session = Session::new(config.viewer.clone());
    session
        .open_with(&provider, file.clone())
        .await
        .with_context(|| format!("failed to open {:?}", file))?;
    let title = session
        .active()
        .and_then(|doc| doc.info.metadata.title.clone())
        .unwrap_or_else(|| "Notes".to_string());
    let workflow = build_workflow(&config, session.epoch());
    let notes_dir = std::env::current_dir().context("failed to resolve working directory")?;
    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel::<RunResult>();

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = KittyRenderer::new(stdout);
    let mut mapper = EventMapper::new();
    let mut message: Option<String> = None;
    let mut clipboard: Option<arboard::Clipboard> = None;

    session.apply(terminal_resize(terminal::window_size()?))?;
    if let Some(page) = page {
        session.apply(Command::JumpTo { page })?;
    }
    let mut dirty = true;

    loop {
        for event in session.drain_events() {
            if matches!(
                event,
                SessionEvent::RedrawNeeded
                    | SessionEvent::CurrentPageChanged(_)
                    | SessionEvent::RangeChanged(_)
            ) {
                dirty = true;
            }
        }
        while let Ok(result) = finished_rx.try_recv() {
            message = Some(settle_run(result, &workflow, &notes_dir, &file, &title));
        }

        if dirty {
            if let Some(doc) = session.active() {
                if let Err(err) = draw_page(&mut renderer, doc) {
                    warn!(error = %err, "failed to draw page");
                    message = Some(format!("{err:#}"));
                }
            }
            dirty = false;
        }
        draw_status(&mut renderer, &session, &mapper, &workflow, message.as_deref())?;

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let action = match event::read()? {
            Event::Resize(..) => UiAction::Command(terminal_resize(terminal::window_size()?)),
            other => mapper.map_event(other),
        };
        match action {
            UiAction::Command(command) => {
                if let Err(err) = session.apply(command) {
                    message = Some(err.to_string());
                }
            }
            UiAction::RangeRejected { reason, .. } => message = Some(reason.to_string()),
            UiAction::BeginRangeInput
            | UiAction::RangeInputChanged { .. }
            | UiAction::CancelRangeInput
            | UiAction::None => {}
            UiAction::GenerateNotes => {
                let (Some(text), Some(range)) = (session.text_source(), session.range()) else {
                    continue;
                };
                if workflow.is_running() {
                    message = Some("notes are already being generated".to_string());
                    continue;
                }
                let runner = workflow.clone();
                let finished = finished_tx.clone();
                tokio::spawn(async move {
                    let result = runner.run(text.as_ref(), range).await;
                    let _ = finished.send(result);
                });
                message = None;
            }
            UiAction::CopyNotes => message = Some(copy_notes(&mut clipboard, &workflow, &title)),
            UiAction::ResetNotes => {
                message = Some(reset_notes(&workflow, &notes_dir, &file, &title));
            }
            UiAction::Quit => break,
        }
    }

    {
        let mut writer = renderer.writer();
        crossterm::execute!(&mut writer, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    }
    Ok(())
}

fn settle_run(
    result: RunResult,
    workflow: &NotesWorkflow,
    notes_dir: &Path,
    source: &Path,
    title: &str,
) -> String {
    match result {
        Ok(RunOutcome::Applied(report)) => {
            let target = match write_viewer_notes(workflow, notes_dir, source, title) {
                Ok(target) => target,
                Err(err) => return format!("{err:#}"),
            };
            let mut message = format!(
                "notes for {} written to {}",
                report.range.describe(),
                target.display()
            );
            for advisory in &report.advisories {
                message.push_str("; ");
                message.push_str(&advisory.to_string());
            }
            message
        }
        Ok(RunOutcome::Discarded) => "page range changed, notes discarded".to_string(),
        Err(err) => format!("notes failed: {err}"),
    }
}

fn write_viewer_notes(
    workflow: &NotesWorkflow,
    notes_dir: &Path,
    source: &Path,
    title: &str,
) -> Result<PathBuf> {
    let document = workflow
        .document()
        .ok_or_else(|| anyhow!("no notes have been generated yet"))?;
    let target = notes_dir.join(suggested_file_name(source, ExportFormat::Html));
    fs::write(&target, export(&document, ExportFormat::Html, title))
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

fn clipboard_text(workflow: &NotesWorkflow, title: &str) -> Option<String> {
    workflow
        .document()
        .map(|document| export(&document, ExportFormat::PlainText, title))
}

/// `clipboard` is created on first use and must outlive the copy.
fn copy_notes(
    clipboard: &mut Option<arboard::Clipboard>,
    workflow: &NotesWorkflow,
    title: &str,
) -> String {
    let Some(text) = clipboard_text(workflow, title) else {
        return "no notes to copy yet".to_string();
    };
    if clipboard.is_none() {
        match arboard::Clipboard::new() {
            Ok(created) => *clipboard = Some(created),
            Err(err) => {
                warn!(error = %err, "clipboard unavailable");
                return format!("failed to access clipboard: {err}");
            }
        }
    }
    let Some(clipboard) = clipboard.as_mut() else {
        return "failed to access clipboard".to_string();
    };
    match clipboard.set_text(text.as_str()) {
        Ok(()) => {
            let chars = text.chars().count();
            debug!(chars, "copied notes to clipboard");
            format!("copied notes to clipboard ({chars} characters)")
        }
        Err(err) => {
            warn!(error = %err, "failed to copy notes");
            format!("failed to copy notes: {err}")
        }
    }
}

/// Throws away edits and regenerates the notes locally from the extracted
/// text of the last run.
fn reset_notes(workflow: &NotesWorkflow, notes_dir: &Path, source: &Path, title: &str) -> String {
    if workflow.is_running() {
        return "notes are being generated".to_string();
    }
    if !workflow.reset_from_source() {
        return "no notes to reset yet".to_string();
    }
    match write_viewer_notes(workflow, notes_dir, source, title) {
        Ok(target) => format!("notes reset from source and written to {}", target.display()),
        Err(err) => format!("{err:#}"),
    }
}

/// Terminal pixel size in layout units; falls back to a nominal cell size
/// when the terminal does not report pixels.
fn terminal_resize(size: WindowSize) -> Command {
    let (width, height) = if size.width > 0 && size.height > 0 {
        let status_row = f32::from(size.height) / f32::from(size.rows.max(1));
        (
            f32::from(size.width),
            f32::from(size.height) - status_row,
        )
    } else {
        (
            f32::from(size.columns) * 8.0,
            f32::from(size.rows.saturating_sub(1)) * 16.0,
        )
    };
    Command::Resize { width, height }
}

fn draw_page(renderer: &mut KittyRenderer<io::Stdout>, doc: &DocumentInstance) -> Result<()> {
    let Some(page) = doc.current_page() else {
        return Ok(());
    };
    let image = doc.render(page)?;
    let fraction = doc
        .state
        .range
        .position_of(page)
        .map(|position| {
            let extent = doc.item_extent();
            ((doc.state.scroll_offset - position as f32 * extent) / extent).clamp(0.0, 1.0)
        })
        .unwrap_or(0.0);
    let image = crop_top(&image, fraction);

    let size = terminal::window_size()?;
    let (columns, rows) = fit_cells(
        image.width,
        image.height,
        u32::from(size.columns),
        u32::from(size.rows).saturating_sub(1),
        u32::from(size.width),
        u32::from(size.height),
    );

    renderer.begin_sync_update()?;
    renderer.clear_images()?;
    renderer.clear_all()?;
    renderer.draw(&image, DrawParams::clamped(columns, rows))?;
    renderer.end_sync_update()?;

    if let Err(err) = doc.warm() {
        warn!(error = %err, "failed to prerender nearby pages");
    }
    Ok(())
}

fn draw_status(
    renderer: &mut KittyRenderer<io::Stdout>,
    session: &Session,
    mapper: &EventMapper,
    workflow: &NotesWorkflow,
    message: Option<&str>,
) -> Result<()> {
    let size = terminal::window_size()?;
    let status = StatusLine {
        current_page: session.active().and_then(|doc| doc.current_page()),
        page_count: session.active().map_or(0, |doc| doc.info.page_count),
        range: session.range(),
        pending_input: mapper.pending_input(),
        notes_running: workflow.is_running(),
        message: message.map(str::to_string),
    };
    let row = size.rows.saturating_sub(1);
    write_status_line(
        renderer.writer(),
        row,
        &status.render(usize::from(size.columns)),
    )?;
    Ok(())
}

/// Drops the part of the page scrolled past the top of the viewport.
fn crop_top(image: &RenderImage, fraction: f32) -> RenderImage {
    let skip = ((image.height as f32) * fraction).floor() as u32;
    let skip = skip.min(image.height.saturating_sub(1));
    if skip == 0 {
        return image.clone();
    }
    let stride = image.width as usize * 4;
    let start = (skip as usize * stride).min(image.pixels.len());
    RenderImage {
        width: image.width,
        height: image.height - skip,
        pixels: image.pixels[start..].to_vec(),
    }
}

/// Largest cell box that keeps the image aspect ratio inside the available
/// area. Without pixel metrics a cell is assumed to be twice as tall as wide.
fn fit_cells(
    image_width: u32,
    image_height: u32,
    columns: u32,
    rows: u32,
    pixel_width: u32,
    pixel_height: u32,
) -> (u32, u32) {
    let columns = columns.max(1);
    let rows = rows.max(1);
    if image_width == 0 || image_height == 0 {
        return (columns, rows);
    }

    let (cell_width, cell_height) = if pixel_width > 0 && pixel_height > 0 {
        (
            pixel_width as f32 / columns as f32,
            // The pixel height covers the status row as well.
            pixel_height as f32 / (rows + 1) as f32,
        )
    } else {
        (1.0, 2.0)
    };

    let area_width = columns as f32 * cell_width;
    let area_height = rows as f32 * cell_height;
    let ratio = (area_width / image_width as f32).min(area_height / image_height as f32);
    let draw_columns = ((image_width as f32 * ratio) / cell_width).round() as u32;
    let draw_rows = ((image_height as f32 * ratio) / cell_height).round() as u32;
    (draw_columns.clamp(1, columns), draw_rows.clamp(1, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pagenotes_core::{
        DocumentBackend, DocumentInfo, DocumentMetadata, OcrFailure, RenderRequest,
        TextExtractor,
    };
    use pagenotes_notes::{Advisory, ChatMessage, GenerationFailure, GenerationPath};
    use tempfile::tempdir;

    struct FakePdf {
        info: DocumentInfo,
    }

    impl DocumentBackend for FakePdf {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn render_page(&self, _request: RenderRequest) -> Result<RenderImage> {
            Ok(RenderImage {
                width: 1,
                height: 1,
                pixels: vec![0, 0, 0, 255],
            })
        }
    }

    #[async_trait]
    impl TextExtractor for FakePdf {
        async fn extract_page_text(&self, page_number: usize) -> Result<String, OcrFailure> {
            match page_number {
                2 => Err(OcrFailure::Backend("scanned page".to_string())),
                page => Ok(format!("Text of page {page}.")),
            }
        }
    }

    fn opened(pages: usize) -> OpenedDocument {
        let pdf = Arc::new(FakePdf {
            info: DocumentInfo {
                path: PathBuf::from("/tmp/lecture.pdf"),
                page_count: pages,
                metadata: DocumentMetadata {
                    title: Some("Cell Biology".to_string()),
                    author: None,
                },
            },
        });
        OpenedDocument {
            backend: pdf.clone(),
            text: pdf,
        }
    }

    struct EchoAnswerer;

    #[async_trait]
    impl Answerer for EchoAnswerer {
        async fn answer(
            &self,
            question: &str,
            grounding: &str,
            _history: &[ChatMessage],
        ) -> Result<String, GenerationFailure> {
            Ok(format!("<ul><li>{question}: {}</li></ul>", grounding.len()))
        }
    }

    #[test]
    fn cli_parses_notes_arguments() {
        let cli = Cli::try_parse_from([
            "pagenotes", "notes", "doc.pdf", "--range", "3-5", "--format", "txt",
        ])
        .unwrap();
        match cli.command {
            CliCommand::Notes {
                range, format, raw, ..
            } => {
                assert_eq!(range, Some(RangeArg { start: 3, end: 5 }));
                assert_eq!(format, FormatArg::Txt);
                assert!(!raw);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Cli::try_parse_from(["pagenotes", "notes", "doc.pdf", "-r", "5-3"]).is_err());
    }

    #[test]
    fn ranges_are_checked_against_page_count() {
        assert_eq!(resolve_range(None, 4).unwrap(), PageRange::full(4));
        assert_eq!(
            resolve_range(Some(RangeArg { start: 2, end: 3 }), 4).unwrap(),
            PageRange::selected(2, 3, 4).unwrap()
        );
        let err = resolve_range(Some(RangeArg { start: 2, end: 9 }), 4).unwrap_err();
        assert!(err.to_string().contains("pages 2-9"));
    }

    #[test]
    fn explicit_config_must_exist_but_default_may_not() {
        let dir = tempdir().unwrap();
        let dirs = ProjectDirs::from("net", "pagenotes", "pagenotes").unwrap();
        assert!(load_config(Some(&dir.path().join("missing.toml")), &dirs).is_err());

        let path = dir.path().join("config.toml");
        fs::write(&path, "[notes]\ncompactness = \"dense\"\n").unwrap();
        let config = load_config(Some(&path), &dirs).unwrap();
        assert_eq!(
            config.notes.compactness,
            pagenotes_core::Compactness::Dense
        );
    }

    #[test]
    fn output_directory_gets_suggested_name() {
        let dir = tempdir().unwrap();
        let source = Path::new("/docs/My Lecture.pdf");
        assert_eq!(
            output_target(Some(dir.path()), source, ExportFormat::Html),
            Some(dir.path().join("My_Lecture-notes.html"))
        );
        let file = dir.path().join("out.txt");
        assert_eq!(
            output_target(Some(&file), source, ExportFormat::PlainText),
            Some(file.clone())
        );
        assert_eq!(output_target(None, source, ExportFormat::Html), None);
    }

    #[tokio::test]
    async fn notes_fall_back_locally_without_credentials() {
        let config = AppConfig::default();
        let (document, report) = generate_notes(&config, &opened(3), None).await.unwrap();

        assert_eq!(report.path, GenerationPath::Fallback);
        assert_eq!(
            report.advisories[0],
            Advisory::PartialExtraction {
                failed_pages: vec![2]
            }
        );
        assert!(document.markup().starts_with("<h1>Notes</h1>\n<h2>Page 1</h2>"));
        assert!(document.markup().contains("<p>Text of page 3.</p>"));
        assert_eq!(document_title(&opened(3)), "Cell Biology");
    }

    #[tokio::test]
    async fn questions_are_grounded_in_the_range() {
        let config = AppConfig::default();
        let range = Some(RangeArg { start: 3, end: 3 });
        let answer = answer_question(&config, &opened(3), range, &EchoAnswerer, "why?")
            .await
            .unwrap();
        // "Page 3\nText of page 3." is 22 characters.
        assert_eq!(answer, "<ul><li>why?: 22</li></ul>");
        assert_eq!(to_plain_text(&answer), "- why?: 22");
    }

    #[tokio::test]
    async fn viewer_notes_can_be_copied_and_reset() {
        let dir = tempdir().unwrap();
        let source = Path::new("/tmp/lecture.pdf");
        let workflow = build_workflow(&AppConfig::default(), RangeEpoch::new());
        assert_eq!(clipboard_text(&workflow, "Cell Biology"), None);
        assert_eq!(
            reset_notes(&workflow, dir.path(), source, "Cell Biology"),
            "no notes to reset yet"
        );

        let pdf = opened(3);
        workflow
            .run(pdf.text.as_ref(), PageRange::full(3))
            .await
            .unwrap();
        let text = clipboard_text(&workflow, "Cell Biology").unwrap();
        assert!(text.starts_with("Notes\nPage 1\nText of page 1."));
        assert!(text.contains("Text of page 3."));
        assert!(text.ends_with('\n'));

        assert!(workflow.apply_edit("<p>scribbles</p>"));
        let message = reset_notes(&workflow, dir.path(), source, "Cell Biology");
        let target = dir.path().join("lecture-notes.html");
        assert_eq!(
            message,
            format!("notes reset from source and written to {}", target.display())
        );
        let html = fs::read_to_string(&target).unwrap();
        assert!(html.contains("<p>Text of page 1.</p>"));
        assert!(!html.contains("scribbles"));
    }

    #[test]
    fn crop_drops_rows_scrolled_past() {
        let image = RenderImage {
            width: 1,
            height: 4,
            pixels: (0..16).collect(),
        };
        let cropped = crop_top(&image, 0.5);
        assert_eq!(cropped.height, 2);
        assert_eq!(cropped.pixels, (8..16).collect::<Vec<u8>>());
        assert_eq!(crop_top(&image, 0.0).height, 4);
        assert_eq!(crop_top(&image, 1.0).height, 1);
    }

    #[test]
    fn page_fits_inside_available_cells() {
        // 80x24 terminal with 10x20 pixel cells, 23 rows for the page.
        let (columns, rows) = fit_cells(595, 842, 80, 23, 800, 480);
        assert_eq!(rows, 23);
        assert!(columns < 80);
        assert_eq!(columns, 33);

        assert_eq!(fit_cells(0, 0, 80, 23, 0, 0), (80, 23));
        assert_eq!(fit_cells(842, 595, 80, 23, 0, 0), (65, 23));
    }

    #[test]
    fn resize_falls_back_to_nominal_cells() {
        let size = WindowSize {
            rows: 25,
            columns: 100,
            width: 0,
            height: 0,
        };
        assert_eq!(
            terminal_resize(size),
            Command::Resize {
                width: 800.0,
                height: 384.0
            }
        );
    }
}
