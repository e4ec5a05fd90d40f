pub mod config;
pub mod epoch;
pub mod extract;
pub mod navigator;
pub mod range;
pub mod window;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub use config::{AppConfig, Compactness, ConfigError, ViewerConfig};
pub use epoch::{EpochTicket, RangeEpoch};
pub use extract::{
    ExtractionError, ExtractionOrchestrator, ExtractionProgress, ExtractionResult, OcrFailure,
    PageFailure, PageText, TextExtractor,
};
pub use navigator::{PageNavigator, ScrollBehavior, ScrollInstruction};
pub use range::{PageRange, RangeError};
pub use window::{
    LoadStateTracker, LoadedSet, ScrollMetrics, ViewportWindow, ViewportWindower,
    WindowConfigError,
};

#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    /// 0-based index into the document.
    pub page_index: usize,
    pub scale: f32,
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("page {page} is not in the materialized window")]
    NotMaterialized { page: usize },
    #[error("failed to render page {page}")]
    Backend {
        page: usize,
        #[source]
        source: anyhow::Error,
    },
}

pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;
}

/// A loaded source file: its render capability and its text capability.
#[derive(Clone)]
pub struct OpenedDocument {
    pub backend: Arc<dyn DocumentBackend>,
    pub text: Arc<dyn TextExtractor>,
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<OpenedDocument>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerState {
    pub range: PageRange,
    pub scroll_offset: f32,
    pub viewport_width: f32,
    pub viewport_height: f32,
    pub scale: f32,
    pub window: ViewportWindow,
}

pub struct DocumentInstance {
    pub info: DocumentInfo,
    pub backend: Arc<dyn DocumentBackend>,
    pub text: Arc<dyn TextExtractor>,
    pub state: ViewerState,
    page_extent: f32,
    windower: ViewportWindower,
    tracker: LoadStateTracker,
    navigator: PageNavigator,
    render_cache: Mutex<HashMap<CacheKey, RenderImage>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Recomputed {
    window_changed: bool,
    page_changed: bool,
}

impl DocumentInstance {
    pub fn new(
        opened: OpenedDocument,
        viewer: &ViewerConfig,
    ) -> Result<Self, WindowConfigError> {
        let info = opened.backend.info().clone();
        let windower = ViewportWindower::new(viewer.overscan, viewer.page_extent)?;
        let mut doc = Self {
            state: ViewerState {
                range: PageRange::full(info.page_count),
                scroll_offset: 0.0,
                viewport_width: 0.0,
                viewport_height: 0.0,
                scale: viewer.default_scale,
                window: ViewportWindow::EMPTY,
            },
            info,
            backend: opened.backend,
            text: opened.text,
            page_extent: viewer.page_extent,
            windower,
            tracker: LoadStateTracker::new(),
            navigator: PageNavigator::new(),
            render_cache: Mutex::new(HashMap::new()),
        };
        doc.recompute();
        Ok(doc)
    }

    pub fn item_extent(&self) -> f32 {
        self.windower
            .effective_extent(self.page_extent * self.state.scale)
    }

    pub fn current_page(&self) -> Option<usize> {
        self.navigator.current_page()
    }

    pub fn loaded(&self) -> &LoadedSet {
        self.tracker.loaded()
    }

    pub fn is_loaded(&self, page: usize) -> bool {
        self.tracker.is_loaded(page)
    }

    pub fn visible_pages(&self) -> Vec<usize> {
        if self.state.window.is_empty() {
            return Vec::new();
        }
        self.state
            .window
            .visible_positions()
            .filter_map(|position| self.state.range.page_at(position))
            .collect()
    }

    /// Renders a page from the loaded set, reusing cached output.
    pub fn render(&self, page: usize) -> std::result::Result<RenderImage, RenderError> {
        if !self.tracker.is_loaded(page) {
            return Err(RenderError::NotMaterialized { page });
        }
        let key = CacheKey::new(page, self.state.scale);
        if let Some(image) = self.render_cache.lock().get(&key).cloned() {
            return Ok(image);
        }
        let image = self
            .backend
            .render_page(RenderRequest {
                page_index: page - 1,
                scale: self.state.scale,
            })
            .map_err(|source| RenderError::Backend { page, source })?;
        self.render_cache.lock().insert(key, image.clone());
        Ok(image)
    }

    /// Renders every loaded page that is not cached yet. Returns how many
    /// pages were rendered; the last failure is reported after trying all.
    pub fn warm(&self) -> std::result::Result<usize, RenderError> {
        let mut rendered = 0;
        let mut last_error = None;
        for page in self.tracker.loaded().iter() {
            let key = CacheKey::new(page, self.state.scale);
            if self.render_cache.lock().contains_key(&key) {
                continue;
            }
            match self.render(page) {
                Ok(_) => rendered += 1,
                Err(err) => last_error = Some(err),
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(rendered),
        }
    }

    pub fn cached_pages(&self) -> Vec<usize> {
        let mut pages: Vec<_> = self.render_cache.lock().keys().map(|k| k.page).collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    fn max_scroll_offset(&self) -> f32 {
        self.windower.max_scroll_offset(
            self.state.range.len(),
            self.item_extent(),
            self.state.viewport_height,
        )
    }

    fn set_scroll_offset(&mut self, offset: f32) {
        let offset = if offset.is_finite() { offset } else { 0.0 };
        self.state.scroll_offset = offset.clamp(0.0, self.max_scroll_offset());
    }

    fn recompute(&mut self) -> Recomputed {
        let previous = self.state.window;
        let window = self.windower.update(ScrollMetrics {
            scroll_offset: self.state.scroll_offset,
            viewport_extent: self.state.viewport_height,
            item_extent: self.item_extent(),
            item_count: self.state.range.len(),
        });
        self.state.window = window;
        self.tracker.update(&window, &self.state.range);

        let window_changed = window != previous;
        let page_changed = if window.visible_start != previous.visible_start
            || self.navigator.current_page().is_none()
        {
            let before = self.navigator.current_page();
            self.navigator.sync(&window, &self.state.range);
            before != self.navigator.current_page()
        } else {
            false
        };

        let tracker = &self.tracker;
        self.render_cache
            .lock()
            .retain(|key, _| tracker.is_loaded(key.page));

        Recomputed {
            window_changed,
            page_changed,
        }
    }

    fn jump(&mut self, instruction: Option<ScrollInstruction>) -> Option<ScrollInstruction> {
        let mut instruction = instruction?;
        self.set_scroll_offset(instruction.offset);
        instruction.offset = self.state.scroll_offset;
        Some(instruction)
    }

    fn set_range(&mut self, range: PageRange) {
        self.state.range = range;
        self.state.scroll_offset = 0.0;
        self.navigator = PageNavigator::new();
        self.render_cache.lock().clear();
    }

    fn resize(&mut self, width: f32, height: f32, viewer: &ViewerConfig) {
        let width = if width.is_finite() { width.max(0.0) } else { 0.0 };
        let height = if height.is_finite() { height.max(0.0) } else { 0.0 };
        let old_extent = self.item_extent();
        self.state.viewport_width = width;
        self.state.viewport_height = height;
        let scale = viewer.display_scale_for_width(width);
        if (scale - self.state.scale).abs() > f32::EPSILON {
            debug!(from = self.state.scale, to = scale, "display scale breakpoint crossed");
            self.state.scale = scale;
            let position = self.state.scroll_offset / old_extent;
            self.state.scroll_offset = position * self.item_extent();
        }
        let offset = self.state.scroll_offset;
        self.set_scroll_offset(offset);
    }
}

const SCALE_QUANTUM: f32 = 1000.0;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
struct CacheKey {
    page: usize,
    scale_milli: u32,
}

impl CacheKey {
    fn new(page: usize, scale: f32) -> Self {
        Self {
            page,
            scale_milli: quantize_scale(scale),
        }
    }
}

fn quantize_scale(scale: f32) -> u32 {
    let scaled = (scale * SCALE_QUANTUM).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ScrollBy { delta: f32 },
    ScrollTo { offset: f32 },
    Resize { width: f32, height: f32 },
    JumpTo { page: usize },
    NextPage { count: usize },
    PrevPage { count: usize },
    SelectRange { start: usize, end: usize },
    ShowFullRange,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    DocumentOpened(PathBuf),
    RedrawNeeded,
    RangeChanged(PageRange),
    CurrentPageChanged(usize),
    ScrollRequested(ScrollInstruction),
}

pub struct Session {
    document: Option<DocumentInstance>,
    viewer: ViewerConfig,
    epoch: RangeEpoch,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl Session {
    pub fn new(viewer: ViewerConfig) -> Self {
        Self {
            document: None,
            viewer,
            epoch: RangeEpoch::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SessionEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn drain_events(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn epoch(&self) -> RangeEpoch {
        self.epoch.clone()
    }

    pub fn active(&self) -> Option<&DocumentInstance> {
        self.document.as_ref()
    }

    pub fn range(&self) -> Option<PageRange> {
        self.document.as_ref().map(|doc| doc.state.range)
    }

    pub fn text_source(&self) -> Option<Arc<dyn TextExtractor>> {
        self.document.as_ref().map(|doc| Arc::clone(&doc.text))
    }

    /// Replaces the open document; outstanding range work becomes stale.
    #[instrument(skip(self, provider))]
    pub async fn open_with<P: DocumentProvider>(
        &mut self,
        provider: &P,
        path: PathBuf,
    ) -> Result<()> {
        let opened = provider.open(&path).await?;
        self.attach(opened)
    }

    pub fn attach(&mut self, opened: OpenedDocument) -> Result<()> {
        let doc = DocumentInstance::new(opened, &self.viewer)?;
        info!(
            path = %doc.info.path.display(),
            pages = doc.info.page_count,
            "document opened"
        );
        let path = doc.info.path.clone();
        self.document = Some(doc);
        self.epoch.advance();
        let mut events = self.events.lock();
        events.push(SessionEvent::DocumentOpened(path));
        events.push(SessionEvent::RedrawNeeded);
        Ok(())
    }

    pub fn apply(&mut self, command: Command) -> Result<()> {
        let Some(doc) = self.document.as_mut() else {
            return Ok(());
        };

        let mut range_changed = false;
        let mut instruction = None;
        match command {
            Command::ScrollBy { delta } => {
                let offset = doc.state.scroll_offset + delta;
                doc.set_scroll_offset(offset);
            }
            Command::ScrollTo { offset } => doc.set_scroll_offset(offset),
            Command::Resize { width, height } => doc.resize(width, height, &self.viewer),
            Command::JumpTo { page } => {
                let extent = doc.item_extent();
                let resolved = doc.navigator.jump_to(&doc.state.range, page, extent);
                instruction = doc.jump(resolved);
            }
            Command::NextPage { count } => {
                let extent = doc.item_extent();
                let delta = isize::try_from(count).unwrap_or(isize::MAX);
                let resolved = doc.navigator.step(&doc.state.range, delta, extent);
                instruction = doc.jump(resolved);
            }
            Command::PrevPage { count } => {
                let extent = doc.item_extent();
                let delta = isize::try_from(count).map(|c| -c).unwrap_or(isize::MIN);
                let resolved = doc.navigator.step(&doc.state.range, delta, extent);
                instruction = doc.jump(resolved);
            }
            Command::SelectRange { start, end } => {
                let range = PageRange::selected(start, end, doc.info.page_count)?;
                doc.set_range(range);
                range_changed = true;
            }
            Command::ShowFullRange => {
                doc.set_range(PageRange::full(doc.info.page_count));
                range_changed = true;
            }
        }

        let recomputed = doc.recompute();
        let current = doc.current_page();
        let range = doc.state.range;

        if range_changed {
            self.epoch.advance();
            info!(range = %range.describe(), "page range changed");
        }

        let mut events = self.events.lock();
        if let Some(instruction) = instruction {
            events.push(SessionEvent::ScrollRequested(instruction));
        }
        if range_changed {
            events.push(SessionEvent::RangeChanged(range));
        }
        if recomputed.page_changed || instruction.is_some() {
            if let Some(page) = current {
                events.push(SessionEvent::CurrentPageChanged(page));
            }
        }
        if range_changed || recomputed.window_changed || instruction.is_some() {
            events.push(SessionEvent::RedrawNeeded);
        }
        Ok(())
    }
}
