use tracing::debug;

use crate::range::PageRange;
use crate::window::ViewportWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollInstruction {
    pub offset: f32,
    pub behavior: ScrollBehavior,
    pub position: usize,
    pub page: usize,
}

/// Translates logical page requests into scroll offsets and tracks the
/// current page.
///
/// The current page is the page at the first visible position, not the one
/// covering most of the viewport.
#[derive(Debug, Clone, Default)]
pub struct PageNavigator {
    current_page: Option<usize>,
}

impl PageNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_page(&self) -> Option<usize> {
        self.current_page
    }

    /// Resolves a 1-based request within the active range to
    /// `(position, absolute page)`. Requests outside the range are clamped.
    pub fn resolve(range: &PageRange, requested: usize) -> Option<(usize, usize)> {
        let len = range.len();
        if len == 0 {
            return None;
        }
        let position = requested.clamp(1, len) - 1;
        range.page_at(position).map(|page| (position, page))
    }

    pub fn jump_to(
        &mut self,
        range: &PageRange,
        requested: usize,
        item_extent: f32,
    ) -> Option<ScrollInstruction> {
        let (position, page) = Self::resolve(range, requested)?;
        self.current_page = Some(page);
        debug!(requested, position, page, "jump resolved");
        Some(ScrollInstruction {
            offset: position as f32 * item_extent,
            behavior: ScrollBehavior::Smooth,
            position,
            page,
        })
    }

    /// Moves `delta` pages relative to the current page.
    pub fn step(
        &mut self,
        range: &PageRange,
        delta: isize,
        item_extent: f32,
    ) -> Option<ScrollInstruction> {
        let current = self
            .current_page
            .and_then(|page| range.position_of(page))
            .unwrap_or(0);
        let target = if delta.is_negative() {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta as usize)
        };
        self.jump_to(range, target.saturating_add(1), item_extent)
    }

    /// Follows a new window; returns whether the current page changed.
    pub fn sync(&mut self, window: &ViewportWindow, range: &PageRange) -> bool {
        let next = if window.is_empty() {
            None
        } else {
            range.page_at(window.visible_start)
        };
        let changed = next != self.current_page;
        self.current_page = next;
        changed
    }
}
