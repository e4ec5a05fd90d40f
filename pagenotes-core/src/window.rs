//! Viewport windowing.
//!
//! Given the scroll position of a vertical list of pages, decides which
//! positions are visible and which must be kept materialized around them.
//! Everything in here is synchronous arithmetic; callers re-render after
//! receiving a new [`ViewportWindow`].

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, warn};

use crate::range::PageRange;

/// Page height at scale 1.0 (A4 at 72 dpi).
pub const DEFAULT_ITEM_EXTENT: f32 = 842.0;
pub const DEFAULT_OVERSCAN: usize = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowConfigError {
    #[error("item extent must be positive and finite, got {0}")]
    InvalidItemExtent(f32),
}

/// Visible and materialized positions, inclusive on both ends.
///
/// An empty window (nothing to render) has `visible_start > visible_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportWindow {
    pub visible_start: usize,
    pub visible_end: usize,
    pub materialize_start: usize,
    pub materialize_end: usize,
}

impl ViewportWindow {
    pub const EMPTY: ViewportWindow = ViewportWindow {
        visible_start: 1,
        visible_end: 0,
        materialize_start: 1,
        materialize_end: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.visible_start > self.visible_end
    }

    pub fn visible_positions(&self) -> std::ops::RangeInclusive<usize> {
        self.visible_start..=self.visible_end
    }

    pub fn materialized_positions(&self) -> std::ops::RangeInclusive<usize> {
        self.materialize_start..=self.materialize_end
    }
}

impl Default for ViewportWindow {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Inputs of a single window computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_offset: f32,
    pub viewport_extent: f32,
    pub item_extent: f32,
    pub item_count: usize,
}

/// Computes a window from raw metrics.
///
/// `item_extent` must already be positive; [`ViewportWindower::update`] guards
/// it before calling in here.
pub fn compute_window(
    scroll_offset: f32,
    viewport_extent: f32,
    item_extent: f32,
    item_count: usize,
    overscan: usize,
) -> ViewportWindow {
    if item_count == 0 {
        return ViewportWindow::EMPTY;
    }
    let last = item_count - 1;
    let scroll = non_negative(scroll_offset);
    let viewport = non_negative(viewport_extent);

    let visible_start = to_index((scroll / item_extent).floor()).min(last);
    let end_edge = ((scroll + viewport) / item_extent).ceil() - 1.0;
    let visible_end = to_index(end_edge).clamp(visible_start, last);

    ViewportWindow {
        visible_start,
        visible_end,
        materialize_start: visible_start.saturating_sub(overscan),
        materialize_end: visible_end.saturating_add(overscan).min(last),
    }
}

fn non_negative(value: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn to_index(value: f32) -> usize {
    if value.is_finite() && value > 0.0 {
        value as usize
    } else {
        0
    }
}

#[derive(Debug, Clone)]
pub struct ViewportWindower {
    overscan: usize,
    fallback_extent: f32,
    last: ViewportWindow,
}

impl ViewportWindower {
    pub fn new(overscan: usize, fallback_extent: f32) -> Result<Self, WindowConfigError> {
        if !(fallback_extent.is_finite() && fallback_extent > 0.0) {
            return Err(WindowConfigError::InvalidItemExtent(fallback_extent));
        }
        Ok(Self {
            overscan,
            fallback_extent,
            last: ViewportWindow::EMPTY,
        })
    }

    pub fn overscan(&self) -> usize {
        self.overscan
    }

    pub fn window(&self) -> ViewportWindow {
        self.last
    }

    /// Substitutes the fallback extent for unusable estimates.
    pub fn effective_extent(&self, item_extent: f32) -> f32 {
        if item_extent.is_finite() && item_extent > 0.0 {
            item_extent
        } else {
            warn!(
                item_extent,
                fallback = self.fallback_extent,
                "ignoring non-positive item extent"
            );
            self.fallback_extent
        }
    }

    pub fn update(&mut self, metrics: ScrollMetrics) -> ViewportWindow {
        let extent = self.effective_extent(metrics.item_extent);
        let window = compute_window(
            metrics.scroll_offset,
            metrics.viewport_extent,
            extent,
            metrics.item_count,
            self.overscan,
        );
        if window != self.last {
            debug!(
                visible_start = window.visible_start,
                visible_end = window.visible_end,
                materialize_start = window.materialize_start,
                materialize_end = window.materialize_end,
                "viewport window changed"
            );
        }
        self.last = window;
        window
    }

    pub fn total_extent(&self, item_count: usize, item_extent: f32) -> f32 {
        item_count as f32 * self.effective_extent(item_extent)
    }

    pub fn max_scroll_offset(&self, item_count: usize, item_extent: f32, viewport: f32) -> f32 {
        (self.total_extent(item_count, item_extent) - non_negative(viewport)).max(0.0)
    }
}

/// Page numbers currently eligible for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedSet {
    pages: BTreeSet<usize>,
}

impl LoadedSet {
    pub fn contains(&self, page: usize) -> bool {
        self.pages.contains(&page)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.pages.iter().copied()
    }
}

/// Maps every materialized position through the range enumeration.
pub fn derive_loaded_set(window: &ViewportWindow, range: &PageRange) -> LoadedSet {
    let pages = if window.is_empty() {
        BTreeSet::new()
    } else {
        window
            .materialized_positions()
            .filter_map(|position| range.page_at(position))
            .collect()
    };
    LoadedSet { pages }
}

/// Keeps the loaded set in step with the windower. The set is rebuilt on
/// every update rather than patched.
#[derive(Debug, Clone, Default)]
pub struct LoadStateTracker {
    loaded: LoadedSet,
}

impl LoadStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, window: &ViewportWindow, range: &PageRange) -> &LoadedSet {
        self.loaded = derive_loaded_set(window, range);
        &self.loaded
    }

    pub fn is_loaded(&self, page: usize) -> bool {
        self.loaded.contains(page)
    }

    pub fn loaded(&self) -> &LoadedSet {
        &self.loaded
    }
}
