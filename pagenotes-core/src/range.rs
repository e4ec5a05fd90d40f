use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("document has no pages")]
    EmptyDocument,
    #[error("range start {start} is after range end {end}")]
    Inverted { start: usize, end: usize },
    #[error("page {page} is outside the document (1-{total})")]
    OutOfBounds { page: usize, total: usize },
}

/// The active enumeration of pages.
///
/// Positions are 0-based indices into the enumeration, page numbers are
/// 1-based and absolute within the document. Every position/page translation
/// in the viewer goes through this type so the windower and the navigator
/// agree on the same mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageRange {
    Full { total: usize },
    Selected { start: usize, end: usize },
}

impl PageRange {
    pub fn full(total: usize) -> Self {
        PageRange::Full { total }
    }

    pub fn selected(start: usize, end: usize, total: usize) -> Result<Self, RangeError> {
        if total == 0 {
            return Err(RangeError::EmptyDocument);
        }
        if start == 0 || start > total {
            return Err(RangeError::OutOfBounds { page: start, total });
        }
        if end > total {
            return Err(RangeError::OutOfBounds { page: end, total });
        }
        if start > end {
            return Err(RangeError::Inverted { start, end });
        }
        Ok(PageRange::Selected { start, end })
    }

    pub fn is_selected(&self) -> bool {
        matches!(self, PageRange::Selected { .. })
    }

    pub fn len(&self) -> usize {
        match *self {
            PageRange::Full { total } => total,
            PageRange::Selected { start, end } => end - start + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn first_page(&self) -> Option<usize> {
        self.page_at(0)
    }

    pub fn last_page(&self) -> Option<usize> {
        self.len().checked_sub(1).and_then(|last| self.page_at(last))
    }

    /// Page number at a 0-based position, `None` past the end.
    pub fn page_at(&self, position: usize) -> Option<usize> {
        if position >= self.len() {
            return None;
        }
        match *self {
            PageRange::Full { .. } => Some(position + 1),
            PageRange::Selected { start, .. } => Some(start + position),
        }
    }

    pub fn position_of(&self, page: usize) -> Option<usize> {
        if !self.contains(page) {
            return None;
        }
        match *self {
            PageRange::Full { .. } => Some(page - 1),
            PageRange::Selected { start, .. } => Some(page - start),
        }
    }

    pub fn contains(&self, page: usize) -> bool {
        match *self {
            PageRange::Full { total } => page >= 1 && page <= total,
            PageRange::Selected { start, end } => page >= start && page <= end,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter_map(move |position| self.page_at(position))
    }

    pub fn describe(&self) -> String {
        match *self {
            PageRange::Full { total } => format!("all {} pages", total),
            PageRange::Selected { start, end } => format!("pages {}-{}", start, end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_range_is_identity_plus_one() {
        let range = PageRange::full(4);
        assert_eq!(range.len(), 4);
        assert_eq!(range.page_at(0), Some(1));
        assert_eq!(range.page_at(3), Some(4));
        assert_eq!(range.page_at(4), None);
        assert_eq!(range.position_of(4), Some(3));
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn selected_range_offsets_by_start() {
        let range = PageRange::selected(10, 15, 20).unwrap();
        assert_eq!(range.len(), 6);
        assert_eq!(range.page_at(0), Some(10));
        assert_eq!(range.page_at(5), Some(15));
        assert_eq!(range.position_of(12), Some(2));
        assert_eq!(range.position_of(9), None);
        assert!(!range.contains(16));
        assert_eq!(range.last_page(), Some(15));
    }

    #[test]
    fn selected_range_validates_bounds() {
        assert_eq!(
            PageRange::selected(0, 3, 10),
            Err(RangeError::OutOfBounds { page: 0, total: 10 })
        );
        assert_eq!(
            PageRange::selected(4, 11, 10),
            Err(RangeError::OutOfBounds { page: 11, total: 10 })
        );
        assert_eq!(
            PageRange::selected(5, 3, 10),
            Err(RangeError::Inverted { start: 5, end: 3 })
        );
        assert_eq!(PageRange::selected(1, 1, 0), Err(RangeError::EmptyDocument));
        assert!(PageRange::selected(3, 3, 10).is_ok());
    }

    #[test]
    fn empty_full_range_has_no_pages() {
        let range = PageRange::full(0);
        assert!(range.is_empty());
        assert_eq!(range.first_page(), None);
        assert_eq!(range.last_page(), None);
    }
}
