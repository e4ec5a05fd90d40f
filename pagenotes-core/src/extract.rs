use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::ExtractionConfig;
use crate::epoch::EpochTicket;
use crate::range::PageRange;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OcrFailure {
    #[error("text extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("page {page} is not part of the document")]
    MissingPage { page: usize },
    #[error("text extraction failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("the selected range has no pages")]
    EmptyRange,
    #[error("extraction aborted on page {page}: {source}")]
    PageFailed { page: usize, source: OcrFailure },
    #[error("no text could be extracted from {pages} page(s)")]
    NothingExtracted { pages: usize },
    #[error("the page range changed while extraction was running")]
    Superseded,
}

/// Per-page text capability (text layer or OCR).
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_page_text(&self, page_number: usize) -> Result<String, OcrFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub page: usize,
    pub reason: OcrFailure,
}

/// Output of one extraction run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub range: PageRange,
    pub text: String,
    pub per_page: Vec<PageText>,
    pub failures: Vec<PageFailure>,
}

impl ExtractionResult {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn failed_pages(&self) -> Vec<usize> {
        self.failures.iter().map(|failure| failure.page).collect()
    }
}

#[derive(Debug)]
pub struct ExtractionProgress<'a> {
    pub page: usize,
    pub completed: usize,
    pub total: usize,
    pub outcome: Result<&'a str, &'a OcrFailure>,
}

pub fn page_marker(page: usize) -> String {
    format!("Page {}", page)
}

pub fn failed_page_placeholder(page: usize) -> String {
    format!("[text unavailable for page {}]", page)
}

/// Joins page texts, each preceded by its `Page N` marker line.
pub fn concatenate(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| {
            let body = page.text.trim();
            if body.is_empty() {
                page_marker(page.page)
            } else {
                format!("{}\n{}", page_marker(page.page), body)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone)]
pub struct ExtractionOrchestrator {
    page_timeout: Duration,
    abort_on_page_failure: bool,
}

impl ExtractionOrchestrator {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            page_timeout: config.page_timeout,
            abort_on_page_failure: config.abort_on_page_failure,
        }
    }

    pub async fn extract(
        &self,
        source: &dyn TextExtractor,
        range: &PageRange,
    ) -> Result<ExtractionResult, ExtractionError> {
        self.extract_with(source, range, None, |_| {}).await
    }

    /// Extracts page by page in range order. Pages are awaited one at a time;
    /// `on_page` sees every outcome as soon as it is known.
    #[instrument(skip_all, fields(range = %range.describe()))]
    pub async fn extract_with<F>(
        &self,
        source: &dyn TextExtractor,
        range: &PageRange,
        ticket: Option<&EpochTicket>,
        mut on_page: F,
    ) -> Result<ExtractionResult, ExtractionError>
    where
        F: FnMut(ExtractionProgress<'_>) + Send,
    {
        let total = range.len();
        if total == 0 {
            return Err(ExtractionError::EmptyRange);
        }

        let mut per_page = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, page) in range.iter().enumerate() {
            if ticket.map_or(false, |ticket| !ticket.is_current()) {
                info!(page, "range changed, stopping extraction early");
                return Err(ExtractionError::Superseded);
            }

            let outcome = match tokio::time::timeout(
                self.page_timeout,
                source.extract_page_text(page),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(OcrFailure::Timeout(self.page_timeout)),
            };

            match outcome {
                Ok(text) => {
                    on_page(ExtractionProgress {
                        page,
                        completed: index + 1,
                        total,
                        outcome: Ok(&text),
                    });
                    per_page.push(PageText {
                        page,
                        text: text.trim().to_string(),
                    });
                }
                Err(reason) => {
                    warn!(page, %reason, "page text extraction failed");
                    on_page(ExtractionProgress {
                        page,
                        completed: index + 1,
                        total,
                        outcome: Err(&reason),
                    });
                    if self.abort_on_page_failure {
                        return Err(ExtractionError::PageFailed {
                            page,
                            source: reason,
                        });
                    }
                    per_page.push(PageText {
                        page,
                        text: failed_page_placeholder(page),
                    });
                    failures.push(PageFailure { page, reason });
                }
            }
        }

        if failures.len() == total {
            return Err(ExtractionError::NothingExtracted { pages: total });
        }

        info!(
            pages = total,
            failed = failures.len(),
            "extraction finished"
        );
        Ok(ExtractionResult {
            range: *range,
            text: concatenate(&per_page),
            per_page,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::epoch::RangeEpoch;

    struct FakeExtractor {
        pages: HashMap<usize, Result<String, OcrFailure>>,
        calls: Mutex<Vec<usize>>,
    }

    impl FakeExtractor {
        fn new(pages: Vec<(usize, Result<&str, OcrFailure>)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(page, result)| (page, result.map(str::to_string)))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextExtractor for FakeExtractor {
        async fn extract_page_text(&self, page_number: usize) -> Result<String, OcrFailure> {
            self.calls.lock().push(page_number);
            self.pages
                .get(&page_number)
                .cloned()
                .unwrap_or(Err(OcrFailure::MissingPage { page: page_number }))
        }
    }

    struct SlowExtractor;

    #[async_trait]
    impl TextExtractor for SlowExtractor {
        async fn extract_page_text(&self, page_number: usize) -> Result<String, OcrFailure> {
            if page_number == 2 {
                tokio::time::sleep(Duration::from_secs(120)).await;
            }
            Ok(format!("text {}", page_number))
        }
    }

    fn orchestrator(abort: bool) -> ExtractionOrchestrator {
        ExtractionOrchestrator::new(&ExtractionConfig {
            page_timeout: Duration::from_secs(30),
            abort_on_page_failure: abort,
        })
    }

    #[tokio::test]
    async fn pages_are_extracted_in_order_with_markers() {
        let source = FakeExtractor::new(vec![
            (3, Ok("  third page  ")),
            (4, Ok("fourth page")),
            (5, Ok("")),
        ]);
        let range = PageRange::selected(3, 5, 10).unwrap();
        let result = orchestrator(false).extract(&source, &range).await.unwrap();

        assert_eq!(*source.calls.lock(), vec![3, 4, 5]);
        assert_eq!(
            result.text,
            "Page 3\nthird page\n\nPage 4\nfourth page\n\nPage 5"
        );
        assert_eq!(result.per_page.len(), 3);
        assert!(!result.is_partial());
    }

    #[tokio::test]
    async fn failed_pages_get_placeholders_and_are_reported() {
        let source = FakeExtractor::new(vec![
            (1, Ok("one")),
            (2, Err(OcrFailure::Backend("bad image".into()))),
            (3, Ok("three")),
        ]);
        let mut seen = Vec::new();
        let result = orchestrator(false)
            .extract_with(&source, &PageRange::full(3), None, |progress| {
                seen.push((progress.page, progress.completed, progress.outcome.is_ok()));
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![(1, 1, true), (2, 2, false), (3, 3, true)]);
        assert_eq!(result.failed_pages(), vec![2]);
        assert!(result
            .text
            .contains("Page 2\n[text unavailable for page 2]"));
        assert!(result.text.contains("Page 3\nthree"));
    }

    #[tokio::test]
    async fn abort_policy_stops_at_first_failure() {
        let source = FakeExtractor::new(vec![(1, Ok("one")), (3, Ok("three"))]);
        let err = orchestrator(true)
            .extract(&source, &PageRange::full(3))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExtractionError::PageFailed {
                page: 2,
                source: OcrFailure::MissingPage { page: 2 }
            }
        );
        assert_eq!(*source.calls.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn all_pages_failing_is_an_error() {
        let source = FakeExtractor::new(vec![]);
        let err = orchestrator(false)
            .extract(&source, &PageRange::full(2))
            .await
            .unwrap_err();
        assert_eq!(err, ExtractionError::NothingExtracted { pages: 2 });
    }

    #[tokio::test]
    async fn empty_range_is_rejected() {
        let source = FakeExtractor::new(vec![]);
        let err = orchestrator(false)
            .extract(&source, &PageRange::full(0))
            .await
            .unwrap_err();
        assert_eq!(err, ExtractionError::EmptyRange);
    }

    #[tokio::test]
    async fn stale_ticket_stops_between_pages() {
        let source = Arc::new(FakeExtractor::new(vec![(1, Ok("one")), (2, Ok("two"))]));
        let epoch = RangeEpoch::new();
        let ticket = epoch.ticket();
        let err = orchestrator(false)
            .extract_with(source.as_ref(), &PageRange::full(2), Some(&ticket), |_| {
                epoch.advance();
            })
            .await
            .unwrap_err();
        assert_eq!(err, ExtractionError::Superseded);
        assert_eq!(*source.calls.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_pages_time_out_as_failures() {
        let result = orchestrator(false)
            .extract(&SlowExtractor, &PageRange::full(3))
            .await
            .unwrap();
        assert_eq!(result.failed_pages(), vec![2]);
        assert_eq!(
            result.failures[0].reason,
            OcrFailure::Timeout(Duration::from_secs(30))
        );
        assert!(result.text.contains("Page 3\ntext 3"));
    }
}
