use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pagenotes_core::{
    EpochTicket, ExtractionError, ExtractionOrchestrator, ExtractionProgress, PageRange,
    RangeEpoch, TextExtractor,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::document::NotesDocument;
use crate::pipeline::{Advisory, GenerationPath, NotesPipeline};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("a notes run is already in progress")]
    Busy,
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub range: PageRange,
    pub path: GenerationPath,
    pub advisories: Vec<Advisory>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Applied(RunReport),
    /// The page range changed while the run was in flight.
    Discarded,
}

struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Ties extraction and generation together for the notes surface.
///
/// At most one run is in flight; a second request is refused with
/// [`WorkflowError::Busy`]. A run whose range epoch went stale is dropped on
/// arrival and never touches the document.
#[derive(Clone)]
pub struct NotesWorkflow {
    orchestrator: ExtractionOrchestrator,
    pipeline: Arc<NotesPipeline>,
    epoch: RangeEpoch,
    document: Arc<Mutex<Option<NotesDocument>>>,
    in_flight: Arc<AtomicBool>,
}

impl NotesWorkflow {
    pub fn new(
        orchestrator: ExtractionOrchestrator,
        pipeline: Arc<NotesPipeline>,
        epoch: RangeEpoch,
    ) -> Self {
        Self {
            orchestrator,
            pipeline,
            epoch,
            document: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pipeline(&self) -> &NotesPipeline {
        &self.pipeline
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn document(&self) -> Option<NotesDocument> {
        self.document.lock().clone()
    }

    pub fn apply_edit(&self, markup: &str) -> bool {
        self.document
            .lock()
            .as_mut()
            .map_or(false, |doc| doc.apply_edit(markup))
    }

    pub fn reset_from_source(&self) -> bool {
        let mut guard = self.document.lock();
        match guard.as_mut() {
            Some(doc) => {
                doc.reset_from_source(self.pipeline.fallback_generator());
                true
            }
            None => false,
        }
    }

    pub async fn run(
        &self,
        source: &dyn TextExtractor,
        range: PageRange,
    ) -> Result<RunOutcome, WorkflowError> {
        self.run_with(source, range, |_| {}).await
    }

    #[instrument(skip_all, fields(range = %range.describe()))]
    pub async fn run_with<F>(
        &self,
        source: &dyn TextExtractor,
        range: PageRange,
        on_page: F,
    ) -> Result<RunOutcome, WorkflowError>
    where
        F: FnMut(ExtractionProgress<'_>) + Send,
    {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Err(WorkflowError::Busy);
        };
        let ticket = self.epoch.ticket();
        info!(epoch = ticket.epoch(), "notes run started");

        let extraction = match self
            .orchestrator
            .extract_with(source, &range, Some(&ticket), on_page)
            .await
        {
            Ok(extraction) => extraction,
            Err(ExtractionError::Superseded) => return Ok(discard(&ticket, "extraction")),
            Err(err) => return Err(err.into()),
        };
        if !ticket.is_current() {
            return Ok(discard(&ticket, "extraction"));
        }

        let generated = self.pipeline.generate(&extraction.text).await;
        if !ticket.is_current() {
            return Ok(discard(&ticket, "generation"));
        }

        let mut advisories = Vec::new();
        if extraction.is_partial() {
            advisories.push(Advisory::PartialExtraction {
                failed_pages: extraction.failed_pages(),
            });
        }
        advisories.extend(generated.advisory);

        let document = NotesDocument::new(
            generated.markup,
            extraction.text,
            range,
            generated.path,
            self.pipeline.sanitizer(),
        );
        *self.document.lock() = Some(document);
        info!(path = ?generated.path, advisories = advisories.len(), "notes applied");

        Ok(RunOutcome::Applied(RunReport {
            range,
            path: generated.path,
            advisories,
        }))
    }
}

fn discard(ticket: &EpochTicket, stage: &str) -> RunOutcome {
    debug!(epoch = ticket.epoch(), stage, "page range changed, discarding notes run");
    RunOutcome::Discarded
}
