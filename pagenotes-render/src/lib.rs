use std::convert::TryFrom;
use std::ffi::OsString;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pagenotes_core::{
    DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider, OcrFailure,
    OpenedDocument, RenderImage, RenderRequest, TextExtractor,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

/// Overrides where the pdfium shared library is loaded from.
pub const PDFIUM_LIBRARY_ENV: &str = "PAGENOTES_PDFIUM_LIBRARY_PATH";

const MIN_RENDER_SCALE: f32 = 0.1;

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = bind_pdfium(std::env::var_os(PDFIUM_LIBRARY_ENV))?;
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(&self, path: &Path) -> Result<OpenedDocument> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let info = build_document_info(&self.pdfium, &absolute)?;
        debug!(path = %absolute.display(), pages = info.page_count, "opened pdf");
        let document = Arc::new(PdfiumDocument {
            inner: Arc::new(DocumentInner::new(Arc::clone(&self.pdfium), absolute, info)),
        });
        Ok(OpenedDocument {
            backend: document.clone(),
            text: document,
        })
    }
}

/// Serves both page renders and the page text layer from one pdfium handle.
pub struct PdfiumDocument {
    inner: Arc<DocumentInner>,
}

struct DocumentInner {
    // Declared before `pdfium` so it is dropped first.
    document: Mutex<Option<PdfDocument<'static>>>,
    path: PathBuf,
    info: DocumentInfo,
    pdfium: Arc<Pdfium>,
}

impl DocumentInner {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf, info: DocumentInfo) -> Self {
        Self {
            document: Mutex::new(None),
            path,
            info,
            pdfium,
        }
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the document borrows the bindings owned by self.pdfium. It is
        // stored in self.document, which is declared before self.pdfium and
        // therefore dropped first, so the borrow never outlives the bindings.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        let document = match guard.take() {
            Some(document) => document,
            None => self.open_document()?,
        };
        let result = f(&document);
        *guard = Some(document);
        result
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderImage> {
        self.with_document(|document| {
            let page = document
                .pages()
                .get(pdfium_index(request.page_index)?)
                .with_context(|| format!("page index {} out of range", request.page_index))?;

            let config =
                PdfRenderConfig::new().scale_page_by_factor(request.scale.max(MIN_RENDER_SCALE));
            let bitmap = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page index {}", request.page_index))?;
            let image: image::RgbaImage = bitmap.as_image().to_rgba8();

            Ok(RenderImage {
                width: image.width(),
                height: image.height(),
                pixels: image.into_raw(),
            })
        })
    }

    fn page_text(&self, page_number: usize) -> Result<String, OcrFailure> {
        check_page_number(page_number, self.info.page_count)?;
        let text = self
            .with_document(|document| {
                let page = document
                    .pages()
                    .get(pdfium_index(page_number - 1)?)
                    .with_context(|| format!("page {} out of range", page_number))?;
                let text = page
                    .text()
                    .with_context(|| format!("failed to extract text for page {}", page_number))?;
                Ok(text.all())
            })
            .map_err(|err| OcrFailure::Backend(format!("{err:#}")))?;
        require_text_layer(text)
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.inner.info
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        self.inner.render(&request)
    }
}

#[async_trait]
impl TextExtractor for PdfiumDocument {
    async fn extract_page_text(&self, page_number: usize) -> Result<String, OcrFailure> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.page_text(page_number))
            .await
            .map_err(|err| OcrFailure::Backend(format!("text worker failed: {err}")))?
    }
}

fn pdfium_index(page_index: usize) -> Result<PdfPageIndex> {
    page_index
        .try_into()
        .map_err(|_| anyhow!("page index {} is out of supported range", page_index))
}

fn check_page_number(page_number: usize, page_count: usize) -> Result<(), OcrFailure> {
    if page_number == 0 || page_number > page_count {
        return Err(OcrFailure::MissingPage { page: page_number });
    }
    Ok(())
}

/// Scanned pages come back from pdfium with an empty text layer.
fn require_text_layer(text: String) -> Result<String, OcrFailure> {
    if text.trim().is_empty() {
        Err(OcrFailure::Backend("page has no text layer".to_string()))
    } else {
        Ok(text)
    }
}

fn build_document_info(pdfium: &Pdfium, path: &Path) -> Result<DocumentInfo> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))?;
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().trim().to_owned())
        .filter(|t| !t.is_empty());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().trim().to_owned())
        .filter(|t| !t.is_empty());

    Ok(DocumentInfo {
        path: path.to_path_buf(),
        page_count,
        metadata: DocumentMetadata { title, author },
    })
}

/// Explicit library paths to try before falling back to the system library.
fn library_candidates(env_override: Option<OsString>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = env_override.filter(|path| !path.is_empty()) {
        candidates.push(PathBuf::from(path));
    }
    candidates.push(Pdfium::pdfium_platform_library_name_at_path("./"));
    candidates
}

fn bind_pdfium(env_override: Option<OsString>) -> Result<Pdfium> {
    let mut errors = Vec::new();

    for candidate in library_candidates(env_override) {
        match Pdfium::bind_to_library(&candidate) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(err) => {
                debug!(path = %candidate.display(), %err, "pdfium not found");
                errors.push(format!("{}: {}", candidate.display(), err));
            }
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            warn!("no usable pdfium library");
            Err(anyhow!(
                "failed to bind to a pdfium library; install it or set {} ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_numbers_outside_document_are_missing() {
        assert_eq!(
            check_page_number(0, 3),
            Err(OcrFailure::MissingPage { page: 0 })
        );
        assert_eq!(
            check_page_number(4, 3),
            Err(OcrFailure::MissingPage { page: 4 })
        );
        assert!(check_page_number(3, 3).is_ok());
    }

    #[test]
    fn blank_text_layer_is_a_failure() {
        assert!(matches!(
            require_text_layer(" \n\t".to_string()),
            Err(OcrFailure::Backend(_))
        ));
        assert_eq!(require_text_layer("Intro".to_string()).unwrap(), "Intro");
    }

    #[test]
    fn env_override_is_tried_first() {
        let candidates = library_candidates(Some(OsString::from("/opt/pdfium/libpdfium.so")));
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0], PathBuf::from("/opt/pdfium/libpdfium.so"));

        let without = library_candidates(Some(OsString::new()));
        assert_eq!(without.len(), 1);
        assert_eq!(
            without[0],
            Pdfium::pdfium_platform_library_name_at_path("./")
        );
    }

    #[test]
    fn huge_page_index_is_rejected() {
        assert!(pdfium_index(usize::MAX).is_err());
        assert!(pdfium_index(0).is_ok());
    }
}
