use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pagenotes_core::config::NotesConfig;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::fallback::FallbackGenerator;
use crate::markup::{fold_paragraphs, normalize_tokens, structure_lists};
use crate::sanitize::Sanitizer;

pub const NOTES_PROMPT: &str = "You are a note-taking assistant. Turn the provided document text \
into well-organised study notes. Start with a main heading, use second-level headings for major \
sections and third-level headings for subsections. Use bullet points and numbered lists where they \
help, and mark important terms with **bold**. Keep every important fact from the source and keep \
the spacing compact: no empty paragraphs and no runs of blank lines.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationFailure {
    #[error("remote generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote generation returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("remote generation request failed: {0}")]
    Transport(String),
    #[error("remote generation returned a malformed payload: {0}")]
    Malformed(String),
    #[error("remote generation returned no content")]
    Empty,
    #[error("remote output of {output_chars} characters is too short for {input_chars} characters of input")]
    Truncated {
        output_chars: usize,
        input_chars: usize,
    },
    #[error("remote generation is not configured")]
    NotConfigured,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, source_text: &str)
        -> Result<String, GenerationFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPath {
    Remote,
    Fallback,
}

/// Something the user should hear about even though a result was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    GenerationFallback { reason: GenerationFailure },
    PartialExtraction { failed_pages: Vec<usize> },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::GenerationFallback { reason } => {
                write!(f, "using locally formatted notes ({reason})")
            }
            Advisory::PartialExtraction { failed_pages } => {
                let pages = failed_pages
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "text unavailable for page(s) {pages}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedNotes {
    pub markup: String,
    pub path: GenerationPath,
    pub advisory: Option<Advisory>,
}

pub struct NotesPipeline {
    generator: Option<Arc<dyn TextGenerator>>,
    remote_timeout: Duration,
    min_output_ratio: f32,
    sanitizer: Sanitizer,
    fallback: FallbackGenerator,
}

impl NotesPipeline {
    pub fn new(config: &NotesConfig, generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            generator,
            remote_timeout: config.remote_timeout,
            min_output_ratio: config.min_output_ratio,
            sanitizer: Sanitizer::new(config.compactness),
            fallback: FallbackGenerator::new(config.title.clone(), config.compactness),
        }
    }

    pub fn sanitizer(&self) -> Sanitizer {
        self.sanitizer
    }

    pub fn fallback_generator(&self) -> &FallbackGenerator {
        &self.fallback
    }

    /// Runs the four formatting stages over generated text.
    pub fn format_markup(&self, generated: &str) -> String {
        let normalized = normalize_tokens(generated);
        let listed = structure_lists(&normalized);
        let folded = fold_paragraphs(&listed);
        self.sanitizer.sanitize(&folded)
    }

    pub fn fallback(&self, raw_text: &str) -> String {
        self.fallback.generate(raw_text)
    }

    /// Never fails: any remote problem yields the local fallback plus an
    /// advisory naming the reason.
    #[instrument(skip_all, fields(input_chars = raw_text.chars().count()))]
    pub async fn generate(&self, raw_text: &str) -> GeneratedNotes {
        match self.generate_remote(raw_text).await {
            Ok(markup) => {
                info!(output_chars = markup.len(), "remote notes generated");
                GeneratedNotes {
                    markup,
                    path: GenerationPath::Remote,
                    advisory: None,
                }
            }
            Err(reason) => {
                warn!(%reason, "falling back to local notes");
                GeneratedNotes {
                    markup: self.fallback(raw_text),
                    path: GenerationPath::Fallback,
                    advisory: Some(Advisory::GenerationFallback { reason }),
                }
            }
        }
    }

    async fn generate_remote(&self, raw_text: &str) -> Result<String, GenerationFailure> {
        let generator = self
            .generator
            .as_ref()
            .ok_or(GenerationFailure::NotConfigured)?;

        let output = tokio::time::timeout(
            self.remote_timeout,
            generator.generate(NOTES_PROMPT, raw_text),
        )
        .await
        .map_err(|_| GenerationFailure::Timeout(self.remote_timeout))??;

        if output.trim().is_empty() {
            return Err(GenerationFailure::Empty);
        }
        let input_chars = raw_text.chars().count();
        let output_chars = output.chars().count();
        if (output_chars as f64) < f64::from(self.min_output_ratio) * input_chars as f64 {
            return Err(GenerationFailure::Truncated {
                output_chars,
                input_chars,
            });
        }

        let markup = self.format_markup(&output);
        if markup.is_empty() {
            return Err(GenerationFailure::Empty);
        }
        Ok(markup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pagenotes_core::Compactness;
    use proptest::prelude::*;

    struct ScriptedGenerator {
        reply: Result<String, GenerationFailure>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn replying(reply: Result<String, GenerationFailure>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _source_text: &str,
        ) -> Result<String, GenerationFailure> {
            self.prompts.lock().push(prompt.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone()
        }
    }

    fn pipeline(generator: Option<Arc<dyn TextGenerator>>) -> NotesPipeline {
        NotesPipeline::new(&NotesConfig::default(), generator)
    }

    #[test]
    fn formats_bold_title_and_bullet_list() {
        let markup = pipeline(None).format_markup("**Title**\n\n* one\n* two");
        insta::assert_snapshot!(markup, @r###"
        <p><strong>Title</strong></p>
        <ul>
        <li>one</li>
        <li>two</li>
        </ul>
        "###);
        assert_eq!(markup.matches("<strong>Title</strong>").count(), 1);
        assert_eq!(markup.matches("<ul>").count(), 1);
    }

    #[test]
    fn formats_mixed_generated_notes() {
        let generated = "# Cells\n\nThe **cell** is the unit of life.\nIt has parts:\n\n\
                         1. Nucleus\n2. Membrane\n\n## Summary\n\n\n\nDone.";
        let markup = pipeline(None).format_markup(generated);
        assert_eq!(
            markup,
            "<h1>Cells</h1>\n<p>The <strong>cell</strong> is the unit of life.<br>It has parts:</p>\n\
             <ol>\n<li>Nucleus</li>\n<li>Membrane</li>\n</ol>\n<h2>Summary</h2>\n<p>Done.</p>"
        );
    }

    #[tokio::test]
    async fn remote_output_is_formatted() {
        let generator = ScriptedGenerator::replying(Ok("## Page topic\n- a point\n".repeat(4)));
        let pipeline = pipeline(Some(generator.clone()));
        let notes = pipeline.generate("short source").await;
        assert_eq!(notes.path, GenerationPath::Remote);
        assert!(notes.advisory.is_none());
        assert!(notes.markup.starts_with("<h2>Page topic</h2>\n<ul>"));
        assert_eq!(generator.prompts.lock().as_slice(), [NOTES_PROMPT.to_string()]);
    }

    #[tokio::test]
    async fn missing_generator_falls_back_with_advisory() {
        let notes = pipeline(None).generate("Page 1\nHello there.").await;
        assert_eq!(notes.path, GenerationPath::Fallback);
        assert_eq!(
            notes.advisory,
            Some(Advisory::GenerationFallback {
                reason: GenerationFailure::NotConfigured
            })
        );
        assert_eq!(
            notes.markup,
            "<h1>Notes</h1>\n<h2>Page 1</h2>\n<p>Hello there.</p>"
        );
    }

    #[tokio::test]
    async fn failures_and_short_output_fall_back() {
        let raw = "Page 1\nA fairly long sentence of extracted text that should survive.";
        let cases = vec![
            (
                Err(GenerationFailure::Status {
                    status: 500,
                    body: "boom".to_string(),
                }),
                "status",
            ),
            (Ok("   ".to_string()), "empty"),
            (Ok("tiny".to_string()), "truncated"),
        ];
        for (reply, label) in cases {
            let pipeline = pipeline(Some(ScriptedGenerator::replying(reply)));
            let notes = pipeline.generate(raw).await;
            assert_eq!(notes.path, GenerationPath::Fallback, "{label}");
            assert_eq!(notes.markup, pipeline.fallback(raw), "{label}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generation_times_out_into_fallback() {
        let generator = Arc::new(ScriptedGenerator {
            reply: Ok("never used".repeat(100)),
            delay: Duration::from_secs(11),
            prompts: Mutex::new(Vec::new()),
        });
        let pipeline = pipeline(Some(generator));
        let raw = "Page 1\nSlow network today.";
        let notes = pipeline.generate(raw).await;
        assert_eq!(notes.markup, pipeline.fallback(raw));
        assert_eq!(
            notes.advisory,
            Some(Advisory::GenerationFallback {
                reason: GenerationFailure::Timeout(Duration::from_secs(10))
            })
        );
    }

    #[test]
    fn advisories_describe_themselves() {
        let advisory = Advisory::PartialExtraction {
            failed_pages: vec![2, 5],
        };
        assert_eq!(advisory.to_string(), "text unavailable for page(s) 2, 5");
    }

    fn generated_text() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                Just("# ".to_string()),
                Just("## ".to_string()),
                Just("* ".to_string()),
                Just("  - ".to_string()),
                Just("1. ".to_string()),
                Just("**".to_string()),
                Just("\n".to_string()),
                Just("\n\n".to_string()),
                Just("<p>".to_string()),
                Just("</li>".to_string()),
                Just("<strong>".to_string()),
                "[A-Za-z .&<>]{0,10}",
            ],
            0..40,
        )
        .prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn formatted_output_is_stable_under_sanitation(text in generated_text()) {
            for compactness in [Compactness::Dense, Compactness::Compact, Compactness::Relaxed] {
                let config = NotesConfig { compactness, ..NotesConfig::default() };
                let pipeline = NotesPipeline::new(&config, None);
                let markup = pipeline.format_markup(&text);
                prop_assert_eq!(pipeline.sanitizer().sanitize(&markup), markup);
            }
        }
    }
}
