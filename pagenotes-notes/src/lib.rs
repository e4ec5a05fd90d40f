//! Notes generation: formatting stages, local fallback, remote client, chat
//! and the run workflow that ties them to extraction.

pub mod chat;
pub mod document;
pub mod export;
pub mod fallback;
pub mod markup;
pub mod pipeline;
pub mod remote;
pub mod sanitize;
pub mod workflow;

pub use chat::{Answerer, ChatContext, ChatMessage, Role};
pub use document::NotesDocument;
pub use export::{export, suggested_file_name, ExportFormat};
pub use fallback::FallbackGenerator;
pub use pipeline::{
    Advisory, GeneratedNotes, GenerationFailure, GenerationPath, NotesPipeline, TextGenerator,
};
pub use remote::RemoteClient;
pub use sanitize::{to_plain_text, Sanitizer};
pub use workflow::{NotesWorkflow, RunOutcome, RunReport, WorkflowError};
