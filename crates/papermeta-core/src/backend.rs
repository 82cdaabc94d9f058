use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for PDF text extraction backends.
///
/// Implementors return the text of at most `max_pages` leading pages. A
/// document with no text layer yields `Ok` with an empty (or whitespace-only)
/// string; the orchestrator treats that as a per-file failure rather than an
/// error.
pub trait PdfBackend: Send + Sync {
    fn extract_text(&self, path: &Path, max_pages: usize) -> Result<String, BackendError>;
}
