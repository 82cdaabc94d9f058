use std::path::Path;

use mupdf::{Document, TextPageFlags};

use papermeta_core::{BackendError, PdfBackend};

/// MuPDF-based implementation of [`PdfBackend`].
///
/// This crate isolates the AGPL-licensed mupdf dependency from the rest of
/// the workspace.
///
/// Only the leading pages are read, running headers included: on a paper's
/// first page they often carry the venue, year and DOI.
#[derive(Debug, Default)]
pub struct MupdfBackend;

impl MupdfBackend {
    pub fn new() -> Self {
        Self
    }

    fn page_text(page: &mupdf::Page) -> Result<String, BackendError> {
        let text_page = page
            .to_text_page(TextPageFlags::empty())
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;

        let mut text = String::new();
        for block in text_page.blocks() {
            for line in block.lines() {
                text.extend(line.chars().map(|c| c.char().unwrap_or('\u{FFFD}')));
                text.push('\n');
            }
        }
        Ok(text)
    }
}

/// Join the text of every page that could be read.
///
/// A page that fails to load or convert is logged and left out; the rest of
/// the document is still usable for metadata extraction.
fn join_readable_pages(
    path: &Path,
    pages: impl Iterator<Item = Result<String, BackendError>>,
) -> String {
    let mut readable = Vec::new();
    for (index, page) in pages.enumerate() {
        match page {
            Ok(text) => readable.push(text),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    page = index + 1,
                    error = %e,
                    "skipping unreadable page"
                );
            }
        }
    }
    readable.join("\n\n")
}

impl PdfBackend for MupdfBackend {
    fn extract_text(&self, path: &Path, max_pages: usize) -> Result<String, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;

        let document =
            Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))?;

        let pages = document
            .pages()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;

        let texts = pages.take(max_pages).map(|page| {
            page.map_err(|e| BackendError::ExtractionError(e.to_string()))
                .and_then(|page| Self::page_text(&page))
        });

        Ok(join_readable_pages(path, texts))
    }
}
