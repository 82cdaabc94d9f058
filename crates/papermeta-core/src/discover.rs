//! Recursive discovery of PDF files under a root directory.

use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::CoreError;

/// A PDF found under the root, with its resume key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfFile {
    pub path: PathBuf,
    /// Path relative to the root, `/`-separated on every platform.
    pub relative_path: String,
    pub filename: String,
}

/// Fail unless `root` exists and is a directory.
pub fn validate_root(root: &Path) -> Result<(), CoreError> {
    let meta = std::fs::metadata(root).map_err(|e| CoreError::InvalidRoot {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !meta.is_dir() {
        return Err(CoreError::InvalidRoot {
            path: root.to_path_buf(),
            reason: "not a directory".into(),
        });
    }
    Ok(())
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Join the normal components of `rel` with `/`.
fn portable_relative(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Return every regular `.pdf` file under `root`, sorted by relative path.
///
/// Unreadable subdirectories are logged and skipped; only an invalid root is
/// an error.
pub fn discover_pdfs(root: &Path) -> Result<Vec<PdfFile>, CoreError> {
    validate_root(root)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_pdf(entry.path()) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        files.push(PdfFile {
            path: entry.path().to_path_buf(),
            relative_path: portable_relative(rel),
            filename: entry.file_name().to_string_lossy().into_owned(),
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}
