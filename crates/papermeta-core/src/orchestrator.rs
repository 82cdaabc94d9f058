//! The per-directory extraction loop.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::backend::PdfBackend;
use crate::discover::{PdfFile, discover_pdfs, validate_root};
use crate::requester::MetadataRequester;
use crate::response::parse_response;
use crate::retry::{RetryError, RetryPolicy};
use crate::store::{CheckpointStore, ResultStore, reconcile};
use crate::{CoreError, DEFAULT_MAX_PAGES, FailureReason, MetadataRecord, ProgressEvent, RunSummary};

/// Terminal outcome of a single file.
enum FileOutcome {
    Succeeded(MetadataRecord),
    Failed(FailureReason),
    /// Interrupted before reaching a terminal outcome; not checkpointed.
    Cancelled,
}

/// Drives discovery, extraction, requests and persistence for one root.
pub struct Orchestrator<'a> {
    backend: &'a dyn PdfBackend,
    requester: &'a dyn MetadataRequester,
    retry: RetryPolicy,
    max_pages: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(backend: &'a dyn PdfBackend, requester: &'a dyn MetadataRequester) -> Self {
        Self {
            backend,
            requester,
            retry: RetryPolicy::default(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Process every not-yet-checkpointed PDF under `root`.
    ///
    /// Both stores are saved after each file reaches a terminal outcome,
    /// results first. Per-file failures are recorded and skipped; only an
    /// invalid root or a store write failure aborts the run.
    pub async fn process_directory(
        &self,
        root: &Path,
        checkpoints: &mut CheckpointStore,
        results: &mut ResultStore,
        progress: impl Fn(ProgressEvent),
        cancel: &CancellationToken,
    ) -> Result<RunSummary, CoreError> {
        validate_root(root)?;

        let reconciled = reconcile(checkpoints, results);
        if reconciled > 0 {
            tracing::warn!(count = reconciled, "restored checkpoints for saved records");
            checkpoints.save()?;
            progress(ProgressEvent::Reconciled { count: reconciled });
        }

        let files = discover_pdfs(root)?;
        let total_found = files.len();
        let pending: Vec<PdfFile> = files
            .into_iter()
            .filter(|f| !checkpoints.contains(&f.relative_path))
            .collect();
        let already_processed = total_found - pending.len();

        tracing::info!(
            root = %root.display(),
            total = total_found,
            already_processed,
            pending = pending.len(),
            requester = self.requester.name(),
            "starting run"
        );
        progress(ProgressEvent::Discovered {
            total: total_found,
            already_processed,
            pending: pending.len(),
        });

        let mut summary = RunSummary {
            total: total_found,
            already_processed,
            ..Default::default()
        };
        let total = pending.len();

        for (i, file) in pending.iter().enumerate() {
            let index = i + 1;
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            progress(ProgressEvent::Processing {
                index,
                total,
                relative_path: file.relative_path.clone(),
            });

            match self.process_file(file, &progress, cancel).await {
                FileOutcome::Succeeded(record) => {
                    tracing::info!(path = %file.relative_path, title = %record.title, "extracted metadata");
                    results.append(record.clone());
                    results.save()?;
                    checkpoints.mark_processed(file.relative_path.clone());
                    checkpoints.save()?;
                    summary.succeeded += 1;
                    progress(ProgressEvent::Succeeded {
                        index,
                        total,
                        record: Box::new(record),
                    });
                }
                FileOutcome::Failed(reason) => {
                    tracing::info!(path = %file.relative_path, reason = %reason, "file failed");
                    checkpoints.mark_processed(file.relative_path.clone());
                    checkpoints.save()?;
                    summary.failed += 1;
                    progress(ProgressEvent::Failed {
                        index,
                        total,
                        relative_path: file.relative_path.clone(),
                        reason,
                    });
                }
                FileOutcome::Cancelled => {
                    tracing::info!(path = %file.relative_path, "interrupted before completion");
                    summary.cancelled = true;
                    break;
                }
            }
        }

        if summary.cancelled {
            progress(ProgressEvent::Cancelled);
        }
        Ok(summary)
    }

    async fn process_file(
        &self,
        file: &PdfFile,
        progress: &impl Fn(ProgressEvent),
        cancel: &CancellationToken,
    ) -> FileOutcome {
        let text = match self.backend.extract_text(&file.path, self.max_pages) {
            Ok(text) => text,
            Err(e) => return FileOutcome::Failed(FailureReason::Extraction(e.to_string())),
        };
        let text = text.trim();
        if text.is_empty() {
            return FileOutcome::Failed(FailureReason::NoText);
        }
        tracing::debug!(path = %file.relative_path, chars = text.len(), "extracted text");
        progress(ProgressEvent::Extracted {
            relative_path: file.relative_path.clone(),
            chars: text.len(),
        });

        let attempt = self.retry.run(
            cancel,
            |n| {
                tracing::debug!(path = %file.relative_path, attempt = n, "requesting metadata");
                self.requester.request(text)
            },
            |n, backoff, err| {
                tracing::info!(
                    path = %file.relative_path,
                    attempt = n,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "request failed, retrying"
                );
                progress(ProgressEvent::Retrying {
                    relative_path: file.relative_path.clone(),
                    attempt: n,
                    backoff,
                    reason: err.to_string(),
                });
            },
        );

        let raw = tokio::select! {
            _ = cancel.cancelled() => return FileOutcome::Cancelled,
            result = attempt => match result {
                Ok(raw) => raw,
                Err(RetryError::Cancelled) => return FileOutcome::Cancelled,
                Err(e) => return FileOutcome::Failed(FailureReason::Service(e.to_string())),
            },
        };

        match parse_response(&raw) {
            Ok(record) => {
                FileOutcome::Succeeded(record.with_source(&file.filename, &file.relative_path))
            }
            Err(e) => FileOutcome::Failed(FailureReason::Parse(e.to_string())),
        }
    }
}
