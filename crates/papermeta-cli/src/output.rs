use std::io::Write;
use std::path::Path;

use owo_colors::OwoColorize;
use papermeta_core::{MetadataRecord, ProgressEvent, RunSummary};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Abstracts longer than this are cut in the per-file report.
const ABSTRACT_PREVIEW_CHARS: usize = 200;

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn or_unknown(s: &str) -> &str {
    if s.is_empty() { "unknown" } else { s }
}

fn join_or_unknown(items: &[String]) -> String {
    if items.is_empty() {
        "unknown".to_string()
    } else {
        items.join(", ")
    }
}

/// Print a real-time progress event.
pub fn print_progress(
    w: &mut dyn Write,
    event: &ProgressEvent,
    color: ColorMode,
) -> std::io::Result<()> {
    match event {
        ProgressEvent::Discovered {
            total,
            already_processed,
            pending,
        } => {
            writeln!(w, "Found {} PDF files.", total)?;
            writeln!(w, "Already processed: {}", already_processed)?;
            writeln!(w, "To process: {}", pending)?;
            if *pending == 0 {
                writeln!(w)?;
                writeln!(w, "All PDF files have already been processed.")?;
            }
        }
        ProgressEvent::Reconciled { count } => {
            let msg = format!(
                "Restored {} checkpoint(s) for records saved by an interrupted run",
                count
            );
            if color.enabled() {
                writeln!(w, "{}", msg.yellow())?;
            } else {
                writeln!(w, "{}", msg)?;
            }
        }
        ProgressEvent::Processing {
            index,
            total,
            relative_path,
        } => {
            writeln!(w)?;
            if color.enabled() {
                writeln!(
                    w,
                    "{} Processing {}...",
                    format!("[{}/{}]", index, total).bold(),
                    relative_path
                )?;
            } else {
                writeln!(w, "[{}/{}] Processing {}...", index, total, relative_path)?;
            }
        }
        ProgressEvent::Extracted { chars, .. } => {
            let msg = format!("Extracted {} characters, requesting metadata...", chars);
            if color.enabled() {
                writeln!(w, "{}", msg.dimmed())?;
            } else {
                writeln!(w, "{}", msg)?;
            }
        }
        ProgressEvent::Retrying {
            attempt,
            backoff,
            reason,
            ..
        } => {
            let msg = format!(
                "Attempt {} failed ({}). Retrying in {:.1}s...",
                attempt,
                reason,
                backoff.as_secs_f64()
            );
            if color.enabled() {
                writeln!(w, "{}", msg.yellow())?;
            } else {
                writeln!(w, "{}", msg)?;
            }
        }
        ProgressEvent::Succeeded { record, .. } => {
            print_record(w, record, color)?;
            if color.enabled() {
                writeln!(w, "{}", "✓ Saved metadata and marked as processed".green())?;
            } else {
                writeln!(w, "✓ Saved metadata and marked as processed")?;
            }
        }
        ProgressEvent::Failed {
            relative_path,
            reason,
            ..
        } => {
            if color.enabled() {
                writeln!(
                    w,
                    "{} {}: {}",
                    "✗ Failed".red().bold(),
                    relative_path,
                    reason
                )?;
            } else {
                writeln!(w, "✗ Failed {}: {}", relative_path, reason)?;
            }
            writeln!(w, "Marked as processed; skipping this file and continuing...")?;
        }
        ProgressEvent::Cancelled => {
            // Reported by the caller once the run returns
        }
    }
    Ok(())
}

/// Print the fields of a freshly extracted record.
pub fn print_record(
    w: &mut dyn Write,
    record: &MetadataRecord,
    color: ColorMode,
) -> std::io::Result<()> {
    let sep = "-".repeat(50);
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "Extracted Information:".bold())?;
    } else {
        writeln!(w, "Extracted Information:")?;
    }
    writeln!(w, "{}", sep)?;
    writeln!(w, "Filename: {}", record.filename)?;
    writeln!(w, "Path: {}", record.relative_path)?;
    if color.enabled() {
        writeln!(w, "Title: {}", or_unknown(&record.title).cyan())?;
    } else {
        writeln!(w, "Title: {}", or_unknown(&record.title))?;
    }
    writeln!(w, "Authors: {}", join_or_unknown(&record.authors))?;
    writeln!(w, "Year: {}", or_unknown(&record.year))?;
    writeln!(w, "Journal/Conference: {}", or_unknown(&record.journal))?;
    writeln!(w, "DOI: {}", or_unknown(&record.doi))?;
    writeln!(w, "Keywords: {}", record.keywords.join(", "))?;
    writeln!(w)?;
    writeln!(w, "Abstract:")?;
    writeln!(w, "{}", sep)?;
    let preview = truncate_chars(or_unknown(&record.abstract_text), ABSTRACT_PREVIEW_CHARS);
    if color.enabled() {
        writeln!(w, "{}", preview.dimmed())?;
    } else {
        writeln!(w, "{}", preview)?;
    }
    writeln!(w, "{}", sep)?;
    Ok(())
}

/// Print the end-of-run summary.
pub fn print_summary(
    w: &mut dyn Write,
    summary: &RunSummary,
    checkpointed: usize,
    records: usize,
    metadata_path: &Path,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    if summary.cancelled {
        if color.enabled() {
            writeln!(
                w,
                "{}",
                "⚠ Processing interrupted. Progress has been saved.".yellow().bold()
            )?;
        } else {
            writeln!(w, "⚠ Processing interrupted. Progress has been saved.")?;
        }
        writeln!(w, "Run again to resume from where you left off.")?;
    } else if color.enabled() {
        writeln!(
            w,
            "{} Results saved to {}",
            "✓ Processing complete.".green().bold(),
            metadata_path.display()
        )?;
    } else {
        writeln!(
            w,
            "✓ Processing complete. Results saved to {}",
            metadata_path.display()
        )?;
    }

    writeln!(w)?;
    writeln!(w, "Summary:")?;
    writeln!(w, "- This run: {} succeeded, {} failed", summary.succeeded, summary.failed)?;
    writeln!(w, "- Total files processed: {}", checkpointed)?;
    writeln!(w, "- Total metadata entries: {}", records)?;
    if summary.failed > 0 {
        let note = "Failed files are marked as processed; use --reset to retry them.";
        if color.enabled() {
            writeln!(w, "{}", note.dimmed())?;
        } else {
            writeln!(w, "{}", note)?;
        }
    }
    Ok(())
}

/// Explain how to provide the API key.
pub fn print_missing_key_help(w: &mut dyn Write, color: ColorMode) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{}", "Error: GEMINI_API_KEY not found.".red().bold())?;
    } else {
        writeln!(w, "Error: GEMINI_API_KEY not found.")?;
    }
    writeln!(w)?;
    writeln!(w, "Set it in one of these ways:")?;
    writeln!(w, "1. A .env file in the working directory: GEMINI_API_KEY=your-api-key")?;
    writeln!(w, "2. An environment variable: export GEMINI_API_KEY='your-api-key'")?;
    writeln!(w, "3. gemini_api_key under [api] in .papermeta.toml")?;
    writeln!(w)?;
    writeln!(w, "Get a key from: https://aistudio.google.com/app/apikey")?;
    Ok(())
}
