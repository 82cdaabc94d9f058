use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod backend;
pub mod config_file;
pub mod discover;
pub mod gemini;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod normalize;
pub mod orchestrator;
pub mod prompt;
pub mod requester;
pub mod response;
pub mod retry;
pub mod store;

// Re-export for convenience
pub use backend::{BackendError, PdfBackend};
pub use discover::{PdfFile, discover_pdfs, validate_root};
pub use gemini::GeminiClient;
pub use orchestrator::Orchestrator;
pub use requester::{MetadataRequester, RequestError};
pub use response::{ParseError, parse_response};
pub use retry::{RetryError, RetryPolicy};
pub use store::{CheckpointStore, METADATA_FILE, PROCESSED_FILE, ResultStore, StoreError};

/// Bibliographic metadata extracted from a single PDF.
///
/// `relative_path` is the resume key: it is the path of the source file
/// relative to the processed root, always with `/` separators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub journal: String,
    #[serde(default)]
    pub doi: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub relative_path: String,
}

impl MetadataRecord {
    /// Attach the identity of the file this record was extracted from.
    pub fn with_source(mut self, filename: impl Into<String>, relative_path: impl Into<String>) -> Self {
        self.filename = filename.into();
        self.relative_path = relative_path.into();
        self
    }
}

/// Why a file reached a terminal outcome without producing a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The PDF opened but yielded no text (e.g. a scanned document).
    NoText,
    /// The PDF backend could not read the file at all.
    Extraction(String),
    /// The metadata service failed permanently or retries were exhausted.
    Service(String),
    /// The service replied, but no JSON object could be located.
    Parse(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoText => write!(f, "no extractable text"),
            FailureReason::Extraction(msg) => write!(f, "text extraction failed: {}", msg),
            FailureReason::Service(msg) => write!(f, "metadata request failed: {}", msg),
            FailureReason::Parse(msg) => write!(f, "unusable response: {}", msg),
        }
    }
}

/// Progress events emitted while a directory is processed.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Discovered {
        total: usize,
        already_processed: usize,
        pending: usize,
    },
    /// Prior state held records whose checkpoints were missing; they were re-added.
    Reconciled {
        count: usize,
    },
    Processing {
        index: usize,
        total: usize,
        relative_path: String,
    },
    Extracted {
        relative_path: String,
        chars: usize,
    },
    Retrying {
        relative_path: String,
        attempt: u32,
        backoff: Duration,
        reason: String,
    },
    Succeeded {
        index: usize,
        total: usize,
        record: Box<MetadataRecord>,
    },
    Failed {
        index: usize,
        total: usize,
        relative_path: String,
        reason: FailureReason,
    },
    Cancelled,
}

/// Totals for a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// PDFs found under the root.
    pub total: usize,
    /// PDFs skipped because they were already checkpointed.
    pub already_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid root directory {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },
    #[error("state error: {0}")]
    Store(#[from] StoreError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Default number of leading pages sent for extraction.
pub const DEFAULT_MAX_PAGES: usize = 3;

/// Default per-request timeout for the metadata service.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Resolved runtime configuration.
#[derive(Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: String,
    pub max_pages: usize,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Directory holding `metadata.json` and `processed_files.json`.
    pub state_dir: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("max_pages", &self.max_pages)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry", &self.retry)
            .field("state_dir", &self.state_dir)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: gemini::DEFAULT_MODEL.to_string(),
            max_pages: DEFAULT_MAX_PAGES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
            state_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Layer values from an on-disk config file over the defaults.
    pub fn from_file(file: &config_file::ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(api) = &file.api {
            if let Some(key) = api.gemini_api_key.as_ref().filter(|k| !k.trim().is_empty()) {
                config.api_key = Some(key.clone());
            }
            if let Some(model) = &api.model {
                config.model = model.clone();
            }
            if let Some(secs) = api.request_timeout_secs {
                config.request_timeout_secs = secs;
            }
        }
        if let Some(pages) = file.extraction.as_ref().and_then(|e| e.max_pages) {
            config.max_pages = pages;
        }
        if let Some(retry) = &file.retry {
            if let Some(n) = retry.max_attempts {
                config.retry.max_attempts = n;
            }
            if let Some(secs) = retry.base_delay_secs {
                config.retry.base_delay = Duration::from_secs(secs);
            }
            if let Some(secs) = retry.max_delay_secs {
                config.retry.max_delay = Duration::from_secs(secs);
            }
        }
        if let Some(dir) = file.state.as_ref().and_then(|s| s.dir.as_ref()) {
            config.state_dir = PathBuf::from(dir);
        }

        config
    }

    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_pages == 0 {
            return Err(CoreError::Config("max_pages must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(CoreError::Config("max_attempts must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(CoreError::Config("model name is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_file::{ApiConfig, ConfigFile, ExtractionConfig, RetryConfig};

    #[test]
    fn record_serializes_abstract_key() {
        let record = MetadataRecord {
            title: "T".into(),
            abstract_text: "An abstract".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["abstract"], "An abstract");
        assert!(json.get("abstract_text").is_none());
    }

    #[test]
    fn record_deserializes_with_missing_fields() {
        let record: MetadataRecord =
            serde_json::from_str(r#"{"title": "X", "relative_path": "a.pdf"}"#).unwrap();
        assert_eq!(record.title, "X");
        assert!(record.authors.is_empty());
        assert_eq!(record.relative_path, "a.pdf");
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = Config {
            api_key: Some("secret-key".into()),
            ..Config::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn from_file_overrides_defaults() {
        let file = ConfigFile {
            api: Some(ApiConfig {
                model: Some("gemini-2.5-pro".into()),
                ..Default::default()
            }),
            extraction: Some(ExtractionConfig { max_pages: Some(5) }),
            retry: Some(RetryConfig {
                max_attempts: Some(6),
                base_delay_secs: Some(1),
                max_delay_secs: None,
            }),
            ..Default::default()
        };
        let config = Config::from_file(&file);
        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.max_pages, 5);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, RetryPolicy::default().max_delay);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn blank_api_key_in_file_is_ignored() {
        let file = ConfigFile {
            api: Some(ApiConfig {
                gemini_api_key: Some("  ".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(Config::from_file(&file).api_key.is_none());
    }

    #[test]
    fn validate_rejects_zero_pages() {
        let config = Config {
            max_pages: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = Config {
            request_timeout_secs: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));
    }

    #[test]
    fn failure_reason_display() {
        assert_eq!(FailureReason::NoText.to_string(), "no extractable text");
        assert_eq!(
            FailureReason::Service("HTTP 403".into()).to_string(),
            "metadata request failed: HTTP 403"
        );
    }
}
