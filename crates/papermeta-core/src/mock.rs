//! In-memory stand-ins for the PDF backend and the metadata service.
//!
//! Used by the unit tests here and by the integration tests under `tests/`.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::backend::{BackendError, PdfBackend};
use crate::requester::{MetadataRequester, RequestError};

/// A configurable reply for [`MockRequester`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this raw reply text.
    Reply(String),
    /// Simulate a 429 rate-limit response.
    RateLimited { retry_after: Option<Duration> },
    /// Simulate a network failure or 5xx.
    Transient(String),
    /// Simulate a non-retryable rejection.
    Permanent(String),
}

impl MockResponse {
    /// A reply carrying a JSON object with the given title.
    pub fn titled(title: &str) -> Self {
        MockResponse::Reply(serde_json::json!({ "title": title }).to_string())
    }
}

/// Hand-rolled [`MetadataRequester`] for tests.
///
/// Returns a fixed response for every call, or a sequence of responses (the
/// last one repeats once the sequence runs out). Every text it was asked about
/// is recorded.
pub struct MockRequester {
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl MockRequester {
    /// Create a mock that always returns `response`.
    pub fn new(response: MockResponse) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that returns responses in order, repeating the last one.
    pub fn with_sequence(mut responses: Vec<MockResponse>) -> Self {
        assert!(
            !responses.is_empty(),
            "sequence must have at least one response"
        );
        // Reversed so pop() yields the next response.
        responses.reverse();
        let fallback = responses[0].clone();
        Self {
            responses: Mutex::new(responses),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Set simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `request()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Texts passed to `request()`, in call order.
    pub fn requested_texts(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn next_response(&self) -> MockResponse {
        let mut seq = match self.responses.lock() {
            Ok(seq) => seq,
            Err(poisoned) => poisoned.into_inner(),
        };
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

impl MetadataRequester for MockRequester {
    fn name(&self) -> &str {
        "mock"
    }

    fn request<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, RequestError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(text.to_string());
        }
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match response {
                MockResponse::Reply(raw) => Ok(raw),
                MockResponse::RateLimited { retry_after } => {
                    Err(RequestError::RateLimited { retry_after })
                }
                MockResponse::Transient(msg) => Err(RequestError::Transient(msg)),
                MockResponse::Permanent(msg) => Err(RequestError::Permanent(msg)),
            }
        })
    }
}

/// Page content that [`MockPdf`] treats as a page that cannot be converted.
pub const UNREADABLE_PAGE: &str = "%%unreadable page%%";

/// A [`PdfBackend`] that treats files as plain UTF-8 text.
///
/// Form feeds (`\x0c`) separate pages, so page limits can be exercised.
/// Pages consisting of [`UNREADABLE_PAGE`] are skipped like a damaged page.
/// Files named via [`MockPdf::failing_on`] fail to open.
#[derive(Default)]
pub struct MockPdf {
    failing: HashSet<String>,
    call_count: AtomicUsize,
}

impl MockPdf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make extraction fail for files with this name.
    pub fn failing_on(mut self, filename: impl Into<String>) -> Self {
        self.failing.insert(filename.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl PdfBackend for MockPdf {
    fn extract_text(&self, path: &Path, max_pages: usize) -> Result<String, BackendError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            return Err(BackendError::OpenError(format!("{}: not a PDF", name)));
        }
        let content = std::fs::read_to_string(path)?;
        let mut pages = Vec::new();
        for (i, page) in content.split('\x0c').take(max_pages).enumerate() {
            if page.trim() == UNREADABLE_PAGE {
                tracing::warn!(path = %path.display(), page = i, "skipping unreadable page");
                continue;
            }
            pages.push(page);
        }
        Ok(pages.join("\n\n"))
    }
}
