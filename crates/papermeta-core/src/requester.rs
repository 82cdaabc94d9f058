//! The metadata-request seam and its error classification.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Error type for metadata requests, distinguishing retryable failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Server returned 429 Too Many Requests.
    RateLimited { retry_after: Option<Duration> },
    /// Network failure, timeout or 5xx. Worth retrying.
    Transient(String),
    /// Anything retrying will not fix (bad key, rejected prompt, malformed envelope).
    Permanent(String),
}

impl RequestError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RequestError::Permanent(_))
    }

    /// Server-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RequestError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::RateLimited {
                retry_after: Some(d),
            } => write!(f, "Rate limited (429), retry after {:.1}s", d.as_secs_f64()),
            RequestError::RateLimited { retry_after: None } => write!(f, "Rate limited (429)"),
            RequestError::Transient(msg) => write!(f, "{}", msg),
            RequestError::Permanent(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            RequestError::Transient(e.to_string())
        } else if e.is_decode() {
            RequestError::Permanent(format!("invalid response body: {}", e))
        } else {
            RequestError::Transient(e.to_string())
        }
    }
}

/// A remote model that turns extracted paper text into a raw (JSON-bearing) reply.
pub trait MetadataRequester: Send + Sync {
    /// Human-readable name used in logs (e.g. "Gemini (gemini-2.5-flash)").
    fn name(&self) -> &str;

    /// Send `text` with the extraction prompt and return the model's reply verbatim.
    fn request<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, RequestError>> + Send + 'a>>;
}

/// Classify a non-success HTTP status, extracting Retry-After on 429.
///
/// Returns `Ok(())` for 2xx responses.
pub fn check_status(resp: &reqwest::Response) -> Result<(), RequestError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        429 => {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            Err(RequestError::RateLimited { retry_after })
        }
        408 | 500..=599 => Err(RequestError::Transient(format!("HTTP {}", status))),
        _ => Err(RequestError::Permanent(format!("HTTP {}", status))),
    }
}

/// Parse a Retry-After header value (seconds or HTTP-date).
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    // Try parsing as integer seconds first
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    // HTTP-date: use a conservative fixed wait rather than parsing the date
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, retry_after: Option<&str>) -> reqwest::Response {
        let mut builder = http::Response::builder().status(status);
        if let Some(value) = retry_after {
            builder = builder.header("retry-after", value);
        }
        reqwest::Response::from(builder.body("").unwrap())
    }

    // ── parse_retry_after ──────────────────────────────────────────────

    #[test]
    fn parse_integer_seconds() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
    }

    #[test]
    fn parse_http_date() {
        let val = "Wed, 21 Oct 2015 07:28:00 GMT";
        assert_eq!(parse_retry_after(val), Some(Duration::from_secs(5)));
    }

    #[test]
    fn parse_garbage_none() {
        assert_eq!(parse_retry_after("soon"), None);
    }

    // ── check_status ───────────────────────────────────────────────────

    #[test]
    fn ok_on_200() {
        assert!(check_status(&response(200, None)).is_ok());
    }

    #[test]
    fn rate_limited_with_header() {
        let err = check_status(&response(429, Some("10"))).unwrap_err();
        assert_eq!(
            err,
            RequestError::RateLimited {
                retry_after: Some(Duration::from_secs(10))
            }
        );
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn rate_limited_without_header() {
        let err = check_status(&response(429, None)).unwrap_err();
        assert_eq!(err, RequestError::RateLimited { retry_after: None });
    }

    #[test]
    fn server_errors_are_transient() {
        for status in [500, 502, 503, 504, 408] {
            let err = check_status(&response(status, None)).unwrap_err();
            assert!(
                matches!(err, RequestError::Transient(_)),
                "status {status} should be transient"
            );
        }
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [400, 401, 403, 404] {
            let err = check_status(&response(status, None)).unwrap_err();
            assert!(!err.is_retryable(), "status {status} should be permanent");
        }
    }

    #[test]
    fn display_formats() {
        let err = RequestError::RateLimited {
            retry_after: Some(Duration::from_millis(1500)),
        };
        assert_eq!(err.to_string(), "Rate limited (429), retry after 1.5s");
        assert_eq!(
            RequestError::Transient("connection reset".into()).to_string(),
            "connection reset"
        );
    }
}
