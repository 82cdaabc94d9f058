//! Google Gemini `generateContent` client.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::prompt::build_prompt;
use crate::requester::{MetadataRequester, RequestError, check_status};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Base URL of the Generative Language API.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Pull the generated text out of a `generateContent` response body.
pub fn response_text(body: &str) -> Result<String, RequestError> {
    let envelope: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| RequestError::Permanent(format!("malformed Gemini response: {}", e)))?;

    if let Some(reason) = envelope
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(RequestError::Permanent(format!("prompt blocked: {}", reason)));
    }

    let Some(candidate) = envelope.candidates.into_iter().next() else {
        return Err(RequestError::Permanent("response has no candidates".into()));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(RequestError::Permanent(format!(
            "empty response (finish reason: {})",
            reason
        )));
    }
    Ok(text)
}

/// Extract `error.message` from a Google API error body.
pub fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(String::from)
}

/// Client for a single Gemini model.
pub struct GeminiClient {
    api_key: String,
    model: String,
    endpoint: String,
    label: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        let model = model.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("papermeta/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            label: format!("Gemini ({})", model),
            model,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client,
        })
    }

    /// Point the client at a different API base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    /// Send one prompt and return the generated text.
    pub async fn generate(&self, prompt: &str) -> Result<String, RequestError> {
        let request = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
        };

        let resp = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if let Err(err) = check_status(&resp) {
            let detail = resp
                .text()
                .await
                .ok()
                .and_then(|body| error_message(&body));
            let with_detail = |msg: String| match &detail {
                Some(d) => format!("{}: {}", msg, d),
                None => msg,
            };
            return Err(match err {
                RequestError::Transient(msg) => RequestError::Transient(with_detail(msg)),
                RequestError::Permanent(msg) => RequestError::Permanent(with_detail(msg)),
                rate_limited => rate_limited,
            });
        }

        let body = resp.text().await?;
        tracing::debug!(model = %self.model, chars = body.len(), "received Gemini response");
        response_text(&body)
    }
}

impl MetadataRequester for GeminiClient {
    fn name(&self) -> &str {
        &self.label
    }

    fn request<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, RequestError>> + Send + 'a>> {
        Box::pin(async move { self.generate(&build_prompt(text)).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_candidate_text() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "{\"title\": "}, {"text": "\"X\"}"}]},
                "finishReason": "STOP"
            }]
        }"#;
        assert_eq!(response_text(body).unwrap(), r#"{"title": "X"}"#);
    }

    #[test]
    fn blocked_prompt_is_permanent() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let err = response_text(body).unwrap_err();
        assert_eq!(err, RequestError::Permanent("prompt blocked: SAFETY".into()));
    }

    #[test]
    fn missing_candidates_is_permanent() {
        let err = response_text("{}").unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn empty_candidate_reports_finish_reason() {
        let body = r#"{"candidates": [{"finishReason": "MAX_TOKENS"}]}"#;
        let err = response_text(body).unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }

    #[test]
    fn malformed_envelope_is_permanent() {
        assert!(matches!(
            response_text("<html>gateway</html>"),
            Err(RequestError::Permanent(_))
        ));
    }

    #[test]
    fn google_error_message() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(error_message(body).as_deref(), Some("API key not valid."));
        assert_eq!(error_message("not json"), None);
    }

    #[test]
    fn client_builds_model_url() {
        let client = GeminiClient::new("key", "gemini-2.5-pro", Duration::from_secs(5))
            .unwrap()
            .with_endpoint("http://localhost:8080/v1beta/");
        assert_eq!(
            client.url(),
            "http://localhost:8080/v1beta/models/gemini-2.5-pro:generateContent"
        );
        assert_eq!(client.name(), "Gemini (gemini-2.5-pro)");
        assert_eq!(client.model(), "gemini-2.5-pro");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        let client = GeminiClient::new("key", DEFAULT_MODEL, Duration::from_secs(2))
            .unwrap()
            .with_endpoint("http://127.0.0.1:1");
        let err = client.request("some text").await.unwrap_err();
        assert!(err.is_retryable(), "expected retryable error, got {err:?}");
    }

    // Requires GEMINI_API_KEY and network access
    #[tokio::test]
    #[ignore]
    async fn live_generate() {
        let key = std::env::var("GEMINI_API_KEY").expect("GEMINI_API_KEY not set");
        let client = GeminiClient::new(key, DEFAULT_MODEL, Duration::from_secs(60)).unwrap();
        let reply = client.generate("Reply with the word hello.").await.unwrap();
        assert!(!reply.is_empty());
    }
}
