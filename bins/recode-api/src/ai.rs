//! Generative-AI text client (Gemini `generateContent`)
//!
//! A response with no usable text is `Generation::NoContent`, not an error;
//! only transport failures and non-2xx statuses are `AiError`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AiConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    Text(String),
    NoContent,
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("AI request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("AI endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation, AiError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// First candidate's first part, or NoContent when any level is missing or empty
fn first_text(body: &str) -> Generation {
    let parsed: GenerateResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Failed to parse AI response");
            return Generation::NoContent;
        }
    };

    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .filter(|t| !t.is_empty());

    match text {
        Some(text) => Generation::Text(text),
        None => {
            warn!("No content found in the AI response");
            Generation::NoContent
        }
    }
}

pub struct GeminiClient {
    http: Client,
    url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &AiConfig) -> Result<Self, AiError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            config.endpoint, config.model
        );
        info!(model = %config.model, timeout_secs = config.timeout.as_secs(), "AI client initialized");
        Ok(Self {
            http,
            url,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<Generation, AiError> {
        let request = GenerateRequest {
            contents: [RequestContent {
                parts: [RequestPart { text: prompt }],
            }],
        };

        let resp = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "AI endpoint rejected the request");
            return Err(AiError::Status { status, body });
        }

        let body = resp.text().await?;
        let generation = first_text(&body);
        if let Generation::Text(text) = &generation {
            info!(prompt_chars = prompt.len(), response_chars = text.len(), "AI response received");
        }
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new(&AiConfig {
            api_key: "test-key".into(),
            endpoint: server.uri(),
            model: "gemini-pro".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_returns_first_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-pro:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_json(serde_json::json!({
                "contents": [{ "parts": [{ "text": "explain this" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [
                    { "content": { "parts": [{ "text": "first" }, { "text": "second" }] } },
                    { "content": { "parts": [{ "text": "other" }] } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server).generate("explain this").await.unwrap();
        assert_eq!(result, Generation::Text("first".into()));
    }

    #[tokio::test]
    async fn test_no_candidates_is_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let result = client(&server).generate("x").await.unwrap();
        assert_eq!(result, Generation::NoContent);
    }

    #[tokio::test]
    async fn test_malformed_body_is_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result = client(&server).generate("x").await.unwrap();
        assert_eq!(result, Generation::NoContent);
    }

    #[tokio::test]
    async fn test_error_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        match client(&server).generate("x").await {
            Err(AiError::Status { status, body }) => {
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(body, "quota");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let server = MockServer::start().await;
        let gemini = client(&server);
        drop(server);

        assert!(matches!(gemini.generate("x").await, Err(AiError::Request(_))));
    }

    #[test]
    fn test_first_text_edge_cases() {
        assert_eq!(first_text(r#"{"candidates":[]}"#), Generation::NoContent);
        assert_eq!(first_text(r#"{"candidates":[{}]}"#), Generation::NoContent);
        assert_eq!(
            first_text(r#"{"candidates":[{"content":{"parts":[]}}]}"#),
            Generation::NoContent
        );
        assert_eq!(
            first_text(r#"{"candidates":[{"content":{"parts":[{"text":""}]}}]}"#),
            Generation::NoContent
        );
    }
}
