use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GeminiConfig;

/// Sent to the group whenever a reply could not be generated
pub const FALLBACK_REPLY: &str =
    "I apologize, but I'm having trouble generating a response right now. Please try again in a moment.";

/// Wrap a group message in the assistant instructions.
pub fn build_prompt(message: &str) -> String {
    format!(
        "You are a helpful WhatsApp group assistant. Please provide a concise and relevant \
         response to this message: \"{}\"\n\
         \n\
         Rules:\n\
         1. Keep responses under 200 words\n\
         2. Be helpful and friendly\n\
         3. If you don't know something, say so\n\
         4. Don't include any harmful or inappropriate content\n\
         5. Format the response for WhatsApp (use emojis sparingly)",
        message
    )
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("no Gemini API key configured")]
    MissingApiKey,
    #[error("request to Gemini failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Gemini API error ({status}): {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to parse Gemini response: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("Gemini response contained no candidate text")]
    EmptyCandidates,
}

/// Turns a prompt into reply text.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, message: &str) -> Result<String, GenerationError>;
}

/// Reply text plus how it was obtained
#[derive(Debug)]
pub struct GeneratedReply {
    pub text: String,
    /// Why the fallback was used, if it was
    pub error: Option<GenerationError>,
}

impl GeneratedReply {
    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// Ask `generator` for a reply, substituting [`FALLBACK_REPLY`] on any failure.
pub async fn generate_or_fallback(generator: &dyn ReplyGenerator, message: &str) -> GeneratedReply {
    match generator.generate(message).await {
        Ok(text) => GeneratedReply { text, error: None },
        Err(e) => {
            warn!("Error getting response from Gemini: {}", e);
            GeneratedReply {
                text: FALLBACK_REPLY.to_string(),
                error: Some(e),
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

/// Gemini `generateContent` client. One request per call, no retries.
pub struct LlmClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl LlmClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl ReplyGenerator for LlmClient {
    async fn generate(&self, message: &str) -> Result<String, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingApiKey)?;

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(build_prompt(message)),
                }],
            }],
        };

        let url = self.endpoint();
        debug!("Sending request to Gemini: {}", url);

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await
            .map_err(GenerationError::Transport)?;

        let status = response.status();
        debug!("Gemini response status: {}", status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }

        let parsed: GenerateResponse = response.json().await.map_err(GenerationError::Decode)?;
        let text = parsed
            .into_text()
            .ok_or(GenerationError::EmptyCandidates)?;
        debug!("Generated text: {}", text);
        Ok(text)
    }
}
