//! # Evaluation Request Dispatcher
//!
//! Sends one signed envelope plus its audio to the scoring service and returns
//! the raw response body. The request is a `multipart/form-data` POST with
//! exactly two parts:
//! - `text`: the serialized session envelope
//! - `audio`: the normalized WAV bytes, filename `audio.wav`
//!
//! There is no retry and no timeout beyond the HTTP client's defaults. Each
//! failure maps to one [`EvalError`] variant and is returned to the caller.

use super::envelope::SessionEnvelope;
use crate::audio::NormalizedAudio;
use crate::config::ScoringConfig;
use crate::error::EvalError;
use anyhow::Result;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, error, info};

/// Name of the sequencing header expected by the scoring service.
pub const REQUEST_INDEX_HEADER: &str = "Request-Index";
/// Filename attached to the audio part.
pub const AUDIO_FILENAME: &str = "audio.wav";

/// HTTP client for the scoring service.
#[derive(Debug, Clone)]
pub struct EvaluationDispatcher {
    client: Client,
    base_url: String,
    request_index: String,
}

impl EvaluationDispatcher {
    pub fn new(config: &ScoringConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_index: config.request_index.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Endpoint for a scoring engine variant: the core type is the whole path.
    pub fn endpoint(&self, core_type: &str) -> String {
        format!("{}/{}", self.base_url, core_type)
    }

    /// Submit one evaluation and return the response body as text.
    pub async fn submit(
        &self,
        core_type: &str,
        envelope: &SessionEnvelope,
        audio: NormalizedAudio,
    ) -> Result<String, EvalError> {
        let url = self.endpoint(core_type);
        let text = envelope
            .to_json()
            .map_err(|e| EvalError::Submission(format!("Failed to serialize envelope: {}", e)))?;

        let audio_len = audio.byte_len();
        let audio_part = Part::bytes(audio.into_bytes())
            .file_name(AUDIO_FILENAME)
            .mime_str("audio/wav")
            .map_err(|e| EvalError::Submission(e.to_string()))?;

        let form = Form::new().text("text", text).part("audio", audio_part);

        debug!(url = %url, audio_bytes = audio_len, "Submitting evaluation");

        let response = self
            .client
            .post(&url)
            .header(REQUEST_INDEX_HEADER, &self.request_index)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Request submission error");
                EvalError::Submission(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(url = %url, status = status.as_u16(), "Scoring service rejected request");
            return Err(EvalError::RemoteStatus(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| {
            error!(url = %url, error = %e, "Failed to read scoring response");
            EvalError::ResponseRead(e.to_string())
        })?;

        info!(url = %url, status = status.as_u16(), response_bytes = body.len(), "Evaluation completed");
        Ok(body)
    }
}
