//! HTTP client for a remote sentiment inference service.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SentimentError;
use crate::scorer::{Scorer, SentimentScores};

/// Client for a service exposing `POST /score` with a JSON
/// `{"inputs": "<text>"}` body and `{"negative", "neutral", "positive"}`
/// response.
pub struct HttpScorer {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    inputs: &'a str,
}

impl HttpScorer {
    /// Build a client for the scoring service at `base_url`.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/score", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    async fn score(&self, text: &str) -> Result<SentimentScores, SentimentError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ScoreRequest { inputs: text })
            .send()
            .await
            .map_err(|e| SentimentError::Scoring(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SentimentError::Scoring(format!(
                "service returned status {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SentimentError::Scoring(format!("response parse error: {e}")))
    }
}
