//! Remote AI parsing engine client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use intake_processing::{DocumentType, ParseOutcome, Parser, ParsingError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParseRequest<'a> {
    text: &'a str,
    document_type: DocumentType,
}

#[derive(Deserialize)]
struct ParseResponse {
    result: Value,
    #[serde(default)]
    confidence: f64,
}

/// Posts extracted text to an external parsing service.
#[derive(Clone)]
pub struct HttpParser {
    endpoint: String,
    api_key: Option<String>,
    http_client: Client,
}

impl HttpParser {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client for parsing engine")?;

        Ok(Self {
            endpoint,
            api_key,
            http_client,
        })
    }
}

#[async_trait]
impl Parser for HttpParser {
    fn engine_name(&self) -> &'static str {
        "http"
    }

    #[tracing::instrument(skip(self, text), fields(endpoint = %self.endpoint, text_len = text.len()))]
    async fn parse(
        &self,
        text: &str,
        document_type: DocumentType,
    ) -> Result<ParseOutcome, ParsingError> {
        if text.trim().is_empty() {
            return Err(ParsingError::EmptyInput);
        }

        let start = Instant::now();
        let mut request = self
            .http_client
            .post(&self.endpoint)
            .json(&ParseRequest {
                text,
                document_type,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ParsingError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ParsingError::Engine(format!(
                "Parsing engine returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParsingError::InvalidResponse(format!(
                "Parsing engine rejected request: {} - {}",
                status, body
            )));
        }

        let parsed: ParseResponse = response
            .json()
            .await
            .map_err(|e| ParsingError::InvalidResponse(e.to_string()))?;

        tracing::debug!(
            confidence = parsed.confidence,
            duration_ms = start.elapsed().as_millis() as u64,
            "Remote parse complete"
        );

        Ok(ParseOutcome {
            output: parsed.result,
            confidence: parsed.confidence.clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_engine_is_transient() {
        let parser = HttpParser::new(
            "http://127.0.0.1:1/parse".to_string(),
            Some("key".to_string()),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = parser
            .parse("Jane Doe", DocumentType::Resume)
            .await
            .unwrap_err();
        assert!(matches!(err, ParsingError::Unavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_text_never_leaves_the_process() {
        let parser =
            HttpParser::new("http://127.0.0.1:1/parse".to_string(), None, Duration::from_secs(2))
                .unwrap();
        let err = parser.parse(" ", DocumentType::Generic).await.unwrap_err();
        assert_eq!(err, ParsingError::EmptyInput);
    }
}
