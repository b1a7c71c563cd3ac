//! Downstream profile creation.

use anyhow::Context;
use async_trait::async_trait;
use intake_core::{IntakeRecord, PipelineError};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

#[async_trait]
pub trait ProfileCreator: Send + Sync {
    /// Create (or find) the profile for a parsed record and return its ID.
    ///
    /// Implementations must be idempotent per `qid`; finalize may run more
    /// than once for the same record.
    async fn create_profile(
        &self,
        record: &IntakeRecord,
        parsed: &Value,
    ) -> Result<Option<String>, PipelineError>;
}

/// Used when no profile service is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopProfileCreator;

#[async_trait]
impl ProfileCreator for NoopProfileCreator {
    async fn create_profile(
        &self,
        _record: &IntakeRecord,
        _parsed: &Value,
    ) -> Result<Option<String>, PipelineError> {
        Ok(None)
    }
}

/// Posts parsed output to a profile service, keyed for idempotency by qid.
#[derive(Clone)]
pub struct HttpProfileCreator {
    url: String,
    http_client: Client,
}

impl HttpProfileCreator {
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for profile service")?;
        Ok(Self { url, http_client })
    }

    fn profile_id(body: &Value) -> Option<String> {
        ["profileID", "profileId", "id"]
            .iter()
            .find_map(|key| match body.get(*key) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
    }
}

#[async_trait]
impl ProfileCreator for HttpProfileCreator {
    #[tracing::instrument(skip(self, record, parsed), fields(qid = %record.qid))]
    async fn create_profile(
        &self,
        record: &IntakeRecord,
        parsed: &Value,
    ) -> Result<Option<String>, PipelineError> {
        let body = json!({
            "qid": record.qid,
            "sid": record.sid,
            "userID": record.user_id,
            "source": record.source,
            "originalFilename": record.original_filename,
            "profile": parsed,
        });

        let response = self
            .http_client
            .post(&self.url)
            .header("Idempotency-Key", record.qid.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Finalize(format!("Profile service unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Finalize(format!(
                "Profile service returned {}: {}",
                status, text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Finalize(format!("Invalid profile service response: {}", e)))?;
        let profile_id = Self::profile_id(&body);

        tracing::info!(profile_id = ?profile_id, "Profile created");
        Ok(profile_id)
    }
}
