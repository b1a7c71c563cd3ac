//! Completion notifications.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_core::{IntakeRecord, IntakeStatus, Qid, Sid};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[cfg(feature = "webhook")]
use hmac::{Hmac, Mac};
#[cfg(feature = "webhook")]
use sha2::Sha256;

#[cfg(feature = "webhook")]
type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Intake-Signature";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeNotification {
    pub event: String,
    pub qid: Qid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<Sid>,
    #[serde(rename = "userID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: IntakeStatus,
    #[serde(rename = "profileID", skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl IntakeNotification {
    pub fn from_record(event: &str, record: &IntakeRecord) -> Self {
        Self {
            event: event.to_string(),
            qid: record.qid,
            sid: record.sid,
            user_id: record.user_id.clone(),
            status: record.status,
            profile_id: record.profile_id.clone(),
            error_message: record.error_message.clone(),
            occurred_at: Utc::now(),
        }
    }
}

/// Fire-and-forget delivery; callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &IntakeNotification) -> Result<()>;
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &IntakeNotification) -> Result<()> {
        tracing::info!(
            event = %notification.event,
            qid = %notification.qid,
            status = %notification.status,
            profile_id = ?notification.profile_id,
            "Intake notification"
        );
        Ok(())
    }
}

/// Posts notifications as JSON, signed with HMAC-SHA256 when a secret is set.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    signing_secret: Option<String>,
    http_client: Client,
}

impl WebhookNotifier {
    pub fn new(url: String, signing_secret: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client for webhooks")?;

        Ok(Self {
            url,
            signing_secret,
            http_client,
        })
    }

    /// Hex HMAC-SHA256 of `body`.
    #[cfg(feature = "webhook")]
    pub fn sign_payload(body: &str, secret: &str) -> Result<String> {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).context("Invalid signing secret")?;
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    #[cfg(feature = "webhook")]
    pub fn verify_signature(body: &str, secret: &str, signature: &str) -> Result<bool> {
        let expected = Self::sign_payload(body, secret)?;
        Ok(signature.strip_prefix("v1=").unwrap_or(signature) == expected)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[tracing::instrument(skip(self, notification), fields(qid = %notification.qid, event = %notification.event))]
    async fn notify(&self, notification: &IntakeNotification) -> Result<()> {
        let body =
            serde_json::to_string(notification).context("Failed to serialize notification")?;

        let mut request = self
            .http_client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "Intake-Webhook/1.0");

        #[cfg(feature = "webhook")]
        if let Some(secret) = &self.signing_secret {
            let signature = Self::sign_payload(&body, secret)?;
            request = request.header(SIGNATURE_HEADER, format!("v1={}", signature));
        }
        #[cfg(not(feature = "webhook"))]
        if self.signing_secret.is_some() {
            tracing::warn!("Webhook signing requires the webhook feature; sending unsigned");
        }

        let response = request
            .body(body)
            .send()
            .await
            .context("Failed to send webhook request")?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("Failed to read response body"));
            anyhow::bail!("Webhook returned non-2xx status: {} - {}", status, text);
        }

        tracing::debug!(status = %status, "Webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::models::NewIntakeRecord;
    use intake_core::IntakeSource;

    fn archived_record() -> IntakeRecord {
        let mut record = IntakeRecord::new(
            NewIntakeRecord {
                qid: Qid::generate(),
                sid: None,
                source: IntakeSource::Web,
                user_id: Some("user-7".to_string()),
                original_filename: "resume.pdf".to_string(),
                storage_path: "archive/x/resume.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                file_size: 10,
            },
            Utc::now(),
        );
        record.status = IntakeStatus::Archived;
        record.profile_id = Some("p-1".to_string());
        record
    }

    #[test]
    fn test_notification_wire_names() {
        let notification = IntakeNotification::from_record("intake.archived", &archived_record());
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["event"], "intake.archived");
        assert_eq!(value["status"], "archived");
        assert_eq!(value["profileID"], "p-1");
        assert_eq!(value["userID"], "user-7");
        assert!(value.get("sid").is_none());
        assert!(value.get("errorMessage").is_none());
    }

    #[cfg(feature = "webhook")]
    #[test]
    fn test_signature_roundtrip() {
        let body = r#"{"event":"intake.archived"}"#;
        let signature = WebhookNotifier::sign_payload(body, "s3cret").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(WebhookNotifier::verify_signature(body, "s3cret", &format!("v1={}", signature)).unwrap());
        assert!(!WebhookNotifier::verify_signature(body, "other", &signature).unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_error() {
        let notifier = WebhookNotifier::new(
            "http://127.0.0.1:1/hook".to_string(),
            Some("s3cret".to_string()),
            Duration::from_secs(2),
        )
        .unwrap();
        let result = notifier
            .notify(&IntakeNotification::from_record("intake.archived", &archived_record()))
            .await;
        assert!(result.is_err());
    }
}
