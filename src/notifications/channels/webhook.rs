//! Webhook notification channel
//!
//! Sends job events as JSON payloads via HTTP POST requests.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use super::{Channel, ChannelError, ChannelResult, DeliveryStatus};
use crate::notifications::JobEvent;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// One `[[notifications.webhooks]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>`
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "WebhookConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first POST; 4xx answers are never retried
    #[serde(default = "WebhookConfig::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "WebhookConfig::default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl WebhookConfig {
    fn default_timeout_secs() -> u64 {
        10
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_retry_base_ms() -> u64 {
        1000
    }

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: HashMap::new(),
            timeout_secs: Self::default_timeout_secs(),
            max_retries: Self::default_max_retries(),
            retry_base_ms: Self::default_retry_base_ms(),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_base_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_ms = retry_base_ms;
        self
    }

    pub fn validate(&self) -> ChannelResult<()> {
        let invalid = |reason: String| -> ChannelResult<()> { Err(ChannelError::InvalidConfig(reason)) };

        match Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => return invalid(format!("webhook '{}': unsupported scheme '{}'", self.url, url.scheme())),
            Err(e) => return invalid(format!("webhook '{}': {e}", self.url)),
        }

        if self.timeout_secs == 0 {
            return invalid(format!("webhook '{}': timeout_secs must be positive", self.url));
        }

        Ok(())
    }
}

/// POSTs each event as JSON:
///
/// ```json
/// {
///   "id": "event-uuid",
///   "event": "checkpoint_created",
///   "job_id": "3f2c...",
///   "message": "Checkpoint 3 created",
///   "metadata": { "sequence": "3", "entries": "120" },
///   "created_at": "2024-01-01T12:00:00Z"
/// }
/// ```
pub struct WebhookChannel {
    client: Client,
    config: WebhookConfig,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> ChannelResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn from_url(url: impl Into<String>) -> ChannelResult<Self> {
        Self::new(WebhookConfig::new(url))
    }

    fn build_payload(&self, event: &JobEvent) -> serde_json::Value {
        serde_json::json!({
            "id": event.id,
            "event": event.kind.as_str(),
            "job_id": event.job_id,
            "message": event.message,
            "metadata": event.metadata,
            "created_at": event.created_at.to_rfc3339(),
        })
    }

    async fn post(&self, payload: &serde_json::Value) -> ChannelResult<u16> {
        let mut request = self.client.post(&self.config.url);

        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.json(payload).send().await?;
        let status = response.status();

        if status.is_success() {
            tracing::debug!(url = %self.config.url, status = %status, "Webhook delivered");
            return Ok(status.as_u16());
        }

        let body = response
            .text()
            .await
            .unwrap_or_default();

        Err(ChannelError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, event: &JobEvent) -> ChannelResult<DeliveryStatus> {
        let payload = self.build_payload(event);
        let retry = RetryConfig::with_delays(
            self.config.max_retries,
            self.config.retry_base_ms,
            self.config.retry_base_ms.saturating_mul(16),
        );

        match with_retry_if(&retry, || self.post(&payload), ChannelError::is_retryable).await {
            Ok(status) => Ok(DeliveryStatus::success("webhook").with_detail(format!("HTTP {status}"))),
            Err(e) => {
                tracing::error!(url = %self.config.url, error = %e, "Failed to deliver webhook");
                Ok(DeliveryStatus::failure("webhook", e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobId;
    use crate::notifications::JobEventKind;

    #[test]
    fn test_webhook_config_validation() {
        assert!(WebhookConfig::new("https://hooks.example.com/crawl").validate().is_ok());
        for bad in ["", "hooks.example.com/crawl", "ftp://hooks.example.com/"] {
            assert!(matches!(
                WebhookConfig::new(bad).validate(),
                Err(ChannelError::InvalidConfig(_))
            ));
        }
        assert!(WebhookConfig::new("https://hooks.example.com")
            .with_timeout(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_webhook_from_url() {
        assert!(WebhookChannel::from_url("https://example.com/alerts").is_ok());
        assert!(WebhookChannel::from_url("not-a-url").is_err());
    }

    #[test]
    fn test_webhook_payload_building() {
        let channel = WebhookChannel::from_url("https://example.com/webhook").unwrap();
        let event = JobEvent::new(
            JobEventKind::CheckpointCreated,
            &JobId::new("job-7").unwrap(),
            "Checkpoint 3 created",
        )
        .with_metadata("sequence", 3);

        let payload = channel.build_payload(&event);

        assert_eq!(payload["event"], "checkpoint_created");
        assert_eq!(payload["job_id"], "job-7");
        assert_eq!(payload["metadata"]["sequence"], "3");
        assert!(payload["created_at"].is_string());
    }

    #[test]
    fn test_webhook_config_from_toml() {
        let config: WebhookConfig = toml::from_str(
            r#"
                url = "https://hooks.example.com/crawl"
                auth_token = "secret"
                headers = { "X-Team" = "crawl" }
            "#,
        )
        .unwrap();

        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.headers.get("X-Team"), Some(&"crawl".to_string()));
    }

    #[tokio::test]
    async fn test_webhook_posts_json_with_auth() {
        use wiremock::matchers::{body_partial_json, header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("authorization", "Bearer secret"))
            .and(header("x-team", "crawl"))
            .and(body_partial_json(serde_json::json!({
                "event": "job_completed",
                "job_id": "job-7"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = WebhookConfig::new(format!("{}/hook", server.uri()));
        config.auth_token = Some("secret".into());
        config.headers.insert("X-Team".into(), "crawl".into());
        let channel = WebhookChannel::new(config).unwrap();

        let event = JobEvent::new(JobEventKind::JobCompleted, &JobId::new("job-7").unwrap(), "done");
        let status = channel.send(&event).await.unwrap();
        assert!(status.delivered);
        assert_eq!(status.detail.as_deref(), Some("HTTP 204"));
    }

    #[tokio::test]
    async fn test_webhook_client_error_not_retried() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(410).set_body_string("gone"))
            .expect(1)
            .mount(&server)
            .await;

        let config = WebhookConfig::new(server.uri()).with_retries(3, 1);
        let channel = WebhookChannel::new(config).unwrap();
        let event = JobEvent::new(JobEventKind::JobFailed, &JobId::new("job-7").unwrap(), "boom");

        let status = channel.send(&event).await.unwrap();
        assert!(!status.delivered);
        assert!(status.detail.unwrap_or_default().contains("410"));
    }
}
