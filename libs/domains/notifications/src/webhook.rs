//! HTTP webhook delivery of completion notifications.

use std::time::Duration;

use async_trait::async_trait;
use core_config::{env_optional, env_parse, ConfigError, FromEnv};
use observability::{NotificationOutcome, VectorStoreMetrics};
use reqwest::Client;
use tracing::{debug, error, info};

use crate::error::{NotificationError, NotificationResult};
use crate::models::Completion;
use crate::notifier::CompletionNotifier;

/// Path appended to a bare base URL
pub const WEBHOOK_PATH: &str = "/api/files/webhooks/embedding";

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Webhook target configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Base URL or full endpoint; `None` disables notifications.
    pub url: Option<String>,
    /// Upper bound for one delivery attempt.
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full endpoint URL, or `None` when disabled.
    ///
    /// A URL already ending in `/embedding` is used as is; anything else is
    /// treated as a base URL and gets the webhook path appended.
    pub fn endpoint(&self) -> Option<String> {
        let url = self.url.as_deref()?.trim().trim_end_matches('/');
        if url.is_empty() {
            return None;
        }
        if url.ends_with("/embedding") {
            Some(url.to_string())
        } else {
            Some(format!("{}{}", url, WEBHOOK_PATH))
        }
    }
}

impl FromEnv for WebhookConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let timeout_secs: u64 = env_parse("EMBEDDING_WEBHOOK_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMBEDDING_WEBHOOK_TIMEOUT_SECS".to_string(),
                details: "must be positive".to_string(),
            });
        }

        Ok(Self {
            url: env_optional("EMBEDDING_WEBHOOK_URL"),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Posts each `Completion` as JSON to the configured endpoint.
pub struct WebhookNotifier {
    endpoint: Option<String>,
    timeout: Duration,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> NotificationResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotificationError::ConfigError(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint(),
            timeout: config.timeout,
            client,
        })
    }

    pub fn from_env() -> NotificationResult<Self> {
        let config =
            WebhookConfig::from_env().map_err(|e| NotificationError::ConfigError(e.to_string()))?;
        Self::new(config)
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Deliver one notification, reporting what went wrong.
    ///
    /// Disabled notifiers succeed without sending anything.
    pub async fn send(&self, completion: &Completion) -> NotificationResult<()> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(());
        };

        debug!(
            endpoint = %endpoint,
            source_id = %completion.source_id,
            succeeded = completion.succeeded,
            "Sending completion webhook"
        );

        let response = self
            .client
            .post(endpoint)
            .json(completion)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotificationError::Timeout(self.timeout.as_secs())
                } else {
                    NotificationError::from(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotificationError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl CompletionNotifier for WebhookNotifier {
    async fn notify(&self, completion: Completion) {
        if !self.is_enabled() {
            debug!(source_id = %completion.source_id, "No webhook configured, skipping notification");
            VectorStoreMetrics::record_notification(NotificationOutcome::Skipped);
            return;
        }

        match self.send(&completion).await {
            Ok(()) => {
                info!(
                    source_id = %completion.source_id,
                    namespace = %completion.namespace,
                    succeeded = completion.succeeded,
                    "Completion webhook delivered"
                );
                VectorStoreMetrics::record_notification(NotificationOutcome::Delivered);
            }
            Err(e) => {
                error!(
                    source_id = %completion.source_id,
                    namespace = %completion.namespace,
                    error = %e,
                    "Completion webhook failed"
                );
                let outcome = match e {
                    NotificationError::Timeout(_) => NotificationOutcome::TimedOut,
                    NotificationError::Rejected { .. } => NotificationOutcome::Rejected,
                    _ => NotificationOutcome::Failed,
                };
                VectorStoreMetrics::record_notification(outcome);
            }
        }
    }
}
