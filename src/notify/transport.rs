use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use super::priority::Notification;
use crate::error::{MonitorError, MonitorResult};

/// Delivers one notification to its topic
///
/// Implementations classify their failures: a `transient` transport failure
/// is worth retrying, anything else is not.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, notification: &Notification) -> MonitorResult<()>;
}

/// ntfy-style publisher: `POST {base_url}/{topic}` with the message as body
#[derive(Debug, Clone)]
pub struct NtfyTransport {
    client: Client,
    base_url: String,
}

impl NtfyTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> MonitorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::ConfigInvalid(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, topic: &str) -> String {
        format!("{}/{topic}", self.base_url)
    }
}

/// 5xx and 429 are worth another attempt; other client errors are not
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl NotificationTransport for NtfyTransport {
    #[instrument(skip_all, fields(topic = %notification.topic))]
    async fn send(&self, notification: &Notification) -> MonitorResult<()> {
        let response = self
            .client
            .post(self.url(&notification.topic))
            .header("Title", &notification.title)
            .header("Priority", notification.priority.as_header())
            .header("Tags", notification.tags.join(","))
            .body(notification.message.clone())
            .send()
            .await
            .map_err(|e| MonitorError::TransportFailure {
                transient: e.is_timeout() || e.is_connect() || e.is_request(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("delivered '{}'", notification.title);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(MonitorError::TransportFailure {
            message: format!("{status}: {body}"),
            transient: is_transient_status(status),
        })
    }
}
