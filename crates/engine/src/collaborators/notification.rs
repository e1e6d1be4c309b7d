//! Notification sinks: structured log output, or a JSON webhook.

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::json;
use stepflow_types::NotificationLevel;
use stepflow_util::http::status_failure_message;
use tracing::{error, info, warn};

use super::{HttpClient, HttpRequest, Notification, NotificationSink};

/// Emits notifications as tracing events at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let title = notification.title.as_deref().unwrap_or("");
        match notification.level {
            NotificationLevel::Info => info!(
                workflow = %notification.workflow_name,
                execution_id = %notification.execution_id,
                title,
                "{}",
                notification.message
            ),
            NotificationLevel::Warning => warn!(
                workflow = %notification.workflow_name,
                execution_id = %notification.execution_id,
                title,
                "{}",
                notification.message
            ),
            NotificationLevel::Error => error!(
                workflow = %notification.workflow_name,
                execution_id = %notification.execution_id,
                title,
                "{}",
                notification.message
            ),
        }
        Ok(())
    }
}

/// POSTs each notification as JSON to a configured URL.
pub struct WebhookNotificationSink {
    url: String,
    http: Arc<dyn HttpClient>,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        Self { url: url.into(), http }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let payload = json!({
            "title": notification.title,
            "message": notification.message,
            "level": notification.level,
            "workflow": notification.workflow_name,
            "executionId": notification.execution_id,
        });
        let response = self
            .http
            .send(HttpRequest {
                method: "POST".into(),
                url: self.url.clone(),
                headers: Vec::new(),
                body: Some(payload),
            })
            .await?;
        if !response.is_success() {
            bail!("notification webhook rejected: {}", status_failure_message(response.status, &response.raw_body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ReqwestHttpClient;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> Notification {
        Notification {
            title: Some("Deploy".into()),
            message: "done".into(),
            level: NotificationLevel::Warning,
            workflow_name: "release".into(),
            execution_id: "exec-1".into(),
        }
    }

    #[tokio::test]
    async fn tracing_sink_always_delivers() {
        TracingNotificationSink.send(&notification()).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"message": "done", "level": "warning", "executionId": "exec-1"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookNotificationSink::new(server.uri(), Arc::new(ReqwestHttpClient::new(5).unwrap()));
        sink.send(&notification()).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("nope"))
            .mount(&server)
            .await;

        let sink = WebhookNotificationSink::new(server.uri(), Arc::new(ReqwestHttpClient::new(5).unwrap()));
        let error = sink.send(&notification()).await.unwrap_err();
        assert!(error.to_string().contains("HTTP 500"));
    }
}
