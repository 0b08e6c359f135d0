//! Messaging endpoint for per-product summaries

use std::time::Duration;

use async_trait::async_trait;
use coa_common::config::NotifierConfig;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> E2eResult<()>;
}

/// Posts `{"text": ...}` to a chat webhook, replying into a thread when configured
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    thread_key: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &NotifierConfig) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone().filter(|u| !u.is_empty()),
            thread_key: config.thread_key.clone().filter(|k| !k.is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> E2eResult<()> {
        let Some(url) = &self.webhook_url else {
            warn!("Notifier webhook not configured; skipping message");
            return Ok(());
        };

        let mut request = self.client.post(url).json(&json!({ "text": message }));
        if let Some(key) = &self.thread_key {
            request = request.query(&[
                ("threadKey", key.as_str()),
                ("messageReplyOption", "REPLY_MESSAGE_FALLBACK_TO_NEW_THREAD"),
            ]);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(E2eError::Notifier(format!(
                "webhook returned {}",
                resp.status()
            )));
        }
        info!("Notification sent ({} chars)", message.chars().count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_posts_text_into_thread() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(query_param("threadKey", "coa-nightly"))
            .and(body_json(json!({ "text": "✅ [ACP-2] done" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(&NotifierConfig {
            webhook_url: Some(format!("{}/hook", server.uri())),
            thread_key: Some("coa-nightly".to_string()),
        })
        .unwrap();

        notifier.notify("✅ [ACP-2] done").await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(&NotifierConfig {
            webhook_url: Some(server.uri()),
            thread_key: None,
        })
        .unwrap();

        let err = notifier.notify("hello").await.unwrap_err();
        assert!(matches!(err, E2eError::Notifier(_)));
    }

    #[tokio::test]
    async fn test_missing_webhook_is_noop() {
        let notifier = WebhookNotifier::new(&NotifierConfig::default()).unwrap();
        assert!(!notifier.is_configured());
        notifier.notify("hello").await.unwrap();
    }
}
