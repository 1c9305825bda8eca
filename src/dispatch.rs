//! Webhook forwarding for classified events.
//!
//! Self-originated events go to the manual-reply endpoint, peer events to
//! the AI-reply endpoint. One POST per event, no retry, no queue.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use wabridge_core::{config::WebhookConfig, error::BridgeError};

/// Payload for the manual-reply endpoint (operator typed on the phone).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualReply {
    pub from: String,
    pub message: String,
    pub message_id: String,
    pub pushname: String,
}

/// Payload for the AI-reply endpoint (customer wrote in).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiReply {
    pub from: String,
    pub message: String,
    #[serde(rename = "type")]
    pub content_tag: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub message_id: String,
    pub pushname: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Webhook {
    Manual(ManualReply),
    Ai(AiReply),
}

impl Webhook {
    pub fn route(&self) -> &'static str {
        match self {
            Webhook::Manual(_) => "manual_reply",
            Webhook::Ai(_) => "ai_reply",
        }
    }
}

/// Delivers one webhook. Errors are reported to the caller, which only logs them.
#[async_trait]
pub trait Forward: Send + Sync {
    async fn forward(&self, hook: Webhook) -> Result<(), BridgeError>;
}

/// `reqwest`-backed forwarder.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    manual_reply: Option<String>,
    ai_reply: Option<String>,
}

impl WebhookDispatcher {
    pub fn new(config: &WebhookConfig) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BridgeError::Webhook(format!("failed to build http client: {e}")))?;
        if config.manual_reply.is_none() {
            warn!("webhooks.manual_reply not set; operator messages will not be forwarded");
        }
        if config.ai_reply.is_none() {
            warn!("webhooks.ai_reply not set; customer messages will not be forwarded");
        }
        Ok(Self {
            client,
            manual_reply: config.manual_reply.clone(),
            ai_reply: config.ai_reply.clone(),
        })
    }

    async fn post<T: Serialize + Sync>(&self, url: &str, body: &T) -> Result<(), BridgeError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| BridgeError::Webhook(format!("{url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(BridgeError::Webhook(format!(
                "{url} returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Forward for WebhookDispatcher {
    async fn forward(&self, hook: Webhook) -> Result<(), BridgeError> {
        let url = match &hook {
            Webhook::Manual(_) => self.manual_reply.as_deref(),
            Webhook::Ai(_) => self.ai_reply.as_deref(),
        };
        let Some(url) = url else {
            debug!("no {} endpoint configured, dropping event", hook.route());
            return Ok(());
        };

        match &hook {
            Webhook::Manual(body) => self.post(url, body).await,
            Webhook::Ai(body) => self.post(url, body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_ai_payload_shape() {
        let hook = AiReply {
            from: "628111".into(),
            message: "[Image]".into(),
            content_tag: "imageMessage".into(),
            media_url: Some("http://localhost:3001/media/a.jpg".into()),
            media_type: Some("image".into()),
            message_id: "ABC".into(),
            pushname: "Budi".into(),
        };
        let json = serde_json::to_value(&hook).unwrap();
        assert_eq!(json["type"], "imageMessage");
        assert_eq!(json["media_type"], "image");
        assert_eq!(json["from"], "628111");
        assert!(json.get("content_tag").is_none());
    }

    #[test]
    fn test_manual_payload_shape() {
        let hook = ManualReply {
            from: "628111".into(),
            message: "hi".into(),
            message_id: "X1".into(),
            pushname: "Me".into(),
        };
        let json = serde_json::to_value(&hook).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 4);
        assert_eq!(json["pushname"], "Me");
    }

    #[tokio::test]
    async fn test_unconfigured_route_is_dropped() {
        let dispatcher = WebhookDispatcher::new(&WebhookConfig::default()).unwrap();
        let hook = Webhook::Manual(ManualReply {
            from: "1".into(),
            message: "m".into(),
            message_id: "i".into(),
            pushname: "Me".into(),
        });
        assert!(dispatcher.forward(hook).await.is_ok());
    }

    #[tokio::test]
    async fn test_posts_to_route_and_reports_failures() {
        type Seen = Arc<Mutex<Vec<Value>>>;
        let received: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/ai",
                post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                    seen.lock().unwrap().push(body);
                    "ok"
                }),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = WebhookConfig {
            manual_reply: Some(format!("http://{addr}/missing")),
            ai_reply: Some(format!("http://{addr}/ai")),
            timeout_secs: 5,
        };
        let dispatcher = WebhookDispatcher::new(&config).unwrap();

        let ai = Webhook::Ai(AiReply {
            from: "628111".into(),
            message: "halo".into(),
            content_tag: "conversation".into(),
            media_url: None,
            media_type: None,
            message_id: "M1".into(),
            pushname: "Budi".into(),
        });
        dispatcher.forward(ai).await.unwrap();
        {
            let seen = received.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0]["message"], "halo");
            assert!(seen[0]["media_url"].is_null());
        }

        let manual = Webhook::Manual(ManualReply {
            from: "628111".into(),
            message: "hi".into(),
            message_id: "M2".into(),
            pushname: "Me".into(),
        });
        let err = dispatcher.forward(manual).await.unwrap_err();
        assert!(matches!(err, BridgeError::Webhook(_)));
    }
}
