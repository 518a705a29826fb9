use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::collections::{self, FCM_TOKENS};
use crate::store::{DocumentStore, DocumentStoreExt};

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("push gateway rejected notification: {0}")]
    Rejected(String),
}

/// Push-delivery token of one user, overwritten on every sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FcmToken {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    pub kind: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushNotification {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: PushData,
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError>;
}

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    to: &'a str,
    notification: GatewayNotification<'a>,
    data: &'a PushData,
}

#[derive(Debug, Serialize)]
struct GatewayNotification<'a> {
    title: &'a str,
    body: &'a str,
}

/// HTTP client for the push gateway. One request per notification.
#[derive(Clone)]
pub struct PushClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl PushClient {
    pub fn new(endpoint: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for PushClient {
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError> {
        let request = GatewayRequest {
            to: &notification.to,
            notification: GatewayNotification {
                title: &notification.title,
                body: &notification.body,
            },
            data: &notification.data,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Rejected(body));
        }

        tracing::debug!(kind = %notification.data.kind, "push notification sent");
        Ok(())
    }
}

/// Keeps every notification instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<PushNotification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<PushNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &PushNotification) -> Result<(), PushError> {
        if self.fail {
            return Err(PushError::Rejected("gateway unavailable".into()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}

/// Best-effort delivery to a user's registered device. Missing tokens and
/// gateway failures are logged and swallowed.
pub async fn notify_user(
    store: &dyn DocumentStore,
    notifier: &dyn Notifier,
    recipient_id: &str,
    title: &str,
    body: &str,
    data: PushData,
) {
    let token = match store
        .get_as::<FcmToken>(&collections::doc(FCM_TOKENS, recipient_id))
        .await
    {
        Ok(Some(token)) => token.token,
        Ok(None) => {
            tracing::debug!(recipient_id = %recipient_id, "no push token registered");
            return;
        }
        Err(e) => {
            tracing::warn!(recipient_id = %recipient_id, error = %e, "failed to read push token");
            return;
        }
    };

    let kind = data.kind.clone();
    let notification = PushNotification {
        to: token,
        title: title.to_string(),
        body: body.to_string(),
        data,
    };

    match notifier.send(&notification).await {
        Ok(()) => {
            metrics::counter!("push_notifications_total", "kind" => kind, "outcome" => "sent").increment(1);
        }
        Err(e) => {
            tracing::warn!(recipient_id = %recipient_id, error = %e, "push notification failed");
            metrics::counter!("push_notifications_total", "kind" => kind, "outcome" => "failed").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{to_document, MemoryStore};

    fn data() -> PushData {
        PushData {
            kind: "message".into(),
            sender_id: "a".into(),
            message: Some("hi".into()),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn delivers_to_registered_token() {
        let store = MemoryStore::new();
        let token = FcmToken { user_id: "b".into(), token: "tok-b".into() };
        store
            .set(&collections::doc(FCM_TOKENS, "b"), to_document(&token).unwrap())
            .await
            .unwrap();

        let notifier = RecordingNotifier::new();
        notify_user(&store, &notifier, "b", "A", "hi", data()).await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "tok-b");
        assert_eq!(sent[0].data.message.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn missing_token_sends_nothing() {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::new();
        notify_user(&store, &notifier, "nobody", "A", "hi", data()).await;
        assert!(notifier.sent().is_empty());
    }
}
