mod chat_room;
mod message;
mod replies;

use std::sync::Arc;
use std::time::Duration;

use lokcet_shared::clients::push::Notifier;
use lokcet_shared::collections::{self, USERS};
use lokcet_shared::store::DocumentStore;

pub use chat_room::{chat_room_upsert, room_id};

/// Bounded polling used while the newest message may not be readable yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for SeenRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct MessagingService {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    seen_retry: SeenRetry,
}

impl MessagingService {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            seen_retry: SeenRetry::default(),
        }
    }

    pub fn with_seen_retry(mut self, retry: SeenRetry) -> Self {
        self.seen_retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Name shown as the push title. Falls back to the app name.
    async fn display_name(&self, user_id: &str) -> String {
        let name = match self.store.get(&collections::doc(USERS, user_id)).await {
            Ok(Some(snapshot)) => {
                let first = snapshot.data.get("firstName").and_then(|v| v.as_str()).unwrap_or("");
                let last = snapshot.data.get("lastName").and_then(|v| v.as_str()).unwrap_or("");
                format!("{first} {last}").trim().to_string()
            }
            Ok(None) => String::new(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "failed to read sender profile");
                String::new()
            }
        };
        if name.is_empty() {
            "Lokcet".to_string()
        } else {
            name
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use lokcet_shared::clients::push::RecordingNotifier;
    use lokcet_shared::store::MemoryStore;

    use super::MessagingService;

    pub fn service() -> (MessagingService, MemoryStore, Arc<RecordingNotifier>) {
        let store = MemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let service = MessagingService::new(Arc::new(store.clone()), notifier.clone());
        (service, store, notifier)
    }
}
