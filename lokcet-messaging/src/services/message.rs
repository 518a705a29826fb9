use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;

use lokcet_shared::clients::push::{notify_user, PushData};
use lokcet_shared::collections::{self, CHAT_ROOMS, IMAGE_REPLIES, LATEST_MESSAGES};
use lokcet_shared::errors::{AppError, AppResult, ErrorCode};
use lokcet_shared::store::{to_document, Direction, DocumentStoreExt, FieldUpdate, Precondition, Query, WriteBatch};
use lokcet_shared::subscription::{watched_value, WatchSet};
use lokcet_shared::types::now_millis;

use super::chat_room::{messages_collection, room_id};
use super::MessagingService;
use crate::models::{reply_ref, Message, ReplyFeed};

impl MessagingService {
    pub async fn send_message(&self, sender_id: &str, receiver_id: &str, content: &str) -> AppResult<Message> {
        self.send(sender_id, receiver_id, content, None).await
    }

    /// Sends a message replying to a feed image. The content may be empty.
    pub async fn send_reply_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        reply: ReplyFeed,
    ) -> AppResult<Message> {
        self.send(sender_id, receiver_id, content, Some(reply)).await
    }

    async fn send(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        reply_feed: Option<ReplyFeed>,
    ) -> AppResult<Message> {
        let content = content.trim();
        if content.is_empty() && reply_feed.is_none() {
            return Err(AppError::new(ErrorCode::EmptyMessage, "message content is empty"));
        }
        let room = self.get_chat_room(&room_id(sender_id, receiver_id)).await?;

        let id = self.store.new_id();
        let message = Message {
            id: id.clone(),
            room_id: room.id.clone(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            created_at: now_millis(),
            seen_at: false,
            reply_feed,
        };

        // Message, projection and reply index land together, and only while the
        // room still exists.
        let data = to_document(&message)?;
        let mut batch = WriteBatch::new()
            .require(collections::doc(CHAT_ROOMS, &room.id), Precondition::Exists)
            .set(messages_collection(&room.id).doc(&id), data.clone())
            .set(collections::doc(LATEST_MESSAGES, &room.id), data);
        if let Some(reply) = &message.reply_feed {
            let index = collections::doc(IMAGE_REPLIES, &reply.image_id);
            batch = batch
                .merge(index.clone(), json!({ "imageId": reply.image_id }))
                .update(index, vec![FieldUpdate::array_union("refs", [reply_ref(&room.id, &id)])]);
        }
        self.store.commit(batch).await?;

        let kind = if message.reply_feed.is_some() { "reply" } else { "text" };
        metrics::counter!("messages_sent_total", "kind" => kind).increment(1);
        tracing::info!(room_id = %room.id, message_id = %id, sender_id = %sender_id, kind, "message sent");

        let title = self.display_name(sender_id).await;
        let body = if content.is_empty() { "Đã trả lời ảnh của bạn" } else { content };
        let data = PushData {
            kind: "message".to_string(),
            sender_id: sender_id.to_string(),
            message: Some(content.to_string()),
            image_url: message.reply_feed.as_ref().map(|r| r.image_url.clone()),
        };
        notify_user(self.store.as_ref(), self.notifier.as_ref(), receiver_id, &title, body, data).await;

        Ok(message)
    }

    /// Messages of a room, oldest first.
    pub async fn messages(&self, room_id: &str) -> AppResult<Vec<Message>> {
        Ok(self.store.query_as::<Message>(&room_messages_query(room_id)).await?)
    }

    /// Live message list of a room, oldest first. A deleted room yields an
    /// empty list.
    pub fn message_list(&self, room_id: &str) -> BoxStream<'static, AppResult<Vec<Message>>> {
        self.store
            .watch_query(room_messages_query(room_id))
            .map(|result| -> AppResult<Vec<Message>> {
                let snapshots = result?;
                snapshots
                    .iter()
                    .map(|s| s.decode::<Message>().map_err(AppError::from))
                    .collect()
            })
            .boxed()
    }

    /// Flips the seen flag of the room's newest message if `user_id` received
    /// it. The newest message may not be readable right after it was sent, so
    /// an empty read is retried per [`super::SeenRetry`]. Returns whether a
    /// flag was flipped.
    pub async fn mark_last_message_as_seen(&self, user_id: &str, room_id: &str) -> AppResult<bool> {
        let query = Query::new(messages_collection(room_id))
            .order_by("createdAt", Direction::Descending)
            .limit(1);
        let attempts = self.seen_retry.attempts.max(1);

        for attempt in 1..=attempts {
            let latest = self.store.query_as::<Message>(&query).await?.into_iter().next();
            let Some(message) = latest else {
                if attempt < attempts {
                    tracing::debug!(room_id = %room_id, attempt, "latest message not visible yet, retrying");
                    tokio::time::sleep(self.seen_retry.delay).await;
                }
                continue;
            };

            if !message.is_unseen_by(user_id) {
                return Ok(false);
            }

            let seen = || vec![FieldUpdate::set("seenAt", true)];
            let mut batch = WriteBatch::new().update(messages_collection(room_id).doc(&message.id), seen());
            let projection = collections::doc(LATEST_MESSAGES, room_id);
            if let Some(current) = self.store.get_as::<Message>(&projection).await? {
                if current.id == message.id {
                    batch = batch.update(projection, seen());
                }
            }
            self.store.commit(batch).await?;
            tracing::debug!(room_id = %room_id, message_id = %message.id, "message marked as seen");
            return Ok(true);
        }

        Ok(false)
    }

    /// Latest-message projections of the given rooms, newest first, re-emitted
    /// on every change.
    pub fn latest_messages(&self, room_ids: Vec<String>) -> BoxStream<'static, AppResult<Vec<Message>>> {
        let store = self.store.clone();
        Box::pin(async_stream::stream! {
            let mut watches: WatchSet<String, Message> = WatchSet::new();
            for id in room_ids {
                let watch = store
                    .watch_document(collections::doc(LATEST_MESSAGES, &id))
                    .map(watched_value::<Message>);
                watches.insert(id, watch);
            }
            if watches.is_empty() {
                yield Ok::<_, AppError>(Vec::new());
            }
            while let Some(view) = watches.next().await {
                let mut latest: Vec<Message> = view.values().cloned().collect();
                latest.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.room_id.cmp(&b.room_id)));
                yield Ok(latest);
            }
        })
    }

    /// Number of rooms whose newest message is addressed to `user_id` and
    /// still unseen.
    pub async fn unseen_count(&self, user_id: &str, room_ids: &[String]) -> AppResult<usize> {
        let store = &self.store;
        let reads = room_ids.iter().map(|id| {
            let path = collections::doc(LATEST_MESSAGES, id);
            async move { store.get_as::<Message>(&path).await }
        });
        let latest = futures::future::try_join_all(reads).await?;
        Ok(latest
            .into_iter()
            .flatten()
            .filter(|m| m.is_unseen_by(user_id))
            .count())
    }
}

fn room_messages_query(room_id: &str) -> Query {
    Query::new(messages_collection(room_id)).order_by("createdAt", Direction::Ascending)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::models::ReplyIndex;
    use crate::services::test_support::service;
    use crate::SeenRetry;
    use lokcet_shared::clients::push::FcmToken;
    use lokcet_shared::collections::{FCM_TOKENS, USERS};
    use lokcet_shared::store::DocumentStore;

    fn reply() -> ReplyFeed {
        ReplyFeed {
            image_id: "img1".into(),
            image_url: "memory://images/img1.jpg".into(),
            owner_id: "b".into(),
            caption: "sunset".into(),
        }
    }

    #[tokio::test]
    async fn send_updates_messages_and_projection_together() {
        let (service, store, _) = service();
        service.create_chat_room("a", "b").await.unwrap();

        let sent = service.send_message("a", "b", "  hello  ").await.unwrap();
        assert_eq!(sent.content, "hello");

        let stored: Message = store
            .get_as(&messages_collection("a_b").doc(&sent.id))
            .await
            .unwrap()
            .unwrap();
        let projection: Message = store
            .get_as(&collections::doc(LATEST_MESSAGES, "a_b"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, sent);
        assert_eq!(projection.content, stored.content);
        assert_eq!(projection.created_at, stored.created_at);
        assert_eq!(projection.id, stored.id);
    }

    #[tokio::test]
    async fn empty_text_is_rejected_unless_replying() {
        let (service, _, _) = service();
        service.create_chat_room("a", "b").await.unwrap();

        let err = service.send_message("a", "b", "   ").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::EmptyMessage);

        let reply = service.send_reply_message("a", "b", "", reply()).await.unwrap();
        assert_eq!(reply.reply_feed.unwrap().image_id, "img1");
    }

    #[tokio::test]
    async fn sending_without_a_room_fails() {
        let (service, _, _) = service();
        let err = service.send_message("a", "b", "hi").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChatRoomNotFound);
    }

    #[tokio::test]
    async fn replies_are_indexed_by_image() {
        let (service, store, _) = service();
        service.create_chat_room("a", "b").await.unwrap();
        let first = service.send_reply_message("a", "b", "nice", reply()).await.unwrap();
        let second = service.send_reply_message("b", "a", "thanks", reply()).await.unwrap();

        let index: ReplyIndex = store
            .get_as(&collections::doc(IMAGE_REPLIES, "img1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(index.image_id, "img1");
        assert_eq!(index.refs, vec![reply_ref("a_b", &first.id), reply_ref("a_b", &second.id)]);
    }

    #[tokio::test]
    async fn receiver_is_notified_with_sender_name() {
        let (service, store, notifier) = service();
        service.create_chat_room("a", "b").await.unwrap();
        store
            .set(&collections::doc(USERS, "a"), json!({"firstName": "An", "lastName": "Le"}))
            .await
            .unwrap();
        let token = FcmToken { user_id: "b".into(), token: "tok-b".into() };
        store
            .set(&collections::doc(FCM_TOKENS, "b"), to_document(&token).unwrap())
            .await
            .unwrap();

        service.send_message("a", "b", "hi").await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "tok-b");
        assert_eq!(sent[0].title, "An Le");
        assert_eq!(sent[0].body, "hi");
        assert_eq!(sent[0].data.sender_id, "a");
    }

    #[tokio::test]
    async fn push_failure_does_not_fail_the_send() {
        let store = lokcet_shared::store::MemoryStore::new();
        let notifier = Arc::new(lokcet_shared::clients::push::RecordingNotifier::failing());
        let service = MessagingService::new(Arc::new(store.clone()), notifier);
        service.create_chat_room("a", "b").await.unwrap();
        let token = FcmToken { user_id: "b".into(), token: "tok-b".into() };
        store
            .set(&collections::doc(FCM_TOKENS, "b"), to_document(&token).unwrap())
            .await
            .unwrap();

        assert!(service.send_message("a", "b", "hi").await.is_ok());
    }

    #[tokio::test]
    async fn only_the_receiver_marks_seen() {
        let (service, store, _) = service();
        service.create_chat_room("a", "b").await.unwrap();
        let sent = service.send_message("a", "b", "hi").await.unwrap();

        assert!(!service.mark_last_message_as_seen("a", "a_b").await.unwrap());
        assert!(service.mark_last_message_as_seen("b", "a_b").await.unwrap());
        assert!(!service.mark_last_message_as_seen("b", "a_b").await.unwrap());

        let stored: Message = store
            .get_as(&messages_collection("a_b").doc(&sent.id))
            .await
            .unwrap()
            .unwrap();
        let projection: Message = store
            .get_as(&collections::doc(LATEST_MESSAGES, "a_b"))
            .await
            .unwrap()
            .unwrap();
        assert!(stored.seen_at);
        assert!(projection.seen_at);
    }

    #[tokio::test(start_paused = true)]
    async fn seen_polls_until_the_message_is_visible() {
        let (service, _, _) = service();
        service.create_chat_room("a", "b").await.unwrap();

        let sender = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            sender.send_message("a", "b", "late").await.unwrap();
        });

        let started = tokio::time::Instant::now();
        assert!(service.mark_last_message_as_seen("b", "a_b").await.unwrap());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn seen_gives_up_after_the_configured_attempts() {
        let (service, _, _) = service();
        let service = service.with_seen_retry(SeenRetry {
            attempts: 3,
            delay: Duration::from_secs(1),
        });

        let started = tokio::time::Instant::now();
        assert!(!service.mark_last_message_as_seen("b", "a_b").await.unwrap());
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn latest_messages_are_newest_first() {
        let (service, _, _) = service();
        service.create_chat_room("me", "a").await.unwrap();
        service.create_chat_room("me", "b").await.unwrap();
        service.send_message("a", "me", "from a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        service.send_message("b", "me", "from b").await.unwrap();

        let mut latest = service.latest_messages(vec!["a_me".into(), "b_me".into()]);
        let mut view = Vec::new();
        while view.len() < 2 {
            view = latest.next().await.unwrap().unwrap();
        }
        assert_eq!(view[0].content, "from b");
        assert_eq!(view[1].content, "from a");

        service.send_message("me", "a", "reply").await.unwrap();
        loop {
            let next = latest.next().await.unwrap().unwrap();
            if next[0].content == "reply" {
                assert_eq!(next[0].room_id, "a_me");
                break;
            }
        }
    }

    #[tokio::test]
    async fn unseen_count_only_counts_rooms_addressed_to_user() {
        let (service, _, _) = service();
        service.create_chat_room("me", "a").await.unwrap();
        service.create_chat_room("me", "b").await.unwrap();
        service.send_message("a", "me", "hi").await.unwrap();
        service.send_message("me", "b", "yo").await.unwrap();

        let rooms = vec!["a_me".to_string(), "b_me".to_string(), "c_me".to_string()];
        assert_eq!(service.unseen_count("me", &rooms).await.unwrap(), 1);
        service.mark_last_message_as_seen("me", "a_me").await.unwrap();
        assert_eq!(service.unseen_count("me", &rooms).await.unwrap(), 0);
    }
}
