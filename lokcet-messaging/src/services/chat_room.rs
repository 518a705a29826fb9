use std::collections::BTreeMap;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;

use lokcet_shared::collections::{self, CHAT_ROOMS, IMAGE_REPLIES, LATEST_MESSAGES, MESSAGES};
use lokcet_shared::errors::{AppError, AppResult, ErrorCode};
use lokcet_shared::store::{CollectionPath, DocumentStoreExt, FieldUpdate, Query, Snapshot, WriteBatch, WriteOp};
use lokcet_shared::subscription::{watched_value, WatchSet};

use super::MessagingService;
use crate::models::{reply_ref, ChatRoom, Message, ReplyIndex};

/// Room ID shared by two users, independent of argument order.
pub fn room_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

/// Batch creating the room of `a` and `b`, or rewriting it unchanged.
pub fn chat_room_upsert(a: &str, b: &str) -> WriteBatch {
    let id = room_id(a, b);
    let mut members = vec![a.to_string(), b.to_string()];
    members.sort();
    WriteBatch::new().merge(
        collections::doc(CHAT_ROOMS, &id),
        json!({ "id": id, "members": members }),
    )
}

pub(crate) fn messages_collection(room_id: &str) -> CollectionPath {
    collections::doc(CHAT_ROOMS, room_id).sub_collection(MESSAGES)
}

impl MessagingService {
    pub async fn create_chat_room(&self, user_id: &str, peer_id: &str) -> AppResult<ChatRoom> {
        if user_id == peer_id {
            return Err(AppError::bad_request("cannot open a chat room with yourself"));
        }
        self.store.commit(chat_room_upsert(user_id, peer_id)).await?;
        let room = self.get_chat_room(&room_id(user_id, peer_id)).await?;
        tracing::info!(room_id = %room.id, "chat room ready");
        Ok(room)
    }

    pub async fn get_chat_room(&self, room_id: &str) -> AppResult<ChatRoom> {
        self.store
            .get_as::<ChatRoom>(&collections::doc(CHAT_ROOMS, room_id))
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::ChatRoomNotFound, "chat room not found"))
    }

    /// Batch deleting the room document, its projection and every message,
    /// and dropping the room's entries from the image reply index.
    pub async fn chat_room_deletion(&self, room_id: &str) -> AppResult<WriteBatch> {
        let messages = self.store.query(&Query::new(messages_collection(room_id))).await?;
        let batch = WriteBatch::new()
            .delete(collections::doc(CHAT_ROOMS, room_id))
            .delete(collections::doc(LATEST_MESSAGES, room_id));
        Ok(batch.extend(self.message_deletion(room_id, &messages).await?))
    }

    pub async fn delete_chat_room(&self, room_id: &str) -> AppResult<()> {
        let batch = self.chat_room_deletion(room_id).await?;
        self.store.commit(batch).await?;
        let late_messages = self.sweep_deleted_room(room_id).await?;
        tracing::info!(room_id = %room_id, late_messages, "chat room deleted");
        Ok(())
    }

    /// Removes messages committed between building a room's deletion batch
    /// and committing it. Sends require the room document, so one pass after
    /// the room is gone leaves nothing behind. Returns the number removed.
    pub async fn sweep_deleted_room(&self, room_id: &str) -> AppResult<usize> {
        let leftovers = self.store.query(&Query::new(messages_collection(room_id))).await?;
        if leftovers.is_empty() {
            return Ok(0);
        }
        let batch = self
            .message_deletion(room_id, &leftovers)
            .await?
            .delete(collections::doc(LATEST_MESSAGES, room_id));
        self.store.commit(batch).await?;
        tracing::warn!(room_id = %room_id, removed = leftovers.len(), "swept messages sent during room deletion");
        Ok(leftovers.len())
    }

    /// Deletes `messages` and their references in the image reply index. An
    /// index left without references is deleted.
    async fn message_deletion(&self, room_id: &str, messages: &[Snapshot]) -> AppResult<WriteBatch> {
        let mut batch = WriteBatch::new();
        let mut refs_by_image: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for snapshot in messages {
            batch.push(WriteOp::Delete { path: snapshot.path.clone() });
            if let Some(reply) = snapshot.decode::<Message>()?.reply_feed {
                refs_by_image
                    .entry(reply.image_id)
                    .or_default()
                    .push(reply_ref(room_id, snapshot.id()));
            }
        }

        for (image_id, refs) in refs_by_image {
            let path = collections::doc(IMAGE_REPLIES, &image_id);
            let Some(index) = self.store.get_as::<ReplyIndex>(&path).await? else {
                continue;
            };
            if index.refs.iter().all(|r| refs.contains(r)) {
                batch.push(WriteOp::Delete { path });
            } else {
                batch.push(WriteOp::Update {
                    path,
                    updates: vec![FieldUpdate::array_remove("refs", refs)],
                });
            }
        }
        Ok(batch)
    }

    /// Rooms shared with each friend, in friend order, re-emitted whenever one
    /// of them changes. Friends without a room are skipped.
    pub fn chat_room_list(&self, user_id: &str, friend_ids: Vec<String>) -> BoxStream<'static, AppResult<Vec<ChatRoom>>> {
        let store = self.store.clone();
        let mut order: Vec<String> = Vec::with_capacity(friend_ids.len());
        for friend_id in &friend_ids {
            let id = room_id(user_id, friend_id);
            if !order.contains(&id) {
                order.push(id);
            }
        }

        Box::pin(async_stream::stream! {
            let mut watches: WatchSet<String, ChatRoom> = WatchSet::new();
            for id in &order {
                let watch = store
                    .watch_document(collections::doc(CHAT_ROOMS, id))
                    .map(watched_value::<ChatRoom>);
                watches.insert(id.clone(), watch);
            }
            if watches.is_empty() {
                yield Ok::<_, AppError>(Vec::new());
            }
            while let Some(view) = watches.next().await {
                let rooms: Vec<ChatRoom> = order.iter().filter_map(|id| view.get(id).cloned()).collect();
                yield Ok(rooms);
            }
        })
    }
}
