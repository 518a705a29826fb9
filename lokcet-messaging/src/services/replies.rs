use std::collections::BTreeMap;

use lokcet_shared::collections::{self, IMAGE_REPLIES, LATEST_MESSAGES};
use lokcet_shared::errors::AppResult;
use lokcet_shared::store::{to_document, Direction, DocumentStoreExt, Query, WriteBatch, WriteOp};

use super::chat_room::messages_collection;
use super::MessagingService;
use crate::models::{parse_reply_ref, Message, ReplyIndex};

impl MessagingService {
    /// Deletes every message that replies to `image_id`, repairs the
    /// projections that showed one of them and drops the image's index entry.
    /// Returns the number of references removed.
    pub async fn delete_replies_to_image(&self, image_id: &str) -> AppResult<usize> {
        let index_path = collections::doc(IMAGE_REPLIES, image_id);
        let Some(index) = self.store.get_as::<ReplyIndex>(&index_path).await? else {
            return Ok(0);
        };

        let mut by_room: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for reference in &index.refs {
            match parse_reply_ref(reference) {
                Some((room, message)) => by_room
                    .entry(room.to_string())
                    .or_default()
                    .push(message.to_string()),
                None => tracing::warn!(image_id = %image_id, reference = %reference, "malformed reply reference"),
            }
        }

        let mut batch = WriteBatch::new().delete(index_path);
        let mut removed = 0;
        for (room_id, message_ids) in &by_room {
            let messages = messages_collection(room_id);
            for message_id in message_ids {
                batch.push(WriteOp::Delete { path: messages.doc(message_id) });
            }
            removed += message_ids.len();
            if let Some(op) = self.repaired_projection(room_id, message_ids).await? {
                batch.push(op);
            }
        }
        self.store.commit(batch).await?;

        tracing::info!(image_id = %image_id, removed, rooms = by_room.len(), "image replies deleted");
        Ok(removed)
    }

    /// The write restoring a room's projection when it shows a removed
    /// message: the newest surviving message, or deletion if none survive.
    async fn repaired_projection(&self, room_id: &str, removed: &[String]) -> AppResult<Option<WriteOp>> {
        let projection = collections::doc(LATEST_MESSAGES, room_id);
        let Some(current) = self.store.get_as::<Message>(&projection).await? else {
            return Ok(None);
        };
        if !removed.contains(&current.id) {
            return Ok(None);
        }

        let query = Query::new(messages_collection(room_id))
            .order_by("createdAt", Direction::Descending)
            .limit(removed.len() + 1);
        let survivor = self
            .store
            .query_as::<Message>(&query)
            .await?
            .into_iter()
            .find(|m| !removed.contains(&m.id));

        Ok(Some(match survivor {
            Some(message) => WriteOp::Set {
                path: projection,
                data: to_document(&message)?,
            },
            None => WriteOp::Delete { path: projection },
        }))
    }
}
