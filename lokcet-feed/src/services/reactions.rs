use lokcet_shared::clients::push::{notify_user, PushData};
use lokcet_shared::collections::{self, REACTIONS, USERS};
use lokcet_shared::errors::{AppError, AppResult};
use lokcet_shared::store::{to_document, Direction, DocumentStoreExt, FieldUpdate, Query, StoreError, WriteBatch};
use lokcet_shared::types::now_millis;
use serde_json::Value;

use super::FeedService;
use crate::models::{reaction_id, EmojiReaction};

/// Result of reacting to an image. `created` is false when the same user had
/// already sent the same emoji.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionOutcome {
    pub reaction: EmojiReaction,
    pub created: bool,
}

impl FeedService {
    /// Reacts to an image the user can see. `friend_ids` are the reacting
    /// user's friends.
    pub async fn add_emoji_reaction(
        &self,
        user_id: &str,
        friend_ids: &[String],
        image_id: &str,
        emoji_id: &str,
    ) -> AppResult<ReactionOutcome> {
        if emoji_id.trim().is_empty() {
            return Err(AppError::Validation("emoji must not be empty".into()));
        }
        let image = self.visible_image(user_id, friend_ids, image_id).await?;

        let reaction = EmojiReaction {
            id: reaction_id(image_id, user_id, emoji_id),
            user_id: user_id.to_string(),
            image_id: image_id.to_string(),
            emoji_id: emoji_id.to_string(),
            viewed: false,
            created_at: now_millis(),
        };
        let path = collections::doc(REACTIONS, &reaction.id);

        match self.store.create(&path, to_document(&reaction)?).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                let existing = self
                    .store
                    .get_as::<EmojiReaction>(&path)
                    .await?
                    .unwrap_or(reaction);
                return Ok(ReactionOutcome {
                    reaction: existing,
                    created: false,
                });
            }
            Err(e) => return Err(e.into()),
        }

        metrics::counter!("reactions_total").increment(1);
        tracing::info!(image_id = %image_id, user_id = %user_id, emoji_id = %emoji_id, "reaction added");

        if image.owner_id != user_id {
            let title = self.sender_name(user_id).await;
            let data = PushData {
                kind: "reaction".to_string(),
                sender_id: user_id.to_string(),
                message: Some(emoji_id.to_string()),
                image_url: Some(image.image_url.clone()),
            };
            notify_user(
                self.store.as_ref(),
                self.notifier.as_ref(),
                &image.owner_id,
                &title,
                "Đã bày tỏ cảm xúc về ảnh của bạn",
                data,
            )
            .await;
        }

        Ok(ReactionOutcome {
            reaction,
            created: true,
        })
    }

    /// Reactions on one of the caller's images, oldest first.
    pub async fn reactions_for_image(&self, owner_id: &str, image_id: &str) -> AppResult<Vec<EmojiReaction>> {
        self.owned_image(owner_id, image_id).await?;
        let query = Query::new(collections::collection(REACTIONS))
            .where_eq("imageId", image_id)
            .order_by("createdAt", Direction::Ascending);
        Ok(self.store.query_as::<EmojiReaction>(&query).await?)
    }

    /// Flags every unviewed reaction on the image as viewed and returns how
    /// many changed.
    pub async fn mark_reactions_viewed(&self, owner_id: &str, image_id: &str) -> AppResult<usize> {
        self.owned_image(owner_id, image_id).await?;
        let query = Query::new(collections::collection(REACTIONS))
            .where_eq("imageId", image_id)
            .where_eq("viewed", false);
        let unviewed = self.store.query(&query).await?;

        let count = unviewed.len();
        let batch = unviewed.into_iter().fold(WriteBatch::new(), |batch, snapshot| {
            batch.update(snapshot.path, vec![FieldUpdate::set("viewed", true)])
        });
        self.store.commit(batch).await?;
        Ok(count)
    }

    async fn sender_name(&self, user_id: &str) -> String {
        let user = self
            .store
            .get_as::<Value>(&collections::doc(USERS, user_id))
            .await
            .ok()
            .flatten();
        let name = user
            .as_ref()
            .map(|u| {
                let first = u["firstName"].as_str().unwrap_or_default();
                let last = u["lastName"].as_str().unwrap_or_default();
                format!("{first} {last}").trim().to_string()
            })
            .unwrap_or_default();
        if name.is_empty() {
            "Lokcet".to_string()
        } else {
            name
        }
    }
}
