use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde_json::{json, Value};

use lokcet_shared::collections::{self, IMAGES, SERVER_TIME};
use lokcet_shared::errors::AppResult;
use lokcet_shared::store::{Direction, DocumentStoreExt, FieldUpdate, Query, WriteBatch};
use lokcet_shared::types::{from_millis, now_millis};

use super::FeedService;
use crate::models::UploadImage;

const SERVER_TIME_DOC: &str = "now";

fn checkpoint_key(viewer_id: &str) -> String {
    format!("feed_checkpoint:{viewer_id}")
}

impl FeedService {
    /// Counts friends' images visible to the viewer that were posted after
    /// the viewer last checked the feed.
    pub async fn new_feed_count(&self, viewer_id: &str, friend_ids: &[String]) -> AppResult<u64> {
        let checkpoint = self.kv.get_i64(&checkpoint_key(viewer_id)).await?.unwrap_or(0);
        let images = collections::collection(IMAGES);

        let queries: Vec<Query> = friend_ids
            .iter()
            .flat_map(|friend_id| {
                let recent = Query::new(images.clone())
                    .where_eq("ownerId", friend_id.as_str())
                    .where_gt("createdAt", checkpoint);
                [
                    recent.clone().where_eq("visibleToAll", true),
                    recent.array_contains("visibleUserIds", viewer_id),
                ]
            })
            .collect();

        let store = &self.store;
        let counts = try_join_all(queries.iter().map(|query| async move { store.count(query).await })).await?;
        let total: u64 = counts.into_iter().sum();

        tracing::debug!(viewer_id = %viewer_id, checkpoint, total, "counted new feed images");
        Ok(total)
    }

    /// Moves the viewer's checkpoint to the current server time.
    pub async fn mark_feeds_checked(&self, viewer_id: &str) -> AppResult<DateTime<Utc>> {
        let now = self.server_time().await?;
        self.kv
            .set(&checkpoint_key(viewer_id), &now.timestamp_millis().to_string())
            .await?;
        Ok(now)
    }

    /// Best estimate of the store's clock: a timestamp written and read back,
    /// else the newest image's creation time, else the local clock.
    pub async fn server_time(&self) -> AppResult<DateTime<Utc>> {
        let path = collections::doc(SERVER_TIME, SERVER_TIME_DOC);
        let batch = WriteBatch::new()
            .merge(path.clone(), json!({}))
            .update(path.clone(), vec![FieldUpdate::server_timestamp("time")]);

        let stamped = match self.store.commit(batch).await {
            Ok(()) => self
                .store
                .get_as::<Value>(&path)
                .await?
                .and_then(|doc| doc["time"].as_i64()),
            Err(e) => {
                tracing::warn!(error = %e, "server timestamp write failed");
                None
            }
        };
        if let Some(ms) = stamped {
            return Ok(from_millis(ms));
        }

        let newest = Query::new(collections::collection(IMAGES))
            .order_by("createdAt", Direction::Descending)
            .limit(1);
        let latest = self.store.query_as::<UploadImage>(&newest).await?;
        Ok(latest
            .into_iter()
            .next()
            .map(|image| image.created_at)
            .unwrap_or_else(now_millis))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::Visibility;
    use crate::services::test_support::{fixture, photo, seed_users};
    use lokcet_shared::clients::kv::KeyValueStore;

    #[tokio::test]
    async fn counts_only_images_after_checkpoint() {
        let fx = fixture();
        seed_users(&fx.store, &["me", "friend"]).await;
        let friends = vec!["friend".to_string()];

        fx.feed.upload_image("friend", photo(Visibility::All)).await.unwrap();
        fx.feed.mark_feeds_checked("me").await.unwrap();
        assert_eq!(fx.feed.new_feed_count("me", &friends).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(5)).await;
        fx.feed.upload_image("friend", photo(Visibility::All)).await.unwrap();
        assert_eq!(fx.feed.new_feed_count("me", &friends).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn counts_allow_listed_images_only_for_listed_viewers() {
        let fx = fixture();
        seed_users(&fx.store, &["me", "other", "friend"]).await;
        let friends = vec!["friend".to_string()];

        fx.feed
            .upload_image("friend", photo(Visibility::Only(vec!["me".into()])))
            .await
            .unwrap();
        fx.feed.upload_image("friend", photo(Visibility::All)).await.unwrap();

        // No checkpoint stored yet: everything since the epoch counts.
        assert_eq!(fx.feed.new_feed_count("me", &friends).await.unwrap(), 2);
        assert_eq!(fx.feed.new_feed_count("other", &friends).await.unwrap(), 1);
        assert_eq!(fx.feed.new_feed_count("me", &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn checkpoint_is_stored_in_the_cache() {
        let fx = fixture();
        let now = fx.feed.mark_feeds_checked("me").await.unwrap();
        let stored = fx.kv.get_i64("feed_checkpoint:me").await.unwrap();
        assert_eq!(stored, Some(now.timestamp_millis()));
    }

    #[tokio::test]
    async fn server_time_is_monotonic_enough() {
        let fx = fixture();
        let before = now_millis();
        let first = fx.feed.server_time().await.unwrap();
        assert!(first >= before - chrono::Duration::seconds(1));
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(fx.feed.server_time().await.unwrap() >= first);
    }
}
