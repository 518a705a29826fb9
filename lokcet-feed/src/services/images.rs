use std::collections::HashSet;

use futures::future::{join_all, BoxFuture};

use lokcet_shared::clients::blob::{generate_key, image_extension, IMAGES_PREFIX};
use lokcet_shared::collections::{self, IMAGES, REACTIONS, USERS};
use lokcet_shared::errors::{AppError, AppResult, ErrorCode};
use lokcet_shared::store::{to_document, DocumentStoreExt, FieldUpdate, Query, WriteBatch, WriteOp};
use lokcet_shared::types::{now_millis, Paginated, PaginationParams};

use lokcet_messaging::models::ReplyFeed;

use super::{FeedService, NewImage};
use crate::models::UploadImage;

impl FeedService {
    /// Stores the bytes, then the image document and the uploader's list
    /// entry in one batch. The blob is removed again if the batch fails.
    pub async fn upload_image(&self, owner_id: &str, image: NewImage) -> AppResult<UploadImage> {
        let extension = image_extension(&image.content_type).ok_or_else(|| {
            AppError::new(
                ErrorCode::UnsupportedImageFormat,
                format!("unsupported image type {}", image.content_type),
            )
        })?;
        let key = generate_key(IMAGES_PREFIX, extension);
        let url = self.blobs.upload(&key, image.bytes, &image.content_type).await?;

        let mut upload = UploadImage {
            id: self.store.new_id(),
            owner_id: owner_id.to_string(),
            image_url: url.clone(),
            storage_key: key.clone(),
            caption: image.caption.trim().to_string(),
            created_at: now_millis(),
            visible_to_all: true,
            visible_user_ids: Vec::new(),
        };
        upload.set_visibility(image.visibility);

        let batch = WriteBatch::new()
            .create(collections::doc(IMAGES, &upload.id), to_document(&upload)?)
            .update(
                collections::doc(USERS, owner_id),
                vec![FieldUpdate::array_union("uploadImageList", [url.as_str()])],
            );
        if let Err(e) = self.store.commit(batch).await {
            if let Err(cleanup) = self.blobs.delete(&key).await {
                tracing::warn!(key = %key, error = %cleanup, "orphaned image blob");
            }
            return Err(e.into());
        }

        metrics::counter!("images_uploaded_total").increment(1);
        tracing::info!(image_id = %upload.id, owner_id = %owner_id, visible_to_all = upload.visible_to_all, "image uploaded");
        Ok(upload)
    }

    pub async fn get_image(&self, image_id: &str) -> AppResult<UploadImage> {
        self.store
            .get_as::<UploadImage>(&collections::doc(IMAGES, image_id))
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::ImageNotFound, "image not found"))
    }

    /// The image if `viewer_id` may see it: their own, or a friend's image
    /// shared with everyone or with them. Anything else reads as missing.
    pub async fn visible_image(&self, viewer_id: &str, friend_ids: &[String], image_id: &str) -> AppResult<UploadImage> {
        let image = self.get_image(image_id).await?;
        let from_friend = friend_ids.iter().any(|id| *id == image.owner_id);
        if image.owner_id == viewer_id || (from_friend && image.is_visible_to(viewer_id)) {
            Ok(image)
        } else {
            Err(AppError::new(ErrorCode::ImageNotFound, "image not found"))
        }
    }

    /// Snapshot embedded in a reply message, taken from the stored image.
    pub async fn reply_snapshot(&self, viewer_id: &str, friend_ids: &[String], image_id: &str) -> AppResult<ReplyFeed> {
        let image = self.visible_image(viewer_id, friend_ids, image_id).await?;
        Ok(ReplyFeed {
            image_id: image.id,
            image_url: image.image_url,
            owner_id: image.owner_id,
            caption: image.caption,
        })
    }

    pub(crate) async fn owned_image(&self, owner_id: &str, image_id: &str) -> AppResult<UploadImage> {
        let image = self.get_image(image_id).await?;
        if image.owner_id != owner_id {
            return Err(AppError::new(ErrorCode::NotImageOwner, "image belongs to another user"));
        }
        Ok(image)
    }

    /// Deletes an image and everything that points at it. The branches run
    /// concurrently and are all attempted; the first failure is returned once
    /// every branch has finished.
    pub async fn delete_image(&self, owner_id: &str, image_id: &str) -> AppResult<()> {
        let image = self.owned_image(owner_id, image_id).await?;
        let image_path = collections::doc(IMAGES, image_id);
        let owner_path = collections::doc(USERS, owner_id);

        let branches: Vec<(&str, BoxFuture<'_, AppResult<()>>)> = vec![
            ("document", Box::pin(async {
                self.store.delete(&image_path).await?;
                Ok(())
            })),
            ("blob", Box::pin(async {
                self.blobs.delete(&image.storage_key).await?;
                Ok(())
            })),
            ("uploader_list", Box::pin(async {
                self.store
                    .update(&owner_path, vec![FieldUpdate::array_remove("uploadImageList", [image.image_url.as_str()])])
                    .await?;
                Ok(())
            })),
            ("reactions", Box::pin(self.delete_reactions(image_id))),
            ("replies", Box::pin(async {
                self.messaging.delete_replies_to_image(image_id).await?;
                Ok(())
            })),
        ];

        let (names, futures): (Vec<&str>, Vec<_>) = branches.into_iter().unzip();
        let results = join_all(futures).await;

        let mut first_error = None;
        for (branch, result) in names.into_iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(image_id = %image_id, branch, error = %e, "image cleanup branch failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        metrics::counter!("images_deleted_total").increment(1);
        tracing::info!(image_id = %image_id, owner_id = %owner_id, "image deleted");
        Ok(())
    }

    async fn delete_reactions(&self, image_id: &str) -> AppResult<()> {
        let query = Query::new(collections::collection(REACTIONS)).where_eq("imageId", image_id);
        let reactions = self.store.query(&query).await?;
        let mut batch = WriteBatch::new();
        for reaction in reactions {
            batch.push(WriteOp::Delete { path: reaction.path });
        }
        self.store.commit(batch).await?;
        Ok(())
    }

    /// The viewer's own images plus friends' images visible to the viewer,
    /// newest first.
    pub async fn list_feeds(
        &self,
        viewer_id: &str,
        friend_ids: &[String],
        page: &PaginationParams,
    ) -> AppResult<Paginated<UploadImage>> {
        let images = collections::collection(IMAGES);
        let mut queries = vec![Query::new(images.clone()).where_eq("ownerId", viewer_id)];
        if !friend_ids.is_empty() {
            queries.push(
                Query::new(images.clone())
                    .where_in("ownerId", friend_ids.iter().map(String::as_str))
                    .where_eq("visibleToAll", true),
            );
            queries.push(
                Query::new(images)
                    .where_in("ownerId", friend_ids.iter().map(String::as_str))
                    .array_contains("visibleUserIds", viewer_id),
            );
        }

        let store = &self.store;
        let results = futures::future::try_join_all(
            queries
                .iter()
                .map(|query| async move { store.query_as::<UploadImage>(query).await }),
        )
        .await?;

        let mut seen = HashSet::new();
        let mut feed: Vec<UploadImage> = results
            .into_iter()
            .flatten()
            .filter(|image| seen.insert(image.id.clone()))
            .collect();
        feed.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        Ok(Paginated::from_ordered(feed, page))
    }
}
