use std::sync::Arc;

use lokcet_shared::clients::blob::{generate_key, image_extension, BlobStore, IMAGES_PREFIX};
use lokcet_shared::collections::{self, PROBLEMS, SUGGESTIONS};
use lokcet_shared::errors::{AppError, AppResult, ErrorCode};
use lokcet_shared::store::{to_document, DocumentStore};
use lokcet_shared::types::now_millis;

use crate::models::{Problem, Suggestion};

/// An image attached to a problem report.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Clone)]
pub struct FeedbackService {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
}

impl FeedbackService {
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    pub async fn report_problem(&self, user_id: &str, content: &str, image: Option<Attachment>) -> AppResult<Problem> {
        let content = non_empty(content)?;
        let image_url = match image {
            Some(image) => {
                let extension = image_extension(&image.content_type).ok_or_else(|| {
                    AppError::new(ErrorCode::UnsupportedImageFormat, "unsupported attachment type")
                })?;
                let key = generate_key(IMAGES_PREFIX, extension);
                Some(self.blobs.upload(&key, image.bytes, &image.content_type).await?)
            }
            None => None,
        };

        let problem = Problem {
            id: self.store.new_id(),
            user_id: user_id.to_string(),
            content,
            image_url,
            created_at: now_millis(),
        };
        self.store
            .create(&collections::doc(PROBLEMS, &problem.id), to_document(&problem)?)
            .await?;
        tracing::info!(user_id = %user_id, problem_id = %problem.id, "problem reported");
        Ok(problem)
    }

    pub async fn send_suggestion(&self, user_id: &str, content: &str) -> AppResult<Suggestion> {
        let suggestion = Suggestion {
            id: self.store.new_id(),
            user_id: user_id.to_string(),
            content: non_empty(content)?,
            created_at: now_millis(),
        };
        self.store
            .create(&collections::doc(SUGGESTIONS, &suggestion.id), to_document(&suggestion)?)
            .await?;
        tracing::info!(user_id = %user_id, suggestion_id = %suggestion.id, "suggestion received");
        Ok(suggestion)
    }
}

fn non_empty(content: &str) -> AppResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("content must not be empty".into()));
    }
    Ok(content.to_string())
}
