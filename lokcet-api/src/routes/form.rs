use std::collections::HashMap;

use axum::extract::Multipart;

use lokcet_shared::errors::{AppError, AppResult, ErrorCode};

/// The uploaded file of a multipart form.
#[derive(Debug)]
pub struct FilePart {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// A multipart form with at most one file field named `file` plus text fields.
#[derive(Debug, Default)]
pub struct Form {
    pub file: Option<FilePart>,
    texts: HashMap<String, Vec<String>>,
}

impl Form {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::new(ErrorCode::BadRequest, format!("failed to read multipart: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::new(ErrorCode::ImageUploadFailed, format!("failed to read file data: {e}")))?;
                form.file = Some(FilePart {
                    bytes: bytes.to_vec(),
                    content_type,
                });
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::new(ErrorCode::BadRequest, format!("failed to read field {name}: {e}")))?;
                form.texts.entry(name).or_default().push(text);
            }
        }
        Ok(form)
    }

    pub fn take_file(&mut self) -> AppResult<FilePart> {
        self.file
            .take()
            .ok_or_else(|| AppError::new(ErrorCode::ImageUploadFailed, "no file provided"))
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.texts.get(name).and_then(|values| values.first()).map(String::as_str)
    }

    /// Every value of a repeated field, also splitting comma-separated ones.
    pub fn list(&self, name: &str) -> Vec<String> {
        self.texts
            .get(name)
            .into_iter()
            .flatten()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }
}
