use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- UploadImage ---

/// Who may see an image besides its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    All,
    Only(Vec<String>),
}

impl Visibility {
    /// An empty allow-list means everyone.
    pub fn from_ids(ids: Vec<String>) -> Self {
        if ids.is_empty() {
            Self::All
        } else {
            Self::Only(ids)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadImage {
    pub id: String,
    pub owner_id: String,
    pub image_url: String,
    /// Blob key the URL was issued for.
    pub storage_key: String,
    #[serde(default)]
    pub caption: String,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub visible_to_all: bool,
    #[serde(default)]
    pub visible_user_ids: Vec<String>,
}

impl UploadImage {
    pub fn visibility(&self) -> Visibility {
        if self.visible_to_all {
            Visibility::All
        } else {
            Visibility::Only(self.visible_user_ids.clone())
        }
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        match visibility {
            Visibility::All => {
                self.visible_to_all = true;
                self.visible_user_ids.clear();
            }
            Visibility::Only(ids) => {
                self.visible_to_all = false;
                self.visible_user_ids = ids;
            }
        }
    }

    pub fn is_visible_to(&self, viewer_id: &str) -> bool {
        self.owner_id == viewer_id || self.visible_to_all || self.visible_user_ids.iter().any(|id| id == viewer_id)
    }
}

// --- EmojiReaction ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmojiReaction {
    pub id: String,
    pub user_id: String,
    pub image_id: String,
    pub emoji_id: String,
    #[serde(default)]
    pub viewed: bool,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// One reaction per user, image and emoji.
pub fn reaction_id(image_id: &str, user_id: &str, emoji_id: &str) -> String {
    format!("{image_id}_{user_id}_{emoji_id}")
}
