use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- ChatRoom ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: String,
    pub members: Vec<String>,
}

impl ChatRoom {
    /// The member that is not `user_id`.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        self.members.iter().map(String::as_str).find(|m| *m != user_id)
    }
}

// --- Message ---

/// Snapshot of the feed image a message replies to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyFeed {
    pub image_id: String,
    pub image_url: String,
    pub owner_id: String,
    #[serde(default)]
    pub caption: String,
}

/// One chat message. Also stored verbatim as the room's latest-message
/// projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Seen flag.
    #[serde(default)]
    pub seen_at: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_feed: Option<ReplyFeed>,
}

impl Message {
    pub fn is_unseen_by(&self, user_id: &str) -> bool {
        self.receiver_id == user_id && !self.seen_at
    }
}

// --- Reply index ---

/// Messages replying to one image, as `room/message` references.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyIndex {
    pub image_id: String,
    #[serde(default)]
    pub refs: Vec<String>,
}

pub fn reply_ref(room_id: &str, message_id: &str) -> String {
    format!("{room_id}/{message_id}")
}

pub fn parse_reply_ref(reference: &str) -> Option<(&str, &str)> {
    reference
        .split_once('/')
        .filter(|(room, message)| !room.is_empty() && !message.is_empty())
}
