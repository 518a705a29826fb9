//! Collection names shared by every service.

use crate::store::{CollectionPath, DocPath};

pub const USERS: &str = "users";
pub const CREDENTIALS: &str = "credentials";
pub const CHAT_ROOMS: &str = "chatrooms";
pub const MESSAGES: &str = "messages";
pub const LATEST_MESSAGES: &str = "latest_messages";
pub const IMAGES: &str = "images";
pub const REACTIONS: &str = "reactions";
pub const IMAGE_REPLIES: &str = "image_replies";
pub const FCM_TOKENS: &str = "fcmTokens";
pub const PROBLEMS: &str = "problems";
pub const SUGGESTIONS: &str = "suggestions";
pub const SERVER_TIME: &str = "serverTime";

pub fn collection(name: &str) -> CollectionPath {
    CollectionPath::new(name)
}

pub fn doc(collection: &str, id: &str) -> DocPath {
    DocPath::new(collection, id)
}
