pub mod models;
pub mod services;

pub use services::{chat_room_upsert, room_id, MessagingService, SeenRetry};
