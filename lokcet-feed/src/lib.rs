pub mod models;
pub mod services;

pub use services::{FeedService, ReactionOutcome, NewImage};
