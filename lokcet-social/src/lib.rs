pub mod geo;
pub mod models;
pub mod services;

pub use services::account::{AccountService, JwtSettings, ResetCode, SignUp};
pub use services::feedback::{Attachment, FeedbackService};
pub use services::relationship::{FriendListKind, RelationshipService};
pub use services::suggestion::{suggest_friends, FriendSuggestion, SuggestionReason};
