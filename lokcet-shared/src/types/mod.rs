pub mod api;
pub mod auth;
pub mod pagination;
pub mod time;

pub use api::*;
pub use auth::*;
pub use pagination::*;
pub use time::*;
