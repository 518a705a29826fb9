pub mod clients;
pub mod collections;
pub mod errors;
pub mod middleware;
pub mod state;
pub mod store;
pub mod subscription;
pub mod types;

pub use errors::{AppError, AppResult, ErrorCode};
pub use types::*;
