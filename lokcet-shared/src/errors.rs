use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::clients::blob::BlobError;
use crate::clients::kv::CacheError;
use crate::clients::push::PushError;
use crate::store::StoreError;
use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Account errors
/// - E2xxx: Relationship errors
/// - E3xxx: Messaging errors
/// - E4xxx: Feed errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    ServiceUnavailable,
    BadRequest,
    PayloadTooLarge,

    // Account (E1xxx)
    InvalidCredentials,
    EmailAlreadyExists,
    PhoneAlreadyExists,
    PasswordTooWeak,
    TokenExpired,
    TokenInvalid,
    ResetCodeInvalid,
    ResetCodeExpired,
    AccountDeleted,

    // Relationship (E2xxx)
    UserNotFound,
    CannotBefriendSelf,
    AlreadyFriends,
    AlreadyRequested,
    NotInWaitList,
    NotFriends,

    // Messaging (E3xxx)
    ChatRoomNotFound,
    MessageNotFound,
    EmptyMessage,
    NotRoomMember,

    // Feed (E4xxx)
    ImageNotFound,
    ImageUploadFailed,
    UnsupportedImageFormat,
    NotImageOwner,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::Conflict => "E0006",
            Self::ServiceUnavailable => "E0007",
            Self::BadRequest => "E0008",
            Self::PayloadTooLarge => "E0009",

            // Account
            Self::InvalidCredentials => "E1001",
            Self::EmailAlreadyExists => "E1002",
            Self::PhoneAlreadyExists => "E1003",
            Self::PasswordTooWeak => "E1004",
            Self::TokenExpired => "E1005",
            Self::TokenInvalid => "E1006",
            Self::ResetCodeInvalid => "E1007",
            Self::ResetCodeExpired => "E1008",
            Self::AccountDeleted => "E1009",

            // Relationship
            Self::UserNotFound => "E2001",
            Self::CannotBefriendSelf => "E2002",
            Self::AlreadyFriends => "E2003",
            Self::AlreadyRequested => "E2004",
            Self::NotInWaitList => "E2005",
            Self::NotFriends => "E2006",

            // Messaging
            Self::ChatRoomNotFound => "E3001",
            Self::MessageNotFound => "E3002",
            Self::EmptyMessage => "E3003",
            Self::NotRoomMember => "E3004",

            // Feed
            Self::ImageNotFound => "E4001",
            Self::ImageUploadFailed => "E4002",
            Self::UnsupportedImageFormat => "E4003",
            Self::NotImageOwner => "E4004",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationError | Self::BadRequest | Self::PasswordTooWeak
            | Self::EmptyMessage | Self::UnsupportedImageFormat
            | Self::ImageUploadFailed => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound | Self::UserNotFound | Self::ChatRoomNotFound
            | Self::MessageNotFound | Self::ImageNotFound | Self::NotInWaitList
            | Self::NotFriends => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::InvalidCredentials | Self::TokenExpired
            | Self::TokenInvalid | Self::ResetCodeInvalid | Self::ResetCodeExpired => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::AccountDeleted | Self::CannotBefriendSelf
            | Self::NotRoomMember | Self::NotImageOwner => StatusCode::FORBIDDEN,
            Self::Conflict | Self::EmailAlreadyExists | Self::PhoneAlreadyExists
            | Self::AlreadyFriends | Self::AlreadyRequested => StatusCode::CONFLICT,
        }
    }

    /// Banner text shown to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable => "Không có kết nối mạng, vui lòng thử lại",
            Self::InvalidCredentials => "Email hoặc mật khẩu không chính xác",
            Self::EmailAlreadyExists => "Email đã được sử dụng",
            Self::PhoneAlreadyExists => "Số điện thoại đã được sử dụng",
            Self::PasswordTooWeak => "Mật khẩu quá yếu",
            Self::TokenExpired | Self::TokenInvalid | Self::Unauthorized => "Phiên đăng nhập đã hết hạn",
            Self::ResetCodeInvalid | Self::ResetCodeExpired => "Mã đặt lại mật khẩu không hợp lệ",
            Self::AccountDeleted => "Tài khoản đã bị xoá",
            Self::UserNotFound => "Không tìm thấy người dùng",
            Self::CannotBefriendSelf => "Không thể kết bạn với chính mình",
            Self::AlreadyFriends => "Hai bạn đã là bạn bè",
            Self::AlreadyRequested => "Lời mời kết bạn đã được gửi",
            Self::NotInWaitList => "Không tìm thấy trong danh sách chờ",
            Self::NotFriends => "Hai bạn chưa là bạn bè",
            Self::ChatRoomNotFound => "Không tìm thấy cuộc trò chuyện",
            Self::MessageNotFound => "Không tìm thấy tin nhắn",
            Self::EmptyMessage => "Tin nhắn không được để trống",
            Self::ImageNotFound => "Không tìm thấy ảnh",
            Self::ImageUploadFailed => "Tải ảnh lên thất bại",
            Self::UnsupportedImageFormat => "Định dạng ảnh không được hỗ trợ",
            Self::NotFound => "Không tìm thấy dữ liệu",
            Self::Forbidden | Self::NotRoomMember | Self::NotImageOwner => "Bạn không có quyền thực hiện thao tác này",
            _ => "Đã xảy ra lỗi, vui lòng thử lại",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known { code: ErrorCode, message: String },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("push error: {0}")]
    Push(#[from] PushError),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The error code this error is reported under.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Known { code, .. } => *code,
            AppError::Internal(_) => ErrorCode::InternalError,
            AppError::Store(err) => match err {
                StoreError::NotFound(_) => ErrorCode::NotFound,
                StoreError::AlreadyExists(_) | StoreError::PreconditionFailed(_) => ErrorCode::Conflict,
                StoreError::Database(diesel::result::Error::NotFound) => ErrorCode::NotFound,
                StoreError::Database(_) | StoreError::Backend(_) => ErrorCode::ServiceUnavailable,
                StoreError::Serialization(_) | StoreError::InvalidDocument(_) => ErrorCode::InternalError,
            },
            AppError::Cache(_) | AppError::Push(_) => ErrorCode::ServiceUnavailable,
            AppError::Blob(BlobError::Upload(_)) => ErrorCode::ImageUploadFailed,
            AppError::Blob(BlobError::Delete(_)) => ErrorCode::ServiceUnavailable,
            AppError::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Localized text for the transient notification banner.
    pub fn user_message(&self) -> &'static str {
        self.code().user_message()
    }
}

impl AppError {
    /// Infrastructure failures are logged here and reported with a generic message.
    fn public_message(&self) -> String {
        match self {
            AppError::Known { message, .. } | AppError::Validation(message) => message.clone(),
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                "internal server error".into()
            }
            AppError::Store(err) => {
                tracing::error!(error = %err, "store error");
                match err {
                    StoreError::NotFound(_) => "resource not found",
                    StoreError::AlreadyExists(_) => "resource already exists",
                    StoreError::PreconditionFailed(_) => "resource changed concurrently",
                    StoreError::Database(_) | StoreError::Backend(_) => "storage unavailable",
                    _ => "storage error",
                }
                .into()
            }
            AppError::Cache(err) => {
                tracing::error!(error = %err, "cache error");
                "cache unavailable".into()
            }
            AppError::Blob(err) => {
                tracing::error!(error = %err, "blob store error");
                "blob storage error".into()
            }
            AppError::Push(err) => {
                tracing::error!(error = %err, "push error");
                "push gateway unavailable".into()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let body = ApiErrorResponse::new(code.code(), self.public_message()).with_notice(self.user_message());
        (code.status_code(), Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
