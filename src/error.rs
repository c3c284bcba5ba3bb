use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::payments::{PaymentError, WebhookError};
use crate::store::StoreError;

/// User-facing error taxonomy for feed, interaction and comment operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("connection unavailable")]
    ConnectionUnavailable,
    #[error("permission denied")]
    PermissionDenied,
    #[error("request timed out")]
    Timeout,
    #[error("duplicate action")]
    Duplicate,
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("authentication required")]
    AuthRequired,
    #[error("request already in flight")]
    InFlight,
    #[error("request failed: {0}")]
    Failed(String),
}

impl FeedError {
    pub fn user_message(&self) -> String {
        match self {
            FeedError::ConnectionUnavailable => {
                "We couldn't reach the community right now. Check your connection and try again.".into()
            }
            FeedError::PermissionDenied => "You don't have permission to do that.".into(),
            FeedError::Timeout => "Loading took too long. Please try again.".into(),
            FeedError::Duplicate => "Already done.".into(),
            FeedError::RateLimited(msg) if !msg.is_empty() => msg.clone(),
            FeedError::RateLimited(_) => "You're doing that too often. Please wait a moment.".into(),
            FeedError::Validation(msg) => msg.clone(),
            FeedError::AuthRequired => "Please sign in to continue.".into(),
            FeedError::InFlight => "Still working on your last request.".into(),
            FeedError::Failed(_) => "Something went wrong. Please try again.".into(),
        }
    }

    /// Whether the UI should offer a retry affordance.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            FeedError::ConnectionUnavailable | FeedError::Timeout | FeedError::RateLimited(_) | FeedError::Failed(_)
        )
    }
}

impl From<StoreError> for FeedError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(_) => FeedError::ConnectionUnavailable,
            StoreError::PolicyRecursion(_) | StoreError::PermissionDenied(_) => FeedError::PermissionDenied,
            StoreError::Duplicate => FeedError::Duplicate,
            StoreError::RateLimited(msg) => FeedError::RateLimited(msg),
            StoreError::Invalid(msg) => FeedError::Validation(msg),
            StoreError::NotFound => FeedError::Failed("not found".into()),
            StoreError::Other(msg) => FeedError::Failed(msg),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("bad request: {0}")] BadRequest(String),
    #[error("unauthorized")] Unauthorized,
    #[error("forbidden")] Forbidden,
    #[error("too many requests")] TooManyRequests,
    #[error("service unavailable")] Unavailable,
    #[error("internal error")] Internal,
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Duplicate => ApiError::Conflict,
            StoreError::Invalid(msg) => ApiError::BadRequest(msg),
            StoreError::PermissionDenied(_) | StoreError::PolicyRecursion(_) => ApiError::Forbidden,
            StoreError::RateLimited(_) => ApiError::TooManyRequests,
            StoreError::Unavailable(_) => ApiError::Unavailable,
            StoreError::Other(_) => ApiError::Internal,
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::Invalid(msg) | PaymentError::Provider(msg) => ApiError::BadRequest(msg),
            PaymentError::NotConfigured | PaymentError::Unavailable(_) => ApiError::Unavailable,
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string() })
    }
}
