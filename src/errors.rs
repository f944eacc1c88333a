use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use diesel::r2d2;
use serde_json::json;

/// Application-wide error type. Every fallible boundary funnels into
/// this enum so handlers can map errors onto HTTP statuses in one
/// place and refresh workers can flatten them into the feed's error
/// column.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    /// Network failure or a terminal non-2xx status.
    #[error("{0}")]
    Transport(String),

    /// Unrecognized or malformed feed payload.
    #[error("{0}")]
    Parse(String),

    /// Invalid synthetic-feed rule: bad selector, bad path, bad
    /// method/headers/form, unsupported response type.
    #[error("{0}")]
    Rule(String),

    /// Script runtime exception, stack preserved in the message.
    #[error("{0}")]
    Script(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn rule(msg: impl Into<String>) -> Self {
        AppError::Rule(msg.into())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Rule(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            AppError::Parse(_) | AppError::Script(_) | AppError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Storage(_) | AppError::Script(_) => log::error!("{self}"),
            _ => log::warn!("{self}"),
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => AppError::NotFound,
            _ => AppError::Storage(err.to_string()),
        }
    }
}

impl From<r2d2::PoolError> for AppError {
    fn from(err: r2d2::PoolError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
