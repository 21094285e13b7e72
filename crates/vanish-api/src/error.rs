use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use vanish_core::ShareError;
use vanish_types::api::ErrorResponse;

/// Failures of the account layer.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("name, email and password are required")]
    MissingFields,

    #[error("password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("an account with this email already exists")]
    EmailTaken,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("authentication required")]
    Unauthorized,

    #[error("user not found")]
    UnknownUser,
}

/// Everything a handler can fail with. Rendered as
/// `{ success: false, error: <kind>, message }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Share(e) => {
                let status = match e {
                    ShareError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    ShareError::NeedsPassword | ShareError::BadPassword => StatusCode::UNAUTHORIZED,
                    ShareError::Exhausted => StatusCode::FORBIDDEN,
                    ShareError::NotFound => StatusCode::NOT_FOUND,
                    ShareError::Expired => StatusCode::GONE,
                    ShareError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = match e {
                    ShareError::Storage(_) => GENERIC_MESSAGE.to_string(),
                    other => capitalize(&other.to_string()),
                };
                (status, e.kind(), message)
            }
            ApiError::Auth(e) => {
                let (status, kind) = match e {
                    AuthError::MissingFields | AuthError::WeakPassword(_) => {
                        (StatusCode::BAD_REQUEST, "InvalidInput")
                    }
                    AuthError::EmailTaken => (StatusCode::CONFLICT, "Conflict"),
                    AuthError::InvalidCredentials | AuthError::Unauthorized => {
                        (StatusCode::UNAUTHORIZED, "Unauthorized")
                    }
                    AuthError::UnknownUser => (StatusCode::NOT_FOUND, "NotFound"),
                };
                (status, kind, capitalize(&e.to_string()))
            }
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "InvalidInput", message.clone())
            }
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "StorageFailure",
                GENERIC_MESSAGE.to_string(),
            ),
        }
    }
}

const GENERIC_MESSAGE: &str = "Something went wrong, please try again later";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = self.parts();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", kind, self);
        }

        let body = ErrorResponse {
            success: false,
            error: kind.to_string(),
            message,
            requires_password: matches!(self, ApiError::Share(ShareError::NeedsPassword)),
        };
        (status, Json(body)).into_response()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
