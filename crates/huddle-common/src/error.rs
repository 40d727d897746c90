//! Relay error type.
//!
//! Every failure the relay reports maps to an HTTP status for the REST routes and to a
//! WebSocket close code for the signaling endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::protocol::close_code;

#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    // === Identity ===
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Missing bearer token")]
    Unauthorized,

    // === Directory ===
    #[error("Incorrect meeting password")]
    InvalidCredentials,

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // === Admission ===
    #[error("You were removed from this meeting")]
    Banned,

    #[error("Meeting is locked")]
    RoomLocked,

    #[error("Meeting is full ({capacity} participants)")]
    RoomFull { capacity: usize },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Body of every non-2xx REST response.
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    error: &'static str,
    message: String,
}

impl HuddleError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TokenExpired | Self::InvalidToken | Self::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidCredentials | Self::Banned | Self::RoomLocked | Self::RoomFull { .. } => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the `error` field.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Banned => "BANNED",
            Self::RoomLocked => "ROOM_LOCKED",
            Self::RoomFull { .. } => "ROOM_FULL",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Close code for a signaling connection ended by this error. 44xx codes are terminal
    /// for the client.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::TokenExpired | Self::InvalidToken | Self::Unauthorized => {
                close_code::UNAUTHORIZED
            }
            Self::Banned => close_code::KICKED,
            Self::RoomLocked => close_code::ROOM_LOCKED,
            Self::RoomFull { .. } => close_code::ROOM_FULL,
            Self::InvalidCredentials
            | Self::NotFound { .. }
            | Self::Validation { .. }
            | Self::Internal(_) => close_code::INTERNAL,
        }
    }
}

impl IntoResponse for HuddleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if let Self::Internal(e) = &self {
            tracing::error!("Internal error: {e:#}");
            "An internal error occurred".to_owned()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.error_code(),
            message,
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type HuddleResult<T> = Result<T, HuddleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_errors_close_with_terminal_codes() {
        assert_eq!(HuddleError::InvalidToken.close_code(), close_code::UNAUTHORIZED);
        assert_eq!(HuddleError::TokenExpired.close_code(), close_code::UNAUTHORIZED);
        assert_eq!(HuddleError::Banned.close_code(), close_code::KICKED);
        assert_eq!(HuddleError::RoomLocked.close_code(), close_code::ROOM_LOCKED);
        assert_eq!(HuddleError::RoomFull { capacity: 2 }.close_code(), close_code::ROOM_FULL);
        assert!(close_code::is_terminal(HuddleError::Banned.close_code()));
        assert!(!close_code::is_terminal(
            HuddleError::Internal(anyhow::anyhow!("boom")).close_code()
        ));
    }

    #[test]
    fn wrong_password_is_forbidden_not_unauthorized() {
        assert_eq!(HuddleError::InvalidCredentials.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn room_full_names_its_capacity() {
        assert_eq!(
            HuddleError::RoomFull { capacity: 16 }.to_string(),
            "Meeting is full (16 participants)"
        );
    }
}
