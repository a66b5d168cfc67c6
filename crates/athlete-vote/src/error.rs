use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::voting::{NotifyError, StoreError, VotingError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Notify(NotifyError),
    Voting(VotingError),
    Unauthenticated,
    InvalidRequest(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Voting(err) => match err {
                VotingError::SubmissionNotVotable { .. } => StatusCode::CONFLICT,
                VotingError::VoteNotFound { .. } | VotingError::SubmissionNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                VotingError::InvalidConfidence(_)
                | VotingError::InvalidTransition { .. }
                | VotingError::DeadlineOutOfRange { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                VotingError::ConcurrentModification(_) => StatusCode::SERVICE_UNAVAILABLE,
                VotingError::Store(StoreError::Duplicate) => StatusCode::CONFLICT,
                VotingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Notify(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code so clients can branch without parsing messages.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Voting(err) => err.code(),
            AppError::Unauthenticated => "unauthenticated",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Notify(_) => "internal",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Notify(err) => write!(f, "notifier error: {}", err),
            AppError::Voting(err) => write!(f, "{}", err),
            AppError::Unauthenticated => write!(f, "missing voter identity"),
            AppError::InvalidRequest(detail) => write!(f, "invalid request: {}", detail),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Notify(err) => Some(err),
            AppError::Voting(err) => Some(err),
            AppError::Unauthenticated | AppError::InvalidRequest(_) => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string(), "code": self.code() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<NotifyError> for AppError {
    fn from(value: NotifyError) -> Self {
        Self::Notify(value)
    }
}

impl From<VotingError> for AppError {
    fn from(value: VotingError) -> Self {
        Self::Voting(value)
    }
}
