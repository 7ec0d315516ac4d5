use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use reposcan_core::ScanError;
use serde_json::json;
use std::fmt;
use tracing::error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Validation(msg) => Self::bad_request(msg),
            ScanError::NotFound(msg) => Self::not_found(msg),
            ScanError::InvalidTransition { .. } => Self::conflict(err.to_string()),
            other => {
                error!(error = %other, "request failed");
                Self::internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposcan_model::{ScanId, ScanStatus};

    #[test]
    fn scan_errors_map_to_status_codes() {
        let cases = [
            (ScanError::Validation("bad url".into()), StatusCode::BAD_REQUEST),
            (ScanError::NotFound("scan 9".into()), StatusCode::NOT_FOUND),
            (
                ScanError::InvalidTransition {
                    scan_id: ScanId(1),
                    from: ScanStatus::Success,
                    to: ScanStatus::Queued,
                },
                StatusCode::CONFLICT,
            ),
            (ScanError::Channel("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
