use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture cancelled by user")]
    UserCancelledCapture,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Source lost mid-stream [{kind}]: {reason}")]
    SourceLostMidStream { kind: String, reason: String },

    #[error("Ingest rejected the offer (status: {})", status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()))]
    IngestRejected { status: Option<u16>, body: String },

    #[error("Ingest request timed out after {0} ms")]
    IngestTimeout(u64),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Acquisition already pending for {0}")]
    AcquisitionPending(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structured error code surfaced to the host UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PermissionDenied,
    DeviceUnavailable,
    UserCancelledCapture,
    NotSupported,
    SourceLostMidStream,
    IngestRejected,
    IngestTimeout,
    NegotiationFailed,
    ConnectionFailed,
    AcquisitionPending,
    InvalidState,
    Cancelled,
    Config,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::DeviceUnavailable => "device_unavailable",
            ErrorCode::UserCancelledCapture => "user_cancelled_capture",
            ErrorCode::NotSupported => "not_supported",
            ErrorCode::SourceLostMidStream => "source_lost_mid_stream",
            ErrorCode::IngestRejected => "ingest_rejected",
            ErrorCode::IngestTimeout => "ingest_timeout",
            ErrorCode::NegotiationFailed => "negotiation_failed",
            ErrorCode::ConnectionFailed => "connection_failed",
            ErrorCode::AcquisitionPending => "acquisition_pending",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Config => "config",
            ErrorCode::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Error code plus human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    /// Map this error to its host-facing code
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            AppError::DeviceUnavailable(_) => ErrorCode::DeviceUnavailable,
            AppError::UserCancelledCapture => ErrorCode::UserCancelledCapture,
            AppError::NotSupported(_) => ErrorCode::NotSupported,
            AppError::SourceLostMidStream { .. } => ErrorCode::SourceLostMidStream,
            AppError::IngestRejected { .. } => ErrorCode::IngestRejected,
            AppError::IngestTimeout(_) => ErrorCode::IngestTimeout,
            AppError::NegotiationFailed(_) => ErrorCode::NegotiationFailed,
            AppError::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            AppError::AcquisitionPending(_) => ErrorCode::AcquisitionPending,
            AppError::InvalidState(_) => ErrorCode::InvalidState,
            AppError::Cancelled => ErrorCode::Cancelled,
            AppError::Config(_) => ErrorCode::Config,
            AppError::Io(_)
            | AppError::Serialization(_)
            | AppError::WebRtcError(_)
            | AppError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Error response body (unified success format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: ErrorCode,
    pub message: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        // Always return 200 OK - success/failure is indicated by the success field
        StatusCode::OK
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            code: self.code(),
            message: self.to_string(),
        };

        tracing::error!(
            error_code = %body.code,
            error_message = %body.message,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
