use axum::{http::StatusCode, Json};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Everything that can go wrong between taking a prompt and handing back a video.
///
/// The first five variants mirror what the vendor can tell us; the rest come
/// from local bookkeeping (sessions, cancellation, the wait ceiling, disk).
#[derive(Debug, Error)]
pub enum VideoGenError {
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Service temporarily unavailable: {0}")]
    TransientService(String),
    #[error("Service error: {0}")]
    FatalService(String),
    #[error("Operation completed but produced no video{}", filtered_suffix(.filtered_reasons))]
    EmptyResult { filtered_reasons: Vec<String> },
    #[error("Generation was cancelled")]
    Cancelled,
    #[error("Generation did not complete within {waited_secs} seconds")]
    TimedOut { waited_secs: u64 },
    #[error("A generation is already running for this session")]
    SessionBusy,
    #[error("Session {0} not found")]
    SessionNotFound(String),
    #[error("No generated video available")]
    ArtifactNotFound,
    #[error("Failed to write video: {0}")]
    Io(#[from] std::io::Error),
}

fn filtered_suffix(reasons: &[String]) -> String {
    if reasons.is_empty() {
        String::new()
    } else {
        format!(" (filtered: {})", reasons.join("; "))
    }
}

impl VideoGenError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientService(_))
    }

    /// Short machine-readable category, used in API bodies and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::Validation(_) => "validation",
            Self::TransientService(_) => "transient_service",
            Self::FatalService(_) => "fatal_service",
            Self::EmptyResult { .. } => "empty_result",
            Self::Cancelled => "cancelled",
            Self::TimedOut { .. } => "timed_out",
            Self::SessionBusy => "session_busy",
            Self::SessionNotFound(_) => "session_not_found",
            Self::ArtifactNotFound => "artifact_not_found",
            Self::Io(_) => "io",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::TransientService(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::FatalService(_) | Self::EmptyResult { .. } => StatusCode::BAD_GATEWAY,
            Self::Cancelled | Self::SessionBusy => StatusCode::CONFLICT,
            Self::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::SessionNotFound(_) | Self::ArtifactNotFound => StatusCode::NOT_FOUND,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body returned for every failed API call
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
}

impl From<&VideoGenError> for ApiError {
    fn from(error: &VideoGenError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<VideoGenError> for (StatusCode, Json<ApiError>) {
    fn from(error: VideoGenError) -> Self {
        (error.status_code(), Json(ApiError::from(&error)))
    }
}
