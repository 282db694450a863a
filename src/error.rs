use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;

/// Request-level errors surfaced to the caller as `{status, message}` JSON.
///
/// Business rejections (animal detected, adults only) are not errors; stages
/// build those response bodies directly. This taxonomy covers bad uploads,
/// the region classifier's hard no-face failure, and unexpected breakage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("File must be an image")]
    NotAnImage,

    #[error("Uploaded file is empty")]
    EmptyUpload,

    #[error("Uploaded file could not be read as a valid image: {0}")]
    UnreadableImage(String),

    #[error("No face detected in the image")]
    NoFaceDetected,

    #[error("Processing error: {0}")]
    Internal(String),
}

impl StageError {
    pub fn tag(&self) -> &'static str {
        match self {
            StageError::NotAnImage => "invalid_upload",
            StageError::EmptyUpload => "empty_upload",
            StageError::UnreadableImage(_) => "unreadable_image",
            StageError::NoFaceDetected => "no_face_detected",
            StageError::Internal(_) => "processing_error",
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        StageError::Internal(err.to_string())
    }
}

impl ResponseError for StageError {
    fn status_code(&self) -> StatusCode {
        match self {
            StageError::NotAnImage
            | StageError::EmptyUpload
            | StageError::UnreadableImage(_)
            | StageError::NoFaceDetected => StatusCode::BAD_REQUEST,
            StageError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "status": self.tag(),
            "message": self.to_string(),
        }))
    }
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        StageError::Internal(err.to_string())
    }
}
