use actix_multipart::form::{MultipartForm, bytes::Bytes as UploadBytes};
use image::RgbImage;
use serde::Serialize;

use crate::error::StageError;
use crate::vision::{AgeBracket, RegionKind};

/// Multipart upload accepted by every stage's processing endpoint.
/// Field name is `file`; content type must start with `image/`.
#[derive(Debug, MultipartForm)]
pub struct UploadForm {
    #[multipart(rename = "file", limit = "25MiB")]
    pub file: UploadBytes,
}

impl UploadForm {
    /// Content-type and non-empty checks. Runs before anything touches disk
    /// so a rejected upload never leaves a temp file behind.
    pub fn validate(&self) -> Result<(), StageError> {
        let is_image = self
            .file
            .content_type
            .as_ref()
            .map(|ct| ct.essence_str().starts_with("image/"))
            .unwrap_or(false);
        if !is_image {
            return Err(StageError::NotAnImage);
        }
        if self.file.data.is_empty() {
            return Err(StageError::EmptyUpload);
        }
        Ok(())
    }

    pub fn decode(&self) -> Result<RgbImage, StageError> {
        image::load_from_memory(&self.file.data)
            .map(|img| img.to_rgb8())
            .map_err(|e| StageError::UnreadableImage(e.to_string()))
    }

    pub fn file_name(&self) -> &str {
        self.file.file_name.as_deref().unwrap_or("upload.jpg")
    }
}

/// One face drawn by the gatekeeper, labeled sequentially.
#[derive(Debug, Clone, Serialize)]
pub struct FaceAnnotation {
    pub label: String,
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
}

/// One face with its age bracket, as reported by the age screener.
#[derive(Debug, Clone, Serialize)]
pub struct AgeAnnotation {
    pub age: AgeBracket,
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
}

/// The age screener's own detection summary, embedded in every one of its
/// response shapes (including forwarding-failure bodies).
#[derive(Debug, Clone, Serialize)]
pub struct AgeCheckSummary {
    pub has_faces: bool,
    pub contains_kids: bool,
    pub annotations: Vec<AgeAnnotation>,
    pub kids_count: usize,
    pub adults_count: usize,
    pub annotated_image_url: String,
}

impl AgeCheckSummary {
    pub fn new(annotations: Vec<AgeAnnotation>, annotated_image_url: String) -> Self {
        let kids_count = annotations.iter().filter(|a| a.age.is_minor()).count();
        Self {
            has_faces: !annotations.is_empty(),
            contains_kids: kids_count > 0,
            adults_count: annotations.len() - kids_count,
            kids_count,
            annotations,
            annotated_image_url,
        }
    }
}

/// Per-region classification entry in the region classifier's results list.
/// `confidence` is a percentage rounded to two decimals.
#[derive(Debug, Clone, Serialize)]
pub struct RegionFinding {
    pub region: RegionKind,
    pub label: String,
    pub confidence: f32,
}
