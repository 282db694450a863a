//! Gatekeeper stage: rejects animal images, requires a qualifying human
//! face, annotates, and forwards downstream to the age screener.

use std::path::PathBuf;

use actix_multipart::form::MultipartForm;
use actix_web::{HttpResponse, post, web};
use image::RgbImage;
use serde_json::json;

use crate::annotate::{self, FACE_COLOR};
use crate::artifact::{ArtifactStore, TempUpload, relocate_artifacts};
use crate::error::StageError;
use crate::forward::{ForwardOutcome, Forwarder};
use crate::io_struct::{FaceAnnotation, UploadForm};
use crate::vision::{
    ANIMAL_CLASSES, DETECTION_CONFIDENCE_FLOOR, FACE_ASPECT_BOUNDS, FaceDetection, VisionStack,
};

pub struct GatekeeperState {
    pub vision: VisionStack,
    pub temp_dir: PathBuf,
    pub store: ArtifactStore,
    pub forwarder: Option<Forwarder>,
}

/// Animal gate. A detector failure is treated as "no animal seen" so a
/// broken auxiliary model does not block human uploads.
fn contains_animal(vision: &VisionStack, img: &RgbImage) -> bool {
    match vision.objects.detect_objects(img) {
        Ok(boxes) => boxes.iter().any(|b| {
            ANIMAL_CLASSES.contains(&b.label.as_str()) && b.confidence > DETECTION_CONFIDENCE_FLOOR
        }),
        Err(e) => {
            log::error!("animal detection failed: {e}");
            false
        }
    }
}

fn is_qualifying(face: &FaceDetection) -> bool {
    let (lo, hi) = FACE_ASPECT_BOUNDS;
    face.bbox
        .aspect_ratio()
        .is_some_and(|ar| ar > lo && ar < hi)
}

fn annotate_faces(img: &RgbImage, faces: &[FaceDetection]) -> (RgbImage, Vec<FaceAnnotation>) {
    let mut annotated = img.clone();
    let mut annotations = Vec::with_capacity(faces.len());
    for (i, face) in faces.iter().enumerate() {
        annotate::draw_box(&mut annotated, &face.bbox, FACE_COLOR, 2);
        annotations.push(FaceAnnotation {
            label: format!("Human Face {}", i + 1),
            bbox: face.bbox.as_array(),
        });
    }
    (annotated, annotations)
}

#[post("/filter_face")]
pub async fn filter_face(
    MultipartForm(form): MultipartForm<UploadForm>,
    state: web::Data<GatekeeperState>,
) -> Result<HttpResponse, StageError> {
    form.validate()?;
    let upload = TempUpload::write(&state.temp_dir, form.file_name(), &form.file.data)
        .map_err(StageError::internal)?;
    let img = form.decode()?;

    if contains_animal(&state.vision, &img) {
        return Ok(HttpResponse::BadRequest().json(json!({
            "valid": false,
            "status": "animal_detected",
            "reason": "Animal face detected. Only real human images are allowed.",
        })));
    }

    let faces = state.vision.faces.detect_faces(&img).unwrap_or_else(|e| {
        log::error!("face detection failed: {e}");
        Vec::new()
    });
    if !faces.iter().any(is_qualifying) {
        return Ok(HttpResponse::BadRequest().json(json!({
            "valid": false,
            "status": "no_human_face",
            "reason": "No valid human face detected.",
        })));
    }

    let (annotated, annotations) = annotate_faces(&img, &faces);
    let artifact = state
        .store
        .save_image("face_annotated", &annotated)
        .map_err(StageError::internal)?;
    let face_count = annotations.len();
    log::info!("valid human face detected, face_count={face_count}");

    let outcome = match &state.forwarder {
        Some(forwarder) => forwarder.forward_image(upload.path()).await,
        None => ForwardOutcome::Failed {
            reason: "no downstream stage configured".to_string(),
            attempts: 0,
        },
    };

    match outcome {
        ForwardOutcome::Success(mut payload) => {
            if let Some(forwarder) = &state.forwarder {
                let report = relocate_artifacts(
                    forwarder.client(),
                    &forwarder.target().base_url,
                    &mut payload,
                    &state.store,
                )
                .await;
                if report.attempted() && !report.fully_relocated() {
                    log::warn!(
                        "relocated {}/{} downstream artifacts; leaving original paths for the rest",
                        report.relocated,
                        report.found
                    );
                }
            }
            Ok(HttpResponse::Ok().json(json!({
                "valid": true,
                "status": "face_validated_and_processed",
                "message": "Human face validated and processed by the age screener.",
                "face_count": face_count,
                "annotations": annotations,
                "annotated_image_url": artifact.url_path,
                "age_analysis_data": payload,
            })))
        }
        ForwardOutcome::Failed { reason, attempts } => {
            log::error!("age screener unavailable after {attempts} attempts: {reason}");
            Ok(HttpResponse::ServiceUnavailable().json(json!({
                "valid": false,
                "status": "age_api_unavailable",
                "message": "Face validation passed but the age screening service is currently unavailable.",
                "error": reason,
                "attempts": attempts,
                "face_count": face_count,
                "annotated_image_url": artifact.url_path,
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::BoundingBox;

    fn face(x1: i32, y1: i32, x2: i32, y2: i32) -> FaceDetection {
        FaceDetection {
            bbox: BoundingBox::new(x1, y1, x2, y2),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_aspect_gate_filters_degenerate_faces() {
        assert!(is_qualifying(&face(0, 0, 100, 100)));
        // too wide
        assert!(!is_qualifying(&face(0, 0, 150, 100)));
        // too tall
        assert!(!is_qualifying(&face(0, 0, 60, 100)));
        // zero area
        assert!(!is_qualifying(&face(10, 10, 10, 10)));
    }

    #[test]
    fn test_annotations_are_sequentially_labeled() {
        let img = RgbImage::new(64, 64);
        let faces = [face(2, 2, 20, 20), face(30, 30, 50, 50)];
        let (_, annotations) = annotate_faces(&img, &faces);
        assert_eq!(annotations[0].label, "Human Face 1");
        assert_eq!(annotations[1].label, "Human Face 2");
        assert_eq!(annotations[1].bbox, [30, 30, 50, 50]);
    }
}
