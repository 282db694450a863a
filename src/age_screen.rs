//! Age screener stage: classifies each detected face into an age bracket
//! and forwards to the region classifier only when a minor is present.
//!
//! Zero detections is a soft outcome here (200 with a descriptive status),
//! unlike the region classifier's hard failure. The divergence is a
//! preserved product behavior, not an accident of this port.

use std::path::PathBuf;

use actix_multipart::form::MultipartForm;
use actix_web::{HttpResponse, post, web};
use image::RgbImage;
use serde_json::json;

use crate::annotate::{self, FACE_COLOR};
use crate::artifact::{ArtifactStore, TempUpload, relocate_artifacts};
use crate::error::StageError;
use crate::forward::{ForwardOutcome, Forwarder};
use crate::io_struct::{AgeAnnotation, AgeCheckSummary, UploadForm};
use crate::vision::{DETECTION_CONFIDENCE_FLOOR, VisionStack};

pub struct AgeScreenerState {
    pub vision: VisionStack,
    pub temp_dir: PathBuf,
    /// Own annotated outputs, mounted at `/annotated_age`.
    pub age_store: ArtifactStore,
    /// Relocated downstream artifacts, mounted at `/annotated`.
    pub relocated_store: ArtifactStore,
    pub forwarder: Option<Forwarder>,
}

fn screen_ages(
    vision: &VisionStack,
    img: &RgbImage,
) -> anyhow::Result<(RgbImage, Vec<AgeAnnotation>)> {
    let detections = vision.ages.detect_ages(img)?;
    let mut annotated = img.clone();
    let mut annotations = Vec::new();
    for det in detections {
        if det.confidence <= DETECTION_CONFIDENCE_FLOOR {
            continue;
        }
        annotate::draw_box(&mut annotated, &det.bbox, FACE_COLOR, 2);
        annotations.push(AgeAnnotation {
            age: det.bracket,
            bbox: det.bbox.as_array(),
        });
    }
    Ok((annotated, annotations))
}

#[post("/process")]
pub async fn process(
    MultipartForm(form): MultipartForm<UploadForm>,
    state: web::Data<AgeScreenerState>,
) -> Result<HttpResponse, StageError> {
    form.validate()?;
    let upload = TempUpload::write(&state.temp_dir, form.file_name(), &form.file.data)
        .map_err(StageError::internal)?;
    let img = form.decode()?;

    let (annotated, annotations) = screen_ages(&state.vision, &img)?;
    let artifact = state
        .age_store
        .save_image("age_annotated", &annotated)
        .map_err(StageError::internal)?;
    let summary = AgeCheckSummary::new(annotations, artifact.url_path.clone());
    log::info!(
        "age screening: faces={} kids={} adults={}",
        summary.annotations.len(),
        summary.kids_count,
        summary.adults_count
    );

    // No subject: soft success, pipeline stops here.
    if !summary.has_faces {
        return Ok(HttpResponse::Ok().json(json!({
            "valid": true,
            "status": "face_validated_and_processed",
            "message": "Image screened; no faces were detected.",
            "face_count": 0,
            "annotated_image_url": summary.annotated_image_url,
            "age_analysis_data": {
                "status": "no_faces_detected",
                "message": "No faces detected",
                "age_check_summary": summary,
            },
        })));
    }

    // Adults only: terminal business rule, no forwarding.
    if !summary.contains_kids {
        return Ok(HttpResponse::Ok().json(json!({
            "valid": true,
            "status": "face_validated_and_processed",
            "message": "Adults only; region screening not performed.",
            "face_count": summary.annotations.len(),
            "annotated_image_url": summary.annotated_image_url,
            "age_analysis_data": {
                "status": "adult_invalid",
                "message": "Adult detected - invalid for analysis",
                "age_check_summary": summary,
            },
        })));
    }

    log::info!("minor detected, forwarding to the region classifier");
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
                    &state.relocated_store,
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
                "message": "Child detected and screened.",
                "face_count": summary.annotations.len(),
                "annotated_image_url": summary.annotated_image_url,
                "age_analysis_data": {
                    "status": "child_autism_screened",
                    "message": "Child detected. Region screening performed.",
                    "autism_prediction_data": payload,
                    "age_check_summary": summary,
                },
            })))
        }
        ForwardOutcome::Failed { reason, attempts } => {
            log::error!("region classifier unavailable after {attempts} attempts: {reason}");
            Ok(HttpResponse::InternalServerError().json(json!({
                "valid": false,
                "status": "autism_api_failed",
                "message": "The region screening service is currently unavailable.",
                "error": reason,
                "attempts": attempts,
                "age_check_summary": summary,
            })))
        }
    }
}
