//! Region classifier stage: crops fixed landmark regions per face,
//! classifies each independently, and fuses the labels into one decision.
//! Terminal stage; zero detected faces is a hard 400 here.

use std::path::PathBuf;

use actix_multipart::form::MultipartForm;
use actix_web::{HttpResponse, post, web};
use image::{RgbImage, imageops};
use serde_json::{Value, json};

use crate::annotate::{self, REGION_FACE_COLOR};
use crate::artifact::{ArtifactStore, TempUpload};
use crate::error::StageError;
use crate::io_struct::{RegionFinding, UploadForm};
use crate::vision::{BoundingBox, LANDMARK_POINT_COUNT, RegionKind, VisionStack};

pub struct RegionClassifierState {
    pub vision: VisionStack,
    pub temp_dir: PathBuf,
    pub store: ArtifactStore,
}

pub struct FaceScreening {
    pub findings: Vec<RegionFinding>,
    pub final_decision: String,
}

fn region_bounds(landmarks: &[(i32, i32)], kind: RegionKind) -> BoundingBox {
    let mut bounds = BoundingBox::new(i32::MAX, i32::MAX, i32::MIN, i32::MIN);
    for &i in kind.landmark_indices() {
        let (x, y) = landmarks[i];
        bounds.x1 = bounds.x1.min(x);
        bounds.y1 = bounds.y1.min(y);
        bounds.x2 = bounds.x2.max(x);
        bounds.y2 = bounds.y2.max(y);
    }
    bounds
}

fn round_pct(confidence: f32) -> f32 {
    (confidence * 10_000.0).round() / 100.0
}

fn screen_face(
    vision: &VisionStack,
    img: &RgbImage,
    annotated: &mut RgbImage,
    face: &BoundingBox,
) -> anyhow::Result<FaceScreening> {
    let landmarks = vision.landmarks.landmarks(img, face)?;
    anyhow::ensure!(
        landmarks.len() == LANDMARK_POINT_COUNT,
        "landmarker returned {} points, expected {LANDMARK_POINT_COUNT}",
        landmarks.len()
    );
    annotate::draw_box(annotated, face, REGION_FACE_COLOR, 2);

    let mut findings = Vec::with_capacity(RegionKind::ALL.len());
    for kind in RegionKind::ALL {
        let bounds = region_bounds(&landmarks, kind);
        // Clamp to the image; a crop that collapses to zero area is skipped
        // rather than failing the face.
        let Some((x, y, w, h)) = bounds.clamped(img.width(), img.height()) else {
            log::warn!("skipping zero-area {} crop", kind.as_str());
            continue;
        };
        let crop = imageops::crop_imm(img, x, y, w, h).to_image();
        let score = vision.regions.classify_region(kind, &crop)?;
        annotate::draw_box(annotated, &bounds, kind.color(), 2);
        findings.push(RegionFinding {
            region: kind,
            label: score.label,
            confidence: round_pct(score.confidence),
        });
    }

    let labels: Vec<&str> = findings.iter().map(|f| f.label.as_str()).collect();
    let confidences: Vec<f32> = findings.iter().map(|f| f.confidence / 100.0).collect();
    let final_decision = vision.fusion.fuse(&labels, &confidences);
    Ok(FaceScreening {
        findings,
        final_decision,
    })
}

#[post("/predict")]
pub async fn predict(
    MultipartForm(form): MultipartForm<UploadForm>,
    state: web::Data<RegionClassifierState>,
) -> Result<HttpResponse, StageError> {
    form.validate()?;
    let _upload = TempUpload::write(&state.temp_dir, form.file_name(), &form.file.data)
        .map_err(StageError::internal)?;
    let img = form.decode()?;

    let faces = state
        .vision
        .faces
        .detect_faces(&img)
        .map_err(StageError::from)?;
    if faces.is_empty() {
        return Err(StageError::NoFaceDetected);
    }

    let mut annotated = img.clone();
    let mut results: Vec<Value> = Vec::new();
    for face in &faces {
        let screening = screen_face(&state.vision, &img, &mut annotated, &face.bbox)?;
        log::info!(
            "region screening: {} -> {}",
            screening
                .findings
                .iter()
                .map(|f| format!("{}={} {:.2}%", f.region.as_str(), f.label, f.confidence))
                .collect::<Vec<_>>()
                .join(", "),
            screening.final_decision
        );
        for finding in &screening.findings {
            results.push(serde_json::to_value(finding).map_err(StageError::internal)?);
        }
        results.push(json!({ "final_decision": screening.final_decision }));
    }

    let artifact = state
        .store
        .save_image("annotated", &annotated)
        .map_err(StageError::internal)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "results": results,
        "annotated_image_path": artifact.url_path,
    })))
}
