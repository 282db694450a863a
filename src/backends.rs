//! Built-in vision backends.
//!
//! These are coarse, deterministic stand-ins that let the binary run end to
//! end without external model files. Production deployments plug real model
//! wrappers into the same [`crate::vision`] traits at startup.

use std::f32::consts::PI;
use std::sync::Arc;

use image::RgbImage;

use crate::vision::{
    AgeBracket, AgeDetection, AgeEstimator, BoundingBox, DecisionFusion, FaceDetection,
    FaceDetector, FaceLandmarker, LANDMARK_POINT_COUNT, LabeledBox, ObjectDetector,
    RegionClassifier, RegionKind, RegionScore, VisionStack,
};

/// Default capability bundle built once at process start.
pub fn heuristic_stack() -> VisionStack {
    let faces = Arc::new(SkinBlockFaceDetector::default());
    VisionStack {
        objects: Arc::new(PassiveObjectDetector),
        ages: Arc::new(FaceSpanAgeEstimator { faces: faces.clone() }),
        faces,
        landmarks: Arc::new(CanonicalLandmarker),
        regions: Arc::new(LumaRegionClassifier::default()),
        fusion: Arc::new(WeightedVoteFusion),
    }
}

/// Reports no objects; the animal gate passes everything until a real
/// detector is wired in.
pub struct PassiveObjectDetector;

impl ObjectDetector for PassiveObjectDetector {
    fn detect_objects(&self, _img: &RgbImage) -> anyhow::Result<Vec<LabeledBox>> {
        Ok(Vec::new())
    }
}

/// Face proposer over a coarse chunk grid: marks chunks whose pixels are
/// mostly skin-toned, then takes the bounding box of the largest
/// 4-connected cluster as one face candidate.
pub struct SkinBlockFaceDetector {
    pub chunk_size: u32,
    pub min_chunks: usize,
    pub skin_ratio: f32,
}

impl Default for SkinBlockFaceDetector {
    fn default() -> Self {
        Self {
            chunk_size: 16,
            min_chunks: 4,
            skin_ratio: 0.4,
        }
    }
}

fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as i16, g as i16, b as i16);
    r > 95 && g > 40 && b > 20 && r > g && r > b && r - g > 15
}

impl SkinBlockFaceDetector {
    fn skin_grid(&self, img: &RgbImage) -> (Vec<bool>, u32, u32) {
        let cols = img.width().div_ceil(self.chunk_size).max(1);
        let rows = img.height().div_ceil(self.chunk_size).max(1);
        let mut grid = vec![false; (cols * rows) as usize];
        for row in 0..rows {
            for col in 0..cols {
                let x0 = col * self.chunk_size;
                let y0 = row * self.chunk_size;
                let x1 = (x0 + self.chunk_size).min(img.width());
                let y1 = (y0 + self.chunk_size).min(img.height());
                let mut skin = 0u32;
                let mut total = 0u32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        let p = img.get_pixel(x, y);
                        if is_skin(p[0], p[1], p[2]) {
                            skin += 1;
                        }
                        total += 1;
                    }
                }
                if total > 0 && skin as f32 / total as f32 >= self.skin_ratio {
                    grid[(row * cols + col) as usize] = true;
                }
            }
        }
        (grid, cols, rows)
    }
}

impl FaceDetector for SkinBlockFaceDetector {
    fn detect_faces(&self, img: &RgbImage) -> anyhow::Result<Vec<FaceDetection>> {
        let (grid, cols, rows) = self.skin_grid(img);
        let mut seen = vec![false; grid.len()];
        let mut best: Option<(usize, u32, u32, u32, u32)> = None;

        for start in 0..grid.len() {
            if !grid[start] || seen[start] {
                continue;
            }
            // flood-fill one 4-connected cluster
            let mut stack = vec![start];
            let mut size = 0usize;
            let (mut min_c, mut min_r, mut max_c, mut max_r) = (cols, rows, 0u32, 0u32);
            while let Some(idx) = stack.pop() {
                if seen[idx] || !grid[idx] {
                    continue;
                }
                seen[idx] = true;
                size += 1;
                let (row, col) = (idx as u32 / cols, idx as u32 % cols);
                min_c = min_c.min(col);
                max_c = max_c.max(col);
                min_r = min_r.min(row);
                max_r = max_r.max(row);
                if col > 0 {
                    stack.push(idx - 1);
                }
                if col + 1 < cols {
                    stack.push(idx + 1);
                }
                if row > 0 {
                    stack.push(idx - cols as usize);
                }
                if row + 1 < rows {
                    stack.push(idx + cols as usize);
                }
            }
            if size >= self.min_chunks
                && best.map_or(true, |(best_size, ..)| size > best_size)
            {
                best = Some((size, min_c, min_r, max_c, max_r));
            }
        }

        Ok(best
            .map(|(size, min_c, min_r, max_c, max_r)| {
                let bbox = BoundingBox::new(
                    (min_c * self.chunk_size) as i32,
                    (min_r * self.chunk_size) as i32,
                    (((max_c + 1) * self.chunk_size).min(img.width())) as i32,
                    (((max_r + 1) * self.chunk_size).min(img.height())) as i32,
                );
                let span = ((max_c - min_c + 1) * (max_r - min_r + 1)) as f32;
                FaceDetection {
                    bbox,
                    confidence: (size as f32 / span).clamp(0.0, 1.0),
                }
            })
            .into_iter()
            .collect())
    }
}

/// Synthesizes the standard 68-point layout at canonical positions within
/// the face box: jaw arc, brows, nose, eye hexagons, mouth rings.
pub struct CanonicalLandmarker;

impl FaceLandmarker for CanonicalLandmarker {
    fn landmarks(&self, _img: &RgbImage, face: &BoundingBox) -> anyhow::Result<Vec<(i32, i32)>> {
        let (w, h) = (face.width() as f32, face.height() as f32);
        anyhow::ensure!(w > 0.0 && h > 0.0, "degenerate face box {face:?}");
        let at = |fx: f32, fy: f32| {
            (
                face.x1 + (fx * w).round() as i32,
                face.y1 + (fy * h).round() as i32,
            )
        };

        let mut pts = Vec::with_capacity(LANDMARK_POINT_COUNT);
        // 0-16: jaw line along a shallow arc
        for i in 0..17 {
            let t = i as f32 / 16.0;
            pts.push(at(t, 0.55 + 0.4 * (PI * t).sin()));
        }
        // 17-26: brows
        for i in 0..5 {
            pts.push(at(0.15 + 0.0625 * i as f32, 0.3));
        }
        for i in 0..5 {
            pts.push(at(0.6 + 0.0625 * i as f32, 0.3));
        }
        // 27-30: nose bridge, 31-35: nose base
        for i in 0..4 {
            pts.push(at(0.5, 0.36 + 0.06 * i as f32));
        }
        for i in 0..5 {
            pts.push(at(0.38 + 0.06 * i as f32, 0.62));
        }
        // 36-41 / 42-47: eye hexagons
        for (cx, cy) in [(0.32f32, 0.42f32), (0.68, 0.42)] {
            for i in 0..6 {
                let a = i as f32 * PI / 3.0;
                pts.push(at(cx + 0.06 * a.cos(), cy + 0.035 * a.sin()));
            }
        }
        // 48-59: outer mouth ring, 60-67: inner ring
        for i in 0..12 {
            let a = i as f32 * PI / 6.0;
            pts.push(at(0.5 + 0.18 * a.cos(), 0.78 + 0.08 * a.sin()));
        }
        for i in 0..8 {
            let a = i as f32 * PI / 4.0;
            pts.push(at(0.5 + 0.1 * a.cos(), 0.78 + 0.04 * a.sin()));
        }
        Ok(pts)
    }
}

/// Maps the detected face's relative span onto the bracket table: larger
/// faces (closer subjects) land in older brackets.
pub struct FaceSpanAgeEstimator {
    pub faces: Arc<SkinBlockFaceDetector>,
}

impl AgeEstimator for FaceSpanAgeEstimator {
    fn detect_ages(&self, img: &RgbImage) -> anyhow::Result<Vec<AgeDetection>> {
        let faces = self.faces.detect_faces(img)?;
        let image_area = (img.width() * img.height()) as f32;
        Ok(faces
            .into_iter()
            .map(|face| {
                let area = (face.bbox.width().max(0) * face.bbox.height().max(0)) as f32;
                let frac = (area / image_area).clamp(0.0, 1.0);
                let idx = ((frac.sqrt() * AgeBracket::ALL.len() as f32) as usize)
                    .min(AgeBracket::ALL.len() - 1);
                AgeDetection {
                    bbox: face.bbox,
                    bracket: AgeBracket::ALL[idx],
                    confidence: face.confidence,
                }
            })
            .collect())
    }
}

/// Labels a region crop from its luma statistics: flat crops read as
/// `autistic`, textured crops as `non-autistic`.
pub struct LumaRegionClassifier {
    pub variance_threshold: f32,
}

impl Default for LumaRegionClassifier {
    fn default() -> Self {
        Self {
            variance_threshold: 300.0,
        }
    }
}

impl RegionClassifier for LumaRegionClassifier {
    fn classify_region(&self, _region: RegionKind, crop: &RgbImage) -> anyhow::Result<RegionScore> {
        anyhow::ensure!(crop.width() > 0 && crop.height() > 0, "empty region crop");
        let n = (crop.width() * crop.height()) as f32;
        let mut sum = 0.0f32;
        let mut sum_sq = 0.0f32;
        for p in crop.pixels() {
            let luma = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
            sum += luma;
            sum_sq += luma * luma;
        }
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        let (label, distance) = if variance < self.variance_threshold {
            ("autistic", 1.0 - variance / self.variance_threshold)
        } else {
            (
                "non-autistic",
                1.0 - self.variance_threshold / variance.max(1.0),
            )
        };
        Ok(RegionScore {
            label: label.to_string(),
            confidence: 0.5 + 0.5 * distance.clamp(0.0, 1.0),
        })
    }
}

/// Confidence-weighted vote over the per-region labels; the winning label
/// is the decision string.
pub struct WeightedVoteFusion;

impl DecisionFusion for WeightedVoteFusion {
    fn fuse(&self, labels: &[&str], confidences: &[f32]) -> String {
        let mut tally: Vec<(&str, f32)> = Vec::new();
        for (label, conf) in labels.iter().zip(confidences) {
            match tally.iter_mut().find(|(l, _)| l == label) {
                Some((_, mass)) => *mass += conf,
                None => tally.push((label, *conf)),
            }
        }
        tally
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(label, _)| label.to_string())
            .unwrap_or_else(|| "inconclusive".to_string())
    }
}
