use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Object classes treated as animals by the gatekeeper.
pub const ANIMAL_CLASSES: [&str; 10] = [
    "dog", "cat", "bird", "horse", "sheep", "cow", "bear", "elephant", "zebra", "giraffe",
];

/// Minimum confidence for a detection to count, shared by the animal check
/// and the age screener. Fixed, not configurable per request.
pub const DETECTION_CONFIDENCE_FLOOR: f32 = 0.7;

/// A face qualifies as human only when its box aspect ratio (w/h) lies in
/// this open interval. Filters degenerate detections.
pub const FACE_ASPECT_BOUNDS: (f32, f32) = (0.75, 1.4);

/// Landmarkers must return exactly this many points per face.
pub const LANDMARK_POINT_COUNT: usize = 68;

/// Axis-aligned box in image coordinates. Detector output may extend past
/// the image bounds or carry negative corners; `clamped` normalizes that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// `None` for degenerate boxes.
    pub fn aspect_ratio(&self) -> Option<f32> {
        if self.width() <= 0 || self.height() <= 0 {
            return None;
        }
        Some(self.width() as f32 / self.height() as f32)
    }

    pub fn as_array(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Clamp to an image of the given size, returning `(x, y, w, h)` for
    /// cropping. `None` when the clamped box has zero area.
    pub fn clamped(&self, img_width: u32, img_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.clamp(0, img_width as i32);
        let y1 = self.y1.clamp(0, img_height as i32);
        let x2 = self.x2.clamp(0, img_width as i32);
        let y2 = self.y2.clamp(0, img_height as i32);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}

/// Age brackets in ascending order, serialized with the classifier's
/// native labels. The four youngest form the "minor" gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeBracket {
    #[serde(rename = "(0-2)")]
    Infant,
    #[serde(rename = "(4-6)")]
    Toddler,
    #[serde(rename = "(8-12)")]
    Child,
    #[serde(rename = "(15-20)")]
    Teen,
    #[serde(rename = "(25-32)")]
    YoungAdult,
    #[serde(rename = "(38-43)")]
    Adult,
    #[serde(rename = "(48-53)")]
    MiddleAged,
    #[serde(rename = "(60-100)")]
    Senior,
}

impl AgeBracket {
    pub const ALL: [AgeBracket; 8] = [
        AgeBracket::Infant,
        AgeBracket::Toddler,
        AgeBracket::Child,
        AgeBracket::Teen,
        AgeBracket::YoungAdult,
        AgeBracket::Adult,
        AgeBracket::MiddleAged,
        AgeBracket::Senior,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AgeBracket::Infant => "(0-2)",
            AgeBracket::Toddler => "(4-6)",
            AgeBracket::Child => "(8-12)",
            AgeBracket::Teen => "(15-20)",
            AgeBracket::YoungAdult => "(25-32)",
            AgeBracket::Adult => "(38-43)",
            AgeBracket::MiddleAged => "(48-53)",
            AgeBracket::Senior => "(60-100)",
        }
    }

    pub fn is_minor(&self) -> bool {
        matches!(
            self,
            AgeBracket::Infant | AgeBracket::Toddler | AgeBracket::Child | AgeBracket::Teen
        )
    }
}

/// Fixed anatomical regions cropped by the region classifier, each defined
/// by a set of 68-point landmark indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Eyes,
    Nose,
    Lips,
}

impl RegionKind {
    pub const ALL: [RegionKind; 3] = [RegionKind::Eyes, RegionKind::Nose, RegionKind::Lips];

    pub fn landmark_indices(&self) -> &'static [usize] {
        match self {
            RegionKind::Eyes => &[17, 19, 24, 26, 41, 47],
            RegionKind::Nose => &[31, 33, 35, 39, 42],
            RegionKind::Lips => &[48, 50, 52, 54, 57],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionKind::Eyes => "eyes",
            RegionKind::Nose => "nose",
            RegionKind::Lips => "lips",
        }
    }

    pub fn color(&self) -> image::Rgb<u8> {
        match self {
            RegionKind::Eyes => image::Rgb([0, 255, 0]),
            RegionKind::Nose => image::Rgb([255, 255, 0]),
            RegionKind::Lips => image::Rgb([0, 255, 255]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabeledBox {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct AgeDetection {
    pub bbox: BoundingBox,
    pub bracket: AgeBracket,
    pub confidence: f32,
}

/// Binary label with confidence in `[0, 1]`, as produced per region crop.
#[derive(Debug, Clone)]
pub struct RegionScore {
    pub label: String,
    pub confidence: f32,
}

// Inference capabilities are opaque: fixed third-party models behind these
// seams. Implementations are loaded once at startup and shared read-only
// across requests.

pub trait ObjectDetector: Send + Sync {
    fn detect_objects(&self, img: &RgbImage) -> anyhow::Result<Vec<LabeledBox>>;
}

pub trait FaceDetector: Send + Sync {
    fn detect_faces(&self, img: &RgbImage) -> anyhow::Result<Vec<FaceDetection>>;
}

pub trait FaceLandmarker: Send + Sync {
    /// Exactly [`LANDMARK_POINT_COUNT`] points for the given face box.
    fn landmarks(&self, img: &RgbImage, face: &BoundingBox) -> anyhow::Result<Vec<(i32, i32)>>;
}

pub trait AgeEstimator: Send + Sync {
    fn detect_ages(&self, img: &RgbImage) -> anyhow::Result<Vec<AgeDetection>>;
}

pub trait RegionClassifier: Send + Sync {
    fn classify_region(&self, region: RegionKind, crop: &RgbImage) -> anyhow::Result<RegionScore>;
}

pub trait DecisionFusion: Send + Sync {
    /// Fuse per-region labels and confidences into one decision string.
    fn fuse(&self, labels: &[&str], confidences: &[f32]) -> String;
}

/// The capability bundle handed to every request handler.
#[derive(Clone)]
pub struct VisionStack {
    pub objects: Arc<dyn ObjectDetector>,
    pub faces: Arc<dyn FaceDetector>,
    pub landmarks: Arc<dyn FaceLandmarker>,
    pub ages: Arc<dyn AgeEstimator>,
    pub regions: Arc<dyn RegionClassifier>,
    pub fusion: Arc<dyn DecisionFusion>,
}
