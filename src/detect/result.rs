use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::Category;

/// Bounding box in frame pixel coordinates, `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One raw detector output row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    #[serde(default)]
    pub bbox: BoundingBox,
}

/// Everything the detector produced for one frame.
#[derive(Clone, Debug)]
pub struct DetectedFrame {
    /// Detector frame sequence number.
    pub index: u64,
    /// Capture time stamped by the source.
    pub captured_at: DateTime<Utc>,
    pub detections: Vec<Detection>,
    /// Encoded JPEG of the full frame.
    pub image: Vec<u8>,
}

/// A detection that maps to an alert category.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassifiedDetection {
    category: Category,
    confidence: f32,
}

impl ClassifiedDetection {
    /// Returns `None` when the confidence is not a finite value in `0..=1`.
    pub fn new(category: Category, confidence: f32) -> Option<Self> {
        if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
            Some(Self {
                category,
                confidence,
            })
        } else {
            None
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}
