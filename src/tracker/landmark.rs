//! Landmark-based region detection
//!
//! The landmark model itself (a face-mesh network or similar) lives outside
//! this crate behind [`LandmarkModel`]. The forehead is placed above the
//! brows, spanning the inner part of the brow line, with its height scaled by
//! the inter-ocular distance. Cheeks sit below each eye, sized by the same
//! distance.

use super::{rect_to_roi, RegionDetector};
use crate::types::{FaceRois, Frame, Roi};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

/// Image-space point (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Landmarks needed to place the forehead
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub left_brow: Vec<Point>,
    pub right_brow: Vec<Point>,
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
    /// Model confidence (0-1)
    pub confidence: f64,
}

/// External landmark provider
pub trait LandmarkModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Landmarks of the most prominent face, or `None`
    fn landmarks(&self, frame: &Frame) -> Option<FaceLandmarks>;
}

/// Region detector driven by a landmark model
pub struct LandmarkDetector {
    model: Arc<dyn LandmarkModel>,
    min_confidence: f64,
    cheeks: bool,
}

impl LandmarkDetector {
    pub fn new(model: Arc<dyn LandmarkModel>, min_confidence: f64) -> Self {
        Self {
            model,
            min_confidence,
            cheeks: false,
        }
    }

    /// Also place both cheeks
    pub fn with_cheeks(mut self, cheeks: bool) -> Self {
        self.cheeks = cheeks;
        self
    }

    fn place(&self, frame: &Frame) -> Option<FaceRois> {
        let marks = self.model.landmarks(frame)?;
        if marks.confidence < self.min_confidence {
            trace!(
                model = self.model.name(),
                confidence = marks.confidence,
                "Landmarks below confidence threshold"
            );
            return None;
        }

        let left_eye = centroid(&marks.left_eye)?;
        let right_eye = centroid(&marks.right_eye)?;
        let eye_distance = ((right_eye.x - left_eye.x).powi(2) + (right_eye.y - left_eye.y).powi(2)).sqrt();
        if eye_distance < 1.0 {
            return None;
        }

        let brows: Vec<&Point> = marks.left_brow.iter().chain(&marks.right_brow).collect();
        if brows.is_empty() {
            return None;
        }
        let brow_top = brows.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let brow_left = brows.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let brow_right = brows.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let inset = (brow_right - brow_left) * 0.1;

        let bottom = brow_top - 0.1 * eye_distance;
        let top = bottom - 0.6 * eye_distance;
        let forehead = rect_to_roi(
            brow_left + inset,
            top,
            brow_right - inset,
            bottom,
            frame,
            marks.confidence,
        )?;

        let cheek = |eye: Point| {
            rect_to_roi(
                eye.x - 0.3 * eye_distance,
                eye.y + 0.4 * eye_distance,
                eye.x + 0.3 * eye_distance,
                eye.y + 0.9 * eye_distance,
                frame,
                marks.confidence,
            )
        };
        Some(FaceRois {
            forehead,
            left_cheek: self.cheeks.then(|| cheek(left_eye)).flatten(),
            right_cheek: self.cheeks.then(|| cheek(right_eye)).flatten(),
        })
    }
}

fn centroid(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    Some(Point {
        x: points.iter().map(|p| p.x).sum::<f64>() / n,
        y: points.iter().map(|p| p.y).sum::<f64>() / n,
    })
}

impl RegionDetector for LandmarkDetector {
    fn name(&self) -> &'static str {
        "landmark"
    }

    fn detect(&self, frame: &Frame) -> Option<Roi> {
        self.place(frame).map(|rois| rois.forehead)
    }

    fn detect_regions(&self, frame: &Frame) -> Option<FaceRois> {
        self.place(frame)
    }
}
