//! Face region tracking
//!
//! Locates the forehead (and, where the detector can place them, both
//! cheeks) in each frame. Detection strategies implement [`RegionDetector`]
//! and are combined in a [`DetectorChain`]; the first detector that finds a
//! face wins. A frame without a face is not an error, just `None`.
//!
//! The classical cascade is OpenCV's Haar classifier when the crate is built
//! with the `opencv` feature and a cascade file is available. Otherwise the
//! skin-colour cascade in this crate stands in for it.

mod cascade;
#[cfg(feature = "opencv")]
mod haar;
mod landmark;
mod smoother;

pub use cascade::SkinCascadeDetector;
#[cfg(feature = "opencv")]
pub use haar::HaarCascadeDetector;
pub use landmark::{FaceLandmarks, LandmarkDetector, LandmarkModel, Point};
pub use smoother::RoiSmoother;

use crate::config::{BoxFraction, DetectionConfig, DetectionStrategy, RegionLayout};
use crate::error::ComputeError;
use crate::types::{FaceRois, Frame, Roi};
use std::sync::Arc;
use tracing::warn;

/// Trait for per-frame region detectors
pub trait RegionDetector: Send + Sync {
    /// Short name used in logs and detection statistics
    fn name(&self) -> &'static str;

    /// Forehead ROI for this frame, or `None` when no face was found
    fn detect(&self, frame: &Frame) -> Option<Roi>;

    /// Every region this detector can place. Forehead-only by default.
    fn detect_regions(&self, frame: &Frame) -> Option<FaceRois> {
        self.detect(frame).map(FaceRois::forehead_only)
    }
}

/// Face bounding box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FaceBox {
    /// Sub-rectangle of the box, clipped to the frame
    pub fn region(&self, fraction: &BoxFraction, frame: &Frame, confidence: f64) -> Option<Roi> {
        let x0 = self.x + self.width * fraction.left;
        let x1 = self.x + self.width * fraction.right;
        let y0 = self.y + self.height * fraction.top;
        let y1 = self.y + self.height * fraction.bottom;
        rect_to_roi(x0, y0, x1, y1, frame, confidence)
    }

    /// Forehead plus, when enabled, both cheeks. `None` if the forehead
    /// falls outside the frame.
    pub fn regions(&self, layout: &RegionLayout, frame: &Frame, confidence: f64) -> Option<FaceRois> {
        let forehead = self.region(&layout.forehead, frame, confidence)?;
        if !layout.cheeks {
            return Some(FaceRois::forehead_only(forehead));
        }
        Some(FaceRois {
            forehead,
            left_cheek: self.region(&layout.left_cheek, frame, confidence),
            right_cheek: self.region(&layout.right_cheek, frame, confidence),
        })
    }
}

/// Round a floating rectangle to an ROI inside the frame
pub(crate) fn rect_to_roi(
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    frame: &Frame,
    confidence: f64,
) -> Option<Roi> {
    if !(x1 > x0 && y1 > y0) || !x0.is_finite() || !y0.is_finite() {
        return None;
    }
    let x = x0.max(0.0).round() as u32;
    let y = y0.max(0.0).round() as u32;
    let right = x1.max(0.0).round() as u32;
    let bottom = y1.max(0.0).round() as u32;
    if right <= x || bottom <= y {
        return None;
    }
    Roi {
        x,
        y,
        width: right - x,
        height: bottom - y,
        confidence: confidence.clamp(0.0, 1.0),
        timestamp_ms: frame.timestamp_ms,
    }
    .clip(frame.width, frame.height)
}

/// Ordered list of detectors; the first `Some` wins
pub struct DetectorChain {
    detectors: Vec<Box<dyn RegionDetector>>,
}

impl DetectorChain {
    pub fn new(detectors: Vec<Box<dyn RegionDetector>>) -> Self {
        Self { detectors }
    }

    /// Build the chain for a configured strategy.
    ///
    /// The landmark strategy needs a model; without one it degrades to the
    /// cascade alone. Fails when a configured Haar cascade cannot be loaded.
    pub fn from_config(
        config: &DetectionConfig,
        model: Option<Arc<dyn LandmarkModel>>,
    ) -> Result<Self, ComputeError> {
        let cascade = cascade_detector(config)?;
        let detectors: Vec<Box<dyn RegionDetector>> = match (config.strategy, model) {
            (DetectionStrategy::Landmark, Some(model)) => vec![
                Box::new(
                    LandmarkDetector::new(model, config.min_landmark_confidence)
                        .with_cheeks(config.regions.cheeks),
                ),
                cascade,
            ],
            (DetectionStrategy::Landmark, None) => {
                warn!("Landmark strategy requested without a landmark model, using cascade only");
                vec![cascade]
            }
            (DetectionStrategy::Cascade, _) => vec![cascade],
        };
        Ok(Self { detectors })
    }

    /// Run detectors in order; returns the forehead ROI and the name of the detector that found it
    pub fn detect(&self, frame: &Frame) -> Option<(Roi, &'static str)> {
        self.detect_regions(frame)
            .map(|(rois, name)| (rois.forehead, name))
    }

    /// Like [`detect`](Self::detect), with every region the winning detector placed
    pub fn detect_regions(&self, frame: &Frame) -> Option<(FaceRois, &'static str)> {
        self.detectors
            .iter()
            .find_map(|d| d.detect_regions(frame).map(|rois| (rois, d.name())))
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }
}

/// Haar cascade when built with OpenCV and a cascade file is found,
/// otherwise the skin-colour cascade
#[cfg(feature = "opencv")]
fn cascade_detector(config: &DetectionConfig) -> Result<Box<dyn RegionDetector>, ComputeError> {
    let path = config
        .haar
        .model_path
        .clone()
        .or_else(HaarCascadeDetector::locate);
    match path {
        Some(path) => Ok(Box::new(HaarCascadeDetector::load(
            &path,
            config.haar.clone(),
            config.regions,
        )?)),
        None => {
            warn!("No Haar cascade file found, using the skin-colour cascade");
            Ok(Box::new(SkinCascadeDetector::new(
                config.cascade.clone(),
                config.regions,
            )))
        }
    }
}

#[cfg(not(feature = "opencv"))]
fn cascade_detector(config: &DetectionConfig) -> Result<Box<dyn RegionDetector>, ComputeError> {
    if let Some(path) = &config.haar.model_path {
        return Err(ComputeError::DetectorInit(format!(
            "Haar cascade {} configured but this build has no OpenCV support",
            path.display()
        )));
    }
    Ok(Box::new(SkinCascadeDetector::new(
        config.cascade.clone(),
        config.regions,
    )))
}
