//! OpenCV Haar cascade face detector
//!
//! Frames are converted to histogram-equalized greyscale and passed to
//! `CascadeClassifier::detect_multi_scale`; the largest face wins. The
//! classifier needs a cascade XML file such as
//! `haarcascade_frontalface_default.xml`.

use super::{FaceBox, RegionDetector};
use crate::config::{HaarConfig, RegionLayout};
use crate::error::ComputeError;
use crate::types::{FaceRois, Frame, Roi};
use opencv::core::{Mat, Rect, Scalar, Size, Vector, CV_8UC1};
use opencv::imgproc;
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";

/// Directories searched for [`CASCADE_FILE`] when no path is configured
const SEARCH_DIRS: &[&str] = &[
    ".",
    "/usr/share/opencv4/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/opt/homebrew/share/opencv4/haarcascades",
];

/// Environment variable naming a cascade file
pub const CASCADE_PATH_ENV: &str = "HAARCASCADE_PATH";

/// `detect_multi_scale` reports no score; accepted faces get this confidence
const HAAR_CONFIDENCE: f64 = 0.9;

/// Haar cascade detector
pub struct HaarCascadeDetector {
    classifier: Mutex<CascadeClassifier>,
    config: HaarConfig,
    layout: RegionLayout,
}

impl HaarCascadeDetector {
    /// Load a cascade file
    pub fn load(path: &Path, config: HaarConfig, layout: RegionLayout) -> Result<Self, ComputeError> {
        let init_error = |reason: String| ComputeError::DetectorInit(format!("{}: {reason}", path.display()));
        if !path.is_file() {
            return Err(init_error("cascade file not found".to_string()));
        }
        let name = path
            .to_str()
            .ok_or_else(|| init_error("path is not valid UTF-8".to_string()))?;
        let classifier = CascadeClassifier::new(name).map_err(|e| init_error(e.to_string()))?;
        if classifier.empty().map_err(|e| init_error(e.to_string()))? {
            return Err(init_error("cascade is empty".to_string()));
        }
        info!(path = %path.display(), "Loaded Haar cascade");
        Ok(Self {
            classifier: Mutex::new(classifier),
            config,
            layout,
        })
    }

    /// Cascade file from `HAARCASCADE_PATH` or a standard install location
    pub fn locate() -> Option<PathBuf> {
        std::env::var_os(CASCADE_PATH_ENV)
            .map(PathBuf::from)
            .filter(|p| p.is_file())
            .or_else(|| {
                SEARCH_DIRS
                    .iter()
                    .map(|dir| Path::new(dir).join(CASCADE_FILE))
                    .find(|p| p.is_file())
            })
    }

    /// Largest face in source-frame pixels
    pub fn detect_face(&self, frame: &Frame) -> Result<Option<FaceBox>, opencv::Error> {
        let gray = equalized_gray(frame)?;
        let mut faces = Vector::<Rect>::new();
        let min = self.config.min_face_size as i32;
        {
            let mut classifier = match self.classifier.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            classifier.detect_multi_scale(
                &gray,
                &mut faces,
                self.config.scale_factor,
                self.config.min_neighbors as i32,
                0,
                Size::new(min, min),
                Size::new(0, 0),
            )?;
        }
        Ok(faces
            .iter()
            .max_by_key(|r| r.width * r.height)
            .map(|r| FaceBox {
                x: r.x as f64,
                y: r.y as f64,
                width: r.width as f64,
                height: r.height as f64,
            }))
    }
}

/// Greyscale conversion through the image crate, copied into an 8-bit Mat
/// and histogram-equalized
fn equalized_gray(frame: &Frame) -> Result<Mat, opencv::Error> {
    let luma = image::imageops::grayscale(frame.image());
    let mut gray = Mat::new_rows_cols_with_default(
        frame.height as i32,
        frame.width as i32,
        CV_8UC1,
        Scalar::all(0.0),
    )?;
    gray.data_bytes_mut()?.copy_from_slice(luma.as_raw());

    let mut equalized = Mat::default();
    imgproc::equalize_hist(&gray, &mut equalized)?;
    Ok(equalized)
}

impl RegionDetector for HaarCascadeDetector {
    fn name(&self) -> &'static str {
        "haar_cascade"
    }

    fn detect(&self, frame: &Frame) -> Option<Roi> {
        self.detect_regions(frame).map(|rois| rois.forehead)
    }

    fn detect_regions(&self, frame: &Frame) -> Option<FaceRois> {
        match self.detect_face(frame) {
            Ok(face) => face?.regions(&self.layout, frame, HAAR_CONFIDENCE),
            Err(err) => {
                debug!(error = %err, "Haar cascade failed on frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_cascade_file() {
        let err = HaarCascadeDetector::load(
            Path::new("/nonexistent/haarcascade.xml"),
            HaarConfig::default(),
            RegionLayout::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), "DetectorInitError");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_runs_on_synthetic_frame_when_cascade_installed() {
        use crate::source::FrameSource;
        use crate::synthetic::SyntheticFaceVideo;

        let Some(path) = HaarCascadeDetector::locate() else {
            return;
        };
        let detector =
            HaarCascadeDetector::load(&path, HaarConfig::default(), RegionLayout::default()).unwrap();
        let mut video = SyntheticFaceVideo::new(30.0, 1.0, 75.0, 3);
        let frame = video.next_frame().unwrap().unwrap();
        // A flat-shaded face may or may not trigger a trained cascade; it must not error
        assert!(detector.detect_face(&frame).is_ok());
    }
}
