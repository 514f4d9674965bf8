//! Core types for the rPPG Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: frames and regions of interest, raw and conditioned signals,
//! vitals, and the risk assessment.

use crate::error::ComputeError;
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A decoded RGB8 video frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp (ms from stream start)
    pub timestamp_ms: f64,
    image: RgbImage,
}

impl Frame {
    /// Create a frame from interleaved RGB bytes, validating the buffer length
    pub fn new(width: u32, height: u32, timestamp_ms: f64, data: Vec<u8>) -> Result<Self, ComputeError> {
        if width == 0 || height == 0 {
            return Err(ComputeError::Decode(format!(
                "invalid frame dimensions {width}x{height}"
            )));
        }
        let len = data.len();
        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| {
            ComputeError::Decode(format!(
                "frame buffer has {len} bytes, expected {} for {width}x{height} RGB",
                width as usize * height as usize * 3
            ))
        })?;
        Self::from_image(image, timestamp_ms)
    }

    /// Wrap an already decoded image
    pub fn from_image(image: RgbImage, timestamp_ms: f64) -> Result<Self, ComputeError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ComputeError::Decode(format!(
                "invalid frame dimensions {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            timestamp_ms,
            image,
        })
    }

    /// Convert any decoded image (grey, RGBA, 16-bit) to an RGB8 frame
    pub fn from_dynamic_image(image: &DynamicImage, timestamp_ms: f64) -> Result<Self, ComputeError> {
        Self::from_image(image.to_rgb8(), timestamp_ms)
    }

    /// Decode a still image file (PNG, JPEG) into a frame
    pub fn open(path: &Path, timestamp_ms: f64) -> Result<Self, ComputeError> {
        let image = image::open(path)
            .map_err(|e| ComputeError::Decode(format!("{}: {e}", path.display())))?;
        Self::from_dynamic_image(&image, timestamp_ms)
    }

    /// RGB value at (x, y). Caller guarantees bounds.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.image.get_pixel(x, y).0
    }

    /// Raw interleaved RGB bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

/// Skin region sampled for the pulse signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceRegion {
    Forehead,
    LeftCheek,
    RightCheek,
}

impl FaceRegion {
    pub const ALL: [FaceRegion; 3] = [
        FaceRegion::Forehead,
        FaceRegion::LeftCheek,
        FaceRegion::RightCheek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FaceRegion::Forehead => "forehead",
            FaceRegion::LeftCheek => "left_cheek",
            FaceRegion::RightCheek => "right_cheek",
        }
    }
}

/// Region of interest for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detection confidence (0-1)
    pub confidence: f64,
    /// Timestamp of the frame this ROI was found in (ms)
    pub timestamp_ms: f64,
}

impl Roi {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersect with frame bounds; `None` if nothing remains
    pub fn clip(&self, frame_width: u32, frame_height: u32) -> Option<Roi> {
        let x0 = self.x.min(frame_width);
        let y0 = self.y.min(frame_height);
        let x1 = self.x.saturating_add(self.width).min(frame_width);
        let y1 = self.y.saturating_add(self.height).min(frame_height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Roi {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
            ..*self
        })
    }
}

/// All regions found on one frame. The forehead is always present; cheeks
/// are absent when the detector cannot place them or they fall off the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRois {
    pub forehead: Roi,
    pub left_cheek: Option<Roi>,
    pub right_cheek: Option<Roi>,
}

impl FaceRois {
    pub fn forehead_only(forehead: Roi) -> Self {
        Self {
            forehead,
            left_cheek: None,
            right_cheek: None,
        }
    }

    pub fn get(&self, region: FaceRegion) -> Option<Roi> {
        match region {
            FaceRegion::Forehead => Some(self.forehead),
            FaceRegion::LeftCheek => self.left_cheek,
            FaceRegion::RightCheek => self.right_cheek,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FaceRegion, Roi)> + '_ {
        FaceRegion::ALL
            .into_iter()
            .filter_map(|region| self.get(region).map(|roi| (region, roi)))
    }
}

/// Color channel combination used as the pulse signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalChannel {
    /// Plain green channel
    #[default]
    Green,
    /// Chrominance combination 3G - 2R of mean-normalized channels
    Chrom,
    /// Plane-orthogonal-to-skin projection over short sliding windows
    Pos,
}

/// Mean RGB intensities of one region over time. Frames where the region
/// was not sampled hold `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorTrace {
    pub region: FaceRegion,
    pub red: Vec<Option<f64>>,
    pub green: Vec<Option<f64>>,
    pub blue: Vec<Option<f64>>,
}

impl ColorTrace {
    pub fn new(region: FaceRegion) -> Self {
        Self {
            region,
            red: Vec::new(),
            green: Vec::new(),
            blue: Vec::new(),
        }
    }

    pub fn push(&mut self, rgb: Option<[f64; 3]>) {
        self.red.push(rgb.map(|c| c[0]));
        self.green.push(rgb.map(|c| c[1]));
        self.blue.push(rgb.map(|c| c[2]));
    }

    pub fn len(&self) -> usize {
        self.green.len()
    }

    pub fn is_empty(&self) -> bool {
        self.green.is_empty()
    }

    /// Frames where this region was sampled
    pub fn valid_count(&self) -> usize {
        self.green.iter().filter(|v| v.is_some()).count()
    }
}

/// Per-region colour signals as extracted from the ROI stream.
///
/// Every input frame has a slot in every trace; failed detections are `None`
/// so sample index stays aligned with time. The forehead trace comes first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSignal {
    pub traces: Vec<ColorTrace>,
    /// Sampling rate (frames per second)
    pub fps: f64,
    /// Per-frame detection success
    pub detected: Vec<bool>,
}

impl RawSignal {
    /// Signal with a single forehead trace; detection follows the green samples
    pub fn from_trace(trace: ColorTrace, fps: f64) -> Self {
        let detected = trace.green.iter().map(|v| v.is_some()).collect();
        Self {
            traces: vec![trace],
            fps,
            detected,
        }
    }

    pub fn len(&self) -> usize {
        self.detected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detected.is_empty()
    }

    pub fn trace(&self, region: FaceRegion) -> Option<&ColorTrace> {
        self.traces.iter().find(|t| t.region == region)
    }

    /// Forehead green channel
    pub fn green(&self) -> &[Option<f64>] {
        self.trace(FaceRegion::Forehead)
            .map(|t| t.green.as_slice())
            .unwrap_or(&[])
    }

    /// Forehead red channel
    pub fn red(&self) -> &[Option<f64>] {
        self.trace(FaceRegion::Forehead)
            .map(|t| t.red.as_slice())
            .unwrap_or(&[])
    }

    /// Fraction of frames with a successful detection
    pub fn detection_ratio(&self) -> f64 {
        if self.detected.is_empty() {
            return 0.0;
        }
        self.detected.iter().filter(|d| **d).count() as f64 / self.detected.len() as f64
    }
}

/// Aggregate detection statistics for one extraction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionStats {
    pub total_frames: usize,
    pub detected_frames: usize,
    /// detected / total (0-1)
    pub detection_ratio: f64,
    /// Effective frame rate used as sampling rate
    pub fps: f64,
    /// Mean confidence over successful detections
    pub mean_confidence: f64,
    /// Successful detections per detector name
    pub detector_hits: HashMap<String, usize>,
}

/// Signal quality metrics
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalQuality {
    /// In-band vs out-of-band power ratio (dB)
    pub snr_db: f64,
    /// Detection success ratio inherited from the raw signal
    pub detection_ratio: f64,
}

/// Contribution of one region to the fused pulse signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionWeight {
    pub region: FaceRegion,
    /// Dominant in-band peak power over total in-band power
    pub quality: f64,
    /// Normalized fusion weight; weights sum to 1
    pub weight: f64,
}

/// Preprocessed pulse signal: zero mean, unit variance, band-limited
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionedSignal {
    pub samples: Vec<f64>,
    pub fps: f64,
    /// Pass band (Hz) the signal was limited to
    pub band_hz: (f64, f64),
    pub quality: SignalQuality,
    /// Regions fused into `samples`
    pub regions: Vec<RegionWeight>,
    /// Samples at either end still carrying the filter transient
    pub edge_samples: usize,
}

impl ConditionedSignal {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_sec(&self) -> f64 {
        if self.fps > 0.0 {
            self.samples.len() as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Heart-rate confidence label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        }
    }
}

/// Spectral heart-rate estimate
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartRate {
    pub bpm: f64,
    pub frequency_hz: f64,
    /// Peak power / band-mean power
    pub peak_sharpness: f64,
    pub confidence: Confidence,
}

/// Frequency-domain heart-rate variability (band powers in ms^2).
///
/// Short recordings cannot resolve the very-low-frequency band; values are
/// indicative only below five minutes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrequencyHrv {
    pub vlf_power: f64,
    pub lf_power: f64,
    pub hf_power: f64,
    pub total_power: f64,
    /// LF / HF, 0 when HF carries no power
    pub lf_hf_ratio: f64,
    /// LF and HF in normalized units (percent of LF + HF)
    pub lf_nu: f64,
    pub hf_nu: f64,
}

/// Heart-rate variability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrvMetrics {
    pub rr_intervals_ms: Vec<f64>,
    pub sdnn_ms: f64,
    pub rmssd_ms: f64,
    /// Percentage (0-100) of successive RR differences above 50 ms
    pub pnn50_pct: f64,
    pub mean_rr_ms: f64,
    pub peak_count: usize,
    /// Absent when the RR series is too short
    pub frequency: Option<FrequencyHrv>,
}

/// Validation status attached to experimental estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateStatus {
    Unvalidated,
}

/// Experimental blood-pressure estimate. Never presented without its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloodPressureEstimate {
    pub systolic: f64,
    pub diastolic: f64,
    pub status: EstimateStatus,
    pub note: String,
}

/// SpO2 support status. Visible-light video lacks the second wavelength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spo2Support {
    #[default]
    Unsupported,
}

impl Spo2Support {
    pub fn reason(&self) -> &'static str {
        match self {
            Spo2Support::Unsupported => {
                "Not estimated: visible-light video lacks the infrared wavelength SpO2 requires"
            }
        }
    }
}

/// Quality flag indicating degraded but non-fatal conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    LowConfidence,
    InsufficientPeaks,
    DetectionGaps,
    LowSnr,
    BloodPressureOmitted,
}

/// Vitals derived from one analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vitals {
    pub heart_rate: HeartRate,
    /// Absent when too few peaks were found
    pub hrv: Option<HrvMetrics>,
    /// Heuristic 0-10 stress level (non-clinical)
    pub stress_level: Option<f64>,
    pub blood_pressure: Option<BloodPressureEstimate>,
    pub spo2: Spo2Support,
    pub quality_flags: Vec<QualityFlag>,
}

impl Vitals {
    pub fn heart_rate_bpm(&self) -> f64 {
        self.heart_rate.bpm
    }

    pub fn sdnn_ms(&self) -> Option<f64> {
        self.hrv.as_ref().map(|h| h.sdnn_ms)
    }

    pub fn pnn50_pct(&self) -> Option<f64> {
        self.hrv.as_ref().map(|h| h.pnn50_pct)
    }

    pub fn rr_intervals_ms(&self) -> &[f64] {
        self.hrv
            .as_ref()
            .map(|h| h.rr_intervals_ms.as_slice())
            .unwrap_or(&[])
    }
}

/// Risk category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::High => "HIGH",
        }
    }
}

/// Heuristic risk assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub alerts: Vec<String>,
    pub recommendation: String,
}

/// Complete analysis result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub vitals: Vitals,
    pub signal: ConditionedSignal,
    pub risk: RiskAssessment,
    pub detection: DetectionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_short_buffer() {
        let result = Frame::new(4, 4, 0.0, vec![0; 47]);
        assert!(matches!(result, Err(ComputeError::Decode(_))));
    }

    #[test]
    fn test_frame_image_conversion() {
        let data: Vec<u8> = (0..2 * 3 * 3).map(|v| v as u8).collect();
        let frame = Frame::new(2, 3, 10.0, data.clone()).unwrap();
        assert_eq!(frame.pixel(1, 2), [15, 16, 17]);
        assert_eq!(frame.image().dimensions(), (2, 3));

        let grey = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(4, 2, image::Luma([90])));
        let converted = Frame::from_dynamic_image(&grey, 0.0).unwrap();
        assert_eq!((converted.width, converted.height), (4, 2));
        assert_eq!(converted.pixel(3, 1), [90, 90, 90]);

        assert_eq!(frame.into_image().into_raw(), data);
    }

    #[test]
    fn test_face_rois_iterate_present_regions() {
        let roi = Roi {
            x: 0,
            y: 0,
            width: 4,
            height: 4,
            confidence: 1.0,
            timestamp_ms: 0.0,
        };
        let rois = FaceRois {
            right_cheek: Some(Roi { x: 8, ..roi }),
            ..FaceRois::forehead_only(roi)
        };
        let regions: Vec<FaceRegion> = rois.iter().map(|(r, _)| r).collect();
        assert_eq!(regions, vec![FaceRegion::Forehead, FaceRegion::RightCheek]);
        assert_eq!(rois.get(FaceRegion::RightCheek).map(|r| r.x), Some(8));
    }

    #[test]
    fn test_raw_signal_forehead_channels() {
        let mut trace = ColorTrace::new(FaceRegion::Forehead);
        trace.push(Some([120.0, 90.0, 70.0]));
        trace.push(None);
        let raw = RawSignal::from_trace(trace, 30.0);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.green(), &[Some(90.0), None]);
        assert_eq!(raw.red()[0], Some(120.0));
        assert_eq!(raw.detection_ratio(), 0.5);
        assert!(raw.trace(FaceRegion::LeftCheek).is_none());
    }

    #[test]
    fn test_roi_clip() {
        let roi = Roi {
            x: 90,
            y: 10,
            width: 20,
            height: 20,
            confidence: 0.9,
            timestamp_ms: 0.0,
        };
        let clipped = roi.clip(100, 100).unwrap();
        assert_eq!(clipped.width, 10);
        assert_eq!(clipped.height, 20);

        let outside = Roi { x: 120, ..roi };
        assert!(outside.clip(100, 100).is_none());
    }

    #[test]
    fn test_enum_serialization() {
        assert_eq!(serde_json::to_string(&RiskLevel::Moderate).unwrap(), "\"MODERATE\"");
        assert_eq!(serde_json::to_string(&Confidence::High).unwrap(), "\"HIGH\"");
        assert_eq!(serde_json::to_string(&Spo2Support::Unsupported).unwrap(), "\"unsupported\"");
        assert_eq!(serde_json::to_string(&FaceRegion::LeftCheek).unwrap(), "\"left_cheek\"");
        assert_eq!(serde_json::to_string(&SignalChannel::Pos).unwrap(), "\"pos\"");
    }
}
