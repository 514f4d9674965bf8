//! Analysis configuration
//!
//! Every tunable of the pipeline lives here: detection strategy, band edges,
//! spectral window, peak detection, heuristic tables and risk weights. Each
//! section implements `Default`, and every section is `#[serde(default)]`, so a
//! TOML file only needs the keys it changes.
//!
//! The stress and blood-pressure tables are hand-chosen defaults with no
//! empirical calibration behind them. The two HRV-derived risk weights sum to
//! less than `moderate_score`, so low variability alone never raises the
//! category above LOW.

use crate::error::ComputeError;
use crate::types::SignalChannel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Face detection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// Landmark model first, cascade as fallback
    Landmark,
    /// Classical cascade only
    #[default]
    Cascade,
}

/// Complete configuration for one analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub detection: DetectionConfig,
    pub signal: SignalConfig,
    pub spectrum: SpectrumConfig,
    pub peaks: PeakConfig,
    pub hrv: HrvConfig,
    pub confidence: ConfidenceConfig,
    pub heuristics: HeuristicsConfig,
    pub risk: RiskConfig,
}

/// Sub-rectangle of the face box, as fractions of its width and height
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxFraction {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl BoxFraction {
    pub const fn new(left: f64, right: f64, top: f64, bottom: f64) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    fn check(&self, name: &str, errors: &mut Vec<String>) {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.left) || !unit.contains(&self.right) || self.left >= self.right {
            errors.push(format!("{name}: need 0 <= left < right <= 1"));
        }
        if !unit.contains(&self.top) || !unit.contains(&self.bottom) || self.top >= self.bottom {
            errors.push(format!("{name}: need 0 <= top < bottom <= 1"));
        }
    }
}

impl Default for BoxFraction {
    fn default() -> Self {
        Self::new(0.25, 0.75, 0.10, 0.28)
    }
}

/// Where the sampled skin regions sit inside a detected face box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionLayout {
    /// Sample both cheeks besides the forehead
    pub cheeks: bool,
    pub forehead: BoxFraction,
    pub left_cheek: BoxFraction,
    pub right_cheek: BoxFraction,
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self {
            cheeks: true,
            forehead: BoxFraction::default(),
            left_cheek: BoxFraction::new(0.10, 0.40, 0.50, 0.75),
            right_cheek: BoxFraction::new(0.60, 0.90, 0.50, 0.75),
        }
    }
}

/// Skin-colour sliding-window cascade parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Smallest face window width (px)
    pub min_face_size: u32,
    /// Window growth per scale step
    pub scale_factor: f64,
    /// Window stride as a fraction of window width
    pub step_fraction: f64,
    /// Overlapping hits required to accept a face
    pub min_neighbors: usize,
    /// Stage 1: minimum skin-pixel fraction in the window
    pub min_skin_ratio: f64,
    /// Stage 2: minimum luminance standard deviation relative to the window mean
    pub min_contrast: f64,
    /// Stage 3: eye band must be darker than forehead and cheeks by this
    /// fraction of the window mean luminance
    pub min_eye_contrast: f64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            min_face_size: 40,
            scale_factor: 1.25,
            step_fraction: 0.125,
            min_neighbors: 2,
            min_skin_ratio: 0.55,
            min_contrast: 0.04,
            min_eye_contrast: 0.05,
        }
    }
}

/// OpenCV Haar cascade parameters (used with the `opencv` feature)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HaarConfig {
    /// Cascade XML file; searched in standard locations when unset
    pub model_path: Option<PathBuf>,
    pub scale_factor: f64,
    pub min_neighbors: u32,
    /// Smallest face side (px)
    pub min_face_size: u32,
}

impl Default for HaarConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            scale_factor: 1.05,
            min_neighbors: 3,
            min_face_size: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub strategy: DetectionStrategy,
    /// Minimum fraction of frames with a detected face
    pub min_detection_ratio: f64,
    /// ROI median smoothing window (frames)
    pub smoothing_window: usize,
    pub min_landmark_confidence: f64,
    pub regions: RegionLayout,
    pub cascade: CascadeConfig,
    pub haar: HaarConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            strategy: DetectionStrategy::Cascade,
            min_detection_ratio: 0.6,
            smoothing_window: 5,
            min_landmark_confidence: 0.5,
            regions: RegionLayout::default(),
            cascade: CascadeConfig::default(),
            haar: HaarConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub channel: SignalChannel,
    /// Pass band lower edge (Hz), 45 BPM
    pub band_low_hz: f64,
    /// Pass band upper edge (Hz), 180 BPM
    pub band_high_hz: f64,
    /// Butterworth order
    pub filter_order: usize,
    /// Polynomial order removed by detrending
    pub detrend_order: usize,
    /// Shortest analysable recording (s)
    pub min_duration_sec: f64,
    /// POS projection window (s)
    pub pos_window_sec: f64,
    /// Peaks are ignored near either end until the filter transient has
    /// decayed to this fraction of its initial amplitude
    pub settle_tolerance: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            channel: SignalChannel::Green,
            band_low_hz: 0.75,
            band_high_hz: 3.0,
            filter_order: 3,
            detrend_order: 1,
            min_duration_sec: 5.0,
            pos_window_sec: 1.6,
            settle_tolerance: 0.02,
        }
    }
}

/// Welch PSD parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Segment length (s)
    pub segment_sec: f64,
    /// Segment overlap fraction
    pub overlap: f64,
    /// Minimum FFT length (segments are zero-padded up to this)
    pub nfft_min: usize,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            segment_sec: 10.0,
            overlap: 0.5,
            nfft_min: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Minimum peak distance as a multiple of the sampling rate
    pub min_distance_factor: f64,
    /// Minimum prominence as a multiple of the signal standard deviation
    pub prominence_factor: f64,
    /// Fewer peaks than this and HRV is omitted
    pub min_peaks: usize,
    pub rr_min_ms: f64,
    pub rr_max_ms: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            min_distance_factor: 0.4,
            prominence_factor: 0.5,
            min_peaks: 5,
            rr_min_ms: 300.0,
            rr_max_ms: 2000.0,
        }
    }
}

/// Frequency-domain HRV on the resampled RR series
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HrvConfig {
    /// Even resampling rate of the RR tachogram (Hz)
    pub resample_hz: f64,
    /// Shortest RR series (s) that gets frequency-domain metrics
    pub min_span_sec: f64,
    /// Welch segment length (samples of the resampled series)
    pub segment_len: usize,
    pub vlf_band_hz: (f64, f64),
    pub lf_band_hz: (f64, f64),
    pub hf_band_hz: (f64, f64),
}

impl Default for HrvConfig {
    fn default() -> Self {
        Self {
            resample_hz: 4.0,
            min_span_sec: 10.0,
            segment_len: 256,
            vlf_band_hz: (0.003, 0.04),
            lf_band_hz: (0.04, 0.15),
            hf_band_hz: (0.15, 0.40),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub high_sharpness: f64,
    pub medium_sharpness: f64,
    pub high_detection_ratio: f64,
    pub medium_detection_ratio: f64,
    /// SNR below this raises a quality flag
    pub low_snr_db: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            high_sharpness: 4.0,
            medium_sharpness: 2.0,
            high_detection_ratio: 0.8,
            medium_detection_ratio: 0.5,
            low_snr_db: 3.0,
        }
    }
}

/// pNN50 lower bound (%) -> stress level (0-10)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StressBand {
    pub min_pnn50: f64,
    pub level: f64,
}

/// Heart-rate lower bound (BPM) -> systolic estimate (mmHg)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BpBand {
    pub min_bpm: f64,
    pub systolic: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
    /// diastolic = systolic - offset
    pub bp_diastolic_offset: f64,
    pub stress_bands: Vec<StressBand>,
    pub bp_bands: Vec<BpBand>,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        let stress = |min_pnn50, level| StressBand { min_pnn50, level };
        let bp = |min_bpm, systolic| BpBand { min_bpm, systolic };
        Self {
            bp_diastolic_offset: 40.0,
            stress_bands: vec![
                stress(30.0, 2.0),
                stress(20.0, 3.5),
                stress(10.0, 5.0),
                stress(5.0, 6.5),
                stress(3.0, 8.0),
                stress(0.0, 9.0),
            ],
            bp_bands: vec![bp(100.0, 135.0), bp(80.0, 126.0), bp(60.0, 118.0), bp(0.0, 110.0)],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub hr_low_bpm: f64,
    pub hr_low_weight: u32,
    pub hr_high_bpm: f64,
    pub hr_high_weight: u32,
    pub hr_severe_low_bpm: f64,
    pub hr_severe_high_bpm: f64,
    /// Added on top of the low/high weight
    pub hr_severe_weight: u32,
    pub sdnn_low_ms: f64,
    pub sdnn_low_weight: u32,
    pub systolic_low_mmhg: f64,
    pub bp_low_weight: u32,
    pub stress_high: f64,
    pub stress_weight: u32,
    pub moderate_score: u32,
    pub high_score: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            hr_low_bpm: 50.0,
            hr_low_weight: 30,
            hr_high_bpm: 100.0,
            hr_high_weight: 20,
            hr_severe_low_bpm: 40.0,
            hr_severe_high_bpm: 130.0,
            hr_severe_weight: 20,
            sdnn_low_ms: 20.0,
            sdnn_low_weight: 10,
            systolic_low_mmhg: 90.0,
            bp_low_weight: 25,
            stress_high: 7.0,
            stress_weight: 10,
            moderate_score: 25,
            high_score: 50,
        }
    }
}

impl AnalysisConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(contents: &str) -> Result<Self, ComputeError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ComputeError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), strategy = ?config.detection.strategy, "Loaded analysis config");
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ComputeError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ComputeError> {
        std::fs::write(path, self.to_toml()?)?;
        info!(path = %path.display(), "Analysis config saved");
        Ok(())
    }

    /// Check ranges and orderings; all problems are reported together
    pub fn validate(&self) -> Result<(), ComputeError> {
        let mut errors: Vec<String> = Vec::new();

        let d = &self.detection;
        check_unit(d.min_detection_ratio, "detection.min_detection_ratio", &mut errors);
        check_unit(d.min_landmark_confidence, "detection.min_landmark_confidence", &mut errors);
        if d.smoothing_window == 0 {
            errors.push("detection.smoothing_window must be at least 1".to_string());
        }
        let layout = &d.regions;
        layout.forehead.check("detection.regions.forehead", &mut errors);
        layout.left_cheek.check("detection.regions.left_cheek", &mut errors);
        layout.right_cheek.check("detection.regions.right_cheek", &mut errors);
        let c = &d.cascade;
        if c.min_face_size < 8 {
            errors.push("detection.cascade.min_face_size must be at least 8".to_string());
        }
        if c.scale_factor <= 1.0 {
            errors.push("detection.cascade.scale_factor must be > 1".to_string());
        }
        if c.step_fraction <= 0.0 || c.step_fraction > 1.0 {
            errors.push("detection.cascade.step_fraction must be in (0, 1]".to_string());
        }
        if c.min_neighbors == 0 {
            errors.push("detection.cascade.min_neighbors must be at least 1".to_string());
        }
        check_unit(c.min_skin_ratio, "detection.cascade.min_skin_ratio", &mut errors);
        check_unit(c.min_contrast, "detection.cascade.min_contrast", &mut errors);
        check_unit(c.min_eye_contrast, "detection.cascade.min_eye_contrast", &mut errors);
        let haar = &d.haar;
        if haar.scale_factor <= 1.0 {
            errors.push("detection.haar.scale_factor must be > 1".to_string());
        }
        if haar.min_face_size < 8 {
            errors.push("detection.haar.min_face_size must be at least 8".to_string());
        }

        let s = &self.signal;
        if s.band_low_hz <= 0.0 || s.band_low_hz >= s.band_high_hz {
            errors.push(format!(
                "signal: need 0 < band_low_hz < band_high_hz (got {} .. {})",
                s.band_low_hz, s.band_high_hz
            ));
        }
        if !(1..=8).contains(&s.filter_order) {
            errors.push("signal.filter_order must be between 1 and 8".to_string());
        }
        if s.detrend_order > 3 {
            errors.push("signal.detrend_order must be at most 3".to_string());
        }
        if s.min_duration_sec <= 0.0 {
            errors.push("signal.min_duration_sec must be positive".to_string());
        }
        if s.pos_window_sec <= 0.0 {
            errors.push("signal.pos_window_sec must be positive".to_string());
        }
        if !(s.settle_tolerance > 0.0 && s.settle_tolerance < 1.0) {
            errors.push("signal.settle_tolerance must be in (0, 1)".to_string());
        }

        let sp = &self.spectrum;
        if sp.segment_sec <= 0.0 {
            errors.push("spectrum.segment_sec must be positive".to_string());
        }
        if !(0.0..1.0).contains(&sp.overlap) {
            errors.push("spectrum.overlap must be in [0, 1)".to_string());
        }

        let p = &self.peaks;
        if p.min_distance_factor <= 0.0 {
            errors.push("peaks.min_distance_factor must be positive".to_string());
        }
        if p.prominence_factor < 0.0 {
            errors.push("peaks.prominence_factor must be non-negative".to_string());
        }
        if p.min_peaks < 3 {
            errors.push("peaks.min_peaks must be at least 3".to_string());
        }
        if p.rr_min_ms >= p.rr_max_ms {
            errors.push("peaks: rr_min_ms must be below rr_max_ms".to_string());
        }

        let hrv = &self.hrv;
        if hrv.resample_hz <= 0.0 {
            errors.push("hrv.resample_hz must be positive".to_string());
        }
        if hrv.segment_len < 16 {
            errors.push("hrv.segment_len must be at least 16".to_string());
        }
        for (name, (low, high)) in [
            ("vlf_band_hz", hrv.vlf_band_hz),
            ("lf_band_hz", hrv.lf_band_hz),
            ("hf_band_hz", hrv.hf_band_hz),
        ] {
            if !(low >= 0.0 && low < high) {
                errors.push(format!("hrv.{name}: need 0 <= low < high"));
            }
        }
        if hrv.hf_band_hz.1 > hrv.resample_hz / 2.0 {
            errors.push("hrv.hf_band_hz must lie below half of hrv.resample_hz".to_string());
        }

        let conf = &self.confidence;
        if conf.medium_sharpness > conf.high_sharpness {
            errors.push("confidence: medium_sharpness must not exceed high_sharpness".to_string());
        }
        if conf.medium_detection_ratio > conf.high_detection_ratio {
            errors.push(
                "confidence: medium_detection_ratio must not exceed high_detection_ratio"
                    .to_string(),
            );
        }

        let h = &self.heuristics;
        if h.stress_bands.is_empty() {
            errors.push("heuristics.stress_bands must not be empty".to_string());
        }
        if h.stress_bands.iter().any(|b| !(0.0..=10.0).contains(&b.level)) {
            errors.push("heuristics.stress_bands levels must be within 0-10".to_string());
        }
        if h.bp_bands.is_empty() {
            errors.push("heuristics.bp_bands must not be empty".to_string());
        }

        let r = &self.risk;
        if r.hr_low_bpm >= r.hr_high_bpm {
            errors.push("risk: hr_low_bpm must be below hr_high_bpm".to_string());
        }
        if r.hr_severe_low_bpm > r.hr_low_bpm || r.hr_severe_high_bpm < r.hr_high_bpm {
            errors.push("risk: severe heart-rate limits must lie outside the normal limits".to_string());
        }
        if r.moderate_score > r.high_score {
            errors.push("risk: moderate_score must not exceed high_score".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ComputeError::InvalidConfig(errors.join("; ")))
        }
    }
}

fn check_unit(value: f64, name: &str, errors: &mut Vec<String>) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(format!("{name} must be within 0-1 (got {value})"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnalysisConfig::from_toml_str(
            r#"
[signal]
band_low_hz = 0.7
channel = "chrom"

[risk]
stress_weight = 5

[detection.regions]
cheeks = false
"#,
        )
        .unwrap();

        assert_eq!(config.signal.band_low_hz, 0.7);
        assert_eq!(config.signal.band_high_hz, 3.0);
        assert_eq!(config.signal.channel, SignalChannel::Chrom);
        assert_eq!(config.risk.stress_weight, 5);
        assert_eq!(config.risk.moderate_score, 25);
        assert_eq!(config.peaks.min_peaks, 5);
        assert!(!config.detection.regions.cheeks);
        assert_eq!(config.detection.regions.forehead, BoxFraction::default());
        assert_eq!(config.hrv.lf_band_hz, (0.04, 0.15));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AnalysisConfig::default();
        config.detection.strategy = DetectionStrategy::Landmark;
        config.spectrum.segment_sec = 8.0;
        config.detection.haar.model_path = Some(PathBuf::from("/opt/cascades/frontalface.xml"));

        let text = config.to_toml().unwrap();
        let loaded = AnalysisConfig::from_toml_str(&text).unwrap();

        assert_eq!(loaded.detection.strategy, DetectionStrategy::Landmark);
        assert_eq!(loaded.spectrum.segment_sec, 8.0);
        assert_eq!(loaded.heuristics.stress_bands.len(), 6);
        assert_eq!(
            loaded.detection.haar.model_path.as_deref(),
            Some(Path::new("/opt/cascades/frontalface.xml"))
        );
    }

    #[test]
    fn test_hrv_weights_alone_stay_below_moderate() {
        let risk = RiskConfig::default();
        assert!(risk.sdnn_low_weight + risk.stress_weight < risk.moderate_score);
        assert!(risk.stress_weight < risk.moderate_score);
    }

    #[test]
    fn test_region_and_hrv_validation() {
        let mut config = AnalysisConfig::default();
        config.detection.regions.left_cheek = BoxFraction::new(0.5, 0.2, 0.5, 0.75);
        config.hrv.hf_band_hz = (0.15, 2.5);
        config.signal.settle_tolerance = 1.0;

        match config.validate() {
            Err(ComputeError::InvalidConfig(msg)) => {
                assert!(msg.contains("detection.regions.left_cheek"));
                assert!(msg.contains("hrv.hf_band_hz"));
                assert!(msg.contains("settle_tolerance"));
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = AnalysisConfig::default();
        config.signal.band_low_hz = 4.0;
        config.spectrum.overlap = 1.0;
        config.detection.smoothing_window = 0;

        match config.validate() {
            Err(ComputeError::InvalidConfig(msg)) => {
                assert!(msg.contains("band_low_hz"));
                assert!(msg.contains("overlap"));
                assert!(msg.contains("smoothing_window"));
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_toml() {
        let result = AnalysisConfig::from_toml_str("[signal\nband_low_hz = ");
        assert!(matches!(result, Err(ComputeError::ConfigParse(_))));
    }
}
