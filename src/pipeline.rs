//! Pipeline orchestration
//!
//! This module provides the public API for rPPG Flux. It runs the stages in
//! order: region tracking and signal extraction, conditioning, vitals
//! estimation, risk assessment.

use crate::conditioner::SignalConditioner;
use crate::config::AnalysisConfig;
use crate::encoder::ReportEncoder;
use crate::error::ComputeError;
use crate::extractor::SignalExtractor;
use crate::risk::RiskAssessor;
use crate::source::{FrameSource, RawRgbSource};
use crate::tracker::{DetectorChain, LandmarkModel, SkinCascadeDetector};
use crate::types::Analysis;
use crate::vitals::VitalsEstimator;
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Analyze a frame source end to end.
///
/// # Example
/// ```ignore
/// let mut video = SyntheticFaceVideo::new(30.0, 20.0, 75.0, 1);
/// let analysis = analyze(&mut video, &AnalysisConfig::default())?;
/// println!("{:.0} BPM", analysis.vitals.heart_rate_bpm());
/// ```
pub fn analyze<S: FrameSource + ?Sized>(
    source: &mut S,
    config: &AnalysisConfig,
) -> Result<Analysis, ComputeError> {
    analyze_with_cancel(source, config, &CancellationToken::new())
}

/// Like [`analyze`], stopping with `Cancelled` once `cancel` fires
pub fn analyze_with_cancel<S: FrameSource + ?Sized>(
    source: &mut S,
    config: &AnalysisConfig,
    cancel: &CancellationToken,
) -> Result<Analysis, ComputeError> {
    VitalsProcessor::new(config.clone())?.process_with_cancel(source, cancel)
}

/// Analyze headerless rgb24 video from a reader and return the JSON report.
///
/// # Arguments
/// * `reader` - Raw interleaved RGB8 frames, back to back
/// * `width`, `height` - Frame dimensions in pixels
/// * `fps` - Frame rate of the stream
pub fn raw_rgb_to_report<R: Read>(
    reader: R,
    width: u32,
    height: u32,
    fps: f64,
    config: &AnalysisConfig,
) -> Result<String, ComputeError> {
    let mut source = RawRgbSource::new(reader, width, height, fps)?;
    VitalsProcessor::new(config.clone())?.process_to_json(&mut source)
}

/// Reusable processor holding a validated configuration and the detector chain.
///
/// `Send + Sync`: one processor can serve analyses on several threads.
pub struct VitalsProcessor {
    config: AnalysisConfig,
    chain: DetectorChain,
    encoder: ReportEncoder,
}

impl Default for VitalsProcessor {
    /// Default configuration; a cascade file that fails to load leaves the
    /// skin-colour cascade in its place
    fn default() -> Self {
        let config = AnalysisConfig::default();
        let chain = DetectorChain::from_config(&config.detection, None).unwrap_or_else(|err| {
            warn!(error = %err, "Using the skin-colour cascade");
            DetectorChain::new(vec![Box::new(SkinCascadeDetector::new(
                config.detection.cascade.clone(),
                config.detection.regions,
            ))])
        });
        Self {
            config,
            chain,
            encoder: ReportEncoder::new(),
        }
    }
}

impl VitalsProcessor {
    /// Create a processor; the configuration is validated first
    pub fn new(config: AnalysisConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        let chain = DetectorChain::from_config(&config.detection, None)?;
        Ok(Self {
            config,
            chain,
            encoder: ReportEncoder::new(),
        })
    }

    /// Create a processor whose chain starts with a landmark model
    /// (used when the configured strategy is `landmark`)
    pub fn with_landmark_model(
        config: AnalysisConfig,
        model: Arc<dyn LandmarkModel>,
    ) -> Result<Self, ComputeError> {
        config.validate()?;
        let chain = DetectorChain::from_config(&config.detection, Some(model))?;
        Ok(Self {
            config,
            chain,
            encoder: ReportEncoder::new(),
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn process<S: FrameSource + ?Sized>(&self, source: &mut S) -> Result<Analysis, ComputeError> {
        self.process_with_cancel(source, &CancellationToken::new())
    }

    pub fn process_with_cancel<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Analysis, ComputeError> {
        let started = Instant::now();

        // Stage 1: Track the face regions and extract raw colour traces
        let extractor = SignalExtractor::new(&self.chain, &self.config.detection);
        let (raw, detection) = extractor.extract(source, cancel)?;

        // Stage 2: Condition into a band-limited pulse signal
        let signal = SignalConditioner::condition(&raw, &self.config)?;

        // Stage 3: Estimate vitals
        let vitals = VitalsEstimator::estimate(&signal, &self.config)?;

        // Stage 4: Assess risk
        let risk = RiskAssessor::assess(&vitals, &self.config.risk);

        info!(
            frames = detection.total_frames,
            detection_ratio = detection.detection_ratio,
            bpm = vitals.heart_rate.bpm,
            confidence = vitals.heart_rate.confidence.as_str(),
            risk = risk.risk_level.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis complete"
        );

        Ok(Analysis {
            vitals,
            signal,
            risk,
            detection,
        })
    }

    /// Process and encode the result as a JSON report
    pub fn process_to_json<S: FrameSource + ?Sized>(&self, source: &mut S) -> Result<String, ComputeError> {
        let analysis = self.process(source)?;
        self.encoder.encode_to_json(&analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{SyntheticFaceVideo, SKIN_DARK};
    use crate::types::{FaceRegion, RiskLevel};
    use std::io::Cursor;

    #[test]
    fn test_end_to_end_synthetic_video() {
        let mut video = SyntheticFaceVideo::new(30.0, 20.0, 75.0, 11);
        let analysis = analyze(&mut video, &AnalysisConfig::default()).unwrap();

        let bpm = analysis.vitals.heart_rate_bpm();
        assert!((70.0..=80.0).contains(&bpm), "bpm {bpm}");
        assert!(!analysis.vitals.rr_intervals_ms().is_empty());
        assert_eq!(analysis.risk.risk_level, RiskLevel::Low);

        assert_eq!(analysis.detection.total_frames, 600);
        assert!((analysis.detection.detection_ratio - 0.95).abs() < 1e-9);
        assert_eq!(analysis.signal.len(), 600);

        let regions: Vec<FaceRegion> = analysis.signal.regions.iter().map(|r| r.region).collect();
        assert_eq!(regions, FaceRegion::ALL.to_vec());
    }

    #[test]
    fn test_beat_jitter_sweep() {
        let config = AnalysisConfig::default();
        for jitter_ms in [0.0, 10.0, 20.0, 45.0] {
            let mut video = SyntheticFaceVideo::new(30.0, 20.0, 75.0, 11).with_rhythm(75.0, jitter_ms);
            let analysis = analyze(&mut video, &config).unwrap();

            let bpm = analysis.vitals.heart_rate_bpm();
            assert!((70.0..=80.0).contains(&bpm), "jitter {jitter_ms}: bpm {bpm}");
            assert_eq!(
                analysis.risk.risk_level,
                RiskLevel::Low,
                "jitter {jitter_ms}: {:?}",
                analysis.risk.alerts
            );
            let hrv = analysis.vitals.hrv.as_ref().unwrap();
            assert!(hrv.frequency.is_some(), "jitter {jitter_ms}");
        }
    }

    #[test]
    fn test_steady_rhythm_has_near_zero_sdnn() {
        let mut video = SyntheticFaceVideo::new(30.0, 20.0, 75.0, 11).with_rhythm(75.0, 0.0);
        let analysis = analyze(&mut video, &AnalysisConfig::default()).unwrap();

        let hrv = analysis.vitals.hrv.as_ref().unwrap();
        assert!(hrv.sdnn_ms < 8.0, "sdnn {} from {:?}", hrv.sdnn_ms, hrv.rr_intervals_ms);
        assert!((hrv.mean_rr_ms - 800.0).abs() < 5.0);
        assert_eq!(analysis.risk.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_dark_skin_end_to_end() {
        let mut video = SyntheticFaceVideo::new(30.0, 15.0, 80.0, 6).with_skin(SKIN_DARK);
        let analysis = analyze(&mut video, &AnalysisConfig::default()).unwrap();
        let bpm = analysis.vitals.heart_rate_bpm();
        assert!((bpm - 80.0).abs() < 5.0, "bpm {bpm}");
        assert!(analysis.detection.detection_ratio > 0.9);
    }

    #[test]
    fn test_blank_video_fails_detection() {
        let frames: Vec<u8> = vec![20; 64 * 48 * 3 * 200];
        let result = raw_rgb_to_report(Cursor::new(frames), 64, 48, 30.0, &AnalysisConfig::default());
        assert!(matches!(result, Err(ComputeError::InsufficientDetection { .. })));
    }

    #[test]
    fn test_cancelled_analysis() {
        let token = CancellationToken::new();
        token.cancel();
        let mut video = SyntheticFaceVideo::new(30.0, 10.0, 70.0, 2);
        let result = analyze_with_cancel(&mut video, &AnalysisConfig::default(), &token);
        assert!(matches!(result, Err(ComputeError::Cancelled(0))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AnalysisConfig::default();
        config.signal.band_low_hz = 5.0;
        assert!(matches!(
            VitalsProcessor::new(config),
            Err(ComputeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_shared_processor_across_threads() {
        let processor = VitalsProcessor::default();
        let results: Vec<(f64, f64)> = std::thread::scope(|scope| {
            let handles: Vec<_> = [(60.0, 3u64), (90.0, 4u64)]
                .into_iter()
                .map(|(bpm, seed)| {
                    let processor = &processor;
                    scope.spawn(move || {
                        let mut video = SyntheticFaceVideo::new(30.0, 12.0, bpm, seed);
                        let analysis = processor.process(&mut video).unwrap();
                        (bpm, analysis.vitals.heart_rate_bpm())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (expected, measured) in results {
            assert!((measured - expected).abs() < 5.0, "{measured} vs {expected}");
        }
    }

    #[test]
    fn test_report_json() {
        let processor = VitalsProcessor::default();
        let mut video = SyntheticFaceVideo::new(30.0, 15.0, 80.0, 5);
        let json = processor.process_to_json(&mut video).unwrap();
        let report: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(report["producer"]["name"], "rppg-flux");
        assert_eq!(report["vitals"]["spo2"]["status"], "unsupported");
        assert!(report["vitals"]["heart_rate_bpm"].as_f64().unwrap() > 70.0);
    }
}
