//! Raw signal extraction
//!
//! Turns a frame stream into per-frame mean RGB intensities over each
//! smoothed skin region (forehead, and both cheeks when the detector places
//! them). Frames without a face keep their slot as a missing sample so
//! indices stay aligned with time.

use crate::config::DetectionConfig;
use crate::dsp::median;
use crate::error::ComputeError;
use crate::source::FrameSource;
use crate::tracker::{DetectorChain, RoiSmoother};
use crate::types::{ColorTrace, DetectionStats, FaceRegion, FaceRois, Frame, RawSignal, Roi};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Running per-frame results of one extraction
#[derive(Debug)]
struct Accumulator {
    traces: Vec<ColorTrace>,
    detected: Vec<bool>,
    timestamps: Vec<f64>,
    confidence_sum: f64,
    detector_hits: HashMap<String, usize>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            traces: FaceRegion::ALL.into_iter().map(ColorTrace::new).collect(),
            detected: Vec::new(),
            timestamps: Vec::new(),
            confidence_sum: 0.0,
            detector_hits: HashMap::new(),
        }
    }

    /// Record one frame; `samples` holds a mean for each region sampled on it
    fn hit(&mut self, timestamp_ms: f64, samples: &[(FaceRegion, [f64; 3])], confidence: f64, detector: &str) {
        for trace in &mut self.traces {
            let rgb = samples
                .iter()
                .find(|(region, _)| *region == trace.region)
                .map(|(_, rgb)| *rgb);
            trace.push(rgb);
        }
        self.detected.push(true);
        self.timestamps.push(timestamp_ms);
        self.confidence_sum += confidence;
        *self.detector_hits.entry(detector.to_string()).or_default() += 1;
    }

    fn miss(&mut self, timestamp_ms: f64) {
        for trace in &mut self.traces {
            trace.push(None);
        }
        self.detected.push(false);
        self.timestamps.push(timestamp_ms);
    }

    fn detected_frames(&self) -> usize {
        self.detected.iter().filter(|d| **d).count()
    }

    /// Median spacing of strictly increasing timestamps
    fn timestamp_rate(&self) -> Option<f64> {
        let diffs: Vec<f64> = self
            .timestamps
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|d| *d > 0.0)
            .collect();
        if diffs.is_empty() {
            return None;
        }
        let step_ms = median(&diffs);
        (step_ms > 0.0).then(|| 1000.0 / step_ms)
    }

    fn finish(self, fps: f64) -> (RawSignal, DetectionStats) {
        let total = self.detected.len();
        let detected = self.detected_frames();
        let stats = DetectionStats {
            total_frames: total,
            detected_frames: detected,
            detection_ratio: if total > 0 { detected as f64 / total as f64 } else { 0.0 },
            fps,
            mean_confidence: if detected > 0 {
                self.confidence_sum / detected as f64
            } else {
                0.0
            },
            detector_hits: self.detector_hits,
        };
        // Regions never sampled (detector without cheeks, cheeks disabled) are dropped
        let traces = self
            .traces
            .into_iter()
            .filter(|t| t.region == FaceRegion::Forehead || t.valid_count() > 0)
            .collect();
        let signal = RawSignal {
            traces,
            fps,
            detected: self.detected,
        };
        (signal, stats)
    }
}

/// Mean (red, green, blue) over the ROI
fn roi_means(frame: &Frame, roi: &Roi) -> Option<[f64; 3]> {
    let roi = roi.clip(frame.width, frame.height)?;
    let mut sums = [0u64; 3];
    for y in roi.y..roi.y + roi.height {
        for x in roi.x..roi.x + roi.width {
            for (sum, c) in sums.iter_mut().zip(frame.pixel(x, y)) {
                *sum += c as u64;
            }
        }
    }
    let n = roi.area() as f64;
    Some(sums.map(|v| v as f64 / n))
}

/// One temporal smoother per region
struct RegionSmoothers([RoiSmoother; 3]);

impl RegionSmoothers {
    fn new(window: usize) -> Self {
        Self([
            RoiSmoother::new(window),
            RoiSmoother::new(window),
            RoiSmoother::new(window),
        ])
    }

    fn smoother(&mut self, region: FaceRegion) -> &mut RoiSmoother {
        match region {
            FaceRegion::Forehead => &mut self.0[0],
            FaceRegion::LeftCheek => &mut self.0[1],
            FaceRegion::RightCheek => &mut self.0[2],
        }
    }

    /// Smoothed means of every region on this frame. `None` when the
    /// forehead could not be sampled.
    fn sample(&mut self, frame: &Frame, rois: &FaceRois) -> Option<Vec<(FaceRegion, [f64; 3])>> {
        let samples: Vec<(FaceRegion, [f64; 3])> = rois
            .iter()
            .filter_map(|(region, roi)| {
                let smoothed = self.smoother(region).update(roi);
                roi_means(frame, &smoothed).map(|rgb| (region, rgb))
            })
            .collect();
        samples
            .iter()
            .any(|(region, _)| *region == FaceRegion::Forehead)
            .then_some(samples)
    }
}

/// Frame stream to raw colour signals
pub struct SignalExtractor<'a> {
    chain: &'a DetectorChain,
    config: &'a DetectionConfig,
}

impl<'a> SignalExtractor<'a> {
    pub fn new(chain: &'a DetectorChain, config: &'a DetectionConfig) -> Self {
        Self { chain, config }
    }

    /// Consume `source` and return the raw signal with its detection statistics
    pub fn extract<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        cancel: &CancellationToken,
    ) -> Result<(RawSignal, DetectionStats), ComputeError> {
        let mut acc = Accumulator::new();
        let mut smoothers = RegionSmoothers::new(self.config.smoothing_window);

        while let Some(frame) = source.next_frame()? {
            if cancel.is_cancelled() {
                info!(frames = acc.detected.len(), "Extraction cancelled");
                return Err(ComputeError::Cancelled(acc.detected.len()));
            }

            match self.chain.detect_regions(&frame) {
                Some((rois, detector)) => match smoothers.sample(&frame, &rois) {
                    Some(samples) => {
                        acc.hit(frame.timestamp_ms, &samples, rois.forehead.confidence, detector)
                    }
                    None => acc.miss(frame.timestamp_ms),
                },
                None => acc.miss(frame.timestamp_ms),
            }
        }

        let total = acc.detected.len();
        if total == 0 {
            return Err(ComputeError::Decode("source produced no frames".to_string()));
        }

        let fps = match source.frame_rate().filter(|f| *f > 0.0 && f.is_finite()) {
            Some(fps) => fps,
            None => acc.timestamp_rate().ok_or_else(|| {
                ComputeError::Decode(
                    "frame rate unknown and not derivable from timestamps".to_string(),
                )
            })?,
        };

        let detected = acc.detected_frames();
        let ratio = detected as f64 / total as f64;
        debug!(total, detected, ratio, fps, "Extraction finished");

        if ratio < self.config.min_detection_ratio {
            warn!(
                detected,
                total,
                required = self.config.min_detection_ratio,
                "Face detection rate too low"
            );
            return Err(ComputeError::InsufficientDetection {
                detected,
                total,
                ratio,
                required: self.config.min_detection_ratio,
            });
        }

        Ok(acc.finish(fps))
    }
}
