//! Temporal ROI smoothing

use crate::dsp::median;
use crate::types::Roi;
use std::collections::VecDeque;

/// Per-coordinate median over the last `window` detections.
///
/// Owned by a single extraction loop; create a new one per analysis.
#[derive(Debug, Clone)]
pub struct RoiSmoother {
    window: usize,
    history: VecDeque<Roi>,
}

impl RoiSmoother {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }

    /// Push a fresh detection and return the smoothed ROI
    pub fn update(&mut self, roi: Roi) -> Roi {
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(roi);

        let coord = |f: fn(&Roi) -> u32| -> u32 {
            let values: Vec<f64> = self.history.iter().map(|r| f(r) as f64).collect();
            median(&values).round() as u32
        };

        Roi {
            x: coord(|r| r.x),
            y: coord(|r| r.y),
            width: coord(|r| r.width).max(1),
            height: coord(|r| r.height).max(1),
            confidence: roi.confidence,
            timestamp_ms: roi.timestamp_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
