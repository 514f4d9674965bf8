//! Report encoding
//!
//! Encodes an [`Analysis`] into a self-describing JSON report: producer and
//! provenance metadata, detection and signal quality, vitals with their
//! experimental/unsupported annotations, the risk assessment, and a
//! disclaimer.

use crate::error::ComputeError;
use crate::types::{Analysis, EstimateStatus, FrequencyHrv, RegionWeight, RiskLevel, Spo2Support};
use crate::{PRODUCER_NAME, RPPG_VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current report schema version
pub const REPORT_VERSION: &str = "1.0.0";

pub const DISCLAIMER: &str = "Wellness estimate from camera video. Not a medical device; \
     do not use for diagnosis or treatment decisions.";

const STRESS_NOTE: &str = "Heuristic from pNN50; not clinically validated";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportProvenance {
    pub computed_at_utc: String,
    pub total_frames: usize,
    pub duration_sec: f64,
    pub fps: f64,
    /// Successful detections per detector
    pub detectors: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportQuality {
    pub detection_ratio: f64,
    pub mean_detection_confidence: f64,
    pub snr_db: f64,
    /// Fusion weight of each sampled face region
    pub regions: Vec<RegionWeight>,
    pub heart_rate_confidence: String,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportHrv {
    pub sdnn_ms: f64,
    pub rmssd_ms: f64,
    pub pnn50_pct: f64,
    pub mean_rr_ms: f64,
    pub peak_count: usize,
    pub rr_intervals_ms: Vec<f64>,
    /// Band powers, present when the RR series is long enough
    pub frequency: Option<FrequencyHrv>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBloodPressure {
    pub systolic_mmhg: f64,
    pub diastolic_mmhg: f64,
    pub status: EstimateStatus,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSpo2 {
    pub status: Spo2Support,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportVitals {
    pub heart_rate_bpm: f64,
    pub heart_rate_hz: f64,
    pub peak_sharpness: f64,
    pub hrv: Option<ReportHrv>,
    pub stress_level: Option<f64>,
    pub stress_note: Option<String>,
    pub blood_pressure: Option<ReportBloodPressure>,
    pub spo2: ReportSpo2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRisk {
    pub score: u32,
    pub level: RiskLevel,
    pub alerts: Vec<String>,
    pub recommendation: String,
}

/// Complete JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalsReport {
    pub report_version: String,
    pub producer: ReportProducer,
    pub provenance: ReportProvenance,
    pub quality: ReportQuality,
    pub vitals: ReportVitals,
    pub risk: ReportRisk,
    pub disclaimer: String,
}

/// Report encoder
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn encode(&self, analysis: &Analysis) -> VitalsReport {
        let vitals = &analysis.vitals;
        let detection = &analysis.detection;

        let producer = ReportProducer {
            name: PRODUCER_NAME.to_string(),
            version: RPPG_VERSION.to_string(),
            instance_id: self.instance_id.clone(),
        };

        let provenance = ReportProvenance {
            computed_at_utc: Utc::now().to_rfc3339(),
            total_frames: detection.total_frames,
            duration_sec: analysis.signal.duration_sec(),
            fps: detection.fps,
            detectors: detection
                .detector_hits
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        };

        let quality = ReportQuality {
            detection_ratio: detection.detection_ratio,
            mean_detection_confidence: detection.mean_confidence,
            snr_db: analysis.signal.quality.snr_db,
            regions: analysis.signal.regions.clone(),
            heart_rate_confidence: vitals.heart_rate.confidence.as_str().to_string(),
            flags: vitals
                .quality_flags
                .iter()
                .filter_map(|f| serde_json::to_value(f).ok())
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        };

        let report_vitals = ReportVitals {
            heart_rate_bpm: vitals.heart_rate.bpm,
            heart_rate_hz: vitals.heart_rate.frequency_hz,
            peak_sharpness: vitals.heart_rate.peak_sharpness,
            hrv: vitals.hrv.as_ref().map(|h| ReportHrv {
                sdnn_ms: h.sdnn_ms,
                rmssd_ms: h.rmssd_ms,
                pnn50_pct: h.pnn50_pct,
                mean_rr_ms: h.mean_rr_ms,
                peak_count: h.peak_count,
                rr_intervals_ms: h.rr_intervals_ms.clone(),
                frequency: h.frequency,
            }),
            stress_level: vitals.stress_level,
            stress_note: vitals.stress_level.map(|_| STRESS_NOTE.to_string()),
            blood_pressure: vitals.blood_pressure.as_ref().map(|bp| ReportBloodPressure {
                systolic_mmhg: bp.systolic,
                diastolic_mmhg: bp.diastolic,
                status: bp.status,
                note: bp.note.clone(),
            }),
            spo2: ReportSpo2 {
                status: vitals.spo2,
                note: vitals.spo2.reason().to_string(),
            },
        };

        let risk = ReportRisk {
            score: analysis.risk.risk_score,
            level: analysis.risk.risk_level,
            alerts: analysis.risk.alerts.clone(),
            recommendation: analysis.risk.recommendation.clone(),
        };

        VitalsReport {
            report_version: REPORT_VERSION.to_string(),
            producer,
            provenance,
            quality,
            vitals: report_vitals,
            risk,
            disclaimer: DISCLAIMER.to_string(),
        }
    }

    /// Encode to a pretty-printed JSON string
    pub fn encode_to_json(&self, analysis: &Analysis) -> Result<String, ComputeError> {
        serde_json::to_string_pretty(&self.encode(analysis)).map_err(ComputeError::JsonError)
    }
}
