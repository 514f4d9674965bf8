//! Heuristic risk assessment
//!
//! Independent threshold checks over the vitals, each adding a configured
//! weight to the score and an alert to the list. The score is bucketed into
//! LOW / MODERATE / HIGH. Not a diagnosis.

use crate::config::RiskConfig;
use crate::types::{RiskAssessment, RiskLevel, Vitals};
use tracing::debug;

pub const RECOMMENDATION_HIGH: &str = "Consider consulting a healthcare professional";
pub const RECOMMENDATION_MODERATE: &str = "Monitor your vitals and practice stress management";
pub const RECOMMENDATION_LOW: &str = "Vitals appear normal. Maintain healthy habits";

/// Risk assessor
pub struct RiskAssessor;

impl RiskAssessor {
    pub fn assess(vitals: &Vitals, config: &RiskConfig) -> RiskAssessment {
        let mut score = 0u32;
        let mut alerts = Vec::new();
        let bpm = vitals.heart_rate_bpm();

        if bpm < config.hr_low_bpm {
            score += config.hr_low_weight;
            alerts.push(format!("Low heart rate ({bpm:.0} BPM)"));
            if bpm < config.hr_severe_low_bpm {
                score += config.hr_severe_weight;
                alerts.push(format!("Severely low heart rate ({bpm:.0} BPM)"));
            }
        } else if bpm > config.hr_high_bpm {
            score += config.hr_high_weight;
            alerts.push(format!("Elevated heart rate ({bpm:.0} BPM)"));
            if bpm > config.hr_severe_high_bpm {
                score += config.hr_severe_weight;
                alerts.push(format!("Severely elevated heart rate ({bpm:.0} BPM)"));
            }
        }

        if let Some(sdnn) = vitals.sdnn_ms() {
            if sdnn < config.sdnn_low_ms {
                score += config.sdnn_low_weight;
                alerts.push(format!("Very low heart rate variability (SDNN {sdnn:.1} ms)"));
            }
        }

        if let Some(bp) = &vitals.blood_pressure {
            if bp.systolic < config.systolic_low_mmhg {
                score += config.bp_low_weight;
                alerts.push(format!(
                    "Low blood pressure estimate ({:.0}/{:.0} mmHg, unvalidated)",
                    bp.systolic, bp.diastolic
                ));
            }
        }

        if let Some(stress) = vitals.stress_level {
            if stress > config.stress_high {
                score += config.stress_weight;
                alerts.push(format!("High stress level ({stress:.1}/10)"));
            }
        }

        let (risk_level, recommendation) = if score >= config.high_score {
            (RiskLevel::High, RECOMMENDATION_HIGH)
        } else if score >= config.moderate_score {
            (RiskLevel::Moderate, RECOMMENDATION_MODERATE)
        } else {
            (RiskLevel::Low, RECOMMENDATION_LOW)
        };

        debug!(score, level = risk_level.as_str(), alerts = alerts.len(), "Risk assessed");

        RiskAssessment {
            risk_score: score,
            risk_level,
            alerts,
            recommendation: recommendation.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BloodPressureEstimate, Confidence, EstimateStatus, HeartRate, HrvMetrics, Spo2Support,
    };
    use pretty_assertions::assert_eq;

    fn vitals(bpm: f64, sdnn: Option<f64>, stress: Option<f64>, systolic: Option<f64>) -> Vitals {
        Vitals {
            heart_rate: HeartRate {
                bpm,
                frequency_hz: bpm / 60.0,
                peak_sharpness: 6.0,
                confidence: Confidence::High,
            },
            hrv: sdnn.map(|sdnn_ms| HrvMetrics {
                rr_intervals_ms: vec![800.0; 10],
                sdnn_ms,
                rmssd_ms: 30.0,
                pnn50_pct: 12.0,
                mean_rr_ms: 800.0,
                peak_count: 11,
                frequency: None,
            }),
            stress_level: stress,
            blood_pressure: systolic.map(|s| BloodPressureEstimate {
                systolic: s,
                diastolic: s - 40.0,
                status: EstimateStatus::Unvalidated,
                note: String::new(),
            }),
            spo2: Spo2Support::Unsupported,
            quality_flags: Vec::new(),
        }
    }

    #[test]
    fn test_normal_vitals_are_low_risk() {
        let risk = RiskAssessor::assess(&vitals(72.0, Some(45.0), Some(3.5), Some(118.0)), &RiskConfig::default());
        assert_eq!(risk.risk_score, 0);
        assert_eq!(risk.risk_level, RiskLevel::Low);
        assert!(risk.alerts.is_empty());
        assert_eq!(risk.recommendation, RECOMMENDATION_LOW);
    }

    #[test]
    fn test_bradycardia_with_stress() {
        let config = RiskConfig::default();
        let mild = RiskAssessor::assess(&vitals(45.0, Some(45.0), Some(8.0), None), &config);
        assert_eq!(mild.risk_score, 40);
        assert_eq!(mild.risk_level, RiskLevel::Moderate);
        assert_eq!(mild.alerts.len(), 2);

        let severe = RiskAssessor::assess(&vitals(39.0, Some(45.0), Some(8.0), None), &config);
        assert_eq!(severe.risk_score, 60);
        assert_eq!(severe.risk_level, RiskLevel::High);
        assert_eq!(severe.alerts.len(), 3);
        assert_eq!(severe.recommendation, RECOMMENDATION_HIGH);
    }

    #[test]
    fn test_steady_rhythm_alone_stays_low() {
        // Metronomic beats: SDNN near zero, pNN50 zero, stress 9
        let risk = RiskAssessor::assess(&vitals(75.0, Some(2.0), Some(9.0), Some(118.0)), &RiskConfig::default());
        assert_eq!(risk.risk_score, 20);
        assert_eq!(risk.alerts.len(), 2);
        assert_eq!(risk.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_tachycardia_alone_is_low_but_severe_is_moderate() {
        let config = RiskConfig::default();
        let mild = RiskAssessor::assess(&vitals(110.0, None, None, None), &config);
        assert_eq!(mild.risk_score, 20);
        assert_eq!(mild.risk_level, RiskLevel::Low);

        let severe = RiskAssessor::assess(&vitals(140.0, None, None, None), &config);
        assert_eq!(severe.risk_score, 40);
        assert_eq!(severe.risk_level, RiskLevel::Moderate);
        assert_eq!(severe.alerts.len(), 2);
    }

    #[test]
    fn test_score_is_monotonic_per_factor() {
        let config = RiskConfig::default();
        let score = |v: &Vitals| RiskAssessor::assess(v, &config).risk_score;
        let base = vitals(72.0, Some(45.0), Some(3.0), Some(118.0));

        let mut prev = score(&base);
        for bpm in [60.0, 49.0, 39.0] {
            let s = score(&vitals(bpm, Some(45.0), Some(3.0), Some(118.0)));
            assert!(s >= prev);
            prev = s;
        }
        prev = score(&base);
        for bpm in [90.0, 101.0, 131.0] {
            let s = score(&vitals(bpm, Some(45.0), Some(3.0), Some(118.0)));
            assert!(s >= prev);
            prev = s;
        }
        prev = score(&base);
        for sdnn in [30.0, 19.0, 5.0] {
            let s = score(&vitals(72.0, Some(sdnn), Some(3.0), Some(118.0)));
            assert!(s >= prev);
            prev = s;
        }
        prev = score(&base);
        for stress in [5.0, 7.5, 9.0] {
            let s = score(&vitals(72.0, Some(45.0), Some(stress), Some(118.0)));
            assert!(s >= prev);
            prev = s;
        }
        prev = score(&base);
        for systolic in [100.0, 89.0, 80.0] {
            let s = score(&vitals(72.0, Some(45.0), Some(3.0), Some(systolic)));
            assert!(s >= prev);
            prev = s;
        }
    }

    #[test]
    fn test_all_factors_moderate_threshold() {
        let config = RiskConfig::default();
        let risk = RiskAssessor::assess(&vitals(72.0, Some(10.0), Some(3.0), Some(85.0)), &config);
        assert_eq!(risk.risk_score, 35);
        assert_eq!(risk.risk_level, RiskLevel::Moderate);
        assert_eq!(risk.recommendation, RECOMMENDATION_MODERATE);
    }
}
