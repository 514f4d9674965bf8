//! Vital sign estimation
//!
//! Everything here is a deterministic function of a conditioned signal:
//! - Heart rate from the dominant in-band frequency of the Welch spectrum
//! - HRV from beat-to-beat (peak-to-peak) intervals, with VLF/LF/HF band
//!   powers from the evenly resampled RR tachogram
//! - Stress level and blood pressure from configurable heuristic tables
//!
//! Stress and blood pressure are heuristics without clinical validation.
//! SpO2 is not estimated.

use crate::config::{AnalysisConfig, BpBand, HrvConfig, StressBand};
use crate::dsp;
use crate::error::ComputeError;
use crate::types::{
    BloodPressureEstimate, Confidence, ConditionedSignal, EstimateStatus, FrequencyHrv, HeartRate,
    HrvMetrics, QualityFlag, RawSignal, Spo2Support, Vitals,
};
use tracing::{debug, warn};

/// Note attached to every blood-pressure estimate
pub const BLOOD_PRESSURE_NOTE: &str =
    "Experimental heuristic derived from heart rate only; not validated against cuff measurements";

/// Vitals estimator
pub struct VitalsEstimator;

impl VitalsEstimator {
    /// Estimate all vitals from a conditioned signal
    pub fn estimate(signal: &ConditionedSignal, config: &AnalysisConfig) -> Result<Vitals, ComputeError> {
        let heart_rate = Self::heart_rate(signal, config)?;
        let hrv = Self::hrv(signal, config);
        let stress_level = hrv
            .as_ref()
            .map(|h| Self::stress_level(h.pnn50_pct, &config.heuristics.stress_bands));

        let blood_pressure = if heart_rate.confidence == Confidence::Low {
            None
        } else {
            Self::blood_pressure(heart_rate.bpm, config)
        };

        let mut quality_flags = Vec::new();
        if heart_rate.confidence == Confidence::Low {
            quality_flags.push(QualityFlag::LowConfidence);
            quality_flags.push(QualityFlag::BloodPressureOmitted);
        }
        if hrv.is_none() {
            quality_flags.push(QualityFlag::InsufficientPeaks);
        }
        if signal.quality.detection_ratio < config.confidence.high_detection_ratio {
            quality_flags.push(QualityFlag::DetectionGaps);
        }
        if signal.quality.snr_db < config.confidence.low_snr_db {
            quality_flags.push(QualityFlag::LowSnr);
        }
        if !quality_flags.is_empty() {
            warn!(flags = ?quality_flags, "Vitals estimated with degraded quality");
        }

        Ok(Vitals {
            heart_rate,
            hrv,
            stress_level,
            blood_pressure,
            spo2: Spo2Support::Unsupported,
            quality_flags,
        })
    }

    /// Heart rate from the Welch spectrum peak inside the pass band,
    /// interpolated between bins
    pub fn heart_rate(signal: &ConditionedSignal, config: &AnalysisConfig) -> Result<HeartRate, ComputeError> {
        let spectrum = &config.spectrum;
        let segment = (spectrum.segment_sec * signal.fps).round() as usize;
        let psd = dsp::welch(&signal.samples, signal.fps, segment, spectrum.overlap, spectrum.nfft_min);

        let (low, high) = signal.band_hz;
        let band = psd.band_indices(low, high);
        let band_power = &psd.power[band.clone()];
        let (offset, peak) = band_power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, p)| (i, *p))
            .ok_or_else(|| {
                ComputeError::InvalidConfig(format!(
                    "no spectral bins between {low} and {high} Hz at {} fps",
                    signal.fps
                ))
            })?;

        let bin = band.start + offset;
        let frequency_hz = match (bin.checked_sub(1), psd.power.get(bin + 1)) {
            (Some(prev), Some(&next)) if psd.frequencies.len() > 1 => {
                let df = psd.frequencies[1] - psd.frequencies[0];
                psd.frequencies[bin] + df * parabolic_offset(psd.power[prev], peak, next)
            }
            _ => psd.frequencies[bin],
        };
        let band_mean = dsp::mean(band_power);
        let peak_sharpness = if band_mean > 0.0 { peak / band_mean } else { 0.0 };

        let conf = &config.confidence;
        let ratio = signal.quality.detection_ratio;
        let confidence = if peak_sharpness >= conf.high_sharpness && ratio >= conf.high_detection_ratio {
            Confidence::High
        } else if peak_sharpness >= conf.medium_sharpness && ratio >= conf.medium_detection_ratio {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        debug!(
            bpm = frequency_hz * 60.0,
            peak_sharpness,
            confidence = confidence.as_str(),
            "Heart rate estimated"
        );

        Ok(HeartRate {
            bpm: frequency_hz * 60.0,
            frequency_hz,
            peak_sharpness,
            confidence,
        })
    }

    /// HRV, or `None` when too few beats were found.
    ///
    /// Peaks within `edge_samples` of either end are discarded; the filter
    /// transient there shifts them.
    pub fn hrv(signal: &ConditionedSignal, config: &AnalysisConfig) -> Option<HrvMetrics> {
        let cfg = &config.peaks;
        let fps = signal.fps;
        let samples = &signal.samples;
        let n = samples.len();
        let edge = signal.edge_samples;

        let distance = ((cfg.min_distance_factor * fps).round() as usize).max(1);
        let prominence = cfg.prominence_factor * dsp::std_dev(samples, 0);
        let mut peaks = dsp::find_peaks(samples, distance, prominence);
        peaks.retain(|&p| p >= edge && p + edge < n);
        if peaks.len() < cfg.min_peaks {
            debug!(peaks = peaks.len(), required = cfg.min_peaks, "Too few peaks for HRV");
            return None;
        }

        let times_ms: Vec<f64> = peaks
            .iter()
            .map(|&p| refine_peak(samples, p) * 1000.0 / fps)
            .collect();
        let rr_intervals_ms: Vec<f64> = times_ms
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|rr| *rr >= cfg.rr_min_ms && *rr <= cfg.rr_max_ms)
            .collect();
        if rr_intervals_ms.len() < 3 {
            debug!(intervals = rr_intervals_ms.len(), "Too few valid RR intervals for HRV");
            return None;
        }

        let successive: Vec<f64> = rr_intervals_ms.windows(2).map(|w| w[1] - w[0]).collect();
        let rmssd_ms = (successive.iter().map(|d| d * d).sum::<f64>() / successive.len() as f64).sqrt();
        let pnn50_pct =
            100.0 * successive.iter().filter(|d| d.abs() > 50.0).count() as f64 / successive.len() as f64;

        Some(HrvMetrics {
            sdnn_ms: dsp::std_dev(&rr_intervals_ms, 1),
            rmssd_ms,
            pnn50_pct,
            mean_rr_ms: dsp::mean(&rr_intervals_ms),
            peak_count: peaks.len(),
            frequency: frequency_hrv(&rr_intervals_ms, &config.hrv),
            rr_intervals_ms,
        })
    }

    /// Stress level (0-10) for a pNN50 percentage
    pub fn stress_level(pnn50_pct: f64, bands: &[StressBand]) -> f64 {
        let mut sorted = bands.to_vec();
        sorted.sort_by(|a, b| b.min_pnn50.total_cmp(&a.min_pnn50));
        sorted
            .iter()
            .find(|b| pnn50_pct >= b.min_pnn50)
            .or(sorted.last())
            .map(|b| b.level)
            .unwrap_or(0.0)
    }

    /// Experimental blood-pressure estimate from heart rate
    pub fn blood_pressure(bpm: f64, config: &AnalysisConfig) -> Option<BloodPressureEstimate> {
        let heuristics = &config.heuristics;
        let mut sorted: Vec<BpBand> = heuristics.bp_bands.clone();
        sorted.sort_by(|a, b| b.min_bpm.total_cmp(&a.min_bpm));
        let band = sorted.iter().find(|b| bpm >= b.min_bpm).or(sorted.last())?;
        Some(BloodPressureEstimate {
            systolic: band.systolic,
            diastolic: band.systolic - heuristics.bp_diastolic_offset,
            status: EstimateStatus::Unvalidated,
            note: BLOOD_PRESSURE_NOTE.to_string(),
        })
    }

    /// SpO2 needs a second (infrared) wavelength that RGB video does not carry
    pub fn estimate_spo2(_raw: &RawSignal) -> Result<f64, ComputeError> {
        Err(ComputeError::Unsupported(
            Spo2Support::Unsupported.reason().to_string(),
        ))
    }
}

/// VLF/LF/HF powers (ms²) of an RR series.
///
/// Beats are placed at their cumulative times, the tachogram is linearly
/// resampled at `resample_hz` and passed to Welch. `None` when the series
/// spans less than `min_span_sec`.
pub fn frequency_hrv(rr_intervals_ms: &[f64], config: &HrvConfig) -> Option<FrequencyHrv> {
    if rr_intervals_ms.len() < 3 || config.resample_hz <= 0.0 {
        return None;
    }
    let times: Vec<f64> = rr_intervals_ms
        .iter()
        .scan(0.0, |t, rr| {
            *t += rr / 1000.0;
            Some(*t)
        })
        .collect();
    let (start, end) = (times[0], times[times.len() - 1]);
    if end - start < config.min_span_sec {
        debug!(span_sec = end - start, "RR series too short for frequency HRV");
        return None;
    }

    let step = 1.0 / config.resample_hz;
    let count = ((end - start) / step).floor() as usize + 1;
    let mut resampled = Vec::with_capacity(count);
    let mut j = 0;
    for k in 0..count {
        let t = start + k as f64 * step;
        while j + 2 < times.len() && times[j + 1] < t {
            j += 1;
        }
        let (t0, t1) = (times[j], times[j + 1]);
        let (v0, v1) = (rr_intervals_ms[j], rr_intervals_ms[j + 1]);
        let frac = ((t - t0) / (t1 - t0)).clamp(0.0, 1.0);
        resampled.push(v0 + (v1 - v0) * frac);
    }

    let mean = dsp::mean(&resampled);
    let centered: Vec<f64> = resampled.iter().map(|v| v - mean).collect();
    let segment = config.segment_len.min(centered.len());
    let psd = dsp::welch(&centered, config.resample_hz, segment, 0.5, 256);
    if psd.frequencies.len() < 2 {
        return None;
    }
    let df = psd.frequencies[1] - psd.frequencies[0];
    let band = |(low, high): (f64, f64)| psd.band_power(low, high) * df;

    let (vlf_power, lf_power, hf_power) = (
        band(config.vlf_band_hz),
        band(config.lf_band_hz),
        band(config.hf_band_hz),
    );
    let total_power = vlf_power + lf_power + hf_power;
    let normalized = lf_power + hf_power;
    let nu = |power: f64| if normalized > 0.0 { 100.0 * power / normalized } else { 0.0 };

    Some(FrequencyHrv {
        vlf_power,
        lf_power,
        hf_power,
        total_power,
        lf_hf_ratio: if hf_power > 0.0 { lf_power / hf_power } else { 0.0 },
        lf_nu: nu(lf_power),
        hf_nu: nu(hf_power),
    })
}

/// Vertex offset (-0.5..0.5) of the parabola through three equally spaced points
fn parabolic_offset(a: f64, b: f64, c: f64) -> f64 {
    let denom = a - 2.0 * b + c;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
}

/// Sub-sample peak position from the three samples around it
fn refine_peak(samples: &[f64], peak: usize) -> f64 {
    if peak == 0 || peak + 1 >= samples.len() {
        return peak as f64;
    }
    peak as f64 + parabolic_offset(samples[peak - 1], samples[peak], samples[peak + 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditioner::SignalConditioner;
    use crate::types::{ColorTrace, FaceRegion, SignalQuality};
    use pretty_assertions::assert_eq;
    use std::f64::consts::PI;

    fn conditioned(samples: Vec<f64>, fps: f64, detection_ratio: f64) -> ConditionedSignal {
        ConditionedSignal {
            samples,
            fps,
            band_hz: (0.75, 3.0),
            quality: SignalQuality {
                snr_db: 20.0,
                detection_ratio,
            },
            regions: Vec::new(),
            edge_samples: 0,
        }
    }

    fn sine(freq: f64, fps: f64, seconds: f64) -> Vec<f64> {
        let n = (fps * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fps).sin() * 2f64.sqrt())
            .collect()
    }

    #[test]
    fn test_heart_rate_from_sine() {
        let config = AnalysisConfig::default();
        for freq in [0.9, 1.25, 2.0, 2.8] {
            let signal = conditioned(sine(freq, 30.0, 20.0), 30.0, 1.0);
            let hr = VitalsEstimator::heart_rate(&signal, &config).unwrap();
            assert!((hr.bpm - freq * 60.0).abs() < 5.0, "{} vs {}", hr.bpm, freq * 60.0);
            assert_eq!(hr.confidence, Confidence::High);
        }
    }

    #[test]
    fn test_periodic_beats_have_no_variability() {
        // 25 samples at 30 fps: 833 ms beat interval
        let config = AnalysisConfig::default();
        let signal = conditioned(sine(1.2, 30.0, 20.0), 30.0, 1.0);
        let vitals = VitalsEstimator::estimate(&signal, &config).unwrap();

        let hrv = vitals.hrv.as_ref().unwrap();
        assert!(hrv.sdnn_ms < 1.0, "sdnn {}", hrv.sdnn_ms);
        assert!((hrv.mean_rr_ms - 833.33).abs() < 1.0);
        assert_eq!(hrv.pnn50_pct, 0.0);
        assert!((vitals.heart_rate_bpm() - 60_000.0 / 833.33).abs() < 3.0);
        assert_eq!(vitals.stress_level, Some(9.0));
        assert!(vitals.quality_flags.is_empty());
    }

    #[test]
    fn test_noise_gives_low_confidence_without_bp() {
        let config = AnalysisConfig::default();
        // Deterministic broadband sequence
        let mut state = 12345u64;
        let noise: Vec<f64> = (0..600)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 11) as f64 / (1u64 << 53) as f64) - 0.5
            })
            .collect();
        let signal = conditioned(noise, 30.0, 0.45);
        let vitals = VitalsEstimator::estimate(&signal, &config).unwrap();

        assert_eq!(vitals.heart_rate.confidence, Confidence::Low);
        assert!(vitals.blood_pressure.is_none());
        assert!(vitals.quality_flags.contains(&QualityFlag::LowConfidence));
        assert!(vitals.quality_flags.contains(&QualityFlag::BloodPressureOmitted));
        assert!(vitals.quality_flags.contains(&QualityFlag::DetectionGaps));
    }

    #[test]
    fn test_too_few_peaks_omits_hrv() {
        let mut config = AnalysisConfig::default();
        config.peaks.min_peaks = 40;
        let signal = conditioned(sine(1.2, 30.0, 20.0), 30.0, 1.0);
        let vitals = VitalsEstimator::estimate(&signal, &config).unwrap();

        assert!(vitals.hrv.is_none());
        assert!(vitals.stress_level.is_none());
        assert!(vitals.rr_intervals_ms().is_empty());
        assert_eq!(vitals.quality_flags, vec![QualityFlag::InsufficientPeaks]);
    }

    #[test]
    fn test_stress_table() {
        let bands = AnalysisConfig::default().heuristics.stress_bands;
        assert_eq!(VitalsEstimator::stress_level(45.0, &bands), 2.0);
        assert_eq!(VitalsEstimator::stress_level(20.0, &bands), 3.5);
        assert_eq!(VitalsEstimator::stress_level(4.0, &bands), 8.0);
        assert_eq!(VitalsEstimator::stress_level(0.0, &bands), 9.0);
    }

    #[test]
    fn test_blood_pressure_table() {
        let config = AnalysisConfig::default();
        let bp = VitalsEstimator::blood_pressure(72.0, &config).unwrap();
        assert_eq!((bp.systolic, bp.diastolic), (118.0, 78.0));
        assert_eq!(bp.status, EstimateStatus::Unvalidated);
        assert!(!bp.note.is_empty());
        assert_eq!(VitalsEstimator::blood_pressure(110.0, &config).unwrap().systolic, 135.0);
    }

    #[test]
    fn test_spo2_unsupported() {
        let mut trace = ColorTrace::new(FaceRegion::Forehead);
        trace.push(Some([1.0, 1.0, 1.0]));
        let raw = RawSignal::from_trace(trace, 30.0);
        let err = VitalsEstimator::estimate_spo2(&raw).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedError");
    }

    #[test]
    fn test_refine_peak() {
        let samples = [0.0, 1.0, 1.0, 0.0];
        assert!((refine_peak(&samples, 1) - 1.5).abs() < 1e-12);
        assert_eq!(refine_peak(&samples, 0), 0.0);
    }

    #[test]
    fn test_heart_rate_between_bins() {
        let config = AnalysisConfig::default();
        // 20 s at 30 fps, nfft 2048
        let df = 30.0 / 2048.0;
        for bins in [82.5, 82.3, 96.8] {
            let freq = bins * df;
            let signal = conditioned(sine(freq, 30.0, 20.0), 30.0, 1.0);
            let hr = VitalsEstimator::heart_rate(&signal, &config).unwrap();
            assert!(
                (hr.bpm - freq * 60.0).abs() < 0.1,
                "{} vs {}",
                hr.bpm,
                freq * 60.0
            );
        }
    }

    #[test]
    fn test_edge_peaks_are_discarded() {
        // Gaussian pulses every 800 ms (24 samples) through the full conditioning chain
        let config = AnalysisConfig::default();
        let fps = 30.0;
        let mut trace = ColorTrace::new(FaceRegion::Forehead);
        for i in 0..600 {
            let phase = (i % 24) as f64 / fps - 0.4;
            let pulse = (-phase * phase / (2.0 * 0.1 * 0.1)).exp();
            trace.push(Some([180.0, 140.0 + 3.0 * pulse, 110.0]));
        }
        let signal = SignalConditioner::condition(&RawSignal::from_trace(trace, fps), &config).unwrap();
        assert!(signal.edge_samples > 21);

        let hrv = VitalsEstimator::hrv(&signal, &config).unwrap();
        for rr in &hrv.rr_intervals_ms {
            assert!((rr - 800.0).abs() < 10.0, "rr {rr} in {:?}", hrv.rr_intervals_ms);
        }
        let usable = 600 - 2 * signal.edge_samples;
        assert!(hrv.peak_count <= usable / 24 + 1);
        assert!(hrv.sdnn_ms < 5.0);
    }

    fn modulated_rr(mod_hz: f64, seconds: f64) -> Vec<f64> {
        let mut rr = Vec::new();
        let mut t = 0.0;
        while t < seconds {
            let interval = 800.0 + 50.0 * (2.0 * PI * mod_hz * t).sin();
            rr.push(interval);
            t += interval / 1000.0;
        }
        rr
    }

    #[test]
    fn test_frequency_hrv_bands() {
        let config = HrvConfig::default();

        let slow = frequency_hrv(&modulated_rr(0.1, 120.0), &config).unwrap();
        assert!(slow.lf_power > slow.hf_power, "{slow:?}");
        assert!(slow.lf_hf_ratio > 1.0);
        assert!(slow.lf_nu > 50.0);
        assert!((slow.lf_nu + slow.hf_nu - 100.0).abs() < 1e-9);

        let fast = frequency_hrv(&modulated_rr(0.25, 120.0), &config).unwrap();
        assert!(fast.hf_power > fast.lf_power, "{fast:?}");
        assert!(fast.lf_hf_ratio < 1.0);
        assert!(fast.total_power >= fast.hf_power);
    }

    #[test]
    fn test_frequency_hrv_needs_span() {
        let config = HrvConfig::default();
        assert!(frequency_hrv(&[800.0; 10], &config).is_none());
        assert!(frequency_hrv(&[800.0, 810.0], &config).is_none());

        let steady = frequency_hrv(&[800.0; 20], &config).unwrap();
        assert_eq!(steady.lf_hf_ratio, 0.0);
        assert_eq!(steady.lf_nu, 0.0);
    }
}
