//! Signal conditioning
//!
//! Every region trace becomes a clean pulse signal in a fixed order:
//! gap interpolation (and channel selection), polynomial detrending,
//! standardization, zero-phase band-pass filtering, re-standardization.
//! Region signals are then fused, weighted by how concentrated their
//! in-band spectrum is, and standardized once more.

use crate::config::{AnalysisConfig, SignalConfig};
use crate::dsp::{self, BandpassFilter};
use crate::error::ComputeError;
use crate::types::{
    ColorTrace, ConditionedSignal, FaceRegion, RawSignal, RegionWeight, SignalChannel, SignalQuality,
};
use tracing::debug;

/// Standard deviations below this are treated as a flat signal
const MIN_STD: f64 = 1e-9;

/// Signal conditioner for raw colour traces
pub struct SignalConditioner;

impl SignalConditioner {
    /// Condition a raw signal into a zero-mean, unit-variance, band-limited pulse signal
    pub fn condition(raw: &RawSignal, config: &AnalysisConfig) -> Result<ConditionedSignal, ComputeError> {
        let signal_cfg = &config.signal;

        let required = (signal_cfg.min_duration_sec * raw.fps).ceil() as usize;
        if raw.len() < required {
            return Err(ComputeError::SignalTooShort {
                samples: raw.len(),
                required,
            });
        }

        let filter = BandpassFilter::design(
            signal_cfg.filter_order,
            signal_cfg.band_low_hz,
            signal_cfg.band_high_hz,
            raw.fps,
        )?;
        let band_hz = filter.band();

        let mut conditioned = Vec::with_capacity(raw.traces.len());
        let mut first_error = None;
        for trace in &raw.traces {
            match condition_trace(trace, raw.fps, &filter, signal_cfg) {
                Ok(samples) => {
                    let quality = region_quality(&samples, raw.fps, band_hz, config);
                    conditioned.push((trace.region, quality, samples));
                }
                Err(err) => {
                    debug!(region = trace.region.as_str(), error = %err, "Region dropped");
                    first_error.get_or_insert(err);
                }
            }
        }
        if conditioned.is_empty() {
            return Err(first_error.unwrap_or(ComputeError::ZeroSignal));
        }

        let regions = fusion_weights(&conditioned);
        let n = conditioned[0].2.len();
        let mut fused = vec![0.0; n];
        for (weight, (_, _, samples)) in regions.iter().zip(&conditioned) {
            for (acc, v) in fused.iter_mut().zip(samples) {
                *acc += weight.weight * v;
            }
        }
        let samples = standardize(&fused)?;

        let edge_samples = filter
            .pad_len(n)
            .max(filter.settling_samples(signal_cfg.settle_tolerance))
            .min(n / 4);

        let snr_db = band_snr_db(&samples, raw.fps, band_hz, config);
        debug!(
            samples = samples.len(),
            fps = raw.fps,
            channel = ?signal_cfg.channel,
            regions = regions.len(),
            edge_samples,
            snr_db,
            "Signal conditioned"
        );

        Ok(ConditionedSignal {
            samples,
            fps: raw.fps,
            band_hz,
            quality: SignalQuality {
                snr_db,
                detection_ratio: raw.detection_ratio(),
            },
            regions,
            edge_samples,
        })
    }
}

/// Channel selection through band-limiting for one region
fn condition_trace(
    trace: &ColorTrace,
    fps: f64,
    filter: &BandpassFilter,
    config: &SignalConfig,
) -> Result<Vec<f64>, ComputeError> {
    let selected = select_channel(trace, config.channel, fps, config.pos_window_sec)?;
    let detrended = dsp::detrend(&selected, config.detrend_order);
    let normalized = standardize(&detrended)?;
    standardize(&filter.filtfilt(&normalized))
}

/// Power of the strongest in-band bin over total in-band power
fn region_quality(samples: &[f64], fps: f64, (low, high): (f64, f64), config: &AnalysisConfig) -> f64 {
    let spectrum = &config.spectrum;
    let segment = (spectrum.segment_sec * fps).round() as usize;
    let psd = dsp::welch(samples, fps, segment, spectrum.overlap, spectrum.nfft_min);
    let band = &psd.power[psd.band_indices(low, high)];
    let total: f64 = band.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    band.iter().copied().fold(0.0, f64::max) / total
}

/// Normalize qualities into weights; equal weights when every quality is zero
fn fusion_weights(conditioned: &[(FaceRegion, f64, Vec<f64>)]) -> Vec<RegionWeight> {
    let total: f64 = conditioned.iter().map(|(_, q, _)| *q).sum();
    let equal = 1.0 / conditioned.len() as f64;
    conditioned
        .iter()
        .map(|(region, quality, _)| RegionWeight {
            region: *region,
            quality: *quality,
            weight: if total > 0.0 { quality / total } else { equal },
        })
        .collect()
}

/// Fill gaps linearly between the nearest valid neighbours; edges hold the
/// nearest valid value. `None` when nothing is valid.
pub fn interpolate_gaps(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let valid: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|x| x.is_finite()).map(|x| (i, x)))
        .collect();
    let (&(first_i, first_v), &(last_i, last_v)) = (valid.first()?, valid.last()?);

    let mut out = Vec::with_capacity(values.len());
    out.extend(std::iter::repeat(first_v).take(first_i));
    for pair in valid.windows(2) {
        let ((i0, v0), (i1, v1)) = (pair[0], pair[1]);
        let span = (i1 - i0) as f64;
        out.extend((i0..i1).map(|i| v0 + (v1 - v0) * (i - i0) as f64 / span));
    }
    out.push(last_v);
    out.extend(std::iter::repeat(last_v).take(values.len() - last_i - 1));
    Some(out)
}

fn select_channel(
    trace: &ColorTrace,
    channel: SignalChannel,
    fps: f64,
    pos_window_sec: f64,
) -> Result<Vec<f64>, ComputeError> {
    let green = interpolate_gaps(&trace.green).ok_or(ComputeError::ZeroSignal)?;
    match channel {
        SignalChannel::Green => Ok(green),
        SignalChannel::Chrom => {
            let red = interpolate_gaps(&trace.red).ok_or(ComputeError::ZeroSignal)?;
            let (mean_g, mean_r) = (dsp::mean(&green), dsp::mean(&red));
            if mean_g.abs() < MIN_STD || mean_r.abs() < MIN_STD {
                return Err(ComputeError::ZeroSignal);
            }
            Ok(green
                .iter()
                .zip(&red)
                .map(|(g, r)| 3.0 * g / mean_g - 2.0 * r / mean_r)
                .collect())
        }
        SignalChannel::Pos => {
            let red = interpolate_gaps(&trace.red).ok_or(ComputeError::ZeroSignal)?;
            let blue = interpolate_gaps(&trace.blue).ok_or(ComputeError::ZeroSignal)?;
            let window = ((pos_window_sec * fps).round() as usize).max(2);
            plane_orthogonal_to_skin(&red, &green, &blue, window)
        }
    }
}

/// Plane-orthogonal-to-skin projection.
///
/// Each window of temporally normalized RGB is projected onto
/// `S1 = G - B` and `S2 = G + B - 2R`, combined as `S1 + (σ1/σ2)·S2`, and
/// overlap-added after removing its mean.
fn plane_orthogonal_to_skin(
    red: &[f64],
    green: &[f64],
    blue: &[f64],
    window: usize,
) -> Result<Vec<f64>, ComputeError> {
    let n = green.len();
    let window = window.min(n);
    let mut out = vec![0.0; n];
    if window < 2 {
        return Ok(out);
    }

    for start in 0..=n - window {
        let range = start..start + window;
        let (r, g, b) = (&red[range.clone()], &green[range.clone()], &blue[range]);
        let (mean_r, mean_g, mean_b) = (dsp::mean(r), dsp::mean(g), dsp::mean(b));
        if mean_r.abs() < MIN_STD || mean_g.abs() < MIN_STD || mean_b.abs() < MIN_STD {
            return Err(ComputeError::ZeroSignal);
        }

        let mut s1 = Vec::with_capacity(window);
        let mut s2 = Vec::with_capacity(window);
        for i in 0..window {
            let (rn, gn, bn) = (r[i] / mean_r, g[i] / mean_g, b[i] / mean_b);
            s1.push(gn - bn);
            s2.push(gn + bn - 2.0 * rn);
        }
        let sd2 = dsp::std_dev(&s2, 0);
        let alpha = if sd2 > MIN_STD { dsp::std_dev(&s1, 0) / sd2 } else { 0.0 };

        let h: Vec<f64> = s1.iter().zip(&s2).map(|(a, b)| a + alpha * b).collect();
        let mean_h = dsp::mean(&h);
        for (slot, v) in out[start..start + window].iter_mut().zip(&h) {
            *slot += v - mean_h;
        }
    }
    Ok(out)
}

/// Zero mean, unit (population) standard deviation
fn standardize(values: &[f64]) -> Result<Vec<f64>, ComputeError> {
    let mean = dsp::mean(values);
    let std = dsp::std_dev(values, 0);
    if !(std >= MIN_STD) {
        return Err(ComputeError::ZeroVariance(std));
    }
    Ok(values.iter().map(|v| (v - mean) / std).collect())
}

/// In-band vs out-of-band power (dB) on the Welch spectrum, DC bin excluded
fn band_snr_db(samples: &[f64], fps: f64, (low, high): (f64, f64), config: &AnalysisConfig) -> f64 {
    let spectrum = &config.spectrum;
    let segment = (spectrum.segment_sec * fps).round() as usize;
    let psd = dsp::welch(samples, fps, segment, spectrum.overlap, spectrum.nfft_min);
    let total: f64 = psd.power.iter().skip(1).sum();
    let in_band = psd.band_power(low, high);
    let out_band = (total - in_band).max(f64::MIN_POSITIVE);
    if in_band <= 0.0 {
        return f64::NEG_INFINITY;
    }
    (10.0 * (in_band / out_band).log10()).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::f64::consts::PI;

    fn trace(region: FaceRegion, green: Vec<Option<f64>>) -> ColorTrace {
        ColorTrace {
            region,
            red: green.iter().map(|v| v.map(|g| g * 1.3)).collect(),
            blue: green.iter().map(|v| v.map(|g| g * 0.8)).collect(),
            green,
        }
    }

    fn raw(green: Vec<Option<f64>>, fps: f64) -> RawSignal {
        RawSignal::from_trace(trace(FaceRegion::Forehead, green), fps)
    }

    fn dominant_hz(samples: &[f64], fps: f64) -> f64 {
        let psd = dsp::welch(samples, fps, 256, 0.5, 2048);
        let band = psd.band_indices(0.7, 4.0);
        let best = band
            .clone()
            .max_by(|a, b| psd.power[*a].total_cmp(&psd.power[*b]))
            .unwrap();
        psd.frequencies[best]
    }

    fn pulse(freq: f64, fps: f64, seconds: f64) -> Vec<Option<f64>> {
        let n = (fps * seconds) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / fps;
                Some(150.0 + 0.2 * t + 2.0 * (2.0 * PI * freq * t).sin() + 0.3 * (2.0 * PI * 7.0 * t).sin())
            })
            .collect()
    }

    #[test]
    fn test_interpolation() {
        let out = interpolate_gaps(&[None, Some(1.0), None, None, Some(4.0), None]).unwrap();
        assert_eq!(out, vec![1.0, 1.0, 2.0, 3.0, 4.0, 4.0]);
        assert_eq!(interpolate_gaps(&[Some(2.0)]).unwrap(), vec![2.0]);
        assert!(interpolate_gaps(&[None, None]).is_none());
    }

    #[test]
    fn test_output_is_standardized() {
        let config = AnalysisConfig::default();
        let out = SignalConditioner::condition(&raw(pulse(1.2, 30.0, 20.0), 30.0), &config).unwrap();

        assert_eq!(out.len(), 600);
        assert!(dsp::mean(&out.samples).abs() < 1e-9);
        assert!((dsp::std_dev(&out.samples, 0) - 1.0).abs() < 1e-9);
        assert!(out.quality.snr_db > 10.0);
        assert_eq!(out.quality.detection_ratio, 1.0);
    }

    #[test]
    fn test_refiltering_is_stable() {
        let config = AnalysisConfig::default();
        let once = SignalConditioner::condition(&raw(pulse(1.5, 30.0, 20.0), 30.0), &config).unwrap();
        let again_raw = raw(once.samples.iter().map(|v| Some(*v)).collect(), 30.0);
        let twice = SignalConditioner::condition(&again_raw, &config).unwrap();

        let diff: f64 = once.samples[100..500]
            .iter()
            .zip(&twice.samples[100..500])
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            / 400.0;
        assert!(diff.sqrt() < 0.05, "rms difference {}", diff.sqrt());
    }

    #[test]
    fn test_degenerate_inputs_are_distinguished() {
        let config = AnalysisConfig::default();

        let missing = raw(vec![None; 300], 30.0);
        assert!(matches!(
            SignalConditioner::condition(&missing, &config),
            Err(ComputeError::ZeroSignal)
        ));

        let flat = raw(vec![Some(120.0); 300], 30.0);
        assert!(matches!(
            SignalConditioner::condition(&flat, &config),
            Err(ComputeError::ZeroVariance(_))
        ));
    }

    #[test]
    fn test_too_short() {
        let config = AnalysisConfig::default();
        let short = raw(pulse(1.2, 30.0, 3.0), 30.0);
        match SignalConditioner::condition(&short, &config) {
            Err(ComputeError::SignalTooShort { samples, required }) => {
                assert_eq!((samples, required), (90, 150));
            }
            other => panic!("expected SignalTooShort, got {other:?}"),
        }
    }

    #[test]
    fn test_chrom_channel() {
        let mut config = AnalysisConfig::default();
        config.signal.channel = SignalChannel::Chrom;
        let mut input = raw(pulse(1.2, 30.0, 20.0), 30.0);
        // Red carries less pulse than green
        let forehead = &mut input.traces[0];
        forehead.red = forehead
            .green
            .iter()
            .enumerate()
            .map(|(i, _)| Some(200.0 + 0.1 * (i as f64 / 30.0)))
            .collect();
        let out = SignalConditioner::condition(&input, &config).unwrap();
        assert_eq!(out.len(), 600);
        assert!((dsp::std_dev(&out.samples, 0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pos_channel_recovers_pulse() {
        let mut config = AnalysisConfig::default();
        config.signal.channel = SignalChannel::Pos;
        let (fps, n) = (30.0, 600);
        let mut forehead = ColorTrace::new(FaceRegion::Forehead);
        for i in 0..n {
            let t = i as f64 / fps;
            let pulse = (2.0 * PI * 1.2 * t).sin();
            // Illumination drift scales every channel together
            let light = 1.0 + 0.05 * (2.0 * PI * 0.1 * t).sin();
            forehead.push(Some([
                light * (200.0 + 0.4 * pulse),
                light * (150.0 + 1.5 * pulse),
                light * (120.0 + 0.2 * pulse),
            ]));
        }

        let out = SignalConditioner::condition(&RawSignal::from_trace(forehead, fps), &config).unwrap();
        assert_eq!(out.len(), n);
        assert!((dsp::std_dev(&out.samples, 0) - 1.0).abs() < 1e-9);
        assert!((dominant_hz(&out.samples, fps) - 1.2).abs() < 0.05);
    }

    #[test]
    fn test_fusion_favours_concentrated_spectrum() {
        let config = AnalysisConfig::default();
        let (fps, n) = (30.0, 600);
        let tone = |i: usize, f: f64| (2.0 * PI * f * i as f64 / fps).sin();
        // Forehead carries an equally strong second in-band tone
        let forehead: Vec<Option<f64>> = (0..n)
            .map(|i| Some(150.0 + 2.0 * tone(i, 1.2) + 2.0 * tone(i, 2.4)))
            .collect();
        let cheek: Vec<Option<f64>> = (0..n).map(|i| Some(140.0 + 2.0 * tone(i, 1.2))).collect();

        let input = RawSignal {
            traces: vec![
                trace(FaceRegion::Forehead, forehead),
                trace(FaceRegion::LeftCheek, cheek.clone()),
                trace(FaceRegion::RightCheek, cheek),
            ],
            fps,
            detected: vec![true; n],
        };
        let out = SignalConditioner::condition(&input, &config).unwrap();

        assert_eq!(out.regions.len(), 3);
        let total: f64 = out.regions.iter().map(|r| r.weight).sum();
        assert!((total - 1.0).abs() < 1e-12);
        let (front, left) = (out.regions[0], out.regions[1]);
        assert_eq!(front.region, FaceRegion::Forehead);
        assert!(left.quality > front.quality, "{left:?} vs {front:?}");
        assert!(left.weight > front.weight);
        assert!((out.regions[1].weight - out.regions[2].weight).abs() < 1e-12);
        assert!((dominant_hz(&out.samples, fps) - 1.2).abs() < 0.05);
    }

    #[test]
    fn test_unsampled_region_is_dropped() {
        let config = AnalysisConfig::default();
        let mut input = raw(pulse(1.2, 30.0, 20.0), 30.0);
        input.traces.push(trace(FaceRegion::RightCheek, vec![None; 600]));

        let out = SignalConditioner::condition(&input, &config).unwrap();
        assert_eq!(out.regions.len(), 1);
        assert_eq!(out.regions[0].region, FaceRegion::Forehead);
        assert_eq!(out.regions[0].weight, 1.0);
    }

    #[test]
    fn test_edge_samples_cover_filter_transient() {
        let config = AnalysisConfig::default();
        let out = SignalConditioner::condition(&raw(pulse(1.2, 30.0, 20.0), 30.0), &config).unwrap();
        let sig = &config.signal;
        let filter = BandpassFilter::design(sig.filter_order, sig.band_low_hz, sig.band_high_hz, 30.0).unwrap();

        assert_eq!(out.edge_samples, filter.settling_samples(0.02).max(filter.pad_len(600)));
        assert!(out.edge_samples > filter.pad_len(600));
        assert!(out.edge_samples <= 150);
    }
}
