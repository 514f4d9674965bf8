//! Welch power spectral density

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// One-sided power spectral density
#[derive(Debug, Clone)]
pub struct Psd {
    pub frequencies: Vec<f64>,
    pub power: Vec<f64>,
}

impl Psd {
    /// Index range of bins with `low <= f <= high`
    pub fn band_indices(&self, low_hz: f64, high_hz: f64) -> std::ops::Range<usize> {
        let start = self.frequencies.partition_point(|f| *f < low_hz);
        let end = self.frequencies.partition_point(|f| *f <= high_hz);
        start..end.max(start)
    }

    /// Total power over `[low, high]`
    pub fn band_power(&self, low_hz: f64, high_hz: f64) -> f64 {
        self.power[self.band_indices(low_hz, high_hz)].iter().sum()
    }
}

/// Estimate the PSD of `signal` sampled at `fs`.
///
/// Segments of `segment_len` samples (capped at the signal length) advance by
/// `segment_len * (1 - overlap)`, each is mean-removed and Hann-windowed, and
/// zero-padded to at least `nfft_min` points. Density scaling, one-sided.
pub fn welch(signal: &[f64], fs: f64, segment_len: usize, overlap: f64, nfft_min: usize) -> Psd {
    let n = signal.len();
    if n == 0 || fs <= 0.0 {
        return Psd {
            frequencies: Vec::new(),
            power: Vec::new(),
        };
    }
    let nperseg = segment_len.clamp(1, n);
    let noverlap = ((nperseg as f64 * overlap).floor() as usize).min(nperseg - 1);
    let step = nperseg - noverlap;
    let nfft = nperseg.next_power_of_two().max(nfft_min.next_power_of_two());

    // Periodic Hann
    let window: Vec<f64> = if nperseg == 1 {
        vec![1.0]
    } else {
        (0..nperseg)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / nperseg as f64).cos())
            .collect()
    };
    let window_power: f64 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (fs * window_power);

    let bins = nfft / 2 + 1;
    let mut power = vec![0.0; bins];
    let fft = FftPlanner::<f64>::new().plan_fft_forward(nfft);
    let mut buffer = vec![Complex::new(0.0, 0.0); nfft];

    let mut segments = 0usize;
    let mut start = 0usize;
    while start + nperseg <= n {
        let segment = &signal[start..start + nperseg];
        let seg_mean = super::mean(segment);
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = if i < nperseg {
                Complex::new((segment[i] - seg_mean) * window[i], 0.0)
            } else {
                Complex::new(0.0, 0.0)
            };
        }
        fft.process(&mut buffer);
        for (k, p) in power.iter_mut().enumerate() {
            *p += buffer[k].norm_sqr();
        }
        segments += 1;
        start += step;
    }

    let last = bins - 1;
    for (k, p) in power.iter_mut().enumerate() {
        *p *= scale / segments as f64;
        let edge = k == 0 || (k == last && nfft % 2 == 0);
        if !edge {
            *p *= 2.0;
        }
    }

    let frequencies = (0..bins).map(|k| k as f64 * fs / nfft as f64).collect();
    Psd { frequencies, power }
}
