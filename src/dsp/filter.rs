//! Butterworth band-pass filter
//!
//! Designed from the analog low-pass prototype (pre-warped band edges,
//! low-pass to band-pass transform, bilinear transform) and stored as cascaded
//! second-order sections. `filtfilt` runs the cascade forward and backward
//! with odd-extension padding and steady-state initial conditions, so the
//! result has zero phase shift.

use crate::error::ComputeError;
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::warn;

/// One biquad: `b = [b0, b1, b2]`, `a = [1, a1, a2]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Section {
    /// Steady-state transposed direct-form II state for a unit step input
    fn step_state(&self) -> [f64; 2] {
        let gain = self.dc_gain();
        let z2 = self.b[2] - self.a[2] * gain;
        let z1 = gain - self.b[0];
        [z1, z2]
    }

    fn dc_gain(&self) -> f64 {
        let den = self.a[0] + self.a[1] + self.a[2];
        if den.abs() < f64::EPSILON {
            0.0
        } else {
            (self.b[0] + self.b[1] + self.b[2]) / den
        }
    }

    /// Largest pole magnitude of `1 + a1 z^-1 + a2 z^-2`
    fn pole_radius(&self) -> f64 {
        let (a1, a2) = (self.a[1], self.a[2]);
        let disc = a1 * a1 - 4.0 * a2;
        if disc < 0.0 {
            a2.abs().sqrt()
        } else {
            let root = disc.sqrt();
            (-a1 + root).abs().max((-a1 - root).abs()) / 2.0
        }
    }

    fn response(&self, z_inv: Complex64) -> Complex64 {
        let z_inv2 = z_inv * z_inv;
        (self.b[0] + z_inv * self.b[1] + z_inv2 * self.b[2])
            / (self.a[0] + z_inv * self.a[1] + z_inv2 * self.a[2])
    }
}

/// Zero-phase Butterworth band-pass filter
#[derive(Debug, Clone)]
pub struct BandpassFilter {
    sections: Vec<Section>,
    low_hz: f64,
    high_hz: f64,
}

impl BandpassFilter {
    /// Design an order-`order` band-pass for sampling rate `fs`.
    ///
    /// A high edge at or above Nyquist is pulled to 95% of Nyquist.
    pub fn design(order: usize, low_hz: f64, high_hz: f64, fs: f64) -> Result<Self, ComputeError> {
        if order == 0 {
            return Err(ComputeError::InvalidConfig("filter order must be at least 1".to_string()));
        }
        if !(fs > 0.0) {
            return Err(ComputeError::InvalidConfig(format!("invalid sampling rate {fs}")));
        }
        let nyquist = fs / 2.0;
        let mut high_hz = high_hz;
        if high_hz >= nyquist {
            let clamped = nyquist * 0.95;
            warn!(high_hz, clamped, fs, "Band edge above Nyquist, clamping");
            high_hz = clamped;
        }
        if !(low_hz > 0.0 && low_hz < high_hz) {
            return Err(ComputeError::InvalidConfig(format!(
                "pass band {low_hz}-{high_hz} Hz is empty at {fs} fps"
            )));
        }

        // Pre-warp for the bilinear transform
        let fs2 = 2.0 * fs;
        let w1 = fs2 * (PI * low_hz / fs).tan();
        let w2 = fs2 * (PI * high_hz / fs).tan();
        let bw = w2 - w1;
        let w0_sq = w1 * w2;

        let mut upper = Vec::with_capacity(order);
        let mut real = Vec::new();
        for k in 0..order {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            let proto = Complex64::from_polar(1.0, theta);
            let half = proto * bw / 2.0;
            let disc = (half * half - w0_sq).sqrt();
            for s in [half + disc, half - disc] {
                let z = (fs2 + s) / (fs2 - s);
                if z.im.abs() <= 1e-12 * z.norm().max(1.0) {
                    real.push(z.re);
                } else if z.im > 0.0 {
                    upper.push(z);
                }
            }
        }
        real.sort_by(|a, b| a.total_cmp(b));

        let mut sections: Vec<Section> = upper
            .iter()
            .map(|p| Section {
                b: [1.0, 0.0, -1.0],
                a: [1.0, -2.0 * p.re, p.norm_sqr()],
            })
            .collect();
        for pair in real.chunks(2) {
            let (p1, p2) = (pair[0], pair.get(1).copied().unwrap_or(0.0));
            sections.push(Section {
                b: [1.0, 0.0, -1.0],
                a: [1.0, -(p1 + p2), p1 * p2],
            });
        }

        // Unity gain at the (digital) centre frequency
        let omega0 = 2.0 * (w0_sq.sqrt() / fs2).atan();
        let z_inv = Complex64::from_polar(1.0, -omega0);
        let magnitude = sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response(z_inv))
            .norm();
        if magnitude > 0.0 && magnitude.is_finite() {
            let per_section = (1.0 / magnitude).powf(1.0 / sections.len() as f64);
            for s in &mut sections {
                for b in &mut s.b {
                    *b *= per_section;
                }
            }
        }

        Ok(Self {
            sections,
            low_hz,
            high_hz,
        })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Effective pass band (Hz) after any Nyquist clamping
    pub fn band(&self) -> (f64, f64) {
        (self.low_hz, self.high_hz)
    }

    /// Magnitude response at `freq_hz`
    pub fn gain_at(&self, freq_hz: f64, fs: f64) -> f64 {
        let z_inv = Complex64::from_polar(1.0, -2.0 * PI * freq_hz / fs);
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response(z_inv))
            .norm()
    }

    /// Odd-extension length `filtfilt` pads an `n`-sample signal with
    pub fn pad_len(&self, n: usize) -> usize {
        (3 * (2 * self.sections.len() + 1)).min(n.saturating_sub(1))
    }

    /// Samples until the slowest pole has decayed to `tolerance` of its
    /// initial amplitude. Bounds how far the start-up transient reaches into
    /// either end of a `filtfilt` output.
    pub fn settling_samples(&self, tolerance: f64) -> usize {
        let radius = self
            .sections
            .iter()
            .map(Section::pole_radius)
            .fold(0.0, f64::max);
        if !(radius > 0.0 && radius < 1.0) || !(tolerance > 0.0 && tolerance < 1.0) {
            return 0;
        }
        (tolerance.ln() / radius.ln()).ceil() as usize
    }

    /// Single forward pass with explicit per-section state
    fn run(&self, signal: &[f64], state: &mut [[f64; 2]]) -> Vec<f64> {
        let mut out = signal.to_vec();
        for (section, z) in self.sections.iter().zip(state.iter_mut()) {
            for v in out.iter_mut() {
                let x = *v;
                let y = section.b[0] * x + z[0];
                z[0] = section.b[1] * x - section.a[1] * y + z[1];
                z[1] = section.b[2] * x - section.a[2] * y;
                *v = y;
            }
        }
        out
    }

    /// Per-section step-response state, scaled by the gain of preceding sections
    fn initial_state(&self) -> Vec<[f64; 2]> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|s| {
                let [z1, z2] = s.step_state();
                let state = [z1 * scale, z2 * scale];
                scale *= s.dc_gain();
                state
            })
            .collect()
    }

    /// Zero-phase forward-backward filtering
    pub fn filtfilt(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n < 2 {
            return signal.to_vec();
        }
        let padlen = self.pad_len(n);

        let first = signal[0];
        let last = signal[n - 1];
        let mut ext = Vec::with_capacity(n + 2 * padlen);
        ext.extend((1..=padlen).rev().map(|i| 2.0 * first - signal[i]));
        ext.extend_from_slice(signal);
        ext.extend((1..=padlen).map(|i| 2.0 * last - signal[n - 1 - i]));

        let zi = self.initial_state();

        let x0 = ext[0];
        let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * x0, z[1] * x0]).collect();
        let mut forward = self.run(&ext, &mut state);

        forward.reverse();
        let y0 = forward[0];
        let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * y0, z[1] * y0]).collect();
        let mut backward = self.run(&forward, &mut state);
        backward.reverse();

        backward[padlen..padlen + n].to_vec()
    }
}
