//! Polynomial detrending by least squares

use nalgebra::{DMatrix, DVector};
use tracing::warn;

/// Remove the least-squares polynomial of `order` from `signal`.
///
/// Order 0 removes the mean. Time is mapped onto [-1, 1] to keep the
/// Vandermonde matrix well conditioned.
pub fn detrend(signal: &[f64], order: usize) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }
    let mean = super::mean(signal);
    if order == 0 || n <= order + 1 {
        return signal.iter().map(|v| v - mean).collect();
    }

    let cols = order + 1;
    let t: Vec<f64> = (0..n)
        .map(|i| 2.0 * i as f64 / (n - 1) as f64 - 1.0)
        .collect();
    let design = DMatrix::from_fn(n, cols, |row, col| t[row].powi(col as i32));
    let y = DVector::from_column_slice(signal);

    match design.svd(true, true).solve(&y, 1e-12) {
        Ok(coeffs) => signal
            .iter()
            .zip(&t)
            .map(|(v, ti)| {
                let fit: f64 = (0..cols).map(|c| coeffs[c] * ti.powi(c as i32)).sum();
                v - fit
            })
            .collect(),
        Err(e) => {
            warn!(error = e, "Polynomial fit failed, removing mean only");
            signal.iter().map(|v| v - mean).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_trend_removed() {
        let signal: Vec<f64> = (0..200).map(|i| 3.0 + 0.05 * i as f64).collect();
        let out = detrend(&signal, 1);
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_quadratic_trend_keeps_oscillation() {
        let signal: Vec<f64> = (0..300)
            .map(|i| {
                let t = i as f64 / 30.0;
                0.02 * t * t - 0.1 * t + (2.0 * std::f64::consts::PI * 1.2 * t).sin()
            })
            .collect();
        let out = detrend(&signal, 2);
        let m = crate::dsp::mean(&out);
        assert!(m.abs() < 0.05);
        let peak = out.iter().cloned().fold(f64::MIN, f64::max);
        assert!(peak > 0.8 && peak < 1.2);
    }

    #[test]
    fn test_order_zero_is_mean_removal() {
        let out = detrend(&[1.0, 2.0, 3.0], 0);
        assert_eq!(out, vec![-1.0, 0.0, 1.0]);
    }
}
