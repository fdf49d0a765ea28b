//! Unit conversions and small signal helpers

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Machine epsilon, used as a floor for logarithms and divisions
pub const EPS: f64 = f64::EPSILON;

// ERB-rate constants (Glasberg & Moore, Hohmann 2002 eq. 16)
const ERB_L: f64 = 24.7;
const ERB_Q: f64 = 9.265;

/// Amplitude to decibels, floored at [`EPS`] so silence stays finite
#[inline]
pub fn db(x: f64) -> f64 {
    20.0 * x.abs().max(EPS).log10()
}

/// Power to decibels, floored at [`EPS`]
#[inline]
pub fn power_db(x: f64) -> f64 {
    10.0 * x.abs().max(EPS).log10()
}

#[inline]
pub fn db2lin(x: f64) -> f64 {
    10.0_f64.powf(x * 0.05)
}

/// Nearest whole number of samples for a duration in milliseconds
#[inline]
pub fn ms_to_samps(ms: f64, sample_rate: f64) -> usize {
    (ms * 1e-3 * sample_rate).round().max(0.0) as usize
}

#[inline]
pub fn samps_to_ms(samps: usize, sample_rate: f64) -> f64 {
    1e3 * samps as f64 / sample_rate
}

/// Frequency in Hz to ERB-rate
#[inline]
pub fn hertz_to_erbscale(frequency: f64) -> f64 {
    ERB_Q * (1.0 + frequency / (ERB_L * ERB_Q)).ln()
}

/// ERB-rate to frequency in Hz
#[inline]
pub fn erbscale_to_hertz(erb: f64) -> f64 {
    ((erb / ERB_Q).exp() - 1.0) * ERB_L * ERB_Q
}

/// Half of a Hann window, rising from 0 to 1 (or falling with `fade_out`).
///
/// The end points are included, so a fade of length 1 is `[0]` (or `[1]`).
pub fn half_hann_fade(length: usize, fade_out: bool) -> Vec<f64> {
    let offset = if fade_out { 1.0 } else { 0.0 };
    let denom = length.saturating_sub(1).max(1) as f64;
    (0..length)
        .map(|i| {
            let n = i as f64 / denom;
            0.5 - 0.5 * (PI * (n + offset)).cos()
        })
        .collect()
}

/// Root-mean-square level of a signal (0 for an empty slice)
pub fn rms(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
}

/// Evenly spaced values over `[start, stop]`, end point included
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Logarithmically spaced values between `start` and `stop` (both > 0)
pub fn geomspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    linspace(start.ln(), stop.ln(), num)
        .into_iter()
        .map(f64::exp)
        .collect()
}

/// Frequencies of the bins of a real FFT of length `n`
pub fn rfft_frequencies(n: usize, sample_rate: f64) -> Vec<f64> {
    (0..=n / 2)
        .map(|k| k as f64 * sample_rate / n as f64)
        .collect()
}

/// Decibel value
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Decibels(pub f64);

impl Decibels {
    pub const ZERO: Self = Self(0.0);

    #[inline]
    pub fn from_gain(gain: f64) -> Self {
        Self(db(gain))
    }

    #[inline]
    pub fn to_gain(self) -> f64 {
        db2lin(self.0)
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_floor() {
        assert!(db(0.0).is_finite());
        assert_relative_eq!(db(1.0), 0.0);
        assert_relative_eq!(db(-10.0), 20.0);
        assert_relative_eq!(db2lin(db(0.3)), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_ms_conversions() {
        assert_eq!(ms_to_samps(1.0, 48000.0), 48);
        assert_eq!(ms_to_samps(0.51, 1000.0), 1);
        assert_relative_eq!(samps_to_ms(480, 48000.0), 10.0);
    }

    #[test]
    fn test_erb_round_trip() {
        for f in [20.0, 440.0, 1000.0, 15000.0] {
            assert_relative_eq!(erbscale_to_hertz(hertz_to_erbscale(f)), f, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_half_hann_fade() {
        let fade_in = half_hann_fade(5, false);
        assert_relative_eq!(fade_in[0], 0.0);
        assert_relative_eq!(fade_in[2], 0.5, epsilon = 1e-12);
        assert_relative_eq!(fade_in[4], 1.0);

        let fade_out = half_hann_fade(5, true);
        assert_relative_eq!(fade_out[0], 1.0);
        assert_relative_eq!(fade_out[4], 0.0, epsilon = 1e-12);

        // Complementary fades sum to one
        for (a, b) in fade_in.iter().zip(&fade_out) {
            assert_relative_eq!(a + b, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert_relative_eq!(rms(&[1.0, -1.0, 1.0, -1.0]), 1.0);
    }

    #[test]
    fn test_spacing_helpers() {
        assert_eq!(linspace(0.0, 1.0, 3), vec![0.0, 0.5, 1.0]);
        let g = geomspace(10.0, 1000.0, 3);
        assert_relative_eq!(g[1], 100.0, epsilon = 1e-9);
        let f = rfft_frequencies(8, 8.0);
        assert_eq!(f, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }
}
