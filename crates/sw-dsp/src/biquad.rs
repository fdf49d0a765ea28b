//! Biquad filter implementation using Transposed Direct Form II
//!
//! Sections are normalised so that a0 = 1. Cascades run the sections in
//! series, which is how both the all-pass decorrelator and the Butterworth
//! crossover/lowpass filters are realised.

use num_complex::Complex64;
use std::f64::consts::PI;
use sw_core::{Sample, SwError, SwResult};

use crate::{MonoProcessor, Processor};

/// Biquad coefficients
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Calculate lowpass filter coefficients
    pub fn lowpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 - cos_omega) / 2.0;
        let b1 = 1.0 - cos_omega;
        let b2 = (1.0 - cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        Self::normalised([b0, b1, b2, a0, a1, a2])
    }

    /// Calculate highpass filter coefficients
    pub fn highpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 + cos_omega) / 2.0;
        let b1 = -(1.0 + cos_omega);
        let b2 = (1.0 + cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        Self::normalised([b0, b1, b2, a0, a1, a2])
    }

    /// Coefficients from a second-order-section row `[b0, b1, b2, a0, a1, a2]`
    pub fn from_sos(sos: [f64; 6]) -> SwResult<Self> {
        if sos[3] == 0.0 || !sos[3].is_finite() {
            return Err(SwError::InvalidParam(format!(
                "second-order section has invalid a0 = {}",
                sos[3]
            )));
        }
        Ok(Self::normalised(sos))
    }

    #[inline]
    fn normalised([b0, b1, b2, a0, a1, a2]: [f64; 6]) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Section as an SOS row with a0 = 1
    pub fn to_sos(&self) -> [f64; 6] {
        [self.b0, self.b1, self.b2, 1.0, self.a1, self.a2]
    }

    /// Bypass (unity gain, no filtering)
    pub fn bypass() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Complex response at normalised angular frequency `omega` (rad/sample)
    pub fn frequency_response(&self, omega: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = self.b0 + self.b1 * z1 + self.b2 * z2;
        let den = 1.0 + self.a1 * z1 + self.a2 * z2;
        num / den
    }
}

/// Transposed Direct Form II biquad filter
#[derive(Debug, Clone)]
pub struct BiquadTDF2 {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
}

impl BiquadTDF2 {
    pub fn new() -> Self {
        Self::with_coeffs(BiquadCoeffs::bypass())
    }

    pub fn with_coeffs(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    #[inline]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }
}

impl Default for BiquadTDF2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for BiquadTDF2 {
    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

impl MonoProcessor for BiquadTDF2 {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let output = self.coeffs.b0 * input + self.z1;
        self.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.z2;
        self.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }
}

// ============ Cascade ============

/// Series connection of biquad sections
#[derive(Debug, Clone, Default)]
pub struct BiquadCascade {
    sections: Vec<BiquadTDF2>,
}

impl BiquadCascade {
    pub fn new(coeffs: impl IntoIterator<Item = BiquadCoeffs>) -> Self {
        Self {
            sections: coeffs.into_iter().map(BiquadTDF2::with_coeffs).collect(),
        }
    }

    /// Build from SOS rows `[b0, b1, b2, a0, a1, a2]`
    pub fn from_sos(rows: &[[f64; 6]]) -> SwResult<Self> {
        let coeffs = rows
            .iter()
            .map(|row| BiquadCoeffs::from_sos(*row))
            .collect::<SwResult<Vec<_>>>()?;
        Ok(Self::new(coeffs))
    }

    /// Digital Butterworth lowpass of even `order` (bilinear, prewarped at `freq`)
    pub fn butterworth_lowpass(order: usize, freq: f64, sample_rate: f64) -> SwResult<Self> {
        let qs = butterworth_qs(order)?;
        check_cutoff(freq, sample_rate)?;
        Ok(Self::new(
            qs.into_iter()
                .map(|q| BiquadCoeffs::lowpass(freq, q, sample_rate)),
        ))
    }

    /// Digital Butterworth highpass of even `order`
    pub fn butterworth_highpass(order: usize, freq: f64, sample_rate: f64) -> SwResult<Self> {
        let qs = butterworth_qs(order)?;
        check_cutoff(freq, sample_rate)?;
        Ok(Self::new(
            qs.into_iter()
                .map(|q| BiquadCoeffs::highpass(freq, q, sample_rate)),
        ))
    }

    #[inline]
    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }

    pub fn coeffs(&self) -> impl Iterator<Item = &BiquadCoeffs> {
        self.sections.iter().map(BiquadTDF2::coeffs)
    }

    /// Filter a signal from zero state, leaving this cascade untouched
    pub fn filter(&self, input: &[Sample]) -> Vec<Sample> {
        let mut fresh = self.clone();
        fresh.reset();
        let mut out = input.to_vec();
        fresh.process_block(&mut out);
        out
    }

    /// Complex response at normalised angular frequency `omega` (rad/sample)
    pub fn frequency_response(&self, omega: f64) -> Complex64 {
        self.coeffs()
            .map(|c| c.frequency_response(omega))
            .product()
    }
}

impl Processor for BiquadCascade {
    fn reset(&mut self) {
        self.sections.iter_mut().for_each(Processor::reset);
    }
}

impl MonoProcessor for BiquadCascade {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.sections
            .iter_mut()
            .fold(input, |x, section| section.process_sample(x))
    }

    /// Section by section over the whole block (same result, better locality)
    fn process_block(&mut self, buffer: &mut [Sample]) {
        for section in &mut self.sections {
            for sample in buffer.iter_mut() {
                *sample = section.process_sample(*sample);
            }
        }
    }
}

/// Q of each second-order stage of an even-order Butterworth prototype
fn butterworth_qs(order: usize) -> SwResult<Vec<f64>> {
    if order == 0 || order % 2 != 0 {
        return Err(SwError::InvalidParam(format!(
            "Butterworth order must be even and positive, got {order}"
        )));
    }
    Ok((0..order / 2)
        .map(|k| {
            let theta = PI * (2 * k + 1) as f64 / (2 * order) as f64;
            1.0 / (2.0 * theta.cos())
        })
        .collect())
}

fn check_cutoff(freq: f64, sample_rate: f64) -> SwResult<()> {
    if !(freq > 0.0 && freq < sample_rate / 2.0) {
        return Err(SwError::InvalidParam(format!(
            "cutoff {freq} Hz outside (0, {}) Hz",
            sample_rate / 2.0
        )));
    }
    Ok(())
}
