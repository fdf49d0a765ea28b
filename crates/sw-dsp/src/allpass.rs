//! Randomised all-pass decorrelator
//!
//! Each channel is passed through a long cascade of second-order all-pass
//! sections whose poles are drawn at random. Pole radii bound the group
//! delay of every section, and pole angles are warped towards low
//! frequencies so that the phase randomisation is spread roughly evenly on
//! an ERB scale.

use num_complex::Complex64;
use rand::Rng;
use std::f64::consts::PI;
use sw_core::{ms_to_samps, Sample, StereoBuffer, SwError, SwResult};

use crate::biquad::{BiquadCascade, BiquadCoeffs};

/// Default number of biquad sections per channel
pub const DEFAULT_NUM_BIQUADS: usize = 200;

/// Default upper bound on the group delay of a section
pub const DEFAULT_MAX_GROUP_DELAY_MS: f64 = 30.0;

/// Smallest pole radius drawn for a section
pub const MIN_POLE_RADIUS: f64 = 0.5;

/// Largest pole radius allowed for a given group delay bound
#[inline]
pub fn max_pole_radius(max_group_delay_ms: f64) -> f64 {
    let d = max_group_delay_ms * 1e-3;
    (1.0 - d) / (1.0 + d)
}

/// Warping factor that maps a uniform angle grid onto an ERB-like grid
#[inline]
pub fn erb_warp_factor(sample_rate: f64) -> f64 {
    0.7464 * ((2.0 / PI) * (0.1418 * sample_rate).atan()).sqrt() + 0.03237
}

/// First-order all-pass frequency warping of a pole angle.
///
/// `rho` in (0, 1) zooms in on low frequencies.
#[inline]
pub fn warp_pole_angle(rho: f64, angle: f64) -> f64 {
    let z = Complex64::from_polar(1.0, angle);
    ((rho + z) / (1.0 + rho * z)).ln().im
}

/// Cascade of all-pass biquads with its pole parameters
#[derive(Debug, Clone)]
pub struct AllpassCascade {
    cascade: BiquadCascade,
    radii: Vec<f64>,
    angles: Vec<f64>,
}

impl AllpassCascade {
    /// Build from pole radii and (already warped) angles.
    ///
    /// Each pole p gives numerator `[|p|^2, -2 Re p, 1]` and denominator
    /// `[1, -2 Re p, |p|^2]`, i.e. a conjugate pole pair with mirrored zeros.
    pub fn from_poles(radii: Vec<f64>, angles: Vec<f64>) -> SwResult<Self> {
        if radii.len() != angles.len() {
            return Err(SwError::InvalidParam(format!(
                "{} pole radii but {} pole angles",
                radii.len(),
                angles.len()
            )));
        }
        if let Some(r) = radii.iter().find(|r| !(0.0..1.0).contains(*r)) {
            return Err(SwError::InvalidParam(format!(
                "pole radius {r} is not inside the unit circle"
            )));
        }

        let coeffs = radii.iter().zip(&angles).map(|(&r, &theta)| {
            let pole = Complex64::from_polar(r, theta);
            let mag_sq = pole.norm_sqr();
            let re2 = -2.0 * pole.re;
            BiquadCoeffs {
                b0: mag_sq,
                b1: re2,
                b2: 1.0,
                a1: re2,
                a2: mag_sq,
            }
        });

        Ok(Self {
            cascade: BiquadCascade::new(coeffs),
            radii,
            angles,
        })
    }

    #[inline]
    pub fn num_sections(&self) -> usize {
        self.cascade.num_sections()
    }

    /// Pole radii, one per section
    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    /// Warped pole angles in radians, one per section
    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    /// SOS rows `[b0, b1, b2, a0, a1, a2]`
    pub fn sos(&self) -> Vec<[f64; 6]> {
        self.cascade.coeffs().map(BiquadCoeffs::to_sos).collect()
    }

    /// Filter a signal from zero state
    pub fn apply(&self, signal: &[Sample]) -> Vec<Sample> {
        self.cascade.filter(signal)
    }

    /// Impulse response truncated to `length_ms`
    pub fn impulse_response(&self, sample_rate: f64, length_ms: f64) -> Vec<Sample> {
        let len = ms_to_samps(length_ms, sample_rate);
        let mut impulse = vec![0.0; len];
        if let Some(first) = impulse.first_mut() {
            *first = 1.0;
        }
        self.apply(&impulse)
    }

    /// Complex response at normalised angular frequency `omega` (rad/sample)
    pub fn frequency_response(&self, omega: f64) -> Complex64 {
        self.cascade.frequency_response(omega)
    }
}

/// Draw a random decorrelating all-pass cascade.
///
/// Radii are uniform in `[0.5, r_max)` with `r_max` set by
/// `max_group_delay_ms`; angles are uniform in `[0, 2pi)` and then warped.
pub fn design_decorrelating_cascade<R: Rng + ?Sized>(
    rng: &mut R,
    sample_rate: f64,
    num_sections: usize,
    max_group_delay_ms: f64,
) -> SwResult<AllpassCascade> {
    let r_max = max_pole_radius(max_group_delay_ms);
    if !(r_max > MIN_POLE_RADIUS) {
        return Err(SwError::InvalidParam(format!(
            "max group delay of {max_group_delay_ms} ms leaves no room for pole radii above {MIN_POLE_RADIUS}"
        )));
    }
    if !(sample_rate > 0.0) {
        return Err(SwError::InvalidParam(format!(
            "sample rate must be positive, got {sample_rate}"
        )));
    }

    let rho = erb_warp_factor(sample_rate);
    let radii: Vec<f64> = (0..num_sections)
        .map(|_| rng.random_range(MIN_POLE_RADIUS..r_max))
        .collect();
    let angles: Vec<f64> = (0..num_sections)
        .map(|_| warp_pole_angle(rho, rng.random_range(0.0..2.0 * PI)))
        .collect();

    AllpassCascade::from_poles(radii, angles)
}

/// Run `signal` through the sections of `cascade` in series
pub fn apply_cascade(cascade: &AllpassCascade, signal: &[Sample]) -> Vec<Sample> {
    cascade.apply(signal)
}

/// Decorrelate a stereo signal with one independently drawn cascade per channel
pub fn process_allpass<R: Rng + ?Sized>(
    rng: &mut R,
    input: &StereoBuffer,
    sample_rate: f64,
    num_biquads: usize,
    max_group_delay_ms: f64,
) -> SwResult<StereoBuffer> {
    log::info!(
        "All-pass decorrelation: {num_biquads} sections per channel, max group delay {max_group_delay_ms} ms"
    );
    input.try_map_channels(|_, channel| {
        let cascade =
            design_decorrelating_cascade(rng, sample_rate, num_biquads, max_group_delay_ms)?;
        Ok(cascade.apply(channel))
    })
}
