//! Spherical-head HRTF model
//!
//! One-pole/one-zero head shadowing filter plus a pure delay per ear, see
//! Romblom & Bahu, "A Revision and Objective Evaluation of the 1-Pole 1-Zero
//! Spherical Head Shadowing Filter", AES AVAR 2018.
//!
//! Azimuths are in degrees, positive towards the left ear. The incidence
//! angle is `90 - az` for the left ear and `90 + az` for the right ear.

use std::f64::consts::PI;

use ndarray::{Array1, Array2, Array3, ArrayView1, Axis, Ix2};
use num_complex::Complex64;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use sw_core::{SwError, EPS, LEFT, NUM_CHANNELS, RIGHT};

use crate::cues::{ild_from_hrtf, ipd_from_hrtf};
use crate::{SpatialError, SpatialResult};

/// Nominal head radius in metres
pub const DEFAULT_HEAD_RADIUS: f64 = 0.075;

/// Speed of sound in m/s
pub const DEFAULT_SPEED_OF_SOUND: f64 = 340.0;

/// Minimum zero-control value of the Brown-Duda fit
const BROWN_DUDA_ALPHA_MIN: f64 = 0.1;

/// Incidence angle (degrees) where the Brown-Duda fit reaches its minimum
const BROWN_DUDA_THETA_MIN: f64 = 150.0;

// ============ Head model ============

/// Fit for the zero of the head shadowing filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroFit {
    /// Hyperbolic tangent fit (Romblom & Bahu)
    #[default]
    Tanh,
    /// Cosine fit (Brown & Duda)
    BrownDuda,
}

impl ZeroFit {
    /// Zero-location control `alpha` at an incidence angle in degrees
    pub fn zero_control(self, incidence_deg: f64) -> f64 {
        match self {
            Self::Tanh => 1.15 - 0.85 * (1.7 * (incidence_deg - 97.4)).tanh(),
            Self::BrownDuda => {
                let half_min = BROWN_DUDA_ALPHA_MIN / 2.0;
                let angle = (incidence_deg / BROWN_DUDA_THETA_MIN * 180.0).to_radians();
                (1.0 + half_min) + (1.0 - half_min) * angle.cos()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadModel {
    /// Head radius in metres
    pub head_radius: f64,
    /// Speed of sound in m/s
    pub speed_of_sound: f64,
    pub zero_fit: ZeroFit,
}

impl Default for HeadModel {
    fn default() -> Self {
        Self {
            head_radius: DEFAULT_HEAD_RADIUS,
            speed_of_sound: DEFAULT_SPEED_OF_SOUND,
            zero_fit: ZeroFit::Tanh,
        }
    }
}

impl HeadModel {
    /// Arrival delay in seconds relative to the head centre
    pub fn time_delay(&self, incidence_deg: f64) -> f64 {
        let scale = self.head_radius / self.speed_of_sound;
        if incidence_deg.abs() < 90.0 {
            -scale * incidence_deg.to_radians().cos()
        } else {
            scale * (incidence_deg.abs() - 90.0).to_radians()
        }
    }

    /// Complex response at `freq_hz` for one incidence angle
    pub fn response(&self, incidence_deg: f64, freq_hz: f64) -> Complex64 {
        let omega0 = self.speed_of_sound / self.head_radius;
        let alpha = self.zero_fit.zero_control(incidence_deg);
        let jw = Complex64::new(0.0, 2.0 * PI * freq_hz / (2.0 * omega0));
        let shadow = (1.0 + alpha * jw) / (1.0 + jw);
        let phase = 2.0 * PI * self.time_delay(incidence_deg) * freq_hz;
        shadow * Complex64::from_polar(1.0, -phase)
    }

    fn validate(&self) -> SpatialResult<()> {
        if !(self.head_radius > 0.0 && self.speed_of_sound > 0.0) {
            return Err(SpatialError::InvalidParam(format!(
                "head radius and speed of sound must be positive: {self:?}"
            )));
        }
        Ok(())
    }
}

/// Incidence angle on `ear` for a source at `azimuth_deg`
#[inline]
pub fn incidence_angle(azimuth_deg: f64, ear: usize) -> f64 {
    if ear == LEFT {
        90.0 - azimuth_deg
    } else {
        90.0 + azimuth_deg
    }
}

// ============ HRTF set ============

/// HRTFs and interaural cues of a head model over a grid of directions
#[derive(Debug, Clone, PartialEq)]
pub struct HrtfParams {
    /// Directions of arrival in degrees, strictly ascending
    pub doas: Array1<f64>,
    /// Frequencies in Hz, ascending
    pub freqs: Array1<f64>,
    /// `[doa, freq, ear]`
    pub hrtfs: Array3<Complex64>,
    /// `[doa, time, ear]`, centred by a half-length circular shift
    pub hrirs: Array3<f64>,
    /// `|H_R| / |H_L|`, `[doa, freq]`
    pub ild: Array2<f64>,
    /// Unwrapped `angle(H_R / H_L)`, `[doa, freq]`
    pub ipd: Array2<f64>,
    /// `-ipd / (2 pi f)` in seconds, `[doa, freq]`
    pub itd: Array2<f64>,
}

impl HrtfParams {
    #[inline]
    pub fn num_doas(&self) -> usize {
        self.doas.len()
    }

    #[inline]
    pub fn num_freqs(&self) -> usize {
        self.freqs.len()
    }

    #[inline]
    pub fn num_time_samples(&self) -> usize {
        self.hrirs.len_of(Axis(1))
    }

    /// HRIR of one ear for the DoA at `doa_index`
    pub fn hrir(&self, doa_index: usize, ear: usize) -> ArrayView1<'_, f64> {
        self.hrirs.slice(ndarray::s![doa_index, .., ear])
    }

    /// Index of the DoA closest to `azimuth_deg` (first one on ties)
    pub fn closest_doa(&self, azimuth_deg: f64) -> usize {
        self.doas
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |(best, dist), (i, doa)| {
                let d = (doa - azimuth_deg).abs();
                if d < dist { (i, d) } else { (best, dist) }
            })
            .0
    }
}

fn strictly_ascending(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] < w[1])
}

/// Compute the HRTF set of `model` for every DoA and frequency.
///
/// HRIRs are the inverse real FFT of length `num_time_samples` of each
/// transfer function, circularly shifted by half their length.
pub fn compute(
    doas_deg: &[f64],
    freqs_hz: &[f64],
    num_time_samples: usize,
    model: &HeadModel,
) -> SpatialResult<HrtfParams> {
    if doas_deg.is_empty() || !strictly_ascending(doas_deg) {
        return Err(SpatialError::InvalidParam(
            "DoAs must be non-empty and strictly ascending".into(),
        ));
    }
    if freqs_hz.is_empty() || freqs_hz[0] < 0.0 || !strictly_ascending(freqs_hz) {
        return Err(SpatialError::InvalidParam(
            "frequencies must be non-empty, non-negative and strictly ascending".into(),
        ));
    }
    if num_time_samples < 2 {
        return Err(SpatialError::InvalidParam(format!(
            "HRIRs need at least 2 samples, got {num_time_samples}"
        )));
    }
    model.validate()?;

    let (num_doas, num_freqs) = (doas_deg.len(), freqs_hz.len());
    let hrtfs = Array3::from_shape_fn((num_doas, num_freqs, NUM_CHANNELS), |(d, f, ear)| {
        model.response(incidence_angle(doas_deg[d], ear), freqs_hz[f])
    });

    let mut hrirs = Array3::<f64>::zeros((num_doas, num_time_samples, NUM_CHANNELS));
    let mut planner = RealFftPlanner::<f64>::new();
    let c2r = planner.plan_fft_inverse(num_time_samples);
    let mut spectrum = c2r.make_input_vec();
    let mut time = c2r.make_output_vec();
    let scale = 1.0 / num_time_samples as f64;

    for d in 0..num_doas {
        for ear in [LEFT, RIGHT] {
            spectrum.fill(Complex64::new(0.0, 0.0));
            for (bin, h) in spectrum.iter_mut().zip(hrtfs.slice(ndarray::s![d, .., ear])) {
                *bin = *h;
            }
            // DC and Nyquist of a real signal are real
            spectrum[0].im = 0.0;
            if num_time_samples % 2 == 0 {
                if let Some(last) = spectrum.last_mut() {
                    last.im = 0.0;
                }
            }
            c2r.process(&mut spectrum, &mut time)
                .map_err(|e| SwError::Precondition(format!("inverse FFT failed: {e}")))?;

            time.rotate_right(num_time_samples / 2);
            for (dst, src) in hrirs.slice_mut(ndarray::s![d, .., ear]).iter_mut().zip(&time) {
                *dst = src * scale;
            }
        }
    }

    let ild = ild_from_hrtf(hrtfs.view().into_dyn(), 2, false)?;
    let ipd = ipd_from_hrtf(hrtfs.view().into_dyn(), 2, true)?;
    let to_2d = |a: ndarray::ArrayD<f64>| {
        a.into_dimensionality::<Ix2>()
            .map_err(|e| SpatialError::InvalidShape(e.to_string()))
    };
    let (ild, ipd) = (to_2d(ild)?, to_2d(ipd)?);

    let freqs = Array1::from(freqs_hz.to_vec());
    let mut itd = ipd.clone();
    for mut row in itd.rows_mut() {
        for (value, f) in row.iter_mut().zip(freqs.iter()) {
            *value = -*value / (2.0 * PI * f + EPS);
        }
    }

    log::debug!(
        "HRTF set: {num_doas} DoAs x {num_freqs} bins, {num_time_samples}-sample HRIRs"
    );

    Ok(HrtfParams {
        doas: Array1::from(doas_deg.to_vec()),
        freqs,
        hrtfs,
        hrirs,
        ild,
        ipd,
        itd,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use sw_core::rfft_frequencies;

    fn azimuths() -> Vec<f64> {
        (-90..=90).step_by(10).map(f64::from).collect()
    }

    #[test]
    fn test_left_right_symmetry() {
        let doas = azimuths();
        let freqs = rfft_frequencies(256, 48000.0);
        let set = compute(&doas, &freqs, 256, &HeadModel::default()).unwrap();

        let n = doas.len();
        for d in 0..n {
            let mirror = n - 1 - d;
            for f in 0..freqs.len() {
                let a = set.hrtfs[[d, f, LEFT]];
                let b = set.hrtfs[[mirror, f, RIGHT]];
                assert_relative_eq!(a.re, b.re, epsilon = 1e-12);
                assert_relative_eq!(a.im, b.im, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_frontal_source_has_no_cues() {
        let freqs = rfft_frequencies(128, 48000.0);
        let set = compute(&[0.0], &freqs, 128, &HeadModel::default()).unwrap();
        for f in 0..freqs.len() {
            assert_relative_eq!(set.ild[[0, f]], 1.0, epsilon = 1e-9);
            assert_relative_eq!(set.ipd[[0, f]], 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_itd_sign_and_magnitude() {
        let model = HeadModel::default();
        let freqs: Vec<f64> = (1..=20).map(|k| k as f64 * 25.0).collect();
        let set = compute(&[-60.0, 60.0], &freqs, 64, &model).unwrap();

        // Low-frequency ITD of a lateral source: right ear later for a left source
        let itd_left_source = set.itd[[1, 0]];
        assert!(itd_left_source > 0.0);
        assert_relative_eq!(set.itd[[0, 0]], -itd_left_source, epsilon = 1e-12);

        let expected = model.time_delay(incidence_angle(60.0, RIGHT))
            - model.time_delay(incidence_angle(60.0, LEFT));
        // Head shadowing stretches the low-frequency ITD beyond the geometric delay
        assert!(itd_left_source > 0.8 * expected && itd_left_source < 2.0 * expected);
    }

    #[test]
    fn test_hrir_energy_centred() {
        let freqs = rfft_frequencies(512, 48000.0);
        let set = compute(&[30.0], &freqs, 512, &HeadModel::default()).unwrap();
        let hrir = set.hrir(0, LEFT);
        let peak = hrir
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak as isize - 256).abs() < 16, "peak at {peak}");
    }

    #[test]
    fn test_zero_fits() {
        // Tanh fit falls from ~2 towards ~0.3 across the shadow boundary
        assert!(ZeroFit::Tanh.zero_control(0.0) > 1.9);
        assert!(ZeroFit::Tanh.zero_control(180.0) < 0.31);
        assert_relative_eq!(ZeroFit::BrownDuda.zero_control(0.0), 2.0, epsilon = 1e-12);
        assert_relative_eq!(
            ZeroFit::BrownDuda.zero_control(150.0),
            BROWN_DUDA_ALPHA_MIN,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_input_validation() {
        let model = HeadModel::default();
        assert!(compute(&[10.0, 0.0], &[100.0], 16, &model).is_err());
        assert!(compute(&[0.0], &[-1.0, 100.0], 16, &model).is_err());
        assert!(compute(&[0.0], &[100.0], 1, &model).is_err());
        let bad = HeadModel {
            head_radius: 0.0,
            ..model
        };
        assert!(compute(&[0.0], &[100.0], 16, &bad).is_err());
    }

    #[test]
    fn test_closest_doa() {
        let set = compute(&azimuths(), &[100.0, 200.0], 16, &HeadModel::default()).unwrap();
        assert_eq!(set.closest_doa(31.0), 12);
        assert_eq!(set.closest_doa(-200.0), 0);
    }
}
