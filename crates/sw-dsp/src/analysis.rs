//! Signal analysis: cross-correlation, envelopes, coherence, IR levels
//!
//! These are whole-signal measurements used by the ITD estimator, the
//! wideners' correlation readouts and the velvet-noise energy normalisation.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use sw_core::{db, db2lin, half_hann_fade, rms, Sample, SwError, SwResult};

use crate::biquad::BiquadCascade;
use crate::convolution::fft_convolve;

// ============ Constants ============

/// Target level of [`normalise_irs`], in dB
pub const DEFAULT_NORM_DB: f64 = -18.0;

/// Band resolution of the wideners' coherence readouts
pub const DEFAULT_BANDS_PER_OCTAVE: usize = 3;

/// Lowest band centre considered by [`fractional_octave_coherence`], in Hz
const LOWEST_BAND_HZ: f64 = 20.0;

/// Band centres are `REFERENCE_BAND_HZ * 2^(k / bands_per_octave)`
const REFERENCE_BAND_HZ: f64 = 1000.0;

/// Order of each band edge filter
const BAND_EDGE_ORDER: usize = 4;

/// Window before/after the IR peak used by [`normalise_irs`], in seconds
pub const DEFAULT_PEAK_WINDOW: (f64, f64) = (5e-4, 1e-3);

// ============ Cross-correlation ============

/// Cross-correlation of `a` and `b` over lags `-max_lag..=max_lag`.
///
/// `cc[k] = sum_n a[n] * b[n + lags[k]]`, so a positive lag means `b` lags
/// behind `a`. Lags are returned in ascending order. `max_lag` is clamped to
/// `max(a.len(), b.len()) - 1`. With `norm`, both signals must be the same
/// length and the result is divided by `|a| * |b|`.
pub fn xcorr(
    a: &[Sample],
    b: &[Sample],
    max_lag: Option<usize>,
    norm: bool,
) -> SwResult<(Vec<f64>, Vec<isize>)> {
    if a.is_empty() || b.is_empty() {
        return Err(SwError::InvalidShape(
            "cross-correlation needs two non-empty signals".into(),
        ));
    }
    if norm && a.len() != b.len() {
        return Err(SwError::InvalidShape(format!(
            "normalised cross-correlation needs equal lengths, got {} and {}",
            a.len(),
            b.len()
        )));
    }

    let max_lag_default = a.len().max(b.len()) - 1;
    let lag_range = max_lag.map_or(max_lag_default, |l| l.min(max_lag_default)) as isize;

    // conv(b, reverse(a))[k] holds the lag k - (len(a) - 1)
    let reversed: Vec<Sample> = a.iter().rev().copied().collect();
    let full = fft_convolve(b, &reversed)?;
    let zero_lag = a.len() as isize - 1;

    let lags: Vec<isize> = (-lag_range..=lag_range).collect();
    let mut cc: Vec<f64> = lags
        .iter()
        .map(|&lag| {
            let ix = lag + zero_lag;
            if ix < 0 {
                0.0
            } else {
                full.get(ix as usize).copied().unwrap_or(0.0)
            }
        })
        .collect();

    if norm {
        let energy = |x: &[Sample]| x.iter().map(|v| v * v).sum::<f64>().sqrt();
        let norm_val = energy(a) * energy(b);
        if norm_val > 0.0 {
            cc.iter_mut().for_each(|c| *c /= norm_val);
        }
    }

    Ok((cc, lags))
}

// ============ Peak interpolation ============

/// Parabola `y(x) = a (x - p)^2 + y` fitted through three samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParabolicPeak {
    /// Offset of the vertex from the centre sample, in samples
    pub p: f64,
    /// Height of the vertex
    pub y: f64,
    /// Half-curvature
    pub a: f64,
}

/// Quadratic interpolation of a peak through `(-1, ym1)`, `(0, y0)`, `(1, yp1)`.
///
/// `y0` must be a strict local maximum or minimum of the three samples.
pub fn parabolic_peak_interp(ym1: f64, y0: f64, yp1: f64) -> SwResult<ParabolicPeak> {
    let rising = ym1 < y0 && y0 <= yp1;
    let falling = ym1 > y0 && y0 >= yp1;
    let denom = 2.0 * (2.0 * y0 - yp1 - ym1);
    if rising || falling || denom == 0.0 {
        return Err(SwError::Precondition(format!(
            "y0 must be the largest or the smallest of the three samples, got ym1={ym1}, y0={y0}, yp1={yp1}"
        )));
    }

    let p = (yp1 - ym1) / denom;
    Ok(ParabolicPeak {
        p,
        y: y0 - 0.25 * (ym1 - yp1) * p,
        a: 0.5 * (ym1 - 2.0 * y0 + yp1),
    })
}

// ============ Envelope ============

/// Magnitude of the analytic signal (Hilbert envelope)
pub fn analytic_envelope(signal: &[Sample]) -> Vec<Sample> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex<f64>> = signal.iter().map(|&x| Complex::new(x, 0.0)).collect();
    fft.process(&mut buffer);

    // Keep DC (and Nyquist), double positive frequencies, drop negative ones
    let half = n / 2;
    for (k, bin) in buffer.iter_mut().enumerate() {
        let gain = if k == 0 || (n % 2 == 0 && k == half) {
            1.0
        } else if k < (n + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *bin *= gain;
    }

    ifft.process(&mut buffer);
    let scale = 1.0 / n as f64;
    buffer.iter().map(|c| c.norm() * scale).collect()
}

// ============ Coherence ============

/// Normalised zero-lag correlation magnitude of two signals, in [0, 1]
pub fn interchannel_coherence(x: &[Sample], y: &[Sample]) -> f64 {
    let (mut xy, mut xx, mut yy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y) {
        xy += a * b;
        xx += a * a;
        yy += b * b;
    }
    let denom = (xx * yy).sqrt();
    if denom > 0.0 {
        xy.abs() / denom
    } else {
        0.0
    }
}

/// Inter-channel coherence per fractional-octave band
#[derive(Debug, Clone, PartialEq)]
pub struct BandCoherence {
    pub centre_hz: Vec<f64>,
    pub coherence: Vec<f64>,
}

impl BandCoherence {
    pub fn len(&self) -> usize {
        self.coherence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coherence.is_empty()
    }

    /// `(centre_hz, coherence)` pairs, lowest band first
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.centre_hz.iter().copied().zip(self.coherence.iter().copied())
    }
}

/// Base-2 band centres between `lo` and `hi` Hz, inclusive.
pub fn fractional_octave_centres(bands_per_octave: usize, lo: f64, hi: f64) -> Vec<f64> {
    if bands_per_octave == 0 || !(lo > 0.0 && lo <= hi) {
        return Vec::new();
    }
    let bpo = bands_per_octave as f64;
    let first = (bpo * (lo / REFERENCE_BAND_HZ).log2()).ceil() as i64;
    let last = (bpo * (hi / REFERENCE_BAND_HZ).log2()).floor() as i64;
    (first..=last)
        .map(|k| REFERENCE_BAND_HZ * 2f64.powf(k as f64 / bpo))
        .collect()
}

/// Coherence of `left` and `right` in fractional-octave bands from 20 Hz to
/// Nyquist.
///
/// Each band is a Butterworth highpass/lowpass pair with edges at
/// `fc * 2^(+-1 / (2 * bands_per_octave))`; the lowpass is dropped when the
/// upper edge reaches Nyquist. Per band the value is the normalised zero-lag
/// correlation magnitude, as in [`interchannel_coherence`].
pub fn fractional_octave_coherence(
    left: &[Sample],
    right: &[Sample],
    sample_rate: f64,
    bands_per_octave: usize,
) -> SwResult<BandCoherence> {
    if left.len() != right.len() {
        return Err(SwError::InvalidShape(format!(
            "channels differ in length: {} vs {}",
            left.len(),
            right.len()
        )));
    }
    if bands_per_octave == 0 || !(sample_rate > 0.0) {
        return Err(SwError::InvalidParam(format!(
            "need a positive band count and sample rate, got {bands_per_octave} bands at {sample_rate} Hz"
        )));
    }

    let nyquist = sample_rate / 2.0;
    let centre_hz = fractional_octave_centres(bands_per_octave, LOWEST_BAND_HZ, nyquist);
    let half_band = 2f64.powf(1.0 / (2 * bands_per_octave) as f64);

    let mut coherence = Vec::with_capacity(centre_hz.len());
    for &fc in &centre_hz {
        let highpass = BiquadCascade::butterworth_highpass(BAND_EDGE_ORDER, fc / half_band, sample_rate)?;
        let upper = fc * half_band;
        let lowpass = if upper < nyquist {
            Some(BiquadCascade::butterworth_lowpass(BAND_EDGE_ORDER, upper, sample_rate)?)
        } else {
            None
        };
        let band = |x: &[Sample]| {
            let y = highpass.filter(x);
            match &lowpass {
                Some(lp) => lp.filter(&y),
                None => y,
            }
        };
        coherence.push(interchannel_coherence(&band(left), &band(right)));
    }

    log::debug!(
        "coherence over {} bands ({bands_per_octave} per octave)",
        centre_hz.len()
    );
    Ok(BandCoherence { centre_hz, coherence })
}

// ============ IR normalisation ============

/// Scale a set of impulse responses to a common level around their peaks.
///
/// For every IR, the RMS of a half-Hann-windowed region spanning
/// `window_s.0` seconds before and `window_s.1` seconds after the absolute
/// peak is measured. All IRs are scaled by one gain that brings the mean of
/// those levels to `norm_db`. Returns the scaled IRs and the gain in dB.
///
/// The peak is located on `|x|`, not on the signed maximum, so an IR whose
/// largest excursion is negative is windowed around that excursion.
pub fn normalise_irs(
    irs: &[Vec<Sample>],
    sample_rate: f64,
    norm_db: f64,
    window_s: (f64, f64),
) -> SwResult<(Vec<Vec<Sample>>, f64)> {
    if irs.is_empty() {
        return Ok((Vec::new(), 0.0));
    }

    let win_pre = (window_s.0 * sample_rate) as usize;
    let win_post = (window_s.1 * sample_rate) as usize;
    let win_len = win_pre + win_post;
    let mut window = half_hann_fade(win_pre, false);
    window.extend(half_hann_fade(win_post, true));

    let mut levels = Vec::with_capacity(irs.len());
    for ir in irs {
        let peak = ir
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &x)| {
                if x.abs() > best.1 { (i, x.abs()) } else { best }
            })
            .0;
        let start = peak.saturating_sub(win_pre);
        let end = start + win_len;
        if end > ir.len() {
            return Err(SwError::Precondition(format!(
                "peak window [{start}, {end}) exceeds IR length {}",
                ir.len()
            )));
        }
        let windowed: Vec<f64> = ir[start..end]
            .iter()
            .zip(&window)
            .map(|(x, w)| x * w)
            .collect();
        levels.push(rms(&windowed));
    }

    let mean_level = levels.iter().sum::<f64>() / levels.len() as f64;
    if !(mean_level > 0.0) {
        return Err(SwError::Precondition(
            "cannot normalise impulse responses that are silent around their peaks".into(),
        ));
    }

    let gain = db2lin(norm_db) / mean_level;
    let scaled = irs
        .iter()
        .map(|ir| ir.iter().map(|x| x * gain).collect())
        .collect();
    Ok((scaled, db(gain)))
}
