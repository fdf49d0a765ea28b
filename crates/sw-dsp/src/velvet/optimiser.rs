//! Spectral-flatness optimisation of velvet-noise sequences
//!
//! Impulse locations and amplitudes are adjusted so that the smoothed
//! log-magnitude response of the sequence is as flat as possible. The cost
//! is the RMS deviation of that response from its mean, evaluated on a
//! log-spaced frequency grid, and is minimised with a box-constrained
//! quasi-Newton method using the analytic gradient.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::{LN_10, PI};
use sw_core::{geomspace, SwError, SwResult, EPS};

use crate::minimize::{minimize_bounded, Bounds, MinimizeOptions, Objective};

/// Lowest frequency of the cost grid
const MIN_COST_FREQ_HZ: f64 = 20.0;

/// Optimiser settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimiserConfig {
    /// Points of the log-spaced frequency grid
    pub num_freq_bins: usize,
    /// Amplitudes may move by at most this factor from their initial decay
    pub max_gain_deviation: f64,
    pub max_iterations: usize,
}

impl Default for OptimiserConfig {
    fn default() -> Self {
        Self {
            num_freq_bins: 1024,
            max_gain_deviation: 2.0,
            max_iterations: 60,
        }
    }
}

/// Result of [`optimise`]
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisedVelvet {
    /// New sequence, same length as the input
    pub sequence: Vec<f64>,
    /// Rounded impulse locations (the first is always 0)
    pub locations: Vec<usize>,
    /// Impulse amplitudes without sign (the first is always 1)
    pub amplitudes: Vec<f64>,
    /// Cost at the optimum, in dB
    pub cost: f64,
    /// Cost of the constrained starting point, in dB
    pub initial_cost: f64,
    /// Whether the minimiser met a convergence criterion
    pub success: bool,
    pub iterations: usize,
}

// ============ Smoothing ============

/// Averaging matrix over a one-sixth-octave window on each side.
///
/// Row `k` averages every bin with a frequency in
/// `[f_k / 2^(1/6), f_k * 2^(1/6)]`. `freqs` must be ascending.
pub fn third_octave_smoothing_matrix(freqs: &[f64]) -> Vec<Vec<f64>> {
    let ratio = 2.0_f64.powf(1.0 / 6.0);
    let n = freqs.len();

    freqs
        .iter()
        .map(|&fk| {
            let lower = fk / ratio;
            let upper = fk * ratio;
            let lo = freqs.iter().position(|&f| f >= lower).unwrap_or(0);
            let hi = freqs.iter().rposition(|&f| f <= upper).unwrap_or(n - 1);
            let mut row = vec![0.0; n];
            if hi >= lo {
                let weight = 1.0 / (hi - lo + 1) as f64;
                row[lo..=hi].iter_mut().for_each(|w| *w = weight);
            }
            row
        })
        .collect()
}

// ============ Cost ============

/// Spectral ripple of a velvet sequence as a function of its free impulses.
///
/// Parameters are `[l_1..l_{M-1}, a_1..a_{M-1}]`; impulse 0 sits at
/// location 0 with amplitude 1.
struct SpectralFlatness {
    omegas: Vec<f64>,
    smoothing: Vec<Vec<f64>>,
    signs: Vec<f64>,
}

impl SpectralFlatness {
    fn num_free(&self) -> usize {
        self.signs.len() - 1
    }

    /// Full location/amplitude vectors including the fixed first impulse
    fn unpack<'a>(&self, x: &'a [f64]) -> (impl Iterator<Item = f64> + 'a, impl Iterator<Item = f64> + 'a) {
        let m = self.num_free();
        (
            std::iter::once(0.0).chain(x[..m].iter().copied()),
            std::iter::once(1.0).chain(x[m..].iter().copied()),
        )
    }

    fn response(&self, x: &[f64]) -> Vec<Complex64> {
        let (locs, amps) = self.unpack(x);
        let taps: Vec<(f64, f64)> = locs
            .zip(amps)
            .zip(&self.signs)
            .map(|((l, a), s)| (l, a * s))
            .collect();

        self.omegas
            .iter()
            .map(|&w| {
                taps.iter()
                    .map(|&(l, g)| Complex64::from_polar(g, -w * l))
                    .sum()
            })
            .collect()
    }

    fn smooth(&self, mag_db: &[f64]) -> Vec<f64> {
        self.smoothing
            .iter()
            .map(|row| row.iter().zip(mag_db).map(|(w, m)| w * m).sum())
            .collect()
    }

    fn magnitude_db(response: &[Complex64]) -> Vec<f64> {
        response
            .iter()
            .map(|h| 10.0 * (h.norm_sqr() + EPS).log10())
            .collect()
    }

    /// RMS deviation from the mean; also returns `dc/dy`
    fn ripple(smoothed: &[f64]) -> (f64, Vec<f64>) {
        let n = smoothed.len() as f64;
        let mean = smoothed.iter().sum::<f64>() / n;
        let dev: Vec<f64> = smoothed.iter().map(|y| y - mean).collect();
        let cost = (dev.iter().map(|d| d * d).sum::<f64>() / n).sqrt();
        let grad = if cost > 0.0 {
            dev.iter().map(|d| d / (n * cost)).collect()
        } else {
            vec![0.0; dev.len()]
        };
        (cost, grad)
    }
}

impl Objective for SpectralFlatness {
    fn value(&self, x: &[f64]) -> f64 {
        let response = self.response(x);
        Self::ripple(&self.smooth(&Self::magnitude_db(&response))).0
    }

    fn gradient(&self, x: &[f64]) -> Vec<f64> {
        self.value_and_gradient(x).1
    }

    fn value_and_gradient(&self, x: &[f64]) -> (f64, Vec<f64>) {
        let m = self.num_free();
        let response = self.response(x);
        let (cost, dc_dy) = Self::ripple(&self.smooth(&Self::magnitude_db(&response)));

        // dc/dm = S' dc/dy, folded with the dB derivative factor
        let num_bins = self.omegas.len();
        let weights: Vec<f64> = (0..num_bins)
            .map(|j| {
                let dc_dm: f64 = self
                    .smoothing
                    .iter()
                    .zip(&dc_dy)
                    .map(|(row, g)| row[j] * g)
                    .sum();
                dc_dm * (20.0 / LN_10) / (response[j].norm_sqr() + EPS)
            })
            .collect();

        let mut grad = vec![0.0; 2 * m];
        for i in 0..m {
            let (loc, amp, sign) = (x[i], x[m + i], self.signs[i + 1]);
            let (mut g_loc, mut g_amp) = (0.0, 0.0);
            for ((&w, h), &wt) in self.omegas.iter().zip(&response).zip(&weights) {
                // dH/da = s e^{-jwl}, dH/dl = -jw a s e^{-jwl}
                let e = Complex64::from_polar(sign, -w * loc);
                let h_conj = h.conj();
                g_amp += wt * (h_conj * e).re;
                g_loc += wt * (h_conj * e * Complex64::new(0.0, -w * amp)).re;
            }
            grad[i] = g_loc;
            grad[m + i] = g_amp;
        }

        (cost, grad)
    }
}

// ============ Optimisation ============

/// Flatten the magnitude response of a velvet-noise sequence.
///
/// `impulse_locations` index the non-zero taps of `initial_sequence`; their
/// signs are kept. Initial amplitudes follow an exponential decay reaching
/// `-target_decay_db` at the end of the sequence. Each location stays within
/// its original grid cell of `sample_rate / density` samples (one sample of
/// slack below), each amplitude within `max_gain_deviation` of its initial
/// value, and the first impulse is pinned at location 0 with amplitude 1.
///
/// The input is never modified. Failure to converge is reported through
/// [`OptimisedVelvet::success`], not as an error.
pub fn optimise(
    initial_sequence: &[f64],
    sample_rate: f64,
    density: f64,
    impulse_locations: &[usize],
    target_decay_db: f64,
    config: &OptimiserConfig,
) -> SwResult<OptimisedVelvet> {
    let seq_len = initial_sequence.len();
    if impulse_locations.is_empty() {
        return Err(SwError::InvalidParam("sequence has no impulses".into()));
    }
    if !(sample_rate > 0.0 && density > 0.0) {
        return Err(SwError::InvalidParam(format!(
            "sample rate and density must be positive, got {sample_rate} and {density}"
        )));
    }
    if !(config.max_gain_deviation >= 1.0) || config.num_freq_bins < 2 {
        return Err(SwError::InvalidParam(format!(
            "invalid optimiser settings: {config:?}"
        )));
    }

    let mut signs = Vec::with_capacity(impulse_locations.len());
    for &loc in impulse_locations {
        match initial_sequence.get(loc) {
            Some(&v) if v != 0.0 => signs.push(v.signum()),
            _ => {
                return Err(SwError::InvalidParam(format!(
                    "location {loc} is not an impulse of the sequence"
                )));
            }
        }
    }

    let decay_slope = target_decay_db * LN_10 / 20.0 / seq_len as f64;
    let init_amps: Vec<f64> = impulse_locations
        .iter()
        .map(|&l| (-(l as f64) * decay_slope).exp())
        .collect();

    let grid_spacing = sample_rate / density;
    let last_index = (seq_len - 1) as f64;
    let free = 1..impulse_locations.len();

    let mut lower = Vec::with_capacity(2 * free.len());
    let mut upper = Vec::with_capacity(2 * free.len());
    for i in free.clone() {
        let cell = (impulse_locations[i] as f64 / grid_spacing).floor();
        lower.push((grid_spacing * cell - 1.0).max(0.0));
        upper.push((grid_spacing * (cell + 1.0) - 1.0).min(last_index));
    }
    for i in free.clone() {
        lower.push(init_amps[i] / config.max_gain_deviation);
        upper.push(init_amps[i] * config.max_gain_deviation);
    }
    let bounds = Bounds::new(lower, upper)?;

    let x0: Vec<f64> = free
        .clone()
        .map(|i| impulse_locations[i] as f64)
        .chain(free.clone().map(|i| init_amps[i]))
        .collect();

    let freqs = geomspace(MIN_COST_FREQ_HZ, sample_rate / 2.0, config.num_freq_bins);
    let objective = SpectralFlatness {
        omegas: freqs.iter().map(|f| 2.0 * PI * f / sample_rate).collect(),
        smoothing: third_octave_smoothing_matrix(&freqs),
        signs,
    };

    let mut x_init = x0;
    bounds.project(&mut x_init);
    let initial_cost = objective.value(&x_init);

    let options = MinimizeOptions {
        max_iterations: config.max_iterations,
        ..Default::default()
    };
    let result = minimize_bounded(&objective, &x_init, &bounds, &options)?;
    log::debug!(
        "Velvet optimisation {} after {} iterations ({}): {initial_cost:.3} dB -> {:.3} dB",
        if result.success { "converged" } else { "did not converge" },
        result.iterations,
        result.message,
        result.value
    );

    let m = objective.num_free();
    let locations: Vec<usize> = std::iter::once(0)
        .chain(
            result.x[..m]
                .iter()
                .map(|l| (l.round().max(0.0) as usize).min(seq_len - 1)),
        )
        .collect();
    let amplitudes: Vec<f64> = std::iter::once(1.0)
        .chain(result.x[m..].iter().copied())
        .collect();

    let mut sequence = vec![0.0; seq_len];
    for ((&loc, &amp), &sign) in locations.iter().zip(&amplitudes).zip(&objective.signs) {
        // Rounding can land two impulses on one tap; the later one wins
        sequence[loc] = sign * amp;
    }

    Ok(OptimisedVelvet {
        sequence,
        locations,
        amplitudes,
        cost: result.value,
        initial_cost,
        success: result.success,
        iterations: result.iterations,
    })
}
