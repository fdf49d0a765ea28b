//! Interleaved velvet-noise generation
//!
//! A set of `n` sequences shares a grid of cells, each `grid_size * n`
//! samples wide. Every sequence places at most one signed unit impulse in
//! each cell, always inside the first `grid_size` samples. Delaying sequence
//! `k` by `k * grid_size` then gives every sequence its own slot in the
//! cell, so the sum of all sequences never stacks two impulses on one sample.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sw_core::{db2lin, ms_to_samps, SwError, SwResult};

use crate::analysis::{normalise_irs, DEFAULT_NORM_DB, DEFAULT_PEAK_WINDOW};

// ============ Primes ============

/// All primes `p` with `low <= p < high`
pub fn primes_in_range(low: usize, high: usize) -> Vec<usize> {
    if high <= 2 {
        return Vec::new();
    }
    let mut sieve = vec![true; high];
    sieve[0] = false;
    sieve[1] = false;
    let mut i = 2;
    while i * i < high {
        if sieve[i] {
            for multiple in (i * i..high).step_by(i) {
                sieve[multiple] = false;
            }
        }
        i += 1;
    }
    (low.max(2)..high).filter(|&n| sieve[n]).collect()
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

/// Smallest prime strictly greater than `n`
pub fn next_prime(n: usize) -> usize {
    let mut candidate = n + 1;
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

// ============ Interleaved sequences ============

/// Cell indices for a compact row: every cell near the start, then
/// increasingly sparse over two decades of spacing.
fn compact_cells(num_cells: usize) -> Vec<usize> {
    if num_cells <= 1 {
        return (0..num_cells).collect();
    }
    let last = (num_cells - 1) as f64;
    let mut cells: Vec<usize> = (0..num_cells)
        .map(|m| {
            let x = m as f64 / last;
            ((100.0_f64.powf(x) - 1.0) / 99.0 * last).floor() as usize
        })
        .collect();
    cells.dedup();
    cells
}

/// Generate `num_sequences` interleaved velvet-noise sequences.
///
/// Target lengths are prime: `num_sequences - 1` primes drawn from
/// `delay_range` (in samples, end exclusive) plus the next prime above the
/// range end. Row `i` fills `target_i - num_sequences` cells. With
/// `shorten`, row `i` keeps only impulses located before `target_i` and all
/// rows are cut to the longest target. With `compact`, the filled cells are
/// log-spaced so that impulses concentrate at the start.
pub fn generate_interleaved<R: Rng + ?Sized>(
    rng: &mut R,
    num_sequences: usize,
    grid_size: usize,
    delay_range: (usize, usize),
    shorten: bool,
    compact: bool,
) -> SwResult<Vec<Vec<f64>>> {
    if num_sequences == 0 || grid_size == 0 {
        return Err(SwError::InvalidParam(format!(
            "need at least one sequence and a non-zero grid, got {num_sequences} sequences with grid {grid_size}"
        )));
    }
    if delay_range.0 >= delay_range.1 {
        return Err(SwError::InvalidParam(format!(
            "empty delay range [{}, {})",
            delay_range.0, delay_range.1
        )));
    }

    let mut primes = primes_in_range(delay_range.0, delay_range.1);
    if primes.len() < num_sequences - 1 {
        return Err(SwError::InvalidParam(format!(
            "only {} primes in [{}, {}), need {}",
            primes.len(),
            delay_range.0,
            delay_range.1,
            num_sequences - 1
        )));
    }
    primes.shuffle(rng);
    let mut targets: Vec<usize> = primes[..num_sequences - 1].to_vec();
    targets.push(next_prime(delay_range.1));

    let cell_len = grid_size * num_sequences;
    let max_target = targets.iter().copied().max().unwrap_or(0);
    let cell_counts: Vec<usize> = targets
        .iter()
        .map(|&t| t.saturating_sub(num_sequences))
        .collect();
    let width = if shorten {
        max_target
    } else {
        cell_len * cell_counts.iter().copied().max().unwrap_or(0)
    };

    let mut sequences = vec![vec![0.0; width]; num_sequences];
    for (row, (&target, &count)) in sequences.iter_mut().zip(targets.iter().zip(&cell_counts)) {
        let limit = if shorten { target.min(width) } else { width };
        // Cells that can still hold an impulse below the limit
        let usable = count.min(limit.div_ceil(cell_len));

        let cells: Vec<usize> = if compact {
            compact_cells(usable)
        } else {
            (0..usable).collect()
        };

        for cell in cells {
            let offset = ((rng.random::<f64>() * grid_size as f64) as usize).min(grid_size - 1);
            let location = cell * cell_len + offset;
            let sign = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
            if location < limit {
                row[location] = sign;
            }
        }
    }

    Ok(sequences)
}

/// Delay sequence `k` by `k * grid_size` samples.
///
/// Rows are extended by `(n - 1) * grid_size` so nothing wraps around.
pub fn make_non_overlapping(sequences: &[Vec<f64>], grid_size: usize) -> Vec<Vec<f64>> {
    let n = sequences.len();
    let width = sequences.iter().map(Vec::len).max().unwrap_or(0) + n.saturating_sub(1) * grid_size;

    sequences
        .iter()
        .enumerate()
        .map(|(k, seq)| {
            let mut shifted = vec![0.0; width];
            let delay = k * grid_size;
            shifted[delay..delay + seq.len()].copy_from_slice(seq);
            shifted
        })
        .collect()
}

/// Indices of the non-zero taps of a sequence
pub fn impulse_locations(sequence: &[f64]) -> Vec<usize> {
    sequence
        .iter()
        .enumerate()
        .filter(|(_, x)| **x != 0.0)
        .map(|(i, _)| i)
        .collect()
}

/// Decay in dB reached after `seq_length_ms` for a given T60
#[inline]
pub fn target_decay_db_from_t60(decay_t60_ms: f64, seq_length_ms: f64) -> f64 {
    60.0 * seq_length_ms / decay_t60_ms
}

/// Exponential decay rate (1/s) that falls by 60 dB in `decay_t60_ms`
#[inline]
fn decay_slope(decay_t60_ms: f64) -> f64 {
    1000.0_f64.ln() / (decay_t60_ms * 1e-3)
}

// ============ Multichannel filters ============

/// Parameters of a multichannel velvet-noise decorrelator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelvetConfig {
    /// Number of output channels (filters)
    pub num_channels: usize,
    /// Interleaved sequences summed into each channel
    pub num_parallel_filters: usize,
    pub sample_rate: f64,
    /// Impulses per second
    pub density: f64,
    pub min_length_ms: f64,
    pub max_length_ms: f64,
    /// Concentrate impulses at the start of each filter
    pub compact: bool,
    pub decay_t60_ms: f64,
    /// Normalise all channels to a common peak-window level
    pub normalise_energy: bool,
}

impl Default for VelvetConfig {
    fn default() -> Self {
        Self {
            num_channels: 2,
            num_parallel_filters: 4,
            sample_rate: 48000.0,
            density: 1000.0,
            min_length_ms: 10.0,
            max_length_ms: 50.0,
            compact: false,
            decay_t60_ms: 5.0,
            normalise_energy: false,
        }
    }
}

impl VelvetConfig {
    /// Samples between consecutive impulses of the summed filter
    pub fn grid_size(&self) -> usize {
        ((self.sample_rate / self.density) as usize).max(1)
    }
}

/// Generate one decaying velvet-noise filter per channel.
///
/// Each channel sums a non-overlapping set of interleaved sequences. For
/// channels after the first the sequence order is shuffled before the
/// delays are applied. Taps are +-1 before the decay is applied.
pub fn generate_multichannel<R: Rng + ?Sized>(
    rng: &mut R,
    config: &VelvetConfig,
) -> SwResult<Vec<Vec<f64>>> {
    if !(config.sample_rate > 0.0 && config.density > 0.0 && config.decay_t60_ms > 0.0) {
        return Err(SwError::InvalidParam(format!(
            "sample rate, density and T60 must be positive: {config:?}"
        )));
    }

    let grid_size = config.grid_size();
    let delay_range = (
        ms_to_samps(config.min_length_ms, config.sample_rate),
        ms_to_samps(config.max_length_ms, config.sample_rate),
    );

    let mut filters = Vec::with_capacity(config.num_channels);
    for ch in 0..config.num_channels {
        let mut sequences = generate_interleaved(
            rng,
            config.num_parallel_filters,
            grid_size,
            delay_range,
            true,
            config.compact,
        )?;
        if ch > 0 {
            sequences.shuffle(rng);
        }

        // Rows occupy disjoint grid slots, so the sum keeps unit peak
        let shifted = make_non_overlapping(&sequences, grid_size);
        let width = shifted.first().map_or(0, Vec::len);
        let summed: Vec<f64> = (0..width)
            .map(|i| shifted.iter().map(|row| row[i]).sum())
            .collect();
        filters.push(summed);
    }

    // Equalise widths across channels
    let width = filters.iter().map(Vec::len).max().unwrap_or(0);
    filters.iter_mut().for_each(|f| f.resize(width, 0.0));

    let slope = decay_slope(config.decay_t60_ms);
    for filter in &mut filters {
        let start = if config.compact {
            filter.iter().position(|x| *x != 0.0).unwrap_or(0)
        } else {
            0
        };
        for (i, x) in filter.iter_mut().enumerate().skip(start) {
            let t = (i - start) as f64 / config.sample_rate;
            *x *= (-slope * t).exp();
        }
    }

    if config.normalise_energy {
        let (normalised, gain_db) =
            normalise_irs(&filters, config.sample_rate, DEFAULT_NORM_DB, DEFAULT_PEAK_WINDOW)?;
        log::debug!("Velvet filters normalised by {gain_db:.2} dB");
        filters = normalised;
    }

    log::info!(
        "Generated {} velvet filters of {} samples (grid {grid_size})",
        filters.len(),
        width
    );
    Ok(filters)
}

/// Exponentially decaying white-noise filters.
///
/// Noise is uniform with the RMS given by `rms_db`; the decay reaches
/// -60 dB after `decay_t60_ms`.
pub fn generate_white_noise_filters<R: Rng + ?Sized>(
    rng: &mut R,
    sample_rate: f64,
    num_filters: usize,
    length_ms: f64,
    rms_db: f64,
    decay_t60_ms: f64,
    normalise_energy: bool,
) -> SwResult<Vec<Vec<f64>>> {
    if !(sample_rate > 0.0 && decay_t60_ms > 0.0) {
        return Err(SwError::InvalidParam(
            "sample rate and T60 must be positive".into(),
        ));
    }

    let len = ms_to_samps(length_ms, sample_rate);
    // Uniform on [-w, w] has RMS w / sqrt(3)
    let half_width = 3.0_f64.sqrt() * db2lin(rms_db);
    let slope = decay_slope(decay_t60_ms);

    let filters: Vec<Vec<f64>> = (0..num_filters)
        .map(|_| {
            (0..len)
                .map(|i| {
                    let t = i as f64 / sample_rate;
                    let noise = rng.random_range(-half_width..=half_width);
                    noise * (-slope * t).exp()
                })
                .collect()
        })
        .collect();

    if normalise_energy {
        let (normalised, gain_db) =
            normalise_irs(&filters, sample_rate, DEFAULT_NORM_DB, DEFAULT_PEAK_WINDOW)?;
        log::debug!("White-noise filters normalised by {gain_db:.2} dB");
        return Ok(normalised);
    }
    Ok(filters)
}
