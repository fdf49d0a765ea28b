//! Onset detection with a leaky integrator
//!
//! The envelope comes from a one-pole follower with separate attack and
//! release times. An onset starts where the envelope is rising and exceeds a
//! dynamic threshold of twice its running mean (updated at local peaks).
//! Once raised, the flag is held for a minimum time, and after it drops new
//! onsets are inhibited for a minimum separation.

use serde::{Deserialize, Serialize};
use sw_core::{ms_to_samps, Sample};

use crate::{MonoProcessor, Processor};

/// Threshold before the first local peak is seen
const INITIAL_THRESHOLD: f64 = 1e9;

// ============ Leaky integrator ============

/// Envelope follower: a first-order low-pass on `|x|` whose time constant
/// depends on whether the input is above (attack) or below (release) the
/// current envelope.
#[derive(Debug, Clone)]
pub struct LeakyIntegrator {
    attack_coeff: f64,
    release_coeff: f64,
    envelope: f64,
}

impl LeakyIntegrator {
    pub fn new(sample_rate: f64, attack_ms: f64, release_ms: f64) -> Self {
        Self {
            attack_coeff: Self::coeff(attack_ms, sample_rate),
            release_coeff: Self::coeff(release_ms, sample_rate),
            envelope: 0.0,
        }
    }

    fn coeff(time_ms: f64, sample_rate: f64) -> f64 {
        let tau = time_ms * 1e-3 * sample_rate;
        if tau > 0.0 {
            1.0 - (-1.0 / tau).exp()
        } else {
            1.0
        }
    }

    /// Envelope of a whole signal, starting from zero state
    pub fn envelope(&self, signal: &[Sample]) -> Vec<Sample> {
        let mut follower = self.clone();
        follower.reset();
        signal.iter().map(|&x| follower.process_sample(x)).collect()
    }
}

impl Processor for LeakyIntegrator {
    fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

impl MonoProcessor for LeakyIntegrator {
    #[inline]
    fn process_sample(&mut self, input: Sample) -> Sample {
        let level = input.abs();
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope += coeff * (level - self.envelope);
        self.envelope
    }
}

// ============ Onset detector ============

/// Onset detector timing, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetParams {
    pub attack_ms: f64,
    pub release_ms: f64,
    /// Minimum time an onset flag stays raised
    pub min_onset_hold_ms: f64,
    /// Minimum time between the end of one onset and the next
    pub min_onset_sep_ms: f64,
}

impl Default for OnsetParams {
    fn default() -> Self {
        Self {
            attack_ms: 5.0,
            release_ms: 50.0,
            min_onset_hold_ms: 20.0,
            min_onset_sep_ms: 50.0,
        }
    }
}

/// Per-sample results of [`OnsetDetector::detect`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnsetAnalysis {
    pub flags: Vec<bool>,
    pub envelope: Vec<f64>,
    pub threshold: Vec<f64>,
}

impl OnsetAnalysis {
    /// Indices where the onset flag is raised
    pub fn onset_indices(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter_map(|(i, &f)| f.then_some(i))
            .collect()
    }

    /// First index of every run of consecutive raised flags
    pub fn onset_starts(&self) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter(|&(i, &f)| f && (i == 0 || !self.flags[i - 1]))
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct OnsetDetector {
    integrator: LeakyIntegrator,
    min_hold: usize,
    min_sep: usize,
}

impl OnsetDetector {
    pub fn new(sample_rate: f64, params: &OnsetParams) -> Self {
        Self {
            integrator: LeakyIntegrator::new(sample_rate, params.attack_ms, params.release_ms),
            min_hold: ms_to_samps(params.min_onset_hold_ms, sample_rate),
            min_sep: ms_to_samps(params.min_onset_sep_ms, sample_rate),
        }
    }

    /// Find onsets in a mono signal
    pub fn detect(&self, signal: &[Sample]) -> OnsetAnalysis {
        let n = signal.len();
        let envelope = self.integrator.envelope(signal);
        let mut flags = vec![false; n];
        let mut threshold = vec![INITIAL_THRESHOLD; n];

        let mut running_sum = 0.0;
        let mut hold = 0usize;
        let mut inhibit = 0usize;

        for k in 1..n.saturating_sub(1) {
            let (prev, cur, next) = (envelope[k - 1], envelope[k], envelope[k + 1]);
            running_sum += cur;

            threshold[k] = if cur > prev && cur > next {
                2.0 * running_sum / k as f64
            } else {
                threshold[k - 1]
            };

            if hold > 0 && hold < self.min_hold {
                hold += 1;
                flags[k] = true;
                continue;
            }
            if inhibit > 0 && inhibit < self.min_sep {
                inhibit += 1;
                continue;
            }

            hold = 0;
            inhibit = 0;
            let rising = cur > prev && cur < next;
            let falling = cur < prev && cur > next;
            if rising && cur > threshold[k] {
                flags[k] = true;
                hold = 1;
            } else if falling && cur < threshold[k] {
                inhibit = 1;
            }
        }

        OnsetAnalysis {
            flags,
            envelope,
            threshold,
        }
    }
}
