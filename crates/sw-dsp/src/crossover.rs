//! Two-band filterbanks
//!
//! - Amplitude preserving: 4th-order Linkwitz-Riley crossover, whose branches
//!   sum to an all-pass (flat magnitude)
//! - Energy preserving: 16th-order Butterworth lowpass/highpass pair, whose
//!   branch powers sum to one

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sw_core::{Sample, SwError, SwResult};

use crate::biquad::{BiquadCascade, BiquadCoeffs};

/// Q of each Butterworth stage in a Linkwitz-Riley cascade
const LR_STAGE_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Order of each branch of the energy-preserving bank
const ENERGY_PRESERVING_ORDER: usize = 16;

// ============ Filterbank Type ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterbankType {
    /// Linkwitz-Riley 24 dB/oct
    #[default]
    #[serde(rename = "amplitude-preserve")]
    AmplitudePreserving,
    /// Butterworth 96 dB/oct
    #[serde(rename = "energy-preserve")]
    EnergyPreserving,
}

impl FilterbankType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmplitudePreserving => "amplitude-preserve",
            Self::EnergyPreserving => "energy-preserve",
        }
    }
}

impl fmt::Display for FilterbankType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterbankType {
    type Err = SwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amplitude-preserve" => Ok(Self::AmplitudePreserving),
            "energy-preserve" => Ok(Self::EnergyPreserving),
            other => Err(SwError::Unsupported(format!("filterbank type '{other}'"))),
        }
    }
}

// ============ Two-band filterbank ============

/// Splits a signal into a low and a high band at `cutoff_hz`
#[derive(Debug, Clone)]
pub struct TwoBandFilterbank {
    kind: FilterbankType,
    cutoff_hz: f64,
    sample_rate: f64,
    lowpass: BiquadCascade,
    highpass: BiquadCascade,
}

impl TwoBandFilterbank {
    pub fn new(kind: FilterbankType, cutoff_hz: f64, sample_rate: f64) -> SwResult<Self> {
        let (lowpass, highpass) = design(kind, cutoff_hz, sample_rate)?;
        Ok(Self {
            kind,
            cutoff_hz,
            sample_rate,
            lowpass,
            highpass,
        })
    }

    #[inline]
    pub fn kind(&self) -> FilterbankType {
        self.kind
    }

    #[inline]
    pub fn cutoff_hz(&self) -> f64 {
        self.cutoff_hz
    }

    /// Redesign both branches for a new cutoff
    pub fn set_cutoff(&mut self, cutoff_hz: f64) -> SwResult<()> {
        let (lowpass, highpass) = design(self.kind, cutoff_hz, self.sample_rate)?;
        self.lowpass = lowpass;
        self.highpass = highpass;
        self.cutoff_hz = cutoff_hz;
        Ok(())
    }

    /// `[low, high]` bands of `signal`, each filtered from zero state
    pub fn split(&self, signal: &[Sample]) -> [Vec<Sample>; 2] {
        [self.lowpass.filter(signal), self.highpass.filter(signal)]
    }

    /// Complex `(low, high)` response at normalised angular frequency `omega`
    pub fn frequency_response(&self, omega: f64) -> (num_complex::Complex64, num_complex::Complex64) {
        (
            self.lowpass.frequency_response(omega),
            self.highpass.frequency_response(omega),
        )
    }
}

fn design(
    kind: FilterbankType,
    cutoff_hz: f64,
    sample_rate: f64,
) -> SwResult<(BiquadCascade, BiquadCascade)> {
    if !(cutoff_hz > 0.0 && cutoff_hz < sample_rate / 2.0) {
        return Err(SwError::InvalidParam(format!(
            "crossover frequency {cutoff_hz} Hz outside (0, {}) Hz",
            sample_rate / 2.0
        )));
    }

    match kind {
        FilterbankType::AmplitudePreserving => {
            // LR4 = two identical 2nd-order Butterworth stages per branch
            let lp = BiquadCoeffs::lowpass(cutoff_hz, LR_STAGE_Q, sample_rate);
            let hp = BiquadCoeffs::highpass(cutoff_hz, LR_STAGE_Q, sample_rate);
            Ok((BiquadCascade::new([lp, lp]), BiquadCascade::new([hp, hp])))
        }
        FilterbankType::EnergyPreserving => Ok((
            BiquadCascade::butterworth_lowpass(ENERGY_PRESERVING_ORDER, cutoff_hz, sample_rate)?,
            BiquadCascade::butterworth_highpass(ENERGY_PRESERVING_ORDER, cutoff_hz, sample_rate)?,
        )),
    }
}
