//! Decorrelation engine and stereo widener
//!
//! A [`DecorrelationContext`] owns the input and its decorrelated version,
//! computed once. A [`WidenerStrategy`] blends the two:
//!
//! - Broadband: `cos(beta) * x + sin(beta) * d` per channel, optionally
//!   passing transients through untouched
//! - Frequency based: both signals split into two bands, one blend angle per
//!   band, bands summed
//!
//! Blend angles and the crossover frequency can change between calls to
//! [`StereoWidener::process`] without recomputing the decorrelated signal.

use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sw_core::{half_hann_fade, ms_to_samps, Sample, StereoBuffer, SwError, SwResult};

use crate::allpass::{process_allpass, DEFAULT_MAX_GROUP_DELAY_MS, DEFAULT_NUM_BIQUADS};
use crate::analysis::{
    fractional_octave_coherence, interchannel_coherence, BandCoherence, DEFAULT_BANDS_PER_OCTAVE,
};
use crate::crossover::{FilterbankType, TwoBandFilterbank};
use crate::onset::{OnsetDetector, OnsetParams};
use crate::velvet::bank::{INIT_VN_FILTERS, OPT_VN_FILTERS};
use crate::velvet::{process_velvet, VelvetFilterBank};

// ============ Decorrelation ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecorrelationType {
    /// Random all-pass biquad cascade
    #[default]
    Allpass,
    /// Velvet-noise filter bank
    Velvet,
    /// Spectrally optimised velvet-noise filter bank
    OptVelvet,
}

impl DecorrelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allpass => "allpass",
            Self::Velvet => "velvet",
            Self::OptVelvet => "opt_velvet",
        }
    }
}

impl fmt::Display for DecorrelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecorrelationType {
    type Err = SwError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allpass" => Ok(Self::Allpass),
            "velvet" => Ok(Self::Velvet),
            "opt_velvet" => Ok(Self::OptVelvet),
            other => Err(SwError::Unsupported(format!("decorrelation type '{other}'"))),
        }
    }
}

/// Parameters of the decorrelators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecorrelationSettings {
    /// All-pass sections per channel
    pub num_biquads: usize,
    pub max_group_delay_ms: f64,
    /// Velvet filter bank used by [`DecorrelationType::Velvet`]
    pub velvet_filters: PathBuf,
    /// Velvet filter bank used by [`DecorrelationType::OptVelvet`]
    pub opt_velvet_filters: PathBuf,
    /// Fixed RNG seed; OS entropy when absent
    pub seed: Option<u64>,
}

impl Default for DecorrelationSettings {
    fn default() -> Self {
        Self {
            num_biquads: DEFAULT_NUM_BIQUADS,
            max_group_delay_ms: DEFAULT_MAX_GROUP_DELAY_MS,
            velvet_filters: PathBuf::from(INIT_VN_FILTERS),
            opt_velvet_filters: PathBuf::from(OPT_VN_FILTERS),
            seed: None,
        }
    }
}

impl DecorrelationSettings {
    /// Generator for the randomised decorrelators
    pub fn rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        }
    }
}

/// Decorrelate a stereo signal with the chosen method.
///
/// Velvet methods load their filter bank from the configured path; a missing
/// or malformed file is [`SwError::ResourceLoad`].
pub fn decorrelate<R: Rng + ?Sized>(
    kind: DecorrelationType,
    input: &StereoBuffer,
    sample_rate: f64,
    settings: &DecorrelationSettings,
    rng: &mut R,
) -> SwResult<StereoBuffer> {
    match kind {
        DecorrelationType::Allpass => process_allpass(
            rng,
            input,
            sample_rate,
            settings.num_biquads,
            settings.max_group_delay_ms,
        ),
        DecorrelationType::Velvet => {
            let bank = VelvetFilterBank::load(&settings.velvet_filters)?;
            process_velvet(input, &bank)
        }
        DecorrelationType::OptVelvet => {
            let bank = VelvetFilterBank::load(&settings.opt_velvet_filters)?;
            process_velvet(input, &bank)
        }
    }
}

/// Input signal together with its decorrelated version
#[derive(Debug, Clone)]
pub struct DecorrelationContext {
    input: StereoBuffer,
    decorrelated: StereoBuffer,
    sample_rate: f64,
    kind: DecorrelationType,
    settings: DecorrelationSettings,
    rng: ChaCha8Rng,
}

impl DecorrelationContext {
    pub fn new(
        input: StereoBuffer,
        sample_rate: f64,
        kind: DecorrelationType,
        settings: DecorrelationSettings,
    ) -> SwResult<Self> {
        if !(sample_rate > 0.0) {
            return Err(SwError::InvalidParam(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        let mut rng = settings.rng();
        let decorrelated = decorrelate(kind, &input, sample_rate, &settings, &mut rng)?;
        Ok(Self {
            input,
            decorrelated,
            sample_rate,
            kind,
            settings,
            rng,
        })
    }

    /// Switch decorrelator. The decorrelated signal is recomputed only when
    /// the type actually changes; on error the context is left as it was.
    pub fn set_decorrelation_type(&mut self, kind: DecorrelationType) -> SwResult<()> {
        if kind == self.kind {
            return Ok(());
        }
        self.decorrelated = decorrelate(
            kind,
            &self.input,
            self.sample_rate,
            &self.settings,
            &mut self.rng,
        )?;
        log::info!("Decorrelation switched from {} to {kind}", self.kind);
        self.kind = kind;
        Ok(())
    }

    #[inline]
    pub fn input(&self) -> &StereoBuffer {
        &self.input
    }

    #[inline]
    pub fn decorrelated(&self) -> &StereoBuffer {
        &self.decorrelated
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn kind(&self) -> DecorrelationType {
        self.kind
    }
}

// ============ Blend angles ============

/// Cross-fade angle(s): one for broadband, `[low, high]` for two bands
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Beta {
    Broadband(f64),
    TwoBand([f64; 2]),
}

fn check_beta(beta: f64) -> SwResult<f64> {
    if (0.0..=FRAC_PI_2).contains(&beta) {
        Ok(beta)
    } else {
        Err(SwError::InvalidParam(format!(
            "blend angle {beta} outside [0, pi/2]"
        )))
    }
}

#[inline]
fn blend(beta: f64, x: &[Sample], d: &[Sample]) -> Vec<Sample> {
    let (s, c) = beta.sin_cos();
    x.iter().zip(d).map(|(a, b)| c * a + s * b).collect()
}

// ============ Strategies ============

/// How input and decorrelated signal are combined
pub trait WidenerStrategy: Send + Sync {
    fn process(&self, context: &DecorrelationContext) -> SwResult<StereoBuffer>;

    fn set_beta(&mut self, beta: Beta) -> SwResult<()>;

    fn beta(&self) -> Beta;

    fn set_cutoff_frequency(&mut self, _cutoff_hz: f64) -> SwResult<()> {
        Err(SwError::Unsupported(
            "crossover frequency on a broadband widener".into(),
        ))
    }

    /// Inter-channel coherence of `output` per band, when the strategy has bands
    fn band_coherence(&self, _output: &StereoBuffer) -> Option<Vec<f64>> {
        None
    }
}

/// Onset pass-through settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransientParams {
    pub min_onset_hold_ms: f64,
    pub min_onset_sep_ms: f64,
    /// Length of the cross-fade into each onset
    pub xfade_ms: f64,
}

impl Default for TransientParams {
    fn default() -> Self {
        let onset = OnsetParams::default();
        Self {
            min_onset_hold_ms: onset.min_onset_hold_ms,
            min_onset_sep_ms: onset.min_onset_sep_ms,
            xfade_ms: 1.0,
        }
    }
}

/// Replaces the widened signal with the input around detected onsets
#[derive(Debug, Clone)]
pub struct TransientGate {
    detector: OnsetDetector,
    fade_in: Vec<f64>,
    fade_out: Vec<f64>,
}

impl TransientGate {
    pub fn new(sample_rate: f64, params: &TransientParams) -> Self {
        let onset = OnsetParams {
            min_onset_hold_ms: params.min_onset_hold_ms,
            min_onset_sep_ms: params.min_onset_sep_ms,
            ..OnsetParams::default()
        };
        let xfade_len = ms_to_samps(params.xfade_ms, sample_rate);
        Self {
            detector: OnsetDetector::new(sample_rate, &onset),
            fade_in: half_hann_fade(xfade_len, false),
            fade_out: half_hann_fade(xfade_len, true),
        }
    }

    /// Copy `input` into `output` at onsets and cross-fade into each onset
    pub fn apply(&self, input: &[Sample], output: &mut [Sample]) {
        let analysis = self.detector.detect(input);
        for i in analysis.onset_indices() {
            output[i] = input[i];
        }

        let len = self.fade_in.len();
        for start in analysis.onset_starts() {
            // Regions clipped at the signal start use the tail of the windows
            let from = start.saturating_sub(len);
            let offset = len - (start - from);
            for (k, n) in (from..start).enumerate() {
                output[n] = output[n] * self.fade_out[offset + k] + self.fade_in[offset + k] * input[n];
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BroadbandWidener {
    beta: f64,
    transient_gate: Option<TransientGate>,
}

impl BroadbandWidener {
    pub fn new(beta: f64) -> SwResult<Self> {
        Ok(Self {
            beta: check_beta(beta)?,
            transient_gate: None,
        })
    }

    /// Pass onsets through unwidened
    pub fn with_transient_gate(mut self, sample_rate: f64, params: &TransientParams) -> Self {
        self.transient_gate = Some(TransientGate::new(sample_rate, params));
        self
    }

    pub fn detects_transients(&self) -> bool {
        self.transient_gate.is_some()
    }
}

impl WidenerStrategy for BroadbandWidener {
    fn process(&self, context: &DecorrelationContext) -> SwResult<StereoBuffer> {
        let decorrelated = context.decorrelated();
        context.input().try_zip_map_channels(decorrelated, |x, d| {
            let mut out = blend(self.beta, x, d);
            if let Some(gate) = &self.transient_gate {
                gate.apply(x, &mut out);
            }
            Ok(out)
        })
    }

    fn set_beta(&mut self, beta: Beta) -> SwResult<()> {
        match beta {
            Beta::Broadband(b) => {
                self.beta = check_beta(b)?;
                Ok(())
            }
            Beta::TwoBand(_) => Err(SwError::InvalidParam(
                "broadband widener takes a single blend angle".into(),
            )),
        }
    }

    fn beta(&self) -> Beta {
        Beta::Broadband(self.beta)
    }
}

#[derive(Debug, Clone)]
pub struct FrequencyBasedWidener {
    betas: [f64; 2],
    filterbank: TwoBandFilterbank,
}

impl FrequencyBasedWidener {
    pub fn new(
        betas: [f64; 2],
        filterbank_type: FilterbankType,
        cutoff_hz: f64,
        sample_rate: f64,
    ) -> SwResult<Self> {
        Ok(Self {
            betas: [check_beta(betas[0])?, check_beta(betas[1])?],
            filterbank: TwoBandFilterbank::new(filterbank_type, cutoff_hz, sample_rate)?,
        })
    }

    pub fn filterbank(&self) -> &TwoBandFilterbank {
        &self.filterbank
    }
}

impl WidenerStrategy for FrequencyBasedWidener {
    fn process(&self, context: &DecorrelationContext) -> SwResult<StereoBuffer> {
        let decorrelated = context.decorrelated();
        context.input().try_zip_map_channels(decorrelated, |x, d| {
            let input_bands = self.filterbank.split(x);
            let decorr_bands = self.filterbank.split(d);

            let mut out = vec![0.0; x.len()];
            for ((beta, xb), db) in self.betas.iter().zip(&input_bands).zip(&decorr_bands) {
                for (o, y) in out.iter_mut().zip(blend(*beta, xb, db)) {
                    *o += y;
                }
            }
            Ok(out)
        })
    }

    fn set_beta(&mut self, beta: Beta) -> SwResult<()> {
        match beta {
            Beta::TwoBand([lo, hi]) => {
                self.betas = [check_beta(lo)?, check_beta(hi)?];
                Ok(())
            }
            Beta::Broadband(_) => Err(SwError::InvalidParam(
                "frequency-based widener takes a [low, high] pair of blend angles".into(),
            )),
        }
    }

    fn beta(&self) -> Beta {
        Beta::TwoBand(self.betas)
    }

    fn set_cutoff_frequency(&mut self, cutoff_hz: f64) -> SwResult<()> {
        self.filterbank.set_cutoff(cutoff_hz)
    }

    fn band_coherence(&self, output: &StereoBuffer) -> Option<Vec<f64>> {
        let [left_lo, left_hi] = self.filterbank.split(output.left());
        let [right_lo, right_hi] = self.filterbank.split(output.right());
        Some(vec![
            interchannel_coherence(&left_lo, &right_lo),
            interchannel_coherence(&left_hi, &right_hi),
        ])
    }
}

// ============ Stereo widener ============

/// Decorrelation context plus blending strategy
pub struct StereoWidener {
    context: DecorrelationContext,
    strategy: Box<dyn WidenerStrategy>,
}

impl StereoWidener {
    pub fn new(context: DecorrelationContext, strategy: Box<dyn WidenerStrategy>) -> Self {
        Self { context, strategy }
    }

    pub fn process(&self) -> SwResult<StereoBuffer> {
        self.strategy.process(&self.context)
    }

    pub fn update_beta(&mut self, beta: Beta) -> SwResult<()> {
        self.strategy.set_beta(beta)
    }

    pub fn update_cutoff_frequency(&mut self, cutoff_hz: f64) -> SwResult<()> {
        self.strategy.set_cutoff_frequency(cutoff_hz)
    }

    pub fn set_decorrelation_type(&mut self, kind: DecorrelationType) -> SwResult<()> {
        self.context.set_decorrelation_type(kind)
    }

    pub fn beta(&self) -> Beta {
        self.strategy.beta()
    }

    /// Broadband inter-channel coherence of a widened signal
    pub fn correlation(&self, output: &StereoBuffer) -> f64 {
        interchannel_coherence(output.left(), output.right())
    }

    /// Per-band coherence for band-splitting strategies
    pub fn band_correlation(&self, output: &StereoBuffer) -> Option<Vec<f64>> {
        self.strategy.band_coherence(output)
    }

    /// Third-octave inter-channel coherence of a widened signal
    pub fn octave_band_coherence(&self, output: &StereoBuffer) -> SwResult<BandCoherence> {
        fractional_octave_coherence(
            output.left(),
            output.right(),
            self.context.sample_rate(),
            DEFAULT_BANDS_PER_OCTAVE,
        )
    }

    pub fn context(&self) -> &DecorrelationContext {
        &self.context
    }
}

impl fmt::Debug for StereoWidener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StereoWidener")
            .field("kind", &self.context.kind())
            .field("beta", &self.strategy.beta())
            .finish_non_exhaustive()
    }
}

// ============ Configuration ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidenerMode {
    Broadband {
        beta: f64,
        #[serde(default)]
        transient: Option<TransientParams>,
    },
    FrequencyBased {
        betas: [f64; 2],
        #[serde(default)]
        filterbank: FilterbankType,
        cutoff_hz: f64,
    },
}

impl Default for WidenerMode {
    fn default() -> Self {
        Self::Broadband {
            beta: std::f64::consts::FRAC_PI_4,
            transient: None,
        }
    }
}

/// Full widener configuration, loadable from JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidenerConfig {
    pub decorrelation: DecorrelationType,
    pub settings: DecorrelationSettings,
    pub mode: WidenerMode,
}

impl WidenerConfig {
    /// Decorrelate `input` and set up the configured strategy
    pub fn build(&self, input: StereoBuffer, sample_rate: f64) -> SwResult<StereoWidener> {
        let strategy: Box<dyn WidenerStrategy> = match &self.mode {
            WidenerMode::Broadband { beta, transient } => {
                let mut widener = BroadbandWidener::new(*beta)?;
                if let Some(params) = transient {
                    widener = widener.with_transient_gate(sample_rate, params);
                }
                Box::new(widener)
            }
            WidenerMode::FrequencyBased {
                betas,
                filterbank,
                cutoff_hz,
            } => Box::new(FrequencyBasedWidener::new(
                *betas,
                *filterbank,
                *cutoff_hz,
                sample_rate,
            )?),
        };

        let context =
            DecorrelationContext::new(input, sample_rate, self.decorrelation, self.settings.clone())?;
        log::info!(
            "Stereo widener: {} decorrelation, {:?}",
            self.decorrelation,
            strategy.beta()
        );
        Ok(StereoWidener::new(context, strategy))
    }
}
