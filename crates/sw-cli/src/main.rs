//! Stereo widener command line
//!
//! Usage:
//!   widen process in.wav out.wav [--config widener.json] [--beta 0.8]
//!   widen crosstalk in.wav out.wav [--speaker-angle 45]
//!   widen generate-filters [--out-dir resources] [--seed 1]
//!   widen itd binaural.wav
//!
//! Set `RUST_LOG=info` (or `debug`) for progress output.

mod wav;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use sw_dsp::analysis::{interchannel_coherence, BandCoherence};
use sw_dsp::velvet::bank::optimise_bank;
use sw_dsp::velvet::generator::target_decay_db_from_t60;
use sw_dsp::velvet::{generate_multichannel, OptimiserConfig, VelvetConfig, VelvetFilterBank};
use sw_dsp::widener::{DecorrelationType, WidenerConfig, WidenerMode};
use sw_spatial::itd::{estimate_itd_pair, ItdOptions};
use sw_spatial::widener::HrtfWidenerConfig;

use crate::wav::{read_wav, write_wav};

const INIT_FILTERS_FILE: &str = "init_vn_filters.txt";
const OPT_FILTERS_FILE: &str = "opt_vn_filters.txt";

#[derive(Parser)]
#[command(name = "widen", version, about = "Decorrelation-based stereo widening")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Widen a stereo (or mono) WAV file by decorrelation
    Process {
        input: PathBuf,
        output: PathBuf,
        /// Widener configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Decorrelator: allpass, velvet or opt_velvet
        #[arg(short, long)]
        decorrelation: Option<DecorrelationType>,
        /// Blend angle in radians, applied to every band
        #[arg(short, long)]
        beta: Option<f64>,
        /// Seed for the randomised decorrelators
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Render a stereo WAV file through virtual speakers
    Crosstalk {
        input: PathBuf,
        output: PathBuf,
        /// HRTF widener configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Speaker azimuth in degrees
        #[arg(short, long)]
        speaker_angle: Option<f64>,
    },
    /// Generate the initial and optimised velvet filter banks
    GenerateFilters {
        /// Directory receiving both filter files
        #[arg(short, long, default_value = "resources")]
        out_dir: PathBuf,
        /// Velvet generator configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        /// Optimiser iteration limit per filter
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Only write the initial bank
        #[arg(long)]
        skip_optimisation: bool,
    },
    /// Print the ITD and IACC of a binaural WAV file
    Itd {
        input: PathBuf,
        /// Largest lag searched in milliseconds
        #[arg(long)]
        max_lag_ms: Option<f64>,
        /// Low-pass cutoff in Hz before correlation
        #[arg(long, conflicts_with = "no_lowpass")]
        lowpass_hz: Option<f64>,
        #[arg(long)]
        no_lowpass: bool,
        /// Correlate waveforms instead of envelopes
        #[arg(long)]
        no_envelope: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            output,
            config,
            decorrelation,
            beta,
            seed,
        } => {
            let mut widener_config: WidenerConfig = load_json(config.as_deref())?;
            apply_overrides(&mut widener_config, decorrelation, beta, seed);
            process(&input, &output, &widener_config)
        }
        Commands::Crosstalk {
            input,
            output,
            config,
            speaker_angle,
        } => {
            let mut hrtf_config: HrtfWidenerConfig = load_json(config.as_deref())?;
            if let Some(angle) = speaker_angle {
                hrtf_config.speaker_angle_deg = angle;
            }
            crosstalk(&input, &output, &hrtf_config)
        }
        Commands::GenerateFilters {
            out_dir,
            config,
            seed,
            max_iterations,
            skip_optimisation,
        } => {
            let velvet_config: VelvetConfig = load_json(config.as_deref())?;
            let mut optimiser = OptimiserConfig::default();
            if let Some(n) = max_iterations {
                optimiser.max_iterations = n;
            }
            let optimiser = (!skip_optimisation).then_some(optimiser);
            generate_filters(&out_dir, &velvet_config, optimiser.as_ref(), seed)
        }
        Commands::Itd {
            input,
            max_lag_ms,
            lowpass_hz,
            no_lowpass,
            no_envelope,
        } => {
            let mut options = ItdOptions::default();
            if let Some(ms) = max_lag_ms {
                options.max_lag_ms = ms;
            }
            if no_lowpass {
                options.lowpass_cutoff_hz = None;
            } else if lowpass_hz.is_some() {
                options.lowpass_cutoff_hz = lowpass_hz;
            }
            options.envelope = !no_envelope;
            itd(&input, &options)
        }
    }
}

/// Parse a JSON file, or fall back to the defaults
fn load_json<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn apply_overrides(
    config: &mut WidenerConfig,
    decorrelation: Option<DecorrelationType>,
    beta: Option<f64>,
    seed: Option<u64>,
) {
    if let Some(kind) = decorrelation {
        config.decorrelation = kind;
    }
    if let Some(seed) = seed {
        config.settings.seed = Some(seed);
    }
    if let Some(value) = beta {
        match &mut config.mode {
            WidenerMode::Broadband { beta, .. } => *beta = value,
            WidenerMode::FrequencyBased { betas, .. } => *betas = [value; 2],
        }
    }
}

fn process(input: &Path, output: &Path, config: &WidenerConfig) -> Result<()> {
    let audio = read_wav(input)?;
    let input_icc = interchannel_coherence(audio.buffer.left(), audio.buffer.right());

    let widener = config
        .build(audio.buffer, audio.sample_rate as f64)
        .context("failed to set up the widener")?;
    let widened = widener.process().context("widening failed")?;
    write_wav(output, &widened, audio.sample_rate)?;

    println!(
        "{} -> {}: coherence {:.3} -> {:.3}",
        input.display(),
        output.display(),
        input_icc,
        widener.correlation(&widened)
    );
    if let Some(bands) = widener.band_correlation(&widened) {
        println!("  per band: {bands:.3?}");
    }
    print_octave_bands(&widener.octave_band_coherence(&widened)?);
    Ok(())
}

fn print_octave_bands(bands: &BandCoherence) {
    let cells: Vec<String> = bands
        .iter()
        .map(|(fc, c)| format!("{fc:.0} Hz {c:.2}"))
        .collect();
    println!("  third-octave: {}", cells.join(", "));
}

fn crosstalk(input: &Path, output: &Path, config: &HrtfWidenerConfig) -> Result<()> {
    let audio = read_wav(input)?;
    let widener = config
        .build(audio.sample_rate as f64)
        .context("failed to set up the HRTF widener")?;
    let rendered = widener.process(&audio.buffer)?;
    write_wav(output, &rendered, audio.sample_rate)?;

    println!(
        "{} -> {}: speakers at +/-{} deg, coherence {:.3}",
        input.display(),
        output.display(),
        widener.speaker_angle_deg(),
        widener.correlation(&rendered)
    );
    print_octave_bands(&widener.octave_band_coherence(&rendered)?);
    Ok(())
}

fn generate_filters(
    out_dir: &Path,
    config: &VelvetConfig,
    optimiser: Option<&OptimiserConfig>,
    seed: Option<u64>,
) -> Result<()> {
    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_os_rng(),
    };

    let filters = generate_multichannel(&mut rng, config).context("velvet generation failed")?;
    let bank = VelvetFilterBank::new(filters)?;
    let init_path = out_dir.join(INIT_FILTERS_FILE);
    bank.save(&init_path)?;
    println!(
        "Wrote {} filters of {} samples to {}",
        bank.num_channels(),
        bank.filter_length(),
        init_path.display()
    );

    let Some(optimiser) = optimiser else {
        return Ok(());
    };
    let length_ms = bank.filter_length() as f64 / config.sample_rate * 1000.0;
    let target_decay_db = target_decay_db_from_t60(config.decay_t60_ms, length_ms);
    let optimised = optimise_bank(
        &bank,
        config.sample_rate,
        config.density,
        target_decay_db,
        optimiser,
    )
    .context("velvet optimisation failed")?;
    let opt_path = out_dir.join(OPT_FILTERS_FILE);
    optimised.save(&opt_path)?;
    println!("Wrote optimised filters to {}", opt_path.display());
    Ok(())
}

fn itd(input: &Path, options: &ItdOptions) -> Result<()> {
    let audio = read_wav(input)?;
    let (itd, iacc) = estimate_itd_pair(
        audio.buffer.left(),
        audio.buffer.right(),
        audio.sample_rate as f64,
        options,
    )
    .context("ITD estimation failed")?;
    println!("ITD: {:.1} us, IACC: {:.3}", itd * 1e6, iacc);
    Ok(())
}
