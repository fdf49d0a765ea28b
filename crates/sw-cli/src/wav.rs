//! WAV reading and writing for stereo buffers

use std::path::Path;

use anyhow::{bail, Context, Result};
use sw_core::{AudioBuffer, StereoBuffer};

/// Stereo audio with its sample rate
#[derive(Debug, Clone)]
pub struct WavAudio {
    pub buffer: StereoBuffer,
    pub sample_rate: u32,
}

/// Load a mono or stereo WAV file. Mono input is copied to both channels.
pub fn read_wav(path: &Path) -> Result<WavAudio> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| v as f64))
            .collect::<Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f64 / max_val))
                .collect::<Result<Vec<_>, _>>()
        }
    }
    .with_context(|| format!("failed to decode {}", path.display()))?;

    let buffer = match spec.channels {
        1 => {
            log::info!("{}: mono input, duplicating to both channels", path.display());
            StereoBuffer::from_channels(samples.clone(), samples)?
        }
        2 => StereoBuffer::from_interleaved(&samples, 2)?,
        n => bail!("{}: expected 1 or 2 channels, found {n}", path.display()),
    };

    log::debug!(
        "Read {}: {} frames at {} Hz",
        path.display(),
        buffer.len(),
        spec.sample_rate
    );
    Ok(WavAudio {
        buffer,
        sample_rate: spec.sample_rate,
    })
}

/// Write a stereo buffer as 32-bit float WAV
pub fn write_wav(path: &Path, buffer: &StereoBuffer, sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let peak = buffer
        .to_interleaved()
        .iter()
        .fold(0.0f64, |m, x| m.max(x.abs()));
    if peak > 1.0 {
        log::warn!("{}: output peaks at {peak:.3}, above full scale", path.display());
    }

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for sample in buffer.to_interleaved() {
        writer.write_sample(sample as f32)?;
    }
    writer
        .finalize()
        .with_context(|| format!("failed to finalise {}", path.display()))?;
    Ok(())
}
