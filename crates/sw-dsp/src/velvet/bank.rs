//! Persisted velvet-noise filter banks
//!
//! A bank is a `[num_channels][filter_length]` matrix stored as flat text.
//! Two banks ship as resources: the raw generated filters and their
//! spectrally optimised counterparts.

use std::path::Path;
use sw_core::array_io::{load_matrix, save_matrix};
use sw_core::{StereoBuffer, SwError, SwResult, NUM_CHANNELS};

use super::generator::impulse_locations;
use super::optimiser::{optimise, OptimiserConfig};
use crate::convolution::fft_convolve;

/// Resource path of the generated velvet filters
pub const INIT_VN_FILTERS: &str = "resources/init_vn_filters.txt";

/// Resource path of the spectrally optimised velvet filters
pub const OPT_VN_FILTERS: &str = "resources/opt_vn_filters.txt";

/// One FIR filter per channel
#[derive(Debug, Clone, PartialEq)]
pub struct VelvetFilterBank {
    filters: Vec<Vec<f64>>,
}

impl VelvetFilterBank {
    pub fn new(filters: Vec<Vec<f64>>) -> SwResult<Self> {
        let len = filters.first().map_or(0, Vec::len);
        if filters.iter().any(|f| f.len() != len) {
            return Err(SwError::InvalidShape(
                "velvet filters must all have the same length".into(),
            ));
        }
        Ok(Self { filters })
    }

    /// Load a bank. Missing or malformed files are [`SwError::ResourceLoad`].
    pub fn load(path: impl AsRef<Path>) -> SwResult<Self> {
        let path = path.as_ref();
        let filters = load_matrix(path)?;
        log::info!(
            "Loaded velvet filter bank {} ({} channels)",
            path.display(),
            filters.len()
        );
        Self::new(filters)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> SwResult<()> {
        save_matrix(path, &self.filters)
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.filters.len()
    }

    #[inline]
    pub fn filter_length(&self) -> usize {
        self.filters.first().map_or(0, Vec::len)
    }

    pub fn filter(&self, channel: usize) -> Option<&[f64]> {
        self.filters.get(channel).map(Vec::as_slice)
    }

    pub fn filters(&self) -> &[Vec<f64>] {
        &self.filters
    }
}

/// Convolve each input channel with its bank filter, truncated to the input length
pub fn process_velvet(input: &StereoBuffer, bank: &VelvetFilterBank) -> SwResult<StereoBuffer> {
    if bank.num_channels() < NUM_CHANNELS {
        return Err(SwError::InvalidShape(format!(
            "velvet filter bank has {} channels, a stereo input needs {NUM_CHANNELS}",
            bank.num_channels()
        )));
    }

    input.try_map_channels(|ch, channel| {
        let mut out = fft_convolve(channel, &bank.filters[ch])?;
        out.resize(channel.len(), 0.0);
        Ok(out)
    })
}

/// Optimise every filter of a bank for spectral flatness.
///
/// Returns the optimised bank; filters that fail to converge are kept at
/// their best iterate.
pub fn optimise_bank(
    bank: &VelvetFilterBank,
    sample_rate: f64,
    density: f64,
    target_decay_db: f64,
    config: &OptimiserConfig,
) -> SwResult<VelvetFilterBank> {
    let mut optimised = Vec::with_capacity(bank.num_channels());
    for (ch, filter) in bank.filters.iter().enumerate() {
        let locations = impulse_locations(filter);
        let result = optimise(filter, sample_rate, density, &locations, target_decay_db, config)?;
        if !result.success {
            log::warn!(
                "Velvet filter {ch}: optimiser stopped after {} iterations without converging",
                result.iterations
            );
        }
        log::info!(
            "Velvet filter {ch}: spectral ripple {:.3} dB -> {:.3} dB",
            result.initial_cost,
            result.cost
        );
        optimised.push(result.sequence);
    }
    VelvetFilterBank::new(optimised)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_velvet_identity_bank() {
        let bank = VelvetFilterBank::new(vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]).unwrap();
        let input = StereoBuffer::from_channels(vec![1.0, 2.0, 3.0, 4.0], vec![1.0, 2.0, 3.0, 4.0])
            .unwrap();
        let out = process_velvet(&input, &bank).unwrap();
        assert_eq!(out.left(), &[1.0, 2.0, 3.0, 4.0]);
        // One-sample delay, truncated to the input length
        for (a, b) in out.right().iter().zip([0.0, 1.0, 2.0, 3.0]) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_mono_bank_rejected() {
        let bank = VelvetFilterBank::new(vec![vec![1.0]]).unwrap();
        let input = StereoBuffer::new(8);
        assert!(matches!(
            process_velvet(&input, &bank),
            Err(SwError::InvalidShape(_))
        ));
    }

    #[test]
    fn test_missing_bank_file() {
        let err = VelvetFilterBank::load("no/such/bank.txt").unwrap_err();
        assert!(matches!(err, SwError::ResourceLoad { .. }));
    }

    #[test]
    fn test_save_and_load_bank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.txt");
        let bank = VelvetFilterBank::new(vec![vec![1.0, 0.0, -0.5], vec![0.0, -1.0, 0.25]]).unwrap();
        bank.save(&path).unwrap();
        assert_eq!(VelvetFilterBank::load(&path).unwrap(), bank);
    }
}
