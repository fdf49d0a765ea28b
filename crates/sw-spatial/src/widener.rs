//! Cross-talk stereo widener
//!
//! Renders a stereo pair as two virtual speakers at `±speaker_angle_deg`
//! through the spherical-head HRTFs. Moving the speakers apart widens the
//! image by increasing the interaural time difference at both ears.

use serde::{Deserialize, Serialize};
use sw_core::{rfft_frequencies, AudioBuffer, StereoBuffer, LEFT, RIGHT};
use sw_dsp::analysis::{
    fractional_octave_coherence, interchannel_coherence, BandCoherence, DEFAULT_BANDS_PER_OCTAVE,
};
use sw_dsp::convolution::convolve_same;

use crate::cues::convert_ipd_to_itd;
use crate::hrtf::{compute, HeadModel, HrtfParams, DEFAULT_HEAD_RADIUS};
use crate::{SpatialError, SpatialResult};

/// Azimuth of the left virtual speaker at construction
pub const DEFAULT_SPEAKER_ANGLE_DEG: f64 = 30.0;

/// Per-speaker gain applied to every path
const PATH_GAIN: f64 = 0.5;

// ============ Configuration ============

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrtfWidenerConfig {
    /// Ascending `(min, max)` azimuth in degrees
    pub azimuth_range: (f64, f64),
    pub angular_res_deg: f64,
    /// Real FFT length used for the frequency axis
    pub num_freq_points: usize,
    /// HRIR length in samples
    pub num_time_samples: usize,
    pub head_radius: f64,
    pub speaker_angle_deg: f64,
}

impl Default for HrtfWidenerConfig {
    fn default() -> Self {
        Self {
            azimuth_range: (-90.0, 90.0),
            angular_res_deg: 2.0,
            num_freq_points: 512,
            num_time_samples: 1024,
            head_radius: DEFAULT_HEAD_RADIUS,
            speaker_angle_deg: DEFAULT_SPEAKER_ANGLE_DEG,
        }
    }
}

impl HrtfWidenerConfig {
    pub fn build(&self, sample_rate: f64) -> SpatialResult<HrtfStereoWidener> {
        let mut widener = HrtfStereoWidener::new(
            sample_rate,
            self.azimuth_range,
            self.angular_res_deg,
            self.num_freq_points,
            self.num_time_samples,
            self.head_radius,
        )?;
        widener.update_speaker_angle(self.speaker_angle_deg)?;
        Ok(widener)
    }
}

// ============ Widener ============

#[derive(Debug, Clone)]
pub struct HrtfStereoWidener {
    sample_rate: f64,
    num_freq_points: usize,
    speaker_angle_deg: f64,
    hrtf_set: HrtfParams,
}

/// `lo, lo + res, ...` up to and including `hi` (within rounding)
fn azimuth_grid(lo: f64, hi: f64, res: f64) -> Vec<f64> {
    let steps = ((hi - lo) / res + 1e-9).floor() as usize;
    (0..=steps).map(|k| lo + k as f64 * res).collect()
}

impl HrtfStereoWidener {
    pub fn new(
        sample_rate: f64,
        azimuth_range: (f64, f64),
        angular_res_deg: f64,
        num_freq_points: usize,
        num_time_samples: usize,
        head_radius: f64,
    ) -> SpatialResult<Self> {
        let (lo, hi) = azimuth_range;
        if !(lo <= hi) {
            return Err(SpatialError::InvalidParam(format!(
                "azimuth range must be ascending, got ({lo}, {hi})"
            )));
        }
        if !(angular_res_deg > 0.0) {
            return Err(SpatialError::InvalidParam(format!(
                "angular resolution must be positive, got {angular_res_deg}"
            )));
        }
        if !(sample_rate > 0.0) || num_freq_points < 2 {
            return Err(SpatialError::InvalidParam(format!(
                "need a positive sample rate and at least 2 frequency points \
                 (fs {sample_rate}, {num_freq_points} points)"
            )));
        }

        let doas = azimuth_grid(lo, hi, angular_res_deg);
        let freqs = rfft_frequencies(num_freq_points, sample_rate);
        let model = HeadModel {
            head_radius,
            ..Default::default()
        };
        let mut hrtf_set = compute(&doas, &freqs, num_time_samples, &model)?;

        // Same cues on the normalised-frequency axis
        let norm_freqs: Vec<f64> = freqs
            .iter()
            .map(|f| f / (sample_rate / 2.0) * std::f64::consts::PI)
            .collect();
        let itd = convert_ipd_to_itd(hrtf_set.ipd.view().into_dyn(), sample_rate, &norm_freqs, false)?;
        hrtf_set.itd = itd
            .into_dimensionality()
            .map_err(|e| SpatialError::InvalidShape(e.to_string()))?;

        log::info!(
            "HRTF widener: {} DoAs in [{lo}, {hi}] deg, {} bins, {num_time_samples}-sample HRIRs",
            doas.len(),
            freqs.len()
        );

        Ok(Self {
            sample_rate,
            num_freq_points,
            speaker_angle_deg: DEFAULT_SPEAKER_ANGLE_DEG,
            hrtf_set,
        })
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn num_orientations(&self) -> usize {
        self.hrtf_set.num_doas()
    }

    pub fn frequency_axis(&self) -> Vec<f64> {
        rfft_frequencies(self.num_freq_points, self.sample_rate)
    }

    #[inline]
    pub fn speaker_angle_deg(&self) -> f64 {
        self.speaker_angle_deg
    }

    /// HRTFs, HRIRs and cues over the azimuth grid
    pub fn hrtf_set(&self) -> &HrtfParams {
        &self.hrtf_set
    }

    /// Move the virtual speakers to `±angle_deg`; the angle must lie in the grid range
    pub fn update_speaker_angle(&mut self, angle_deg: f64) -> SpatialResult<()> {
        let doas = &self.hrtf_set.doas;
        let (lo, hi) = (doas[0], doas[doas.len() - 1]);
        if !(lo..=hi).contains(&angle_deg) {
            return Err(SpatialError::InvalidParam(format!(
                "speaker angle {angle_deg} outside [{lo}, {hi}] degrees"
            )));
        }
        self.speaker_angle_deg = angle_deg;
        Ok(())
    }

    /// Grid indices closest to the left (`+angle`) and right (`-angle`) speakers
    pub fn find_closest_doa(&self) -> (usize, usize) {
        (
            self.hrtf_set.closest_doa(self.speaker_angle_deg),
            self.hrtf_set.closest_doa(-self.speaker_angle_deg),
        )
    }

    /// Feed each speaker through its HRIRs and sum the paths at each ear
    pub fn process(&self, input: &StereoBuffer) -> SpatialResult<StereoBuffer> {
        let (left_doa, right_doa) = self.find_closest_doa();
        let speakers = [left_doa, right_doa];

        let feeds = [input.left(), input.right()];

        let mut ears = [vec![0.0; input.len()], vec![0.0; input.len()]];
        for (ear, out) in [LEFT, RIGHT].into_iter().zip(ears.iter_mut()) {
            for (feed, &doa) in feeds.iter().zip(&speakers) {
                let hrir = self.hrtf_set.hrir(doa, ear).to_vec();
                let path = convolve_same(feed, &hrir)?;
                for (o, p) in out.iter_mut().zip(path) {
                    *o += p * PATH_GAIN;
                }
            }
        }
        let [left, right] = ears;
        Ok(StereoBuffer::from_channels(left, right)?)
    }

    /// Broadband interchannel coherence of a processed buffer
    pub fn correlation(&self, output: &StereoBuffer) -> f64 {
        interchannel_coherence(output.left(), output.right())
    }

    /// Third-octave interchannel coherence of a processed buffer
    pub fn octave_band_coherence(&self, output: &StereoBuffer) -> SpatialResult<BandCoherence> {
        Ok(fractional_octave_coherence(
            output.left(),
            output.right(),
            self.sample_rate,
            DEFAULT_BANDS_PER_OCTAVE,
        )?)
    }
}
