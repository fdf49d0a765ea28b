//! Interaural time difference from the maximum of the IACC
//!
//! Works on binaural signals of any rank: one axis holds the two ears, one
//! holds time, and every other index is estimated independently. A low-pass
//! filter and a Hilbert envelope make the estimate robust for broadband
//! signals; both are optional.

use ndarray::{s, Array1, ArrayD, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};
use sw_core::{ms_to_samps, Sample, NUM_CHANNELS};
use sw_dsp::analysis::{analytic_envelope, parabolic_peak_interp, xcorr};
use sw_dsp::biquad::BiquadCascade;

use crate::{SpatialError, SpatialResult};

/// Order of the optional pre-filter
const LOWPASS_ORDER: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItdOptions {
    /// Time axis; negative values count from the end
    pub time_axis: isize,
    /// Ear axis (size 2, left first); negative values count from the end
    pub ear_axis: isize,
    /// Largest lag searched, in milliseconds
    pub max_lag_ms: f64,
    /// Correlate Hilbert envelopes instead of waveforms
    pub envelope: bool,
    /// Low-pass cutoff applied first; `None` skips the filter
    pub lowpass_cutoff_hz: Option<f64>,
    /// Refine the peak with parabolic interpolation
    pub interp_peak: bool,
}

impl Default for ItdOptions {
    fn default() -> Self {
        Self {
            time_axis: -1,
            ear_axis: -2,
            max_lag_ms: 1.0,
            envelope: true,
            lowpass_cutoff_hz: Some(3000.0),
            interp_peak: true,
        }
    }
}

/// ITD in seconds and peak IACC, one entry per leading index
#[derive(Debug, Clone, PartialEq)]
pub struct ItdEstimate {
    /// Positive when the right ear lags the left
    pub itd: ArrayD<f64>,
    pub iacc: ArrayD<f64>,
}

fn resolve_axis(axis: isize, ndim: usize, name: &str) -> SpatialResult<usize> {
    let n = ndim as isize;
    if axis < -n || axis >= n {
        return Err(SpatialError::InvalidAxis(format!(
            "{name} axis {axis} out of range for {ndim} dimensions"
        )));
    }
    Ok(axis.rem_euclid(n) as usize)
}

/// Estimate the ITD of every binaural signal in `signal`.
///
/// Axes are validated before any processing: at least two dimensions, an ear
/// axis of size 2, and distinct ear and time axes.
pub fn estimate_itd(
    signal: ArrayViewD<'_, f64>,
    sample_rate: f64,
    options: &ItdOptions,
) -> SpatialResult<ItdEstimate> {
    let ndim = signal.ndim();
    if ndim < 2 {
        return Err(SpatialError::InvalidAxis(format!(
            "signal must be at least two-dimensional, got {ndim}"
        )));
    }
    let time_axis = resolve_axis(options.time_axis, ndim, "time")?;
    let ear_axis = resolve_axis(options.ear_axis, ndim, "ear")?;
    if signal.shape()[ear_axis] != NUM_CHANNELS {
        return Err(SpatialError::InvalidAxis(format!(
            "ear axis must have size {NUM_CHANNELS}, got {}",
            signal.shape()[ear_axis]
        )));
    }
    if ear_axis == time_axis {
        return Err(SpatialError::InvalidAxis(
            "ear and time axes must differ".into(),
        ));
    }
    if !(sample_rate > 0.0) {
        return Err(SpatialError::InvalidParam(format!(
            "sample rate must be positive, got {sample_rate}"
        )));
    }

    // (..., ear, time)
    let mut order: Vec<usize> = (0..ndim).filter(|&a| a != ear_axis && a != time_axis).collect();
    order.extend([ear_axis, time_axis]);
    let reordered = signal.permuted_axes(order);

    let lead_shape = reordered.shape()[..ndim - 2].to_vec();
    let num_samples = reordered.shape()[ndim - 1];
    let num_signals: usize = lead_shape.iter().product();
    let flat = reordered
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((num_signals, NUM_CHANNELS, num_samples))
        .map_err(|e| SpatialError::InvalidShape(e.to_string()))?;

    let mut itd = Array1::<f64>::zeros(num_signals);
    let mut iacc = Array1::<f64>::zeros(num_signals);
    for i in 0..num_signals {
        let left = flat.slice(s![i, 0, ..]).to_vec();
        let right = flat.slice(s![i, 1, ..]).to_vec();
        let (t, c) = itd_of_pair(&left, &right, sample_rate, options)?;
        itd[i] = t;
        iacc[i] = c;
    }

    let reshape = |a: Array1<f64>| {
        a.into_shape_with_order(IxDyn(&lead_shape))
            .map_err(|e| SpatialError::InvalidShape(e.to_string()))
    };
    Ok(ItdEstimate {
        itd: reshape(itd)?,
        iacc: reshape(iacc)?,
    })
}

/// ITD (seconds) and IACC of a single left/right pair; axis options are ignored
pub fn estimate_itd_pair(
    left: &[Sample],
    right: &[Sample],
    sample_rate: f64,
    options: &ItdOptions,
) -> SpatialResult<(f64, f64)> {
    if left.len() != right.len() {
        return Err(SpatialError::InvalidShape(format!(
            "ear signals differ in length: {} vs {}",
            left.len(),
            right.len()
        )));
    }
    if !(sample_rate > 0.0) {
        return Err(SpatialError::InvalidParam(format!(
            "sample rate must be positive, got {sample_rate}"
        )));
    }
    itd_of_pair(left, right, sample_rate, options)
}

fn preprocess(
    signal: &[Sample],
    lowpass: Option<&BiquadCascade>,
    envelope: bool,
) -> Vec<Sample> {
    let filtered = match lowpass {
        Some(filter) => filter.filter(signal),
        None => signal.to_vec(),
    };
    if envelope {
        analytic_envelope(&filtered)
    } else {
        filtered
    }
}

fn itd_of_pair(
    left: &[Sample],
    right: &[Sample],
    sample_rate: f64,
    options: &ItdOptions,
) -> SpatialResult<(f64, f64)> {
    let lowpass = match options.lowpass_cutoff_hz {
        Some(cutoff) if cutoff > 0.0 => Some(BiquadCascade::butterworth_lowpass(
            LOWPASS_ORDER,
            cutoff,
            sample_rate,
        )?),
        _ => None,
    };
    let left = preprocess(left, lowpass.as_ref(), options.envelope);
    let right = preprocess(right, lowpass.as_ref(), options.envelope);

    let max_lag = ms_to_samps(options.max_lag_ms, sample_rate);
    let (cc, lags) = xcorr(&left, &right, Some(max_lag), true)?;
    let abs_cc: Vec<f64> = cc.iter().map(|c| c.abs()).collect();

    // First maximum
    let peak_ix = abs_cc
        .iter()
        .enumerate()
        .fold(0, |best, (i, v)| if *v > abs_cc[best] { i } else { best });

    let mut lag = lags[peak_ix] as f64;
    let mut peak = abs_cc[peak_ix];
    if options.interp_peak && peak_ix > 0 && peak_ix + 1 < abs_cc.len() {
        match parabolic_peak_interp(abs_cc[peak_ix - 1], abs_cc[peak_ix], abs_cc[peak_ix + 1]) {
            Ok(p) => {
                lag += p.p;
                peak = p.y;
            }
            Err(e) => log::debug!("ITD peak not interpolated: {e}"),
        }
    }

    Ok((lag / sample_rate, peak))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const FS: f64 = 48000.0;

    fn noise(len: usize, seed: u64) -> Vec<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
    }

    fn delayed(x: &[f64], delay: usize) -> Vec<f64> {
        let mut y = vec![0.0; delay];
        y.extend_from_slice(&x[..x.len() - delay]);
        y
    }

    #[test]
    fn test_pair_delay_recovered() {
        let left = noise(8192, 1);
        let right = delayed(&left, 12);
        let options = ItdOptions {
            envelope: false,
            lowpass_cutoff_hz: None,
            ..Default::default()
        };
        let (itd, iacc) = estimate_itd_pair(&left, &right, FS, &options).unwrap();
        assert!((itd * FS - 12.0).abs() < 0.5, "itd {} samples", itd * FS);
        assert!(iacc > 0.95);
    }

    #[test]
    fn test_integer_delay_exact_without_interpolation() {
        const DELAY: usize = 12;
        let left = noise(8192, 1);
        let right = delayed(&left, DELAY);
        let options = ItdOptions {
            envelope: false,
            lowpass_cutoff_hz: None,
            interp_peak: false,
            ..Default::default()
        };
        let (itd, iacc) = estimate_itd_pair(&left, &right, FS, &options).unwrap();
        assert_eq!(itd, DELAY as f64 / FS);
        assert!(iacc > 0.99, "iacc {iacc}");
    }

    #[test]
    fn test_interpolated_peak_stays_on_integer_delay() {
        const DELAY: usize = 12;
        let left = noise(8192, 1);
        let right = delayed(&left, DELAY);
        let options = ItdOptions {
            envelope: false,
            lowpass_cutoff_hz: None,
            ..Default::default()
        };
        assert!(options.interp_peak);
        let (itd, iacc) = estimate_itd_pair(&left, &right, FS, &options).unwrap();
        assert!((itd * FS - DELAY as f64).abs() < 1e-3, "itd {} samples", itd * FS);
        assert!(iacc > 0.99, "iacc {iacc}");
    }

    #[test]
    fn test_default_preprocessing() {
        let left = noise(16384, 2);
        let right = delayed(&left, 20);
        let (itd, iacc) = estimate_itd_pair(&right, &left, FS, &ItdOptions::default()).unwrap();
        assert!((itd * FS + 20.0).abs() < 1.0, "itd {} samples", itd * FS);
        assert!(iacc > 0.9);
    }

    #[test]
    fn test_leading_axes_and_axis_order() {
        // [time, ear, channel] with per-channel delays
        let len = 4096;
        let delays = [0usize, 5, 9];
        let mut signal = Array3::<f64>::zeros((len, 2, delays.len()));
        for (ch, &d) in delays.iter().enumerate() {
            let x = noise(len, 10 + ch as u64);
            let y = delayed(&x, d);
            for t in 0..len {
                signal[[t, 0, ch]] = x[t];
                signal[[t, 1, ch]] = y[t];
            }
        }
        let options = ItdOptions {
            time_axis: 0,
            ear_axis: 1,
            envelope: false,
            lowpass_cutoff_hz: None,
            interp_peak: false,
            ..Default::default()
        };
        let est = estimate_itd(signal.view().into_dyn(), FS, &options).unwrap();
        assert_eq!(est.itd.shape(), &[3]);
        for (ch, &d) in delays.iter().enumerate() {
            assert_eq!(est.itd[[ch]], d as f64 / FS);
            assert!(est.iacc[[ch]] > 0.99);
        }
    }

    #[test]
    fn test_two_dimensional_gives_scalar() {
        let x = noise(2048, 4);
        let mut signal = Array2::<f64>::zeros((2, 2048));
        signal.row_mut(0).assign(&Array1::from(x.clone()));
        signal.row_mut(1).assign(&Array1::from(x));
        let est = estimate_itd(signal.view().into_dyn(), FS, &ItdOptions::default()).unwrap();
        assert_eq!(est.itd.ndim(), 0);
        assert!(est.itd.iter().all(|t| t.abs() < 1.0 / FS));
    }

    #[test]
    fn test_axis_validation() {
        let one_d = Array1::<f64>::zeros(16);
        assert!(matches!(
            estimate_itd(one_d.view().into_dyn(), FS, &ItdOptions::default()),
            Err(SpatialError::InvalidAxis(_))
        ));

        let three_ears = Array2::<f64>::zeros((3, 64));
        assert!(matches!(
            estimate_itd(three_ears.view().into_dyn(), FS, &ItdOptions::default()),
            Err(SpatialError::InvalidAxis(_))
        ));

        let pair = Array2::<f64>::zeros((2, 64));
        let same = ItdOptions {
            time_axis: 0,
            ear_axis: 0,
            ..Default::default()
        };
        assert!(matches!(
            estimate_itd(pair.view().into_dyn(), FS, &same),
            Err(SpatialError::InvalidAxis(_))
        ));

        let out_of_range = ItdOptions {
            ear_axis: 3,
            ..Default::default()
        };
        assert!(matches!(
            estimate_itd(pair.view().into_dyn(), FS, &out_of_range),
            Err(SpatialError::InvalidAxis(_))
        ));
    }
}
