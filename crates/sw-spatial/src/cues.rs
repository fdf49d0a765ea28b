//! Interaural cues from HRTFs
//!
//! Level and phase differences are right ear relative to left ear. Phase and
//! time differences are related through `ipd = -omega * itd * fs`, with
//! `omega` the normalised angular frequency in `[0, pi]`.

use std::f64::consts::PI;

use ndarray::{ArrayD, ArrayViewD, Axis, Zip};
use num_complex::Complex64;
use sw_core::{db, EPS, LEFT, NUM_CHANNELS, RIGHT};

use crate::{SpatialError, SpatialResult};

fn check_ear_axis<T>(hrtfs: &ArrayViewD<'_, T>, ear_axis: usize) -> SpatialResult<()> {
    if ear_axis >= hrtfs.ndim() {
        return Err(SpatialError::InvalidAxis(format!(
            "ear axis {ear_axis} out of range for {} dimensions",
            hrtfs.ndim()
        )));
    }
    if hrtfs.len_of(Axis(ear_axis)) != NUM_CHANNELS {
        return Err(SpatialError::InvalidAxis(format!(
            "ear axis must have size {NUM_CHANNELS}, got {}",
            hrtfs.len_of(Axis(ear_axis))
        )));
    }
    Ok(())
}

/// `|H_R| / (|H_L| + eps)`, optionally in dB. The ear axis is removed.
pub fn ild_from_hrtf(
    hrtfs: ArrayViewD<'_, Complex64>,
    ear_axis: usize,
    in_db: bool,
) -> SpatialResult<ArrayD<f64>> {
    check_ear_axis(&hrtfs, ear_axis)?;
    let left = hrtfs.index_axis(Axis(ear_axis), LEFT);
    let right = hrtfs.index_axis(Axis(ear_axis), RIGHT);

    let ild = Zip::from(&left)
        .and(&right)
        .map_collect(|l, r| r.norm() / (l.norm() + EPS));
    Ok(if in_db { ild.mapv(db) } else { ild })
}

/// `angle(H_R / H_L)`. The ear axis is removed; with `unwrap` the phase is
/// unwrapped along the last remaining axis.
pub fn ipd_from_hrtf(
    hrtfs: ArrayViewD<'_, Complex64>,
    ear_axis: usize,
    unwrap: bool,
) -> SpatialResult<ArrayD<f64>> {
    check_ear_axis(&hrtfs, ear_axis)?;
    let left = hrtfs.index_axis(Axis(ear_axis), LEFT);
    let right = hrtfs.index_axis(Axis(ear_axis), RIGHT);

    let mut ipd = Zip::from(&left)
        .and(&right)
        .map_collect(|l, r| (r / l).arg());
    if unwrap {
        unwrap_last_axis(&mut ipd);
    }
    Ok(ipd)
}

/// Remove 2*pi jumps between consecutive phase samples
pub fn unwrap_phase(phase: &mut [f64]) {
    let mut correction = 0.0;
    let mut previous = match phase.first() {
        Some(&p) => p,
        None => return,
    };

    for value in phase.iter_mut().skip(1) {
        let raw = *value;
        let delta = raw - previous;
        let mut wrapped = (delta + PI).rem_euclid(2.0 * PI) - PI;
        if wrapped == -PI && delta > 0.0 {
            wrapped = PI;
        }
        if delta.abs() >= PI {
            correction += wrapped - delta;
        }
        previous = raw;
        *value = raw + correction;
    }
}

fn unwrap_last_axis(values: &mut ArrayD<f64>) {
    if values.ndim() == 0 {
        return;
    }
    let last = Axis(values.ndim() - 1);
    for mut lane in values.lanes_mut(last) {
        let mut buffer = lane.to_vec();
        unwrap_phase(&mut buffer);
        lane.iter_mut().zip(buffer).for_each(|(v, u)| *v = u);
    }
}

fn check_frequency_axis(values: &ArrayViewD<'_, f64>, norm_freqs: &[f64]) -> SpatialResult<()> {
    let Some(&len) = values.shape().last() else {
        return Err(SpatialError::InvalidShape(
            "need at least a frequency axis".into(),
        ));
    };
    if len != norm_freqs.len() {
        return Err(SpatialError::InvalidShape(format!(
            "last axis has {len} bins but {} frequencies were given",
            norm_freqs.len()
        )));
    }
    Ok(())
}

/// Time difference in seconds from a phase difference over the last axis.
///
/// `norm_freqs` are normalised angular frequencies in `[0, pi]`. With
/// `wrapped_phase`, the IPD is unwrapped first. DC bins divide by `eps`.
pub fn convert_ipd_to_itd(
    ipd: ArrayViewD<'_, f64>,
    sample_rate: f64,
    norm_freqs: &[f64],
    wrapped_phase: bool,
) -> SpatialResult<ArrayD<f64>> {
    check_frequency_axis(&ipd, norm_freqs)?;
    let mut phase = ipd.to_owned();
    if wrapped_phase {
        unwrap_last_axis(&mut phase);
    }

    let last = Axis(phase.ndim() - 1);
    for mut lane in phase.lanes_mut(last) {
        for (value, omega) in lane.iter_mut().zip(norm_freqs) {
            *value = -*value / (omega * sample_rate + EPS);
        }
    }
    Ok(phase)
}

/// Phase difference from a time difference in seconds over the last axis.
///
/// With `wrap_phase` the result is mapped into `[-pi, pi)`.
pub fn convert_itd_to_ipd(
    itd: ArrayViewD<'_, f64>,
    sample_rate: f64,
    norm_freqs: &[f64],
    wrap_phase: bool,
) -> SpatialResult<ArrayD<f64>> {
    check_frequency_axis(&itd, norm_freqs)?;
    let mut phase = itd.to_owned();

    let last = Axis(phase.ndim() - 1);
    for mut lane in phase.lanes_mut(last) {
        for (value, omega) in lane.iter_mut().zip(norm_freqs) {
            let ipd = -omega * (*value * sample_rate + EPS);
            *value = if wrap_phase {
                (ipd + PI).rem_euclid(2.0 * PI) - PI
            } else {
                ipd
            };
        }
    }
    Ok(phase)
}
