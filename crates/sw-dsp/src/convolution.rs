//! FFT convolution
//!
//! Whole-signal linear convolution through one zero-padded real FFT. Used
//! to apply velvet-noise filter banks and HRIRs.

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use sw_core::{Sample, SwError, SwResult};

/// Below this many multiply-adds the direct sum is used
const DIRECT_THRESHOLD: usize = 4096;

/// Full linear convolution, `a.len() + b.len() - 1` samples long
pub fn fft_convolve(a: &[Sample], b: &[Sample]) -> SwResult<Vec<Sample>> {
    if a.is_empty() || b.is_empty() {
        return Ok(Vec::new());
    }
    let out_len = a.len() + b.len() - 1;

    if a.len().min(b.len()) * out_len <= DIRECT_THRESHOLD {
        return Ok(direct_convolve(a, b));
    }

    let fft_size = out_len.next_power_of_two();
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_size);
    let ifft = planner.plan_fft_inverse(fft_size);

    let spectrum_of = |x: &[Sample]| -> SwResult<Vec<Complex<f64>>> {
        let mut padded = fft.make_input_vec();
        padded[..x.len()].copy_from_slice(x);
        let mut spectrum = fft.make_output_vec();
        fft.process(&mut padded, &mut spectrum)
            .map_err(|e| SwError::Precondition(format!("forward FFT failed: {e}")))?;
        Ok(spectrum)
    };

    let spec_a = spectrum_of(a)?;
    let spec_b = spectrum_of(b)?;
    let mut product: Vec<Complex<f64>> = spec_a.iter().zip(&spec_b).map(|(x, y)| x * y).collect();

    // realfft requires purely real DC and Nyquist bins on the inverse
    if let Some(dc) = product.first_mut() {
        dc.im = 0.0;
    }
    if let Some(nyquist) = product.last_mut() {
        nyquist.im = 0.0;
    }

    let mut time = ifft.make_output_vec();
    ifft.process(&mut product, &mut time)
        .map_err(|e| SwError::Precondition(format!("inverse FFT failed: {e}")))?;

    let scale = 1.0 / fft_size as f64;
    time.truncate(out_len);
    time.iter_mut().for_each(|x| *x *= scale);
    Ok(time)
}

/// Convolution cropped to the centre, `a.len()` samples long
pub fn convolve_same(a: &[Sample], b: &[Sample]) -> SwResult<Vec<Sample>> {
    if a.is_empty() {
        return Ok(Vec::new());
    }
    if b.is_empty() {
        return Ok(vec![0.0; a.len()]);
    }
    let full = fft_convolve(a, b)?;
    let start = (b.len() - 1) / 2;
    Ok(full[start..start + a.len()].to_vec())
}

fn direct_convolve(a: &[Sample], b: &[Sample]) -> Vec<Sample> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        if x == 0.0 {
            continue;
        }
        for (j, &h) in b.iter().enumerate() {
            out[i + j] += x * h;
        }
    }
    out
}
