//! sw-dsp: Decorrelation DSP for the stereo widener
//!
//! Whole-buffer processing built around f64 samples.
//!
//! ## Modules
//! - `biquad` - TDF-II biquads, cascades, Butterworth design
//! - `allpass` - Randomised all-pass decorrelating cascades
//! - `velvet` - Velvet-noise generation, spectral optimisation, filter banks
//! - `minimize` - Box-constrained quasi-Newton minimiser
//! - `convolution` - FFT convolution
//! - `crossover` - Two-band crossover filterbanks
//! - `onset` - Leaky-integrator onset detector
//! - `analysis` - Cross-correlation, envelopes, coherence, IR normalisation
//! - `widener` - Decorrelation engine and stereo widener

pub mod allpass;
pub mod analysis;
pub mod biquad;
pub mod convolution;
pub mod crossover;
pub mod minimize;
pub mod onset;
pub mod velvet;
pub mod widener;

use sw_core::Sample;

/// Trait for all DSP processors
pub trait Processor: Send + Sync {
    /// Reset processor state
    fn reset(&mut self);
}

/// Mono processor trait
pub trait MonoProcessor: Processor {
    /// Process a single sample
    fn process_sample(&mut self, input: Sample) -> Sample;

    /// Process a block of samples in place
    fn process_block(&mut self, buffer: &mut [Sample]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}
