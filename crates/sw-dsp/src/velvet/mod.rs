//! Velvet-noise decorrelation
//!
//! - `generator` - interleaved, non-overlapping velvet-noise sequences
//! - `optimiser` - spectral-flatness optimisation of a sequence
//! - `bank` - persisted multichannel filter banks and their application

pub mod bank;
pub mod generator;
pub mod optimiser;

pub use bank::{process_velvet, VelvetFilterBank};
pub use generator::{generate_multichannel, VelvetConfig};
pub use optimiser::{optimise, OptimisedVelvet, OptimiserConfig};
