//! sw-core: Shared types, errors, and utilities for the stereo widener
//!
//! This crate provides the foundational types used across all sw crates.

mod sample;
mod error;
mod units;
pub mod array_io;

pub use sample::*;
pub use error::*;
pub use units::*;

/// Channel index of the left ear / left speaker
pub const LEFT: usize = 0;

/// Channel index of the right ear / right speaker
pub const RIGHT: usize = 1;

/// Number of channels every widener component operates on
pub const NUM_CHANNELS: usize = 2;
