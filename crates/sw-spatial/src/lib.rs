//! sw-spatial: Interaural cues and spatial widening
//!
//! ## Modules
//! - `hrtf` - Spherical-head HRTF model over a DoA/frequency grid
//! - `cues` - ILD/IPD extraction and IPD/ITD conversion
//! - `itd` - ITD and IACC estimation on n-d binaural arrays
//! - `widener` - Cross-talk widener with virtual speakers

pub mod cues;
pub mod hrtf;
pub mod itd;
pub mod widener;

mod error;

pub use error::{SpatialError, SpatialResult};
