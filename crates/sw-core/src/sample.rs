//! Sample types and stereo buffer definitions

use crate::{SwError, SwResult, NUM_CHANNELS};

/// Type alias for audio samples (always f64 for maximum precision)
pub type Sample = f64;

/// Audio buffer trait for generic buffer operations
pub trait AudioBuffer {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn clear(&mut self);
}

/// Whole-signal stereo buffer, stored split (one `Vec` per channel)
///
/// Construction is the single place where input shapes are normalised:
/// every component downstream can rely on exactly two equal-length channels.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoBuffer {
    left: Vec<Sample>,
    right: Vec<Sample>,
}

impl StereoBuffer {
    /// Silent buffer of `size` samples per channel
    pub fn new(size: usize) -> Self {
        Self {
            left: vec![0.0; size],
            right: vec![0.0; size],
        }
    }

    /// Build from two channels of equal length
    pub fn from_channels(left: Vec<Sample>, right: Vec<Sample>) -> SwResult<Self> {
        if left.len() != right.len() {
            return Err(SwError::InvalidShape(format!(
                "channel length mismatch: left has {} samples, right has {}",
                left.len(),
                right.len()
            )));
        }
        Ok(Self { left, right })
    }

    /// Build from a row-major matrix.
    ///
    /// The expected layout is `[num_samples][num_channels]`. When the inner
    /// dimension is larger than two the matrix is taken to be
    /// `[num_channels][num_samples]` and transposed. Anything that is not
    /// two channels after that is rejected.
    pub fn from_matrix(rows: &[Vec<Sample>]) -> SwResult<Self> {
        let inner = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != inner) {
            return Err(SwError::InvalidShape("ragged sample matrix".into()));
        }

        if inner > NUM_CHANNELS {
            // [channels][samples]
            if rows.len() != NUM_CHANNELS {
                return Err(SwError::not_stereo(rows.len()));
            }
            return Self::from_channels(rows[0].clone(), rows[1].clone());
        }

        if inner != NUM_CHANNELS {
            return Err(SwError::not_stereo(inner));
        }
        let left = rows.iter().map(|r| r[0]).collect();
        let right = rows.iter().map(|r| r[1]).collect();
        Ok(Self { left, right })
    }

    /// Build from interleaved frames with `num_channels` channels
    pub fn from_interleaved(samples: &[Sample], num_channels: usize) -> SwResult<Self> {
        if num_channels != NUM_CHANNELS {
            return Err(SwError::not_stereo(num_channels));
        }
        if samples.len() % NUM_CHANNELS != 0 {
            return Err(SwError::InvalidShape(format!(
                "{} interleaved samples do not form whole stereo frames",
                samples.len()
            )));
        }
        let (left, right) = samples
            .chunks_exact(NUM_CHANNELS)
            .map(|frame| (frame[0], frame[1]))
            .unzip();
        Ok(Self { left, right })
    }

    /// Interleave into `[l0, r0, l1, r1, ...]`
    pub fn to_interleaved(&self) -> Vec<Sample> {
        self.left
            .iter()
            .zip(&self.right)
            .flat_map(|(&l, &r)| [l, r])
            .collect()
    }

    #[inline]
    pub fn left(&self) -> &[Sample] {
        &self.left
    }

    #[inline]
    pub fn right(&self) -> &[Sample] {
        &self.right
    }

    #[inline]
    pub fn left_mut(&mut self) -> &mut [Sample] {
        &mut self.left
    }

    #[inline]
    pub fn right_mut(&mut self) -> &mut [Sample] {
        &mut self.right
    }

    /// Channel by index (0 = left, 1 = right), `None` otherwise
    #[inline]
    pub fn channel(&self, index: usize) -> Option<&[Sample]> {
        match index {
            0 => Some(&self.left),
            1 => Some(&self.right),
            _ => None,
        }
    }

    /// Mutable channel by index (0 = left, 1 = right), `None` otherwise
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> Option<&mut [Sample]> {
        match index {
            0 => Some(&mut self.left),
            1 => Some(&mut self.right),
            _ => None,
        }
    }

    #[inline]
    pub fn channels(&self) -> (&[Sample], &[Sample]) {
        (&self.left, &self.right)
    }

    #[inline]
    pub fn channels_mut(&mut self) -> (&mut [Sample], &mut [Sample]) {
        (&mut self.left, &mut self.right)
    }

    /// Apply a fallible per-channel transform, producing a new buffer
    pub fn try_map_channels<F>(&self, mut f: F) -> SwResult<Self>
    where
        F: FnMut(usize, &[Sample]) -> SwResult<Vec<Sample>>,
    {
        let left = f(0, &self.left)?;
        let right = f(1, &self.right)?;
        Self::from_channels(left, right)
    }

    /// Like [`Self::try_map_channels`], pairing each channel with the same
    /// channel of `other`. Lengths must match.
    pub fn try_zip_map_channels<F>(&self, other: &Self, mut f: F) -> SwResult<Self>
    where
        F: FnMut(&[Sample], &[Sample]) -> SwResult<Vec<Sample>>,
    {
        if self.len() != other.len() {
            return Err(SwError::InvalidShape(format!(
                "paired buffers differ in length: {} vs {}",
                self.len(),
                other.len()
            )));
        }
        let left = f(&self.left, &other.left)?;
        let right = f(&self.right, &other.right)?;
        Self::from_channels(left, right)
    }

    /// Split into owned channels
    pub fn into_channels(self) -> (Vec<Sample>, Vec<Sample>) {
        (self.left, self.right)
    }
}

impl AudioBuffer for StereoBuffer {
    fn len(&self) -> usize {
        self.left.len()
    }

    fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }
}
