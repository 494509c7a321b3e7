//! Per-channel first-order statistics.
//!
//! A [`ChannelStats`] record keeps the running sum and extremes of one
//! channel. Mean and standard deviation are derived on demand from the sum,
//! the channel's sum of squares and the pixel count, and cached in
//! [`Moments`] until the next accumulating write marks them stale.

use serde::{Deserialize, Serialize};

/// Derived moments of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Moments {
    /// Derived from the current sums.
    Fresh {
        /// Arithmetic mean
        mean: f64,
        /// Sample standard deviation, never negative
        std_dev: f64,
    },
    /// Sums changed since the last derivation.
    Stale,
}

/// Running statistics of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Sum of all samples
    pub sum: f64,
    /// Smallest sample seen, `f64::MAX` before the first sample
    pub minimum: f64,
    /// Largest sample seen, `-f64::MAX` before the first sample
    pub maximum: f64,
    moments: Moments,
}

impl Default for ChannelStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelStats {
    /// Create an empty record.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sum: 0.0,
            minimum: f64::MAX,
            maximum: -f64::MAX,
            moments: Moments::Stale,
        }
    }

    /// Create a record whose moments are already known.
    ///
    /// Used for statistics supplied from outside the accumulation path, such
    /// as enhanced class statistics.
    #[must_use]
    pub const fn with_moments(mean: f64, std_dev: f64, minimum: f64, maximum: f64) -> Self {
        Self {
            sum: 0.0,
            minimum,
            maximum,
            moments: Moments::Fresh { mean, std_dev },
        }
    }

    /// Reset to the empty state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Add one sample.
    pub fn add_sample(&mut self, value: f64) {
        self.sum += value;
        self.minimum = self.minimum.min(value);
        self.maximum = self.maximum.max(value);
        self.moments = Moments::Stale;
    }

    /// Merge another record into this one.
    ///
    /// With `initialize` the source is copied; otherwise sums add and the
    /// extremes widen. Either way the moments become stale.
    pub fn merge_from(&mut self, src: &Self, initialize: bool) {
        if initialize {
            self.sum = src.sum;
            self.minimum = src.minimum;
            self.maximum = src.maximum;
        } else {
            self.sum += src.sum;
            self.minimum = self.minimum.min(src.minimum);
            self.maximum = self.maximum.max(src.maximum);
        }
        self.moments = Moments::Stale;
    }

    /// Current moments.
    #[must_use]
    pub fn moments(&self) -> Moments {
        self.moments
    }

    /// True if the moments need to be derived again.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self.moments, Moments::Stale)
    }

    /// Mean, if fresh.
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        match self.moments {
            Moments::Fresh { mean, .. } => Some(mean),
            Moments::Stale => None,
        }
    }

    /// Standard deviation, if fresh.
    #[must_use]
    pub fn std_dev(&self) -> Option<f64> {
        match self.moments {
            Moments::Fresh { std_dev, .. } => Some(std_dev),
            Moments::Stale => None,
        }
    }

    /// Sample variance of `count` samples with the given sum of squares.
    ///
    /// `(Σx² − sum²/n) / (n − 1)` for `n > 1`, exactly zero otherwise.
    /// Rounding residue below zero is clamped so the result is never negative.
    #[must_use]
    pub fn variance(&self, sum_squares: f64, count: u64) -> f64 {
        if count <= 1 {
            return 0.0;
        }
        let n = count as f64;
        let variance = (sum_squares - self.sum * self.sum / n) / (n - 1.0);
        variance.max(0.0)
    }

    /// Derive mean and standard deviation and cache them.
    ///
    /// Returns the variance the standard deviation was taken from, so callers
    /// building a covariance diagonal use the exact same value.
    pub fn derive(&mut self, sum_squares: f64, count: u64) -> f64 {
        let mean = if count == 0 { 0.0 } else { self.sum / count as f64 };
        let variance = self.variance(sum_squares, count);
        self.moments = Moments::Fresh {
            mean,
            std_dev: variance.sqrt(),
        };
        variance
    }
}

/// Merge a source channel set into a destination channel set.
///
/// Destination channel `k` receives source channel `source_channels[k]`.
/// When `source_channels` is `None`, channels map one to one.
///
/// # Panics
///
/// Panics if a listed source channel does not exist; callers validate lists
/// with [`resolve_channels`](crate::resolve_channels) first.
pub fn merge_channels(
    dst: &mut [ChannelStats],
    src: &[ChannelStats],
    source_channels: Option<&[usize]>,
    initialize: bool,
) {
    match source_channels {
        Some(list) => {
            for (out, &channel) in dst.iter_mut().zip(list) {
                out.merge_from(&src[channel], initialize);
            }
        }
        None => {
            for (out, input) in dst.iter_mut().zip(src) {
                out.merge_from(input, initialize);
            }
        }
    }
}
