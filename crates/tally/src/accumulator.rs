//! One storage unit of training statistics.
//!
//! A [`StatsAccumulator`] pairs the per-channel first-order records with the
//! second-order sums over the same pixels. Fields and classes each own one
//! (depending on the storage strategy), and combining a class is a sequence
//! of accumulator merges.

use serde::{Deserialize, Serialize};

use crate::channel::{merge_channels, ChannelStats};
use crate::covariance::compute_covariance;
use crate::packed::{MatrixShape, PackedMatrix};
use crate::sums::SumSquares;
use crate::StatisticsCode;

/// First- and second-order sums for one field or class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsAccumulator {
    channels: Vec<ChannelStats>,
    sums: SumSquares,
}

impl StatsAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new(channels: usize, code: StatisticsCode) -> Self {
        Self {
            channels: vec![ChannelStats::new(); channels],
            sums: SumSquares::new(channels, code),
        }
    }

    /// Number of channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Statistics code of the second-order sums.
    #[must_use]
    pub fn code(&self) -> StatisticsCode {
        self.sums.code()
    }

    /// Per-channel records.
    #[must_use]
    pub fn channels(&self) -> &[ChannelStats] {
        &self.channels
    }

    /// Second-order sums.
    #[must_use]
    pub fn sums(&self) -> &SumSquares {
        &self.sums
    }

    /// Reset to the empty state.
    pub fn zero(&mut self) {
        self.channels.iter_mut().for_each(ChannelStats::reset);
        self.sums.zero();
    }

    /// Add one pixel, one value per channel.
    pub fn add_pixel(&mut self, values: &[f64]) {
        debug_assert_eq!(values.len(), self.channels.len());
        for (channel, &value) in self.channels.iter_mut().zip(values) {
            channel.add_sample(value);
        }
        self.sums.add_pixel(values);
    }

    /// Merge another accumulator into this one.
    ///
    /// Channel `k` of `self` receives channel `source_channels[k]` of `src`.
    /// With `initialize` the projected source replaces the current contents.
    pub fn merge_from(&mut self, src: &Self, source_channels: Option<&[usize]>, initialize: bool) {
        merge_channels(&mut self.channels, &src.channels, source_channels, initialize);
        self.sums.merge_from(&src.sums, source_channels, initialize);
    }

    /// Derive every channel's mean and standard deviation for `count` pixels.
    pub fn derive(&mut self, count: u64) {
        for (i, channel) in self.channels.iter_mut().enumerate() {
            channel.derive(self.sums.diagonal(i), count);
        }
    }

    /// Covariance matrix of `count` pixels. Refreshes channel moments.
    #[must_use]
    pub fn covariance(&mut self, count: u64, shape: MatrixShape) -> PackedMatrix {
        compute_covariance(&mut self.channels, &self.sums, count, shape)
    }

    /// Approximate heap bytes used by an accumulator of this layout.
    #[must_use]
    pub fn footprint(channels: usize, code: StatisticsCode) -> usize {
        channels * std::mem::size_of::<ChannelStats>()
            + code.second_order_len(channels) * std::mem::size_of::<f64>()
    }
}
