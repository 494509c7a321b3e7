//! Second-order sums.
//!
//! [`SumSquares`] accumulates `Σ xi·xj` over pixels. With
//! [`StatisticsCode::MeanCovariance`] the full lower triangle is kept; with
//! [`StatisticsCode::MeanOnly`] only the diagonal `Σ xi²` is.

use serde::{Deserialize, Serialize};

use crate::packed::{triangle_index, triangle_len};
use crate::StatisticsCode;

/// Accumulated sums of products for one storage unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumSquares {
    channels: usize,
    code: StatisticsCode,
    data: Vec<f64>,
}

impl SumSquares {
    /// Create zeroed sums for `channels` channels.
    #[must_use]
    pub fn new(channels: usize, code: StatisticsCode) -> Self {
        Self {
            channels,
            code,
            data: vec![0.0; code.second_order_len(channels)],
        }
    }

    /// Number of channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Which products are kept.
    #[must_use]
    pub fn code(&self) -> StatisticsCode {
        self.code
    }

    /// Raw storage: lower triangle or diagonal depending on [`code`](Self::code).
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Zero every entry.
    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Add `xi * xj` to entry `(i, j)`, `j <= i`.
    ///
    /// Off-diagonal products are dropped when only the diagonal is kept.
    pub fn add_product(&mut self, i: usize, j: usize, xi: f64, xj: f64) {
        debug_assert!(j <= i, "products address the lower triangle");
        match self.code {
            StatisticsCode::MeanCovariance => self.data[triangle_index(i, j)] += xi * xj,
            StatisticsCode::MeanOnly if i == j => self.data[i] += xi * xj,
            StatisticsCode::MeanOnly => {}
        }
    }

    /// Add every product of one pixel.
    pub fn add_pixel(&mut self, values: &[f64]) {
        match self.code {
            StatisticsCode::MeanCovariance => {
                let mut index = 0;
                for (i, &xi) in values.iter().enumerate() {
                    for &xj in &values[..=i] {
                        self.data[index] += xi * xj;
                        index += 1;
                    }
                }
            }
            StatisticsCode::MeanOnly => {
                for (sum, &x) in self.data.iter_mut().zip(values) {
                    *sum += x * x;
                }
            }
        }
    }

    /// Entry `(i, j)` in either order. Zero for off-diagonals that are not kept.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (row, col) = if i >= j { (i, j) } else { (j, i) };
        match self.code {
            StatisticsCode::MeanCovariance => self.data[triangle_index(row, col)],
            StatisticsCode::MeanOnly if row == col => self.data[row],
            StatisticsCode::MeanOnly => 0.0,
        }
    }

    /// `Σ xi²` of channel `i`.
    #[must_use]
    pub fn diagonal(&self, i: usize) -> f64 {
        self.get(i, i)
    }

    /// Merge another set of sums into this one.
    ///
    /// Destination channel `a` receives source channel `source_channels[a]`,
    /// or channel `a` when no list is given. With `initialize` the projected
    /// source replaces the current values.
    /// Off-diagonals the source does not keep read as zero.
    pub fn merge_from(&mut self, src: &Self, source_channels: Option<&[usize]>, initialize: bool) {
        let channels = self.channels;
        let map = |a: usize| -> usize { source_channels.map_or(a, |list| list[a]) };
        match self.code {
            StatisticsCode::MeanCovariance => {
                for a in 0..channels {
                    for b in 0..=a {
                        let value = src.get(map(a), map(b));
                        let slot = &mut self.data[triangle_index(a, b)];
                        *slot = if initialize { value } else { *slot + value };
                    }
                }
            }
            StatisticsCode::MeanOnly => {
                for a in 0..channels {
                    let value = src.diagonal(map(a));
                    let slot = &mut self.data[a];
                    *slot = if initialize { value } else { *slot + value };
                }
            }
        }
    }

    /// Length of the triangle for this channel count.
    #[must_use]
    pub fn triangle_len(&self) -> usize {
        triangle_len(self.channels)
    }
}
