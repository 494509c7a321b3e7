//! Packed storage for symmetric matrices.
//!
//! Covariance and correlation matrices are symmetric, so most of the engine
//! works on the lower triangle alone and only expands to square storage when
//! a consumer asks for it.
//!
//! # Layout
//!
//! | Shape      | Length       | Index of `(i, j)`           |
//! |------------|--------------|-----------------------------|
//! | `Triangle` | `n(n+1)/2`   | `i*(i+1)/2 + j` for `i >= j` |
//! | `Square`   | `n*n`        | `i*n + j`                   |
//!
//! Square matrices are filled in the lower triangle first and mirrored with
//! [`PackedMatrix::mirror_lower_to_upper`] once the lower triangle is final.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Number of entries in the lower triangle of an `n x n` matrix.
#[must_use]
pub const fn triangle_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Index of entry `(i, j)`, `i >= j`, in triangular storage.
#[must_use]
pub const fn triangle_index(i: usize, j: usize) -> usize {
    i * (i + 1) / 2 + j
}

/// Copy the lower triangle of a square row-major matrix onto its upper
/// triangle.
///
/// # Arguments
///
/// * `data` - Row-major storage of at least `n * n` entries
/// * `n` - Matrix order
pub fn mirror_lower_to_upper(data: &mut [f64], n: usize) {
    for i in 1..n {
        for j in 0..i {
            data[j * n + i] = data[i * n + j];
        }
    }
}

/// Storage shape of a [`PackedMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixShape {
    /// Lower triangle only
    Triangle,
    /// Full square, upper triangle mirrored
    Square,
}

impl MatrixShape {
    /// Storage length for an `n x n` matrix in this shape.
    #[must_use]
    pub const fn storage_len(self, n: usize) -> usize {
        match self {
            Self::Triangle => triangle_len(n),
            Self::Square => n * n,
        }
    }
}

/// A symmetric matrix in triangular or square storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedMatrix {
    order: usize,
    shape: MatrixShape,
    data: Vec<f64>,
}

impl PackedMatrix {
    /// Create a zero matrix.
    #[must_use]
    pub fn zeros(order: usize, shape: MatrixShape) -> Self {
        Self {
            order,
            shape,
            data: vec![0.0; shape.storage_len(order)],
        }
    }

    /// Create an identity matrix.
    #[must_use]
    pub fn identity(order: usize, shape: MatrixShape) -> Self {
        let mut m = Self::zeros(order, shape);
        for i in 0..order {
            m.set(i, i, 1.0);
        }
        m
    }

    /// Build a matrix from a function of the lower triangle.
    ///
    /// `entry(i, j)` is called once for every `i >= j`; square output is
    /// mirrored afterwards.
    #[must_use]
    pub fn from_lower(order: usize, shape: MatrixShape, mut entry: impl FnMut(usize, usize) -> f64) -> Self {
        let mut m = Self::zeros(order, shape);
        for i in 0..order {
            for j in 0..=i {
                let index = m.index(i, j);
                m.data[index] = entry(i, j);
            }
        }
        m.mirror_lower_to_upper();
        m
    }

    /// Wrap existing storage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if `data` does not have the
    /// storage length of `shape` for `order`.
    pub fn from_vec(order: usize, shape: MatrixShape, data: Vec<f64>) -> Result<Self, Error> {
        let expected = shape.storage_len(order);
        if data.len() != expected {
            return Err(Error::DimensionMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { order, shape, data })
    }

    /// Matrix order (number of rows).
    #[must_use]
    pub fn order(&self) -> usize {
        self.order
    }

    /// Storage shape.
    #[must_use]
    pub fn shape(&self) -> MatrixShape {
        self.shape
    }

    /// Raw storage.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable raw storage.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Consume the matrix and return its storage.
    #[must_use]
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Storage index of `(i, j)`.
    ///
    /// For triangular storage the pair is reordered so that the lower
    /// triangle entry is addressed.
    #[must_use]
    pub fn index(&self, i: usize, j: usize) -> usize {
        match self.shape {
            MatrixShape::Triangle => {
                let (row, col) = if i >= j { (i, j) } else { (j, i) };
                triangle_index(row, col)
            }
            MatrixShape::Square => i * self.order + j,
        }
    }

    /// Entry `(i, j)`.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[self.index(i, j)]
    }

    /// Set entry `(i, j)`.
    ///
    /// Square storage only writes the addressed cell; call
    /// [`mirror_lower_to_upper`](Self::mirror_lower_to_upper) after the lower
    /// triangle is complete.
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let index = self.index(i, j);
        self.data[index] = value;
    }

    /// Diagonal entries.
    #[must_use]
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.order).map(|i| self.get(i, i)).collect()
    }

    /// Copy the lower triangle onto the upper triangle. No-op for triangles.
    pub fn mirror_lower_to_upper(&mut self) {
        if self.shape == MatrixShape::Square {
            mirror_lower_to_upper(&mut self.data, self.order);
        }
    }

    /// Same matrix in another storage shape.
    #[must_use]
    pub fn to_shape(&self, shape: MatrixShape) -> Self {
        if shape == self.shape {
            return self.clone();
        }
        Self::from_lower(self.order, shape, |i, j| self.get(i, j))
    }

    /// Project onto an ordered subset of rows and columns.
    ///
    /// `result[a][b] = self[features[a]][features[b]]`. An absent or empty
    /// feature list is the identity projection. Features may appear in any
    /// order; the result follows the list order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelOutOfRange`] if a feature is not below
    /// [`order`](Self::order).
    ///
    /// # Example
    ///
    /// ```
    /// use tally::{MatrixShape, PackedMatrix};
    ///
    /// let full = PackedMatrix::from_lower(3, MatrixShape::Triangle, |i, j| (10 * i + j) as f64);
    /// let sub = full.reduce(Some(&[2, 0]), MatrixShape::Square).unwrap();
    /// assert_eq!(sub.get(0, 0), 22.0);
    /// assert_eq!(sub.get(1, 0), 20.0);
    /// assert_eq!(sub.get(0, 1), 20.0);
    /// ```
    pub fn reduce(&self, features: Option<&[usize]>, shape: MatrixShape) -> Result<Self, Error> {
        let features = crate::resolve_channels(features, self.order)?;
        Ok(Self::from_lower(features.len(), shape, |a, b| {
            self.get(features[a], features[b])
        }))
    }

    /// Keep the diagonal and zero every off-diagonal entry.
    pub fn retain_diagonal(&mut self) {
        for i in 0..self.order {
            for j in 0..i {
                self.set(i, j, 0.0);
                self.set(j, i, 0.0);
            }
        }
    }

    /// `self += weight * other`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the orders differ.
    pub fn add_scaled(&mut self, other: &Self, weight: f64) -> Result<(), Error> {
        self.check_order(other)?;
        for i in 0..self.order {
            for j in 0..=i {
                let index = self.index(i, j);
                self.data[index] += weight * other.get(i, j);
            }
        }
        self.mirror_lower_to_upper();
        Ok(())
    }

    /// `self = (1 - lambda) * self + lambda * other`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the orders differ.
    pub fn blend(&mut self, other: &Self, lambda: f64) -> Result<(), Error> {
        self.check_order(other)?;
        for i in 0..self.order {
            for j in 0..=i {
                let index = self.index(i, j);
                self.data[index] = (1.0 - lambda) * self.data[index] + lambda * other.get(i, j);
            }
        }
        self.mirror_lower_to_upper();
        Ok(())
    }

    fn check_order(&self, other: &Self) -> Result<(), Error> {
        if self.order == other.order {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                expected: self.order,
                actual: other.order,
            })
        }
    }
}
