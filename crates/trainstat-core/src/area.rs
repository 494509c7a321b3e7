//! Field geometry and the pixel source interface.
//!
//! Fields describe the image area their training pixels come from. The
//! engine never decodes images; it asks a [`PixelSource`] for one line at a
//! time, restricted to a column span and a channel list.
//!
//! # Coordinates
//!
//! Lines and columns are zero-based image coordinates. A pixel `(line,
//! column)` belongs to a polygon when the point `(column, line)` lies inside
//! it by the even-odd rule.
//!
//! # Example
//!
//! ```
//! use trainstat_core::area::{AreaDescriptor, ColumnSpan, MemoryImage, PixelSource};
//!
//! let mut image = MemoryImage::from_fn(4, 5, 2, |line, column, channel| {
//!     (line * 10 + column) as f64 + channel as f64 * 0.5
//! });
//! let mut out = vec![0.0; 4];
//! image.read_line(2, ColumnSpan::new(1, 3, 2), &[1, 0], &mut out).unwrap();
//! assert_eq!(out, vec![21.5, 21.0, 23.5, 23.0]);
//!
//! let area = AreaDescriptor::rectangle(0, 1, 0, 4);
//! assert_eq!(area.line_range(4), Some((0, 1, 1)));
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PixelReadError, StatsError};
use crate::ids::FieldId;

// =============================================================================
// Area Descriptors
// =============================================================================

/// Kind of field geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointType {
    /// Axis-aligned rectangle
    Rectangle,
    /// Closed polygon
    Polygon,
    /// Pixels labeled in a training mask
    Mask,
    /// Cluster-derived field; carries no statistics
    Cluster,
}

/// A vertex in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// Line coordinate
    pub line: f64,
    /// Column coordinate
    pub column: f64,
}

/// Area a field covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AreaDescriptor {
    /// Inclusive rectangle sampled at the given intervals.
    Rectangle {
        /// First line
        line_start: u32,
        /// Last line, inclusive
        line_end: u32,
        /// First column
        column_start: u32,
        /// Last column, inclusive
        column_end: u32,
        /// Line step, at least one
        line_interval: u32,
        /// Column step, at least one
        column_interval: u32,
    },
    /// Closed polygon; the last vertex connects back to the first.
    Polygon {
        /// Polygon vertices
        vertices: Vec<Vertex>,
    },
    /// Pixels whose training-mask value equals `value`.
    Mask {
        /// Mask label of this field
        value: u16,
    },
    /// Cluster-derived field.
    Cluster,
}

impl AreaDescriptor {
    /// Rectangle sampled at every pixel.
    #[must_use]
    pub fn rectangle(line_start: u32, line_end: u32, column_start: u32, column_end: u32) -> Self {
        Self::Rectangle {
            line_start,
            line_end,
            column_start,
            column_end,
            line_interval: 1,
            column_interval: 1,
        }
    }

    /// Polygon from `(line, column)` pairs.
    #[must_use]
    pub fn polygon(points: &[(f64, f64)]) -> Self {
        Self::Polygon {
            vertices: points
                .iter()
                .map(|&(line, column)| Vertex { line, column })
                .collect(),
        }
    }

    /// Geometry kind.
    #[must_use]
    pub fn point_type(&self) -> PointType {
        match self {
            Self::Rectangle { .. } => PointType::Rectangle,
            Self::Polygon { .. } => PointType::Polygon,
            Self::Mask { .. } => PointType::Mask,
            Self::Cluster => PointType::Cluster,
        }
    }

    /// Check the geometry is usable.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidInput`] for inverted rectangles, zero
    /// intervals, polygons with fewer than three vertices and mask label 0,
    /// which marks pixels outside every field.
    pub fn validate(&self) -> Result<(), StatsError> {
        let invalid = |reason: &str| -> Result<(), StatsError> { Err(StatsError::InvalidInput(reason.into())) };
        match self {
            Self::Rectangle {
                line_start,
                line_end,
                column_start,
                column_end,
                line_interval,
                column_interval,
            } => {
                if line_start > line_end || column_start > column_end {
                    return invalid("rectangle corners are inverted");
                }
                if *line_interval == 0 || *column_interval == 0 {
                    return invalid("rectangle intervals must be at least one");
                }
                Ok(())
            }
            Self::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return invalid("polygon needs at least three vertices");
                }
                if vertices.iter().any(|v| !v.line.is_finite() || !v.column.is_finite()) {
                    return invalid("polygon vertices must be finite");
                }
                Ok(())
            }
            Self::Mask { value: 0 } => invalid("mask label 0 means no field"),
            Self::Mask { .. } | Self::Cluster => Ok(()),
        }
    }

    /// Lines to visit as `(first, last, step)`, clipped to `image_lines`.
    ///
    /// `None` when the area does not intersect the image or is not scanned by
    /// line.
    #[must_use]
    pub fn line_range(&self, image_lines: u32) -> Option<(u32, u32, u32)> {
        if image_lines == 0 {
            return None;
        }
        let last_line = image_lines - 1;
        match self {
            Self::Rectangle {
                line_start,
                line_end,
                line_interval,
                ..
            } => (*line_start <= last_line)
                .then(|| (*line_start, (*line_end).min(last_line), *line_interval)),
            Self::Polygon { vertices } => {
                let (low, high) = vertices.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| {
                    (lo.min(v.line), hi.max(v.line))
                });
                if high < 0.0 || low > f64::from(last_line) {
                    return None;
                }
                Some((clamp_coordinate(low.ceil(), last_line), clamp_coordinate(high.floor(), last_line), 1))
            }
            Self::Mask { .. } | Self::Cluster => None,
        }
    }

    /// Column span of the rectangle or of the polygon's bounding box,
    /// clipped to `image_columns`.
    #[must_use]
    pub fn column_span(&self, image_columns: u32) -> Option<ColumnSpan> {
        if image_columns == 0 {
            return None;
        }
        let last_column = image_columns - 1;
        match self {
            Self::Rectangle {
                column_start,
                column_end,
                column_interval,
                ..
            } => (*column_start <= last_column).then(|| {
                ColumnSpan::new(*column_start, (*column_end).min(last_column), *column_interval)
            }),
            Self::Polygon { vertices } => {
                let (low, high) = vertices.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| {
                    (lo.min(v.column), hi.max(v.column))
                });
                if high < 0.0 || low > f64::from(last_column) {
                    return None;
                }
                Some(ColumnSpan::new(
                    clamp_coordinate(low.ceil(), last_column),
                    clamp_coordinate(high.floor(), last_column),
                    1,
                ))
            }
            Self::Mask { .. } | Self::Cluster => None,
        }
    }

    /// True if pixel `(line, column)` is part of the area.
    ///
    /// Rectangles honor their sampling intervals. Masks and clusters never
    /// contain pixels by geometry.
    #[must_use]
    pub fn contains(&self, line: u32, column: u32) -> bool {
        match self {
            Self::Rectangle {
                line_start,
                line_end,
                column_start,
                column_end,
                line_interval,
                column_interval,
            } => {
                (*line_start..=*line_end).contains(&line)
                    && (*column_start..=*column_end).contains(&column)
                    && (line - line_start) % line_interval == 0
                    && (column - column_start) % column_interval == 0
            }
            Self::Polygon { vertices } => point_in_polygon(vertices, f64::from(line), f64::from(column)),
            Self::Mask { .. } | Self::Cluster => false,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_coordinate(value: f64, last: u32) -> u32 {
    value.clamp(0.0, f64::from(last)) as u32
}

/// Even-odd test of the point `(column, line)` against a closed polygon.
fn point_in_polygon(vertices: &[Vertex], line: f64, column: f64) -> bool {
    let mut inside = false;
    let mut previous = vertices[vertices.len() - 1];
    for &current in vertices {
        if (current.line > line) != (previous.line > line) {
            let crossing = current.column
                + (line - current.line) * (previous.column - current.column)
                    / (previous.line - current.line);
            if column < crossing {
                inside = !inside;
            }
        }
        previous = current;
    }
    inside
}

// =============================================================================
// Pixel Source
// =============================================================================

/// Inclusive column range sampled at an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpan {
    /// First column
    pub start: u32,
    /// Last column, inclusive
    pub end: u32,
    /// Column step, at least one
    pub interval: u32,
}

impl ColumnSpan {
    /// Create a span.
    #[must_use]
    pub fn new(start: u32, end: u32, interval: u32) -> Self {
        Self {
            start,
            end,
            interval: interval.max(1),
        }
    }

    /// Number of sampled columns.
    #[must_use]
    pub fn samples(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            ((self.end - self.start) / self.interval + 1) as usize
        }
    }

    /// Sampled columns in order.
    pub fn columns(&self) -> impl Iterator<Item = u32> {
        (self.start..=self.end).step_by(self.interval as usize)
    }
}

/// Supplier of image pixels.
///
/// `read_line` fills `out` sample by sample: the values of every requested
/// channel for the first sampled column, then the second, and so on, so
/// `out.len() == span.samples() * channels.len()`.
pub trait PixelSource {
    /// Image size as `(lines, columns)`.
    fn dimensions(&self) -> (u32, u32);

    /// Read one line.
    ///
    /// # Errors
    ///
    /// Returns [`PixelReadError`] if the line cannot be delivered.
    fn read_line(
        &mut self,
        line: u32,
        span: ColumnSpan,
        channels: &[usize],
        out: &mut [f64],
    ) -> Result<(), PixelReadError>;
}

/// Image held in memory, line by line, pixel interleaved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryImage {
    lines: u32,
    columns: u32,
    channels: usize,
    data: Vec<f64>,
}

impl MemoryImage {
    /// Build an image from a function of `(line, column, channel)`.
    #[must_use]
    pub fn from_fn(
        lines: u32,
        columns: u32,
        channels: usize,
        mut value: impl FnMut(u32, u32, usize) -> f64,
    ) -> Self {
        let mut data = Vec::with_capacity(lines as usize * columns as usize * channels);
        for line in 0..lines {
            for column in 0..columns {
                for channel in 0..channels {
                    data.push(value(line, column, channel));
                }
            }
        }
        Self {
            lines,
            columns,
            channels,
            data,
        }
    }

    /// Number of channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Value of one sample.
    #[must_use]
    pub fn value(&self, line: u32, column: u32, channel: usize) -> f64 {
        self.data[(line as usize * self.columns as usize + column as usize) * self.channels + channel]
    }
}

impl PixelSource for MemoryImage {
    fn dimensions(&self) -> (u32, u32) {
        (self.lines, self.columns)
    }

    fn read_line(
        &mut self,
        line: u32,
        span: ColumnSpan,
        channels: &[usize],
        out: &mut [f64],
    ) -> Result<(), PixelReadError> {
        if line >= self.lines || span.end >= self.columns {
            return Err(PixelReadError::new(line, "outside the image"));
        }
        if let Some(&bad) = channels.iter().find(|&&c| c >= self.channels) {
            return Err(PixelReadError::new(line, format!("channel {bad} not in image")));
        }
        let samples = span.samples();
        if out.len() < samples * channels.len() {
            return Err(PixelReadError::new(line, "output buffer too small"));
        }
        for (sample, column) in span.columns().enumerate() {
            for (k, &channel) in channels.iter().enumerate() {
                out[sample * channels.len() + k] = self.value(line, column, channel);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Training Mask
// =============================================================================

/// Raster of training labels aligned with the image.
///
/// A zero value means "no field". Non-zero values are resolved to fields
/// through the mask fields' [`AreaDescriptor::Mask`] values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskRaster {
    first_line: u32,
    first_column: u32,
    lines: u32,
    columns: u32,
    values: Vec<u16>,
}

impl MaskRaster {
    /// Create a mask covering `lines x columns` pixels starting at
    /// `(first_line, first_column)`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidInput`] if `values` does not hold
    /// `lines * columns` labels.
    pub fn new(
        first_line: u32,
        first_column: u32,
        lines: u32,
        columns: u32,
        values: Vec<u16>,
    ) -> Result<Self, StatsError> {
        let expected = lines as usize * columns as usize;
        if values.len() != expected {
            return Err(StatsError::InvalidInput(format!(
                "mask needs {expected} values, got {}",
                values.len()
            )));
        }
        Ok(Self {
            first_line,
            first_column,
            lines,
            columns,
            values,
        })
    }

    /// Image lines covered, as `(first, last)`. `None` for an empty mask.
    #[must_use]
    pub fn line_range(&self) -> Option<(u32, u32)> {
        (self.lines > 0 && self.columns > 0)
            .then(|| (self.first_line, self.first_line + self.lines - 1))
    }

    /// Image column span covered.
    #[must_use]
    pub fn column_span(&self) -> ColumnSpan {
        ColumnSpan::new(self.first_column, self.first_column + self.columns.saturating_sub(1), 1)
    }

    /// Labels of one image line, or `None` outside the mask.
    #[must_use]
    pub fn line(&self, line: u32) -> Option<&[u16]> {
        let offset = line.checked_sub(self.first_line)?;
        if offset >= self.lines {
            return None;
        }
        let start = offset as usize * self.columns as usize;
        Some(&self.values[start..start + self.columns as usize])
    }
}

/// Lookup from mask label to field.
pub type MaskLabels = BTreeMap<u16, FieldId>;
