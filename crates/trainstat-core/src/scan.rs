//! Area and training-mask scans.
//!
//! Both scans read the image line by line through a [`PixelSource`], poll
//! the cancel check before each line, and skip pixels rejected by the
//! no-data policy. Neither touches freshness flags; the update engine marks
//! results up to date only after a scan returns `Ok`.

use std::collections::{BTreeMap, BTreeSet};

use tally::StatsAccumulator;
use tracing::{trace, warn};

use crate::area::{AreaDescriptor, MaskLabels, MaskRaster, PixelSource};
use crate::arena::{StatisticsArena, StatsTarget};
use crate::config::NoDataPolicy;
use crate::control::{CancelCheck, ProgressEvent, ProgressSink};
use crate::error::{Result, StatsError};
use crate::ids::{ClassSlot, FieldId};

/// Pixel selection shared by both scans.
#[derive(Debug, Clone, Copy)]
pub struct ScanSettings<'a> {
    /// Image channels to read, in statistics order
    pub channels: &'a [usize],
    /// Pixels to skip
    pub no_data: &'a NoDataPolicy,
}

/// Accumulate every usable pixel of `area` into `accumulator`.
///
/// Returns the number of pixels added. An area that misses the image adds
/// nothing.
///
/// # Errors
///
/// Returns [`StatsError::Canceled`] if cancellation is observed and
/// [`StatsError::PixelRead`] if a line cannot be read. The accumulator then
/// holds a partial result.
pub fn scan_area(
    source: &mut dyn PixelSource,
    area: &AreaDescriptor,
    settings: ScanSettings<'_>,
    accumulator: &mut StatsAccumulator,
    cancel: &dyn CancelCheck,
    progress: &mut dyn ProgressSink,
) -> Result<u64> {
    let (lines, columns) = source.dimensions();
    let (Some((first, last, step)), Some(span)) = (area.line_range(lines), area.column_span(columns)) else {
        return Ok(0);
    };
    if first > last {
        return Ok(0);
    }

    let width = settings.channels.len();
    let mut buffer = vec![0.0; span.samples() * width];
    let step = step.max(1);
    let total = (last - first) / step + 1;
    let mut pixels = 0_u64;

    for (done, line) in (first..=last).step_by(step as usize).enumerate() {
        if cancel.is_canceled() {
            return Err(StatsError::Canceled);
        }
        source.read_line(line, span, settings.channels, &mut buffer).map_err(|e| {
            warn!(line, error = %e, "area scan aborted");
            e
        })?;
        for (sample, column) in span.columns().enumerate() {
            if !area.contains(line, column) {
                continue;
            }
            let pixel = &buffer[sample * width..(sample + 1) * width];
            if settings.no_data.accepts(pixel) {
                accumulator.add_pixel(pixel);
                pixels += 1;
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        progress.report(ProgressEvent::Lines {
            done: done as u32 + 1,
            total,
        });
    }
    trace!(pixels, first, last, "area scanned");
    Ok(pixels)
}

/// Where one mask label's pixels go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskDestination {
    /// Accumulator receiving the pixels
    pub target: StatsTarget,
    /// Class owning the field
    pub class: ClassSlot,
}

/// Outcome of a mask scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskScan {
    /// Pixels accumulated per field
    pub pixels: BTreeMap<FieldId, u64>,
    /// Classes whose targets received pixels
    pub touched: BTreeSet<ClassSlot>,
}

/// Accumulate the pixels of every labeled field in one pass over the mask.
///
/// `labels` maps mask values to eligible fields; `destinations` says where
/// each field's pixels go. Lines without an eligible label are not read.
///
/// # Errors
///
/// Returns [`StatsError::Canceled`] or [`StatsError::PixelRead`]. On error
/// `partial` holds the classes touched so far.
#[allow(clippy::too_many_arguments)]
pub fn scan_mask(
    source: &mut dyn PixelSource,
    mask: &MaskRaster,
    labels: &MaskLabels,
    destinations: &BTreeMap<FieldId, MaskDestination>,
    settings: ScanSettings<'_>,
    arena: &mut StatisticsArena,
    partial: &mut MaskScan,
    cancel: &dyn CancelCheck,
    progress: &mut dyn ProgressSink,
) -> Result<()> {
    let (lines, columns) = source.dimensions();
    let Some((first, mask_last)) = mask.line_range() else {
        return Ok(());
    };
    if lines == 0 || columns == 0 || first >= lines {
        return Ok(());
    }
    let last = mask_last.min(lines - 1);
    let mask_span = mask.column_span();
    if mask_span.start >= columns {
        return Ok(());
    }
    let mut span = mask_span;
    span.end = span.end.min(columns - 1);

    let width = settings.channels.len();
    let mut buffer = vec![0.0; span.samples() * width];
    let total = last - first + 1;

    for line in first..=last {
        if cancel.is_canceled() {
            return Err(StatsError::Canceled);
        }
        let Some(row) = mask.line(line) else {
            continue;
        };
        let row = &row[..span.samples()];
        if row.iter().all(|value| !labels.contains_key(value)) {
            continue;
        }
        source.read_line(line, span, settings.channels, &mut buffer).map_err(|e| {
            warn!(line, error = %e, "mask scan aborted");
            e
        })?;
        for (sample, value) in row.iter().enumerate() {
            let Some(field) = labels.get(value) else {
                continue;
            };
            let Some(destination) = destinations.get(field) else {
                continue;
            };
            let pixel = &buffer[sample * width..(sample + 1) * width];
            if !settings.no_data.accepts(pixel) {
                continue;
            }
            arena.accumulator_mut(destination.target)?.add_pixel(pixel);
            partial.touched.insert(destination.class);
            *partial.pixels.entry(*field).or_insert(0) += 1;
        }
        progress.report(ProgressEvent::Lines {
            done: line - first + 1,
            total,
        });
    }
    trace!(fields = partial.pixels.len(), "training mask scanned");
    Ok(())
}
