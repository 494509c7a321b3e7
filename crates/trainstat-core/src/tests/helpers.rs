//! Test helpers: images, pixel sources and project builders.

use std::cell::Cell;
use std::sync::Once;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::area::{ColumnSpan, MemoryImage, PixelSource};
use crate::config::{ProjectConfig, StorageStrategy};
use crate::control::{CancelCheck, NeverCancel, NullProgress};
use crate::error::PixelReadError;
use crate::project::Project;
use crate::update::{UpdateScope, UpdateSummary};

// =============================================================================
// Logging
// =============================================================================

/// Route `tracing` output to the test harness, once per process.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// =============================================================================
// Images
// =============================================================================

/// Image with integer-valued random samples in `0..=255`.
///
/// # Arguments
///
/// * `seed` - Seed for the deterministic generator
/// * `lines` - Image lines
/// * `columns` - Image columns
/// * `channels` - Channels per pixel
pub fn synthetic_image(seed: u64, lines: u32, columns: u32, channels: usize) -> MemoryImage {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    MemoryImage::from_fn(lines, columns, channels, |_, _, _| f64::from(rng.gen_range(0_u8..=255)))
}

/// Image where every pixel of a line has the same values.
pub fn banded_image(columns: u32, bands: &[&[f64]]) -> MemoryImage {
    let channels = bands.first().map_or(0, |b| b.len());
    #[allow(clippy::cast_possible_truncation)]
    let lines = bands.len() as u32;
    MemoryImage::from_fn(lines, columns, channels, |line, _, channel| bands[line as usize][channel])
}

/// Pixel source that fails at one line and counts reads.
pub struct FailingSource {
    pub inner: MemoryImage,
    pub fail_line: u32,
    pub reads: usize,
}

impl FailingSource {
    pub fn new(inner: MemoryImage, fail_line: u32) -> Self {
        Self {
            inner,
            fail_line,
            reads: 0,
        }
    }
}

impl PixelSource for FailingSource {
    fn dimensions(&self) -> (u32, u32) {
        self.inner.dimensions()
    }

    fn read_line(
        &mut self,
        line: u32,
        span: ColumnSpan,
        channels: &[usize],
        out: &mut [f64],
    ) -> Result<(), PixelReadError> {
        self.reads += 1;
        if line == self.fail_line {
            return Err(PixelReadError::new(line, "simulated read failure"));
        }
        self.inner.read_line(line, span, channels, out)
    }
}

/// Cancels on the `n`th poll and every poll after it.
pub struct CountdownCancel {
    remaining: Cell<usize>,
}

impl CountdownCancel {
    pub fn after(polls: usize) -> Self {
        Self {
            remaining: Cell::new(polls),
        }
    }
}

impl CancelCheck for CountdownCancel {
    fn is_canceled(&self) -> bool {
        let remaining = self.remaining.get().saturating_sub(1);
        self.remaining.set(remaining);
        remaining == 0
    }
}

// =============================================================================
// Projects
// =============================================================================

/// Project over the first `channels` image channels.
pub fn project_with(storage: StorageStrategy, channels: usize) -> Project {
    init_tracing();
    let mut config = ProjectConfig::with_channels(channels);
    config.storage = storage;
    Project::new(config).expect("valid test config")
}

/// Update the whole project without cancellation.
pub fn update_all(project: &mut Project, source: &mut dyn PixelSource) -> UpdateSummary {
    project
        .update_statistics(UpdateScope::Project, source, &NeverCancel, &mut NullProgress)
        .expect("update succeeds")
}

pub const BOTH_STORAGES: [StorageStrategy; 2] = [StorageStrategy::PerField, StorageStrategy::ClassOnly];
