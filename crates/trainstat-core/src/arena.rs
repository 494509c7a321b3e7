//! Statistics arena.
//!
//! The arena owns every accumulator of a project: one per field slot, one per
//! class slot, and a scan buffer used while a field is read under class-only
//! storage. It is sized to the project's current layout before each update
//! and reused across updates; slots that survive a resize keep their
//! contents.
//!
//! # Slot Allocation
//!
//! Field slots are handed out by a [`SlotAllocator`]. Freed slots are reused
//! lowest first, so the arena stays as small as the largest live slot.
//!
//! # Example
//!
//! ```
//! use tally::StatisticsCode;
//! use trainstat_core::arena::{ArenaLayout, StatisticsArena, StatsTarget};
//!
//! let mut arena = StatisticsArena::new(3, StatisticsCode::MeanCovariance, 1 << 20);
//! arena.fit(ArenaLayout { field_slots: 2, class_slots: 1 }).unwrap();
//!
//! arena.accumulator_mut(StatsTarget::Field(1)).unwrap().add_pixel(&[1.0, 2.0, 3.0]);
//! assert_eq!(arena.accumulator(StatsTarget::Field(1)).unwrap().channels()[2].sum, 3.0);
//! assert!(arena.accumulator(StatsTarget::Field(2)).is_err());
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tally::{StatisticsCode, StatsAccumulator};
use tracing::debug;

use crate::error::{Result, StatsError};

/// Number of accumulators a project needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaLayout {
    /// Field accumulators
    pub field_slots: usize,
    /// Class accumulators
    pub class_slots: usize,
}

/// Address of an accumulator in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatsTarget {
    /// A field's own statistics
    Field(usize),
    /// A class aggregate
    Class(usize),
    /// Transient buffer for one field scan
    ScanBuffer,
}

/// Storage for every accumulator of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsArena {
    channels: usize,
    code: StatisticsCode,
    limit: u64,
    field_stats: Vec<StatsAccumulator>,
    class_stats: Vec<StatsAccumulator>,
    scan_buffer: StatsAccumulator,
}

impl StatisticsArena {
    /// Create an empty arena.
    ///
    /// # Arguments
    ///
    /// * `channels` - Statistics channels per accumulator
    /// * `code` - Second-order statistics kept
    /// * `limit` - Upper bound on accumulator storage in bytes
    #[must_use]
    pub fn new(channels: usize, code: StatisticsCode, limit: u64) -> Self {
        Self {
            channels,
            code,
            limit,
            field_stats: Vec::new(),
            class_stats: Vec::new(),
            scan_buffer: StatsAccumulator::new(channels, code),
        }
    }

    /// Current layout.
    #[must_use]
    pub fn layout(&self) -> ArenaLayout {
        ArenaLayout {
            field_slots: self.field_stats.len(),
            class_slots: self.class_stats.len(),
        }
    }

    /// Bytes of accumulator storage needed for `layout`, scan buffer included.
    #[must_use]
    pub fn required_bytes(&self, layout: ArenaLayout) -> u64 {
        let per_unit = StatsAccumulator::footprint(self.channels, self.code) as u64;
        let units = layout.field_slots as u64 + layout.class_slots as u64 + 1;
        per_unit.saturating_mul(units)
    }

    /// Resize to `layout`.
    ///
    /// New slots start empty; surviving slots keep their contents. Nothing
    /// changes when the layout does not fit.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::ResourceExhausted`] if the layout exceeds the
    /// byte limit or the allocator refuses the memory.
    pub fn fit(&mut self, layout: ArenaLayout) -> Result<()> {
        let requested = self.required_bytes(layout);
        if requested > self.limit {
            return Err(StatsError::ResourceExhausted {
                requested,
                limit: self.limit,
            });
        }

        let limit = self.limit;
        let exhausted = move |_| StatsError::ResourceExhausted { requested, limit };
        self.field_stats
            .try_reserve(layout.field_slots.saturating_sub(self.field_stats.len()))
            .map_err(exhausted)?;
        self.class_stats
            .try_reserve(layout.class_slots.saturating_sub(self.class_stats.len()))
            .map_err(exhausted)?;

        let (channels, code) = (self.channels, self.code);
        self.field_stats
            .resize_with(layout.field_slots, || StatsAccumulator::new(channels, code));
        self.class_stats
            .resize_with(layout.class_slots, || StatsAccumulator::new(channels, code));
        debug!(
            field_slots = layout.field_slots,
            class_slots = layout.class_slots,
            bytes = requested,
            "statistics arena sized"
        );
        Ok(())
    }

    /// Accumulator at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidInput`] if the slot is not allocated.
    pub fn accumulator(&self, target: StatsTarget) -> Result<&StatsAccumulator> {
        match target {
            StatsTarget::Field(slot) => self.field_stats.get(slot),
            StatsTarget::Class(slot) => self.class_stats.get(slot),
            StatsTarget::ScanBuffer => Some(&self.scan_buffer),
        }
        .ok_or_else(|| unallocated(target))
    }

    /// Mutable accumulator at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidInput`] if the slot is not allocated.
    pub fn accumulator_mut(&mut self, target: StatsTarget) -> Result<&mut StatsAccumulator> {
        match target {
            StatsTarget::Field(slot) => self.field_stats.get_mut(slot),
            StatsTarget::Class(slot) => self.class_stats.get_mut(slot),
            StatsTarget::ScanBuffer => Some(&mut self.scan_buffer),
        }
        .ok_or_else(|| unallocated(target))
    }

    /// Empty the accumulator at `target`. Unallocated slots are ignored.
    pub fn zero(&mut self, target: StatsTarget) {
        if let Ok(acc) = self.accumulator_mut(target) {
            acc.zero();
        }
    }

    /// Merge the scan buffer into a class aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidInput`] if the class slot is not allocated.
    pub fn merge_scan_buffer_into_class(&mut self, class_slot: usize) -> Result<()> {
        let class = self
            .class_stats
            .get_mut(class_slot)
            .ok_or_else(|| unallocated(StatsTarget::Class(class_slot)))?;
        class.merge_from(&self.scan_buffer, None, false);
        Ok(())
    }
}

fn unallocated(target: StatsTarget) -> StatsError {
    StatsError::InvalidInput(format!("statistics slot {target:?} is not allocated"))
}

/// Hands out field slots, reusing freed ones lowest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAllocator {
    next: usize,
    free: BTreeSet<usize>,
}

impl SlotAllocator {
    /// Take a slot.
    pub fn allocate(&mut self) -> usize {
        if let Some(slot) = self.free.pop_first() {
            return slot;
        }
        let slot = self.next;
        self.next += 1;
        slot
    }

    /// Return a slot.
    pub fn release(&mut self, slot: usize) {
        if slot + 1 == self.next {
            self.next -= 1;
            while self.next > 0 && self.free.remove(&(self.next - 1)) {
                self.next -= 1;
            }
        } else {
            self.free.insert(slot);
        }
    }

    /// One past the highest live slot.
    #[must_use]
    pub fn high_water(&self) -> usize {
        self.next
    }
}
