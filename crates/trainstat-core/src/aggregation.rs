//! Aggregation strategies.
//!
//! Where a field's pixels are accumulated, and how a class total is formed,
//! depends on the project's [`StorageStrategy`]:
//!
//! | Strategy | Field scan target | Class total |
//! |----------|-------------------|-------------|
//! | [`PerFieldAggregation`] | the field's own slot | merge of loaded fields |
//! | [`ClassOnlyAggregation`] | scan buffer, then the class | the class slot |
//!
//! The update engine drives both through [`AggregationStrategy`] and never
//! branches on the storage setting itself.

use std::collections::BTreeSet;
use std::fmt;

use tally::{StatisticsCode, StatsAccumulator};
use tracing::trace;

use crate::arena::{ArenaLayout, StatsTarget};
use crate::config::StorageStrategy;
use crate::error::{Result, StatsError};
use crate::field::{FieldFlags, FieldRecord};
use crate::ids::{ClassSlot, FieldId};
use crate::project::ProjectState;

/// Storage-dependent steps of a statistics update.
pub trait AggregationStrategy: fmt::Debug + Send + Sync {
    /// Storage setting this strategy implements.
    fn storage(&self) -> StorageStrategy;

    /// True if training fields get their own arena slot.
    fn assigns_field_slots(&self) -> bool;

    /// Accumulators the project needs.
    fn layout(&self, state: &ProjectState) -> ArenaLayout;

    /// Mark a class stale after its membership or geometry changed.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown slot.
    fn invalidate_class(&self, state: &mut ProjectState, slot: ClassSlot) -> Result<()>;

    /// Empty a stale field's accumulator before it is rescanned.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidField`] for an unknown field.
    fn clear_field(&self, state: &mut ProjectState, field: FieldId) -> Result<()>;

    /// Bring a stale class back to a consistent starting point.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown slot.
    fn clear_class(&self, state: &mut ProjectState, slot: ClassSlot) -> Result<()>;

    /// Accumulator an area scan of `field` writes to.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidInput`] if the field has no slot.
    fn area_target(&self, field: &FieldRecord) -> Result<StatsTarget>;

    /// Accumulator a mask scan writes `field`'s pixels to.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidInput`] if the field has no slot.
    fn mask_target(&self, field: &FieldRecord) -> Result<StatsTarget>;

    /// True if a scanned field must be loaded into its class right away
    /// because it keeps no statistics of its own.
    fn loads_on_scan(&self) -> bool;

    /// Complete a field after a successful area scan.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidField`] for an unknown field.
    fn finish_field_area(&self, state: &mut ProjectState, field: FieldId) -> Result<()>;

    /// Complete a field after a successful mask scan.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidField`] for an unknown field.
    fn finish_field_mask(&self, state: &mut ProjectState, field: FieldId) -> Result<()>;

    /// Add a freshly scanned area field to its class aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown field or unallocated slot.
    fn merge_field_into_class(&self, state: &mut ProjectState, field: FieldId) -> Result<()>;

    /// Complete a class once its fields are loaded.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown slot.
    fn finish_class(&self, state: &mut ProjectState, slot: ClassSlot) -> Result<()>;

    /// Restore consistency after a mask scan failed part way.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown slot.
    fn abort_mask_scan(&self, state: &mut ProjectState, touched: &BTreeSet<ClassSlot>) -> Result<()>;

    /// Class statistics restricted to `channels`, as a fresh accumulator.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown class or unallocated slot.
    fn combine_class(
        &self,
        state: &ProjectState,
        slot: ClassSlot,
        channels: &[usize],
        code: StatisticsCode,
    ) -> Result<StatsAccumulator>;
}

/// Strategy for a storage setting.
#[must_use]
pub fn strategy_for(storage: StorageStrategy) -> Box<dyn AggregationStrategy> {
    match storage {
        StorageStrategy::PerField => Box::new(PerFieldAggregation),
        StorageStrategy::ClassOnly => Box::new(ClassOnlyAggregation),
    }
}

fn field_slot(field: &FieldRecord) -> Result<StatsTarget> {
    field
        .stats_slot
        .map(StatsTarget::Field)
        .ok_or_else(|| StatsError::InvalidInput(format!("field '{}' has no statistics slot", field.name)))
}

fn mark_class_stale(state: &mut ProjectState, slot: ClassSlot) -> Result<()> {
    state.class_mut(slot)?.stats_up_to_date = false;
    state.stats_up_to_date = false;
    state.common.invalidate();
    Ok(())
}

// =============================================================================
// Per-Field Storage
// =============================================================================

/// Every training field keeps its own statistics; classes are formed by
/// merging fields on demand.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerFieldAggregation;

impl AggregationStrategy for PerFieldAggregation {
    fn storage(&self) -> StorageStrategy {
        StorageStrategy::PerField
    }

    fn assigns_field_slots(&self) -> bool {
        true
    }

    fn layout(&self, state: &ProjectState) -> ArenaLayout {
        ArenaLayout {
            field_slots: state.field_slots.high_water(),
            class_slots: 0,
        }
    }

    fn invalidate_class(&self, state: &mut ProjectState, slot: ClassSlot) -> Result<()> {
        mark_class_stale(state, slot)?;
        let pixels = state.pixels_loaded_in_class(slot)?;
        state.class_mut(slot)?.statistics_pixels = pixels;
        Ok(())
    }

    fn clear_field(&self, state: &mut ProjectState, field: FieldId) -> Result<()> {
        let record = state.field(field)?;
        if record.has_statistics() && !record.is_up_to_date() {
            let target = field_slot(record)?;
            state.arena.zero(target);
        }
        Ok(())
    }

    fn clear_class(&self, state: &mut ProjectState, slot: ClassSlot) -> Result<()> {
        if state.class(slot)?.stats_up_to_date {
            return Ok(());
        }
        for field in state.statistics_fields(slot)? {
            self.clear_field(state, field)?;
        }
        let pixels = state.pixels_loaded_in_class(slot)?;
        state.class_mut(slot)?.statistics_pixels = pixels;
        Ok(())
    }

    fn area_target(&self, field: &FieldRecord) -> Result<StatsTarget> {
        field_slot(field)
    }

    fn mask_target(&self, field: &FieldRecord) -> Result<StatsTarget> {
        field_slot(field)
    }

    fn loads_on_scan(&self) -> bool {
        false
    }

    fn finish_field_area(&self, state: &mut ProjectState, field: FieldId) -> Result<()> {
        let record = state.field(field)?;
        let (target, pixels) = (field_slot(record)?, record.pixels_used);
        state.arena.accumulator_mut(target)?.derive(pixels);
        state.field_mut(field)?.flags.insert(FieldFlags::STATS_UP_TO_DATE);
        Ok(())
    }

    fn finish_field_mask(&self, state: &mut ProjectState, field: FieldId) -> Result<()> {
        self.finish_field_area(state, field)
    }

    fn merge_field_into_class(&self, _state: &mut ProjectState, _field: FieldId) -> Result<()> {
        Ok(())
    }

    fn finish_class(&self, _state: &mut ProjectState, _slot: ClassSlot) -> Result<()> {
        Ok(())
    }

    fn abort_mask_scan(&self, _state: &mut ProjectState, _touched: &BTreeSet<ClassSlot>) -> Result<()> {
        // Partial field slots are never marked up to date and get zeroed
        // before the next scan.
        Ok(())
    }

    fn combine_class(
        &self,
        state: &ProjectState,
        slot: ClassSlot,
        channels: &[usize],
        code: StatisticsCode,
    ) -> Result<StatsAccumulator> {
        let mut combined = StatsAccumulator::new(channels.len(), code);
        let mut initialize = true;
        for field in &state.class(slot)?.fields {
            let record = state.field(*field)?;
            if !record.has_statistics() || !record.is_loaded() {
                continue;
            }
            let source = state.arena.accumulator(field_slot(record)?)?;
            combined.merge_from(source, Some(channels), initialize);
            initialize = false;
        }
        trace!(slot, merged = !initialize, "class statistics combined from fields");
        Ok(combined)
    }
}

// =============================================================================
// Class-Only Storage
// =============================================================================

/// Only class aggregates are kept. Any change to a class forces a rebuild
/// from all of its fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassOnlyAggregation;

impl AggregationStrategy for ClassOnlyAggregation {
    fn storage(&self) -> StorageStrategy {
        StorageStrategy::ClassOnly
    }

    fn assigns_field_slots(&self) -> bool {
        false
    }

    fn layout(&self, state: &ProjectState) -> ArenaLayout {
        ArenaLayout {
            field_slots: 0,
            class_slots: state.classes.len(),
        }
    }

    fn invalidate_class(&self, state: &mut ProjectState, slot: ClassSlot) -> Result<()> {
        mark_class_stale(state, slot)?;
        for field in state.class(slot)?.fields.clone() {
            state.field_mut(field)?.invalidate();
        }
        state.class_mut(slot)?.statistics_pixels = 0;
        state.arena.zero(StatsTarget::Class(slot));
        Ok(())
    }

    fn clear_field(&self, state: &mut ProjectState, field: FieldId) -> Result<()> {
        state.field(field).map(|_| ())
    }

    fn clear_class(&self, state: &mut ProjectState, slot: ClassSlot) -> Result<()> {
        let class = state.class(slot)?;
        if class.stats_up_to_date || class.statistics_pixels > 0 {
            return Ok(());
        }
        state.arena.zero(StatsTarget::Class(slot));
        Ok(())
    }

    fn area_target(&self, _field: &FieldRecord) -> Result<StatsTarget> {
        Ok(StatsTarget::ScanBuffer)
    }

    fn mask_target(&self, field: &FieldRecord) -> Result<StatsTarget> {
        Ok(StatsTarget::Class(field.class))
    }

    fn loads_on_scan(&self) -> bool {
        true
    }

    fn finish_field_area(&self, state: &mut ProjectState, field: FieldId) -> Result<()> {
        state.field(field).map(|_| ())
    }

    fn finish_field_mask(&self, state: &mut ProjectState, field: FieldId) -> Result<()> {
        state.field(field).map(|_| ())
    }

    fn merge_field_into_class(&self, state: &mut ProjectState, field: FieldId) -> Result<()> {
        let slot = state.field(field)?.class;
        state.arena.merge_scan_buffer_into_class(slot)
    }

    fn finish_class(&self, state: &mut ProjectState, slot: ClassSlot) -> Result<()> {
        let pixels = state.class(slot)?.statistics_pixels;
        state.arena.accumulator_mut(StatsTarget::Class(slot))?.derive(pixels);
        Ok(())
    }

    fn abort_mask_scan(&self, state: &mut ProjectState, touched: &BTreeSet<ClassSlot>) -> Result<()> {
        for &slot in touched {
            self.invalidate_class(state, slot)?;
        }
        Ok(())
    }

    fn combine_class(
        &self,
        state: &ProjectState,
        slot: ClassSlot,
        channels: &[usize],
        code: StatisticsCode,
    ) -> Result<StatsAccumulator> {
        state.class(slot)?;
        let mut combined = StatsAccumulator::new(channels.len(), code);
        let source = state.arena.accumulator(StatsTarget::Class(slot))?;
        combined.merge_from(source, Some(channels), true);
        Ok(combined)
    }
}
