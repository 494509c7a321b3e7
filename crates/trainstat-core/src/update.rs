//! Statistics update engine.
//!
//! An update runs in four phases over its scope:
//!
//! 1. **Size**: fit the arena to the project layout; fails before any pixel
//!    is read when storage would exceed the configured limit
//! 2. **Clear**: empty accumulators of stale fields and classes
//! 3. **Scan**: read area fields one at a time, then every eligible mask
//!    field in a single pass over the training mask
//! 4. **Finish**: load fresh fields into their classes, derive statistics
//!    and set freshness flags
//!
//! Flags are only set once a scan completes. A canceled or failed update
//! leaves the interrupted field and its class stale, and everything that
//! finished before the interruption intact.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::area::{AreaDescriptor, MaskLabels, PixelSource};
use crate::arena::StatsTarget;
use crate::control::{CancelCheck, ProgressEvent, ProgressSink};
use crate::error::{Result, StatsError};
use crate::field::FieldFlags;
use crate::ids::{ClassNumber, ClassSlot, FieldId};
use crate::project::Project;
use crate::scan::{scan_area, scan_mask, MaskDestination, MaskScan, ScanSettings};

/// What an update covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateScope {
    /// Every class
    Project,
    /// One class and its fields
    Class(ClassNumber),
    /// One training field
    Field(FieldId),
}

/// Result of a completed update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSummary {
    /// Area fields read from the image
    pub fields_scanned: usize,
    /// Mask fields filled by the training-mask pass
    pub mask_fields_scanned: usize,
    /// Usable pixels accumulated
    pub pixels_scanned: u64,
    /// True if the whole scope is up to date afterwards
    pub up_to_date: bool,
}

/// Scope with class numbers resolved to storage slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Project,
    Class(ClassSlot),
    Field(FieldId),
}

impl Project {
    fn resolve_scope(&self, scope: UpdateScope) -> Result<Scope> {
        match scope {
            UpdateScope::Project => Ok(Scope::Project),
            UpdateScope::Class(class) => self.state.slot_of(class).map(Scope::Class),
            UpdateScope::Field(id) => {
                if self.state.field(id)?.has_statistics() {
                    Ok(Scope::Field(id))
                } else {
                    Err(StatsError::InvalidInput(format!(
                        "{id} is not a training field with statistics"
                    )))
                }
            }
        }
    }

    /// Bring the statistics of `scope` up to date.
    ///
    /// # Arguments
    ///
    /// * `scope` - Project, class or field to update
    /// * `source` - Image pixels
    /// * `cancel` - Polled before every line and every class
    /// * `progress` - Receives class, field and line notifications
    ///
    /// # Errors
    ///
    /// - [`StatsError::ResourceExhausted`] before any pixel is read if the
    ///   accumulators do not fit the configured limit
    /// - [`StatsError::Canceled`] if cancellation is observed
    /// - [`StatsError::PixelRead`] if the source fails
    /// - [`StatsError::InvalidClass`] or [`StatsError::InvalidField`] for an
    ///   unknown scope
    pub fn update_statistics(
        &mut self,
        scope: UpdateScope,
        source: &mut dyn PixelSource,
        cancel: &dyn CancelCheck,
        progress: &mut dyn ProgressSink,
    ) -> Result<UpdateSummary> {
        let resolved = self.resolve_scope(scope)?;
        let layout = self.strategy.layout(&self.state);
        self.state.arena.fit(layout)?;

        let mut summary = UpdateSummary::default();
        let outcome = match resolved {
            Scope::Project => self.update_project(source, cancel, progress, &mut summary),
            Scope::Class(slot) => self.update_class(slot, source, cancel, progress, &mut summary),
            Scope::Field(id) => self.update_field(id, source, cancel, progress, &mut summary),
        };
        if let Err(error) = outcome {
            if error.is_canceled() {
                info!(?scope, "statistics update canceled");
            } else {
                warn!(?scope, %error, "statistics update failed");
            }
            self.state.stats_up_to_date = false;
            return Err(error);
        }

        self.state.stats_up_to_date = self.all_classes_up_to_date();
        summary.up_to_date = match resolved {
            Scope::Project => self.state.stats_up_to_date,
            Scope::Class(slot) => self.state.class(slot)?.stats_up_to_date,
            Scope::Field(id) => {
                let field = self.state.field(id)?;
                field.is_up_to_date() || field.is_loaded()
            }
        };
        info!(
            ?scope,
            fields = summary.fields_scanned,
            mask_fields = summary.mask_fields_scanned,
            pixels = summary.pixels_scanned,
            up_to_date = summary.up_to_date,
            "statistics updated"
        );
        Ok(summary)
    }

    fn update_project(
        &mut self,
        source: &mut dyn PixelSource,
        cancel: &dyn CancelCheck,
        progress: &mut dyn ProgressSink,
        summary: &mut UpdateSummary,
    ) -> Result<()> {
        if self.state.stats_up_to_date {
            return Ok(());
        }
        self.clear_project()?;
        let slots = self.state.ordered_slots();
        let total = slots.len();
        for (index, &slot) in slots.iter().enumerate() {
            if cancel.is_canceled() {
                return Err(StatsError::Canceled);
            }
            progress.report(ProgressEvent::ClassStarted {
                name: self.state.class(slot)?.name.clone(),
                index,
                total,
            });
            self.update_class_area(slot, source, cancel, progress, summary)?;
        }
        self.update_mask(Scope::Project, source, cancel, progress, summary)?;
        self.finish_project()?;
        Ok(())
    }

    fn update_class(
        &mut self,
        slot: ClassSlot,
        source: &mut dyn PixelSource,
        cancel: &dyn CancelCheck,
        progress: &mut dyn ProgressSink,
        summary: &mut UpdateSummary,
    ) -> Result<()> {
        if self.state.class(slot)?.stats_up_to_date {
            return Ok(());
        }
        self.strategy.clear_class(&mut self.state, slot)?;
        self.update_class_area(slot, source, cancel, progress, summary)?;
        self.update_mask(Scope::Class(slot), source, cancel, progress, summary)?;
        self.finish_class(slot)?;
        Ok(())
    }

    fn update_field(
        &mut self,
        id: FieldId,
        source: &mut dyn PixelSource,
        cancel: &dyn CancelCheck,
        progress: &mut dyn ProgressSink,
        summary: &mut UpdateSummary,
    ) -> Result<()> {
        self.strategy.clear_field(&mut self.state, id)?;
        let field = self.state.field(id)?;
        if field.is_mask() {
            return self.update_mask(Scope::Field(id), source, cancel, progress, summary);
        }
        if field.is_loaded() {
            return Ok(());
        }
        self.update_field_area(id, source, cancel, progress, summary)?;
        if self.strategy.loads_on_scan() {
            self.strategy.merge_field_into_class(&mut self.state, id)?;
            self.load_field(id)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Area Scans
    // -------------------------------------------------------------------------

    fn update_class_area(
        &mut self,
        slot: ClassSlot,
        source: &mut dyn PixelSource,
        cancel: &dyn CancelCheck,
        progress: &mut dyn ProgressSink,
        summary: &mut UpdateSummary,
    ) -> Result<()> {
        if self.state.class(slot)?.stats_up_to_date {
            return Ok(());
        }
        for id in self.state.statistics_fields(slot)? {
            let field = self.state.field(id)?;
            if field.is_mask() || field.is_loaded() {
                continue;
            }
            self.update_field_area(id, source, cancel, progress, summary)?;
            self.strategy.merge_field_into_class(&mut self.state, id)?;
            self.load_field(id)?;
        }
        Ok(())
    }

    fn update_field_area(
        &mut self,
        id: FieldId,
        source: &mut dyn PixelSource,
        cancel: &dyn CancelCheck,
        progress: &mut dyn ProgressSink,
        summary: &mut UpdateSummary,
    ) -> Result<u64> {
        let field = self.state.field(id)?;
        if field.is_up_to_date() {
            return Ok(field.pixels_used);
        }
        let target = self.strategy.area_target(field)?;
        let area = field.area.clone();
        progress.report(ProgressEvent::FieldStarted {
            name: field.name.clone(),
        });

        self.state.arena.zero(target);
        let settings = ScanSettings {
            channels: &self.state.config.channels,
            no_data: &self.state.config.no_data,
        };
        let accumulator = self.state.arena.accumulator_mut(target)?;
        let pixels = scan_area(source, &area, settings, accumulator, cancel, progress)?;

        self.state.field_mut(id)?.pixels_used = pixels;
        self.strategy.finish_field_area(&mut self.state, id)?;
        summary.fields_scanned += 1;
        summary.pixels_scanned += pixels;
        debug!(field = %id, pixels, "field scanned");
        Ok(pixels)
    }

    // -------------------------------------------------------------------------
    // Training Mask
    // -------------------------------------------------------------------------

    /// Eligible mask fields of a scope: training, not loaded, not up to date.
    fn eligible_mask_fields(&self, scope: Scope) -> Result<(MaskLabels, BTreeMap<FieldId, MaskDestination>)> {
        let mut labels = MaskLabels::new();
        let mut destinations = BTreeMap::new();
        if self.state.mask.is_none() {
            return Ok((labels, destinations));
        }
        for (&id, field) in &self.state.fields {
            let AreaDescriptor::Mask { value } = field.area else {
                continue;
            };
            if value == 0 || !field.has_statistics() || field.is_loaded() || field.is_up_to_date() {
                continue;
            }
            let in_scope = match scope {
                Scope::Project => true,
                Scope::Class(slot) => field.class == slot,
                Scope::Field(only) => id == only,
            };
            if !in_scope {
                continue;
            }
            if let Some(first) = labels.get(&value) {
                warn!(label = value, field = %id, owner = %first, "mask label already claimed");
                continue;
            }
            labels.insert(value, id);
            destinations.insert(
                id,
                MaskDestination {
                    target: self.strategy.mask_target(field)?,
                    class: field.class,
                },
            );
        }
        Ok((labels, destinations))
    }

    fn update_mask(
        &mut self,
        scope: Scope,
        source: &mut dyn PixelSource,
        cancel: &dyn CancelCheck,
        progress: &mut dyn ProgressSink,
        summary: &mut UpdateSummary,
    ) -> Result<()> {
        let (labels, destinations) = self.eligible_mask_fields(scope)?;
        if labels.is_empty() {
            return Ok(());
        }

        for (id, destination) in &destinations {
            if let Some(field) = self.state.fields.get_mut(id) {
                field.pixels_used = 0;
            }
            if matches!(destination.target, StatsTarget::Field(_)) {
                self.state.arena.zero(destination.target);
            }
        }

        let mut outcome = MaskScan::default();
        let scanned = match self.state.mask.as_ref() {
            Some(mask) => {
                let settings = ScanSettings {
                    channels: &self.state.config.channels,
                    no_data: &self.state.config.no_data,
                };
                scan_mask(
                    source,
                    mask,
                    &labels,
                    &destinations,
                    settings,
                    &mut self.state.arena,
                    &mut outcome,
                    cancel,
                    progress,
                )
            }
            None => Ok(()),
        };
        if let Err(error) = scanned {
            self.strategy.abort_mask_scan(&mut self.state, &outcome.touched)?;
            return Err(error);
        }

        let load_now = self.strategy.loads_on_scan() || !matches!(scope, Scope::Field(_));
        for &id in destinations.keys() {
            let pixels = outcome.pixels.get(&id).copied().unwrap_or(0);
            self.state.field_mut(id)?.pixels_used = pixels;
            self.strategy.finish_field_mask(&mut self.state, id)?;
            if load_now {
                self.load_field(id)?;
            }
            summary.mask_fields_scanned += 1;
            summary.pixels_scanned += pixels;
        }
        Ok(())
    }

    /// True if no mask field in `scope` still needs to be scanned.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown class or field.
    pub fn mask_statistics_up_to_date(&self, scope: UpdateScope) -> Result<bool> {
        let resolved = self.resolve_scope(scope)?;
        Ok(self.eligible_mask_fields(resolved)?.0.is_empty())
    }

    /// Load a mask field whose own statistics are complete into its class.
    ///
    /// Returns true if the field is loaded afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidField`] for an unknown field.
    pub fn finish_field_mask_update(&mut self, id: FieldId) -> Result<bool> {
        let field = self.state.field(id)?;
        if !field.is_mask() || !field.has_statistics() {
            return Ok(false);
        }
        if field.is_up_to_date() {
            self.load_field(id)?;
        }
        Ok(self.state.field(id)?.is_loaded())
    }

    /// Load the finished mask fields of a class and set the class flag.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown class.
    pub fn finish_class_mask_update(&mut self, class: ClassNumber) -> Result<bool> {
        let slot = self.state.slot_of(class)?;
        for id in self.state.statistics_fields(slot)? {
            self.finish_field_mask_update(id)?;
        }
        self.finish_class_statistics(class)
    }

    /// Load the finished mask fields of every class and set the project flag.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] if a class record is missing.
    pub fn finish_project_mask_update(&mut self) -> Result<bool> {
        let masked: Vec<FieldId> = self
            .state
            .fields
            .iter()
            .filter(|(_, f)| f.is_mask())
            .map(|(&id, _)| id)
            .collect();
        for id in masked {
            self.finish_field_mask_update(id)?;
        }
        self.finish_project()
    }

    // -------------------------------------------------------------------------
    // Clear and Finish
    // -------------------------------------------------------------------------

    /// Empty the accumulator of a stale field.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidField`] for an unknown field.
    pub fn clear_field_statistics(&mut self, id: FieldId) -> Result<()> {
        self.state.arena.fit(self.strategy.layout(&self.state))?;
        self.strategy.clear_field(&mut self.state, id)
    }

    /// Prepare a stale class for an update.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown class.
    pub fn clear_class_statistics(&mut self, class: ClassNumber) -> Result<()> {
        let slot = self.state.slot_of(class)?;
        self.state.arena.fit(self.strategy.layout(&self.state))?;
        self.strategy.clear_class(&mut self.state, slot)
    }

    /// Prepare every stale class for an update.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::ResourceExhausted`] if the arena cannot be sized.
    pub fn clear_project_statistics(&mut self) -> Result<()> {
        self.state.arena.fit(self.strategy.layout(&self.state))?;
        self.clear_project()
    }

    fn clear_project(&mut self) -> Result<()> {
        if self.state.stats_up_to_date {
            return Ok(());
        }
        for slot in self.state.ordered_slots() {
            self.strategy.clear_class(&mut self.state, slot)?;
        }
        Ok(())
    }

    /// Load every fresh field of a class and set the class flag.
    ///
    /// Returns true if the class is up to date. A class without training
    /// fields never is.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown class.
    pub fn finish_class_statistics(&mut self, class: ClassNumber) -> Result<bool> {
        let slot = self.state.slot_of(class)?;
        let complete = self.finish_class(slot)?;
        self.state.stats_up_to_date = self.all_classes_up_to_date();
        Ok(complete)
    }

    /// Finish every class and set the project flag.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] if a class record is missing.
    pub fn finish_project_statistics(&mut self) -> Result<bool> {
        self.finish_project()
    }

    fn finish_project(&mut self) -> Result<bool> {
        let mut complete = true;
        for slot in self.state.ordered_slots() {
            complete &= self.finish_class(slot)?;
        }
        self.state.stats_up_to_date = complete;
        Ok(complete)
    }

    fn finish_class(&mut self, slot: ClassSlot) -> Result<bool> {
        if self.state.class(slot)?.stats_up_to_date {
            return Ok(true);
        }
        let fields = self.state.statistics_fields(slot)?;
        if fields.is_empty() {
            return Ok(false);
        }
        for &id in &fields {
            let field = self.state.field(id)?;
            if field.is_up_to_date() && !field.is_loaded() {
                self.load_field(id)?;
            }
        }
        let loaded: BTreeSet<FieldId> = fields
            .iter()
            .copied()
            .filter(|id| self.state.fields.get(id).is_some_and(|f| f.is_loaded()))
            .collect();
        let complete = loaded.len() == fields.len();

        self.strategy.finish_class(&mut self.state, slot)?;
        let class = self.state.class_mut(slot)?;
        class.stats_up_to_date = complete;
        debug!(class = %class.name, pixels = class.statistics_pixels, complete, "class finished");
        Ok(complete)
    }

    /// Count a field's pixels into its class.
    fn load_field(&mut self, id: FieldId) -> Result<()> {
        let field = self.state.field_mut(id)?;
        if field.is_loaded() {
            return Ok(());
        }
        field.flags.insert(FieldFlags::LOADED_INTO_CLASS);
        let (slot, pixels) = (field.class, field.pixels_used);
        self.state.class_mut(slot)?.statistics_pixels += pixels;
        self.state.common.invalidate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::{MaskRaster, MemoryImage};
    use crate::config::{ProjectConfig, StorageStrategy};
    use crate::control::{NeverCancel, NullProgress};
    use crate::field::FieldSpec;

    fn image() -> MemoryImage {
        MemoryImage::from_fn(6, 6, 2, |line, column, channel| f64::from(line + column) + channel as f64)
    }

    fn project(storage: StorageStrategy) -> Project {
        let mut config = ProjectConfig::with_channels(2);
        config.storage = storage;
        Project::new(config).unwrap()
    }

    #[test]
    fn test_class_update_counts_pixels() {
        for storage in [StorageStrategy::PerField, StorageStrategy::ClassOnly] {
            let mut p = project(storage);
            let class = p.add_class("a");
            p.add_field(class, FieldSpec::training("f1", AreaDescriptor::rectangle(0, 1, 0, 1)))
                .unwrap();
            p.add_field(class, FieldSpec::training("f2", AreaDescriptor::rectangle(3, 3, 0, 2)))
                .unwrap();
            p.add_field(class, FieldSpec::test("t", AreaDescriptor::rectangle(5, 5, 5, 5)))
                .unwrap();

            let summary = p
                .update_statistics(UpdateScope::Class(class), &mut image(), &NeverCancel, &mut NullProgress)
                .unwrap();
            assert_eq!(summary.fields_scanned, 2);
            assert_eq!(summary.pixels_scanned, 7);
            assert!(summary.up_to_date);
            assert_eq!(p.class(class).unwrap().statistics_pixels(), 7);
            assert!(p.is_up_to_date());
        }
    }

    #[test]
    fn test_field_scope_rejects_test_field() {
        let mut p = project(StorageStrategy::PerField);
        let class = p.add_class("a");
        let test = p
            .add_field(class, FieldSpec::test("t", AreaDescriptor::rectangle(0, 0, 0, 0)))
            .unwrap();
        let err = p
            .update_statistics(UpdateScope::Field(test), &mut image(), &NeverCancel, &mut NullProgress)
            .unwrap_err();
        assert!(matches!(err, StatsError::InvalidInput(_)));
    }

    #[test]
    fn test_field_then_class_update_loads_once() {
        let mut p = project(StorageStrategy::PerField);
        let class = p.add_class("a");
        let f = p
            .add_field(class, FieldSpec::training("f", AreaDescriptor::rectangle(0, 1, 0, 1)))
            .unwrap();
        p.update_statistics(UpdateScope::Field(f), &mut image(), &NeverCancel, &mut NullProgress)
            .unwrap();
        assert!(p.field(f).unwrap().is_up_to_date());
        assert!(!p.field(f).unwrap().is_loaded());

        let summary = p
            .update_statistics(UpdateScope::Class(class), &mut image(), &NeverCancel, &mut NullProgress)
            .unwrap();
        assert_eq!(summary.fields_scanned, 0);
        assert_eq!(p.class(class).unwrap().statistics_pixels(), 4);
    }

    #[test]
    fn test_mask_fields_single_pass() {
        for storage in [StorageStrategy::PerField, StorageStrategy::ClassOnly] {
            let mut p = project(storage);
            let a = p.add_class("a");
            let b = p.add_class("b");
            p.add_field(a, FieldSpec::training("m1", AreaDescriptor::Mask { value: 1 }))
                .unwrap();
            p.add_field(b, FieldSpec::training("m2", AreaDescriptor::Mask { value: 2 }))
                .unwrap();
            let mask = MaskRaster::new(0, 0, 2, 3, vec![1, 1, 0, 2, 2, 2]).unwrap();
            p.set_training_mask(Some(mask)).unwrap();
            assert!(!p.mask_statistics_up_to_date(UpdateScope::Project).unwrap());

            let summary = p
                .update_statistics(UpdateScope::Project, &mut image(), &NeverCancel, &mut NullProgress)
                .unwrap();
            assert_eq!(summary.mask_fields_scanned, 2);
            assert_eq!(p.class(a).unwrap().statistics_pixels(), 2);
            assert_eq!(p.class(b).unwrap().statistics_pixels(), 3);
            assert!(p.is_up_to_date());
            assert!(p.mask_statistics_up_to_date(UpdateScope::Project).unwrap());
        }
    }

    #[test]
    fn test_class_without_training_fields_stays_stale() {
        let mut p = project(StorageStrategy::PerField);
        let class = p.add_class("empty");
        let summary = p
            .update_statistics(UpdateScope::Class(class), &mut image(), &NeverCancel, &mut NullProgress)
            .unwrap();
        assert!(!summary.up_to_date);
        assert!(!p.finish_class_statistics(class).unwrap());
    }
}
