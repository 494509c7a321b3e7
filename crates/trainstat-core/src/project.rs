//! Project statistics context.
//!
//! A [`Project`] owns the classes and fields of a training project together
//! with every accumulator, cache and freshness flag the statistics engine
//! needs. Membership changes go through the project so the right statistics
//! are invalidated:
//!
//! - adding, removing or moving a training field resets the field's flags and
//!   marks its class (and the project) stale
//! - under class-only storage a stale class is rebuilt from scratch, since
//!   pixels cannot be retracted from an aggregate
//! - every membership change empties the pooled covariance cache
//!
//! # Example
//!
//! ```
//! use trainstat_core::area::AreaDescriptor;
//! use trainstat_core::config::ProjectConfig;
//! use trainstat_core::field::FieldSpec;
//! use trainstat_core::project::Project;
//!
//! let mut project = Project::new(ProjectConfig::with_channels(3)).unwrap();
//! let water = project.add_class("water");
//! let field = project
//!     .add_field(water, FieldSpec::training("lake", AreaDescriptor::rectangle(0, 9, 0, 9)))
//!     .unwrap();
//!
//! assert_eq!(project.class(water).unwrap().fields(), &[field]);
//! assert!(!project.is_up_to_date());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tally::PackedMatrix;
use tracing::debug;

use crate::aggregation::{strategy_for, AggregationStrategy};
use crate::area::{AreaDescriptor, MaskRaster};
use crate::arena::{SlotAllocator, StatisticsArena};
use crate::class::{ClassRecord, EnhancedStatistics, MixingParameter, ProjectEstimator};
use crate::config::{ProjectConfig, StorageStrategy};
use crate::error::{Result, StatsError};
use crate::field::{FieldRecord, FieldSpec};
use crate::ids::{ClassNumber, ClassSlot, FieldId};

// =============================================================================
// Common Covariance Cache
// =============================================================================

/// Pooled covariance over every class and statistics channel.
///
/// `classes == 0` means the cache must be recomputed before use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonCovariance {
    pub(crate) matrix: Option<PackedMatrix>,
    pub(crate) classes: u32,
}

impl CommonCovariance {
    /// Number of classes pooled into the cached matrix.
    #[must_use]
    pub fn classes(&self) -> u32 {
        self.classes
    }

    /// Cached matrix, if valid.
    #[must_use]
    pub fn matrix(&self) -> Option<&PackedMatrix> {
        if self.classes == 0 {
            None
        } else {
            self.matrix.as_ref()
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.classes = 0;
        self.matrix = None;
    }
}

// =============================================================================
// Project State
// =============================================================================

/// Records, storage and caches of a project.
///
/// Split from [`Project`] so aggregation strategies can borrow the state
/// mutably while the project holds the strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    pub(crate) config: ProjectConfig,
    /// Class storage slots; `None` marks a free slot
    pub(crate) classes: Vec<Option<ClassRecord>>,
    /// Class number to storage slot
    pub(crate) class_order: Vec<ClassSlot>,
    pub(crate) fields: BTreeMap<FieldId, FieldRecord>,
    next_field: u32,
    pub(crate) field_slots: SlotAllocator,
    pub(crate) arena: StatisticsArena,
    pub(crate) common: CommonCovariance,
    pub(crate) estimator: ProjectEstimator,
    pub(crate) stats_up_to_date: bool,
    pub(crate) mask: Option<MaskRaster>,
    pub(crate) advisories_listed: u64,
}

impl ProjectState {
    fn new(config: ProjectConfig) -> Self {
        let arena = StatisticsArena::new(
            config.channel_count(),
            config.statistics_code,
            config.max_statistics_bytes,
        );
        Self {
            config,
            classes: Vec::new(),
            class_order: Vec::new(),
            fields: BTreeMap::new(),
            next_field: 0,
            field_slots: SlotAllocator::default(),
            arena,
            common: CommonCovariance::default(),
            estimator: ProjectEstimator::default(),
            stats_up_to_date: false,
            mask: None,
            advisories_listed: 0,
        }
    }

    pub(crate) fn slot_of(&self, class: ClassNumber) -> Result<ClassSlot> {
        self.class_order
            .get(class.index())
            .copied()
            .ok_or(StatsError::InvalidClass(class.as_u32()))
    }

    /// Class number of a storage slot, for messages.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn number_of(&self, slot: ClassSlot) -> u32 {
        self.class_order
            .iter()
            .position(|&s| s == slot)
            .map_or(u32::MAX, |n| n as u32)
    }

    pub(crate) fn class(&self, slot: ClassSlot) -> Result<&ClassRecord> {
        self.classes
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or_else(|| StatsError::InvalidClass(self.number_of(slot)))
    }

    pub(crate) fn class_mut(&mut self, slot: ClassSlot) -> Result<&mut ClassRecord> {
        let number = self.number_of(slot);
        self.classes
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(StatsError::InvalidClass(number))
    }

    pub(crate) fn field(&self, id: FieldId) -> Result<&FieldRecord> {
        self.fields.get(&id).ok_or(StatsError::InvalidField(id))
    }

    pub(crate) fn field_mut(&mut self, id: FieldId) -> Result<&mut FieldRecord> {
        self.fields.get_mut(&id).ok_or(StatsError::InvalidField(id))
    }

    /// Fields of a class that contribute statistics.
    pub(crate) fn statistics_fields(&self, slot: ClassSlot) -> Result<Vec<FieldId>> {
        Ok(self
            .class(slot)?
            .fields
            .iter()
            .copied()
            .filter(|id| self.fields.get(id).is_some_and(FieldRecord::has_statistics))
            .collect())
    }

    /// Recount a class's pixels from its loaded fields.
    pub(crate) fn pixels_loaded_in_class(&self, slot: ClassSlot) -> Result<u64> {
        Ok(self
            .class(slot)?
            .fields
            .iter()
            .filter_map(|id| self.fields.get(id))
            .filter(|f| f.has_statistics() && f.is_loaded())
            .map(|f| f.pixels_used)
            .sum())
    }

    /// Storage slots in class order.
    pub(crate) fn ordered_slots(&self) -> Vec<ClassSlot> {
        self.class_order.clone()
    }

    pub(crate) fn refresh_estimator_summary(&mut self) {
        self.estimator = ProjectEstimator::summarize(
            self.class_order
                .iter()
                .filter_map(|&slot| self.classes[slot].as_ref())
                .map(|c| c.estimator),
        );
    }
}

// =============================================================================
// Project
// =============================================================================

/// A training project and its statistics engine.
#[derive(Debug)]
pub struct Project {
    pub(crate) state: ProjectState,
    pub(crate) strategy: Box<dyn AggregationStrategy>,
}

impl Project {
    /// Create an empty project.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidInput`] if the configuration is invalid.
    pub fn new(config: ProjectConfig) -> Result<Self> {
        config.validate()?;
        let strategy = strategy_for(config.storage);
        Ok(Self {
            state: ProjectState::new(config),
            strategy,
        })
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &ProjectConfig {
        &self.state.config
    }

    /// Storage strategy in use.
    #[must_use]
    pub fn storage(&self) -> StorageStrategy {
        self.strategy.storage()
    }

    /// True if every class's statistics are current.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.state.stats_up_to_date
    }

    /// Estimator setting summarized over all classes.
    #[must_use]
    pub fn project_estimator(&self) -> ProjectEstimator {
        self.state.estimator
    }

    /// Pooled covariance cache.
    #[must_use]
    pub fn common_covariance_cache(&self) -> &CommonCovariance {
        &self.state.common
    }

    /// Number of classes in the cached pooled covariance; zero when stale.
    #[must_use]
    pub fn number_common_covariance_classes(&self) -> u32 {
        self.state.common.classes
    }

    /// Number of conditioning advisories listed so far.
    #[must_use]
    pub fn advisories_listed(&self) -> u64 {
        self.state.advisories_listed
    }

    // -------------------------------------------------------------------------
    // Classes
    // -------------------------------------------------------------------------

    /// Number of classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.state.class_order.len()
    }

    /// Append a class; free storage slots are reused.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add_class(&mut self, name: impl Into<String>) -> ClassNumber {
        let record = ClassRecord::new(name);
        let slot = match self.state.classes.iter().position(Option::is_none) {
            Some(slot) => {
                self.state.classes[slot] = Some(record);
                slot
            }
            None => {
                self.state.classes.push(Some(record));
                self.state.classes.len() - 1
            }
        };
        self.state.arena.zero(crate::arena::StatsTarget::Class(slot));
        self.state.class_order.push(slot);
        self.state.stats_up_to_date = false;
        self.state.common.invalidate();
        self.state.refresh_estimator_summary();
        ClassNumber::new((self.state.class_order.len() - 1) as u32)
    }

    /// Class record.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] if the class does not exist.
    pub fn class(&self, class: ClassNumber) -> Result<&ClassRecord> {
        self.state.class(self.state.slot_of(class)?)
    }

    /// Remove a class and all of its fields. Later classes move up by one.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] if the class does not exist.
    pub fn remove_class(&mut self, class: ClassNumber) -> Result<ClassRecord> {
        let slot = self.state.slot_of(class)?;
        let fields = self.state.class(slot)?.fields.clone();
        for id in fields {
            if let Some(record) = self.state.fields.remove(&id) {
                if let Some(stats_slot) = record.stats_slot {
                    self.state.field_slots.release(stats_slot);
                }
            }
        }
        self.state.class_order.remove(class.index());
        let record = self.state.classes[slot]
            .take()
            .ok_or(StatsError::InvalidClass(class.as_u32()))?;
        self.state.common.invalidate();
        self.state.refresh_estimator_summary();
        self.state.stats_up_to_date = self.all_classes_up_to_date();
        debug!(class = %record.name, "class removed");
        Ok(record)
    }

    /// Set a class's a priori weight used for pooled covariance.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown class and
    /// [`StatsError::InvalidInput`] for a negative or non-finite weight.
    pub fn set_class_weight(&mut self, class: ClassNumber, weight: f64) -> Result<()> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(StatsError::InvalidInput(format!(
                "class weight must be finite and non-negative, got {weight}"
            )));
        }
        let slot = self.state.slot_of(class)?;
        self.state.class_mut(slot)?.prior_weight = weight;
        self.state.common.invalidate();
        Ok(())
    }

    /// Set how a class's leave-one-out weight is chosen.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown class and
    /// [`StatsError::InvalidInput`] for a user weight outside `[0, 1]`.
    pub fn set_mixing_parameter(&mut self, class: ClassNumber, mixing: MixingParameter) -> Result<()> {
        if let MixingParameter::UserSet(lambda) = mixing {
            check_unit_interval(lambda)?;
        }
        let slot = self.state.slot_of(class)?;
        self.state.class_mut(slot)?.mixing = mixing;
        Ok(())
    }

    /// Store the optimized leave-one-out weight of a class.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown class and
    /// [`StatsError::InvalidInput`] for a weight outside `[0, 1]`.
    pub fn set_loo_covariance_value(&mut self, class: ClassNumber, value: Option<f64>) -> Result<()> {
        if let Some(lambda) = value {
            check_unit_interval(lambda)?;
        }
        let slot = self.state.slot_of(class)?;
        self.state.class_mut(slot)?.loo_value = value;
        Ok(())
    }

    /// Attach or detach enhanced statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown class and
    /// [`StatsError::InvalidInput`] if the statistics do not cover every
    /// statistics channel.
    pub fn set_enhanced_statistics(
        &mut self,
        class: ClassNumber,
        enhanced: Option<EnhancedStatistics>,
    ) -> Result<()> {
        let channels = self.state.config.channel_count();
        if let Some(stats) = &enhanced {
            if stats.channel_count() != channels || stats.covariance.order() != channels {
                return Err(StatsError::InvalidInput(format!(
                    "enhanced statistics must cover {channels} channels"
                )));
            }
        }
        let slot = self.state.slot_of(class)?;
        self.state.class_mut(slot)?.enhanced = enhanced;
        self.state.common.invalidate();
        Ok(())
    }

    /// Re-arm every class's advisory listing.
    pub fn reset_class_list_messages(&mut self) {
        for class in self.state.classes.iter_mut().flatten() {
            class.list_message = true;
        }
    }

    // -------------------------------------------------------------------------
    // Fields
    // -------------------------------------------------------------------------

    /// Field record.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidField`] if the field does not exist.
    pub fn field(&self, id: FieldId) -> Result<&FieldRecord> {
        self.state.field(id)
    }

    /// All fields in id order.
    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &FieldRecord)> {
        self.state.fields.iter().map(|(&id, f)| (id, f))
    }

    /// Add a field at the end of a class.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidClass`] for an unknown class and
    /// [`StatsError::InvalidInput`] for unusable geometry or a training mask
    /// label another training field already uses.
    pub fn add_field(&mut self, class: ClassNumber, spec: FieldSpec) -> Result<FieldId> {
        let slot = self.state.slot_of(class)?;
        spec.area.validate()?;

        let mut record = FieldRecord::new(spec, slot);
        if let AreaDescriptor::Mask { value } = record.area {
            let claimed = record.has_statistics()
                && self
                    .state
                    .fields
                    .values()
                    .any(|f| f.has_statistics() && f.area == record.area);
            if claimed {
                return Err(StatsError::InvalidInput(format!(
                    "mask label {value} already belongs to a training field"
                )));
            }
        }

        let id = FieldId::new(self.state.next_field);
        self.state.next_field += 1;
        if record.has_statistics() && self.strategy.assigns_field_slots() {
            record.stats_slot = Some(self.state.field_slots.allocate());
        }
        let affects_statistics = record.has_statistics();
        self.state.fields.insert(id, record);
        self.state.class_mut(slot)?.fields.push(id);

        if affects_statistics {
            self.strategy.invalidate_class(&mut self.state, slot)?;
        }
        Ok(id)
    }

    /// Remove a field.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidField`] if the field does not exist.
    pub fn remove_field(&mut self, id: FieldId) -> Result<FieldRecord> {
        let record = self.state.fields.remove(&id).ok_or(StatsError::InvalidField(id))?;
        if let Some(stats_slot) = record.stats_slot {
            self.state.field_slots.release(stats_slot);
        }
        self.state.class_mut(record.class)?.fields.retain(|&f| f != id);
        if record.has_statistics() {
            self.strategy.invalidate_class(&mut self.state, record.class)?;
        }
        Ok(record)
    }

    /// Move a field to the end of another class.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::InvalidField`] or [`StatsError::InvalidClass`]
    /// for unknown ids.
    pub fn move_field(&mut self, id: FieldId, class: ClassNumber) -> Result<()> {
        let target = self.state.slot_of(class)?;
        let source = self.state.field(id)?.class;
        if source == target {
            return Ok(());
        }
        self.state.class_mut(source)?.fields.retain(|&f| f != id);
        self.state.class_mut(target)?.fields.push(id);

        let record = self.state.field_mut(id)?;
        record.class = target;
        record.invalidate();
        if record.has_statistics() {
            self.strategy.invalidate_class(&mut self.state, source)?;
            self.strategy.invalidate_class(&mut self.state, target)?;
        }
        Ok(())
    }

    /// Install or remove the training mask. Every class with mask fields is
    /// marked stale.
    ///
    /// # Errors
    ///
    /// Propagates failures to invalidate a class.
    pub fn set_training_mask(&mut self, mask: Option<MaskRaster>) -> Result<()> {
        self.state.mask = mask;
        let stale: Vec<ClassSlot> = self
            .state
            .fields
            .values()
            .filter(|f| f.is_mask() && f.has_statistics())
            .map(|f| f.class)
            .collect();
        for id in self.mask_field_ids() {
            self.state.field_mut(id)?.invalidate();
        }
        for slot in stale {
            self.strategy.invalidate_class(&mut self.state, slot)?;
        }
        Ok(())
    }

    fn mask_field_ids(&self) -> Vec<FieldId> {
        self.state
            .fields
            .iter()
            .filter(|(_, f)| f.is_mask())
            .map(|(&id, _)| id)
            .collect()
    }

    pub(crate) fn all_classes_up_to_date(&self) -> bool {
        self.state
            .class_order
            .iter()
            .filter_map(|&slot| self.state.classes[slot].as_ref())
            .all(|c| c.stats_up_to_date)
    }
}

fn check_unit_interval(lambda: f64) -> Result<()> {
    if (0.0..=1.0).contains(&lambda) {
        Ok(())
    } else {
        Err(StatsError::InvalidInput(format!(
            "mixing weight must lie in [0, 1], got {lambda}"
        )))
    }
}
