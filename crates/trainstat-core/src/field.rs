//! Field records.
//!
//! A field is a labeled image region. Training fields feed their class's
//! statistics; test fields are only used to evaluate a classifier. Cluster
//! fields carry no statistics at all.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::area::{AreaDescriptor, PointType};
use crate::ids::ClassSlot;

/// Role of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Contributes to class statistics
    Training,
    /// Held out for accuracy assessment
    Test,
}

bitflags! {
    /// Freshness of a field's statistics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FieldFlags: u8 {
        /// The field's own statistics reflect its current geometry
        const STATS_UP_TO_DATE = 0b0000_0001;
        /// The field's pixels are included in its class aggregate
        const LOADED_INTO_CLASS = 0b0000_0010;
    }
}

/// Description used to create a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Display name
    pub name: String,
    /// Training or test
    pub field_type: FieldType,
    /// Covered area
    pub area: AreaDescriptor,
}

impl FieldSpec {
    /// Training field over `area`.
    #[must_use]
    pub fn training(name: impl Into<String>, area: AreaDescriptor) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Training,
            area,
        }
    }

    /// Test field over `area`.
    #[must_use]
    pub fn test(name: impl Into<String>, area: AreaDescriptor) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Test,
            area,
        }
    }
}

/// A field and its statistics bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    /// Display name
    pub name: String,
    /// Training or test
    pub field_type: FieldType,
    /// Covered area
    pub area: AreaDescriptor,
    /// Storage slot of the owning class
    pub(crate) class: ClassSlot,
    /// Arena slot of the field's own statistics, per-field storage only
    pub(crate) stats_slot: Option<usize>,
    /// Pixels counted in the last complete scan
    pub(crate) pixels_used: u64,
    pub(crate) flags: FieldFlags,
}

impl FieldRecord {
    pub(crate) fn new(spec: FieldSpec, class: ClassSlot) -> Self {
        Self {
            name: spec.name,
            field_type: spec.field_type,
            area: spec.area,
            class,
            stats_slot: None,
            pixels_used: 0,
            flags: FieldFlags::empty(),
        }
    }

    /// Geometry kind.
    #[must_use]
    pub fn point_type(&self) -> PointType {
        self.area.point_type()
    }

    /// True for training fields.
    #[must_use]
    pub fn is_training(&self) -> bool {
        self.field_type == FieldType::Training
    }

    /// True if the field contributes statistics to its class.
    #[must_use]
    pub fn has_statistics(&self) -> bool {
        self.is_training() && self.point_type() != PointType::Cluster
    }

    /// True for training fields defined by the training mask.
    #[must_use]
    pub fn is_mask(&self) -> bool {
        self.point_type() == PointType::Mask
    }

    /// Pixels counted in the last complete scan.
    #[must_use]
    pub fn pixels_used(&self) -> u64 {
        self.pixels_used
    }

    /// Freshness flags.
    #[must_use]
    pub fn flags(&self) -> FieldFlags {
        self.flags
    }

    /// True if the field's own statistics are current.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.flags.contains(FieldFlags::STATS_UP_TO_DATE)
    }

    /// True if the field's pixels are in its class aggregate.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.flags.contains(FieldFlags::LOADED_INTO_CLASS)
    }

    /// Forget every accumulated result.
    pub(crate) fn invalidate(&mut self) {
        self.flags = FieldFlags::empty();
        self.pixels_used = 0;
    }
}
