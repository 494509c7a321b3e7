//! Identifiers for fields and classes.
//!
//! - [`FieldId`]: stable handle of a field, never reused within a project
//! - [`ClassNumber`]: position of a class in the project's class ordering
//!
//! Class storage slots are internal; the project maps class numbers to slots
//! so classes can be deleted and reordered without moving their statistics.
//!
//! # Example
//!
//! ```
//! use trainstat_core::ids::{ClassNumber, FieldId};
//!
//! let a = FieldId::new(1);
//! let b = FieldId::new(2);
//! assert!(a < b);
//! assert_eq!(ClassNumber::new(3).index(), 3);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a field.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(u32);

impl FieldId {
    /// Creates a `FieldId` from a raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldId({})", self.0)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FieldId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Zero-based position of a class in the project's class ordering.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassNumber(u32);

impl ClassNumber {
    /// Creates a `ClassNumber` from a raw value.
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    /// Returns the position as an index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ClassNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassNumber({})", self.0)
    }
}

impl fmt::Display for ClassNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ClassNumber {
    fn from(number: u32) -> Self {
        Self(number)
    }
}

/// Internal storage slot of a class.
pub(crate) type ClassSlot = usize;
