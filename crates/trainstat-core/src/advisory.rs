//! Conditioning advisories.
//!
//! When a class covariance has to be adjusted before use, the engine lists an
//! advisory through `tracing` at `INFO`. With
//! `list_one_message_per_class` set, each class lists at most one advisory
//! until its flag is re-armed with [`Project::reset_class_list_messages`].
//!
//! [`Project::reset_class_list_messages`]: crate::project::Project::reset_class_list_messages

use std::fmt;

use tally::ConditionReport;
use tracing::info;

use crate::ids::ClassSlot;
use crate::project::ProjectState;

/// Adjustment applied to a class covariance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Advisory {
    /// Zero variances were replaced by the configured fixed factor
    ZeroVariancesReset,
    /// Every covariance entry was equal, so the off-diagonal terms were zeroed
    VariancesEqualReset,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroVariancesReset => write!(f, "zero variances were reset"),
            Self::VariancesEqualReset => write!(f, "all covariance entries were equal; off-diagonal terms were zeroed"),
        }
    }
}

impl ProjectState {
    /// List an advisory for a class unless it is suppressed.
    ///
    /// Returns true if the advisory was listed.
    pub(crate) fn list_advisory(&mut self, slot: ClassSlot, advisory: Advisory) -> bool {
        let once = self.config.list_one_message_per_class;
        let Some(class) = self.classes.get_mut(slot).and_then(Option::as_mut) else {
            return false;
        };
        if once && !class.list_message {
            return false;
        }
        if once {
            class.list_message = false;
        }
        info!(class = %class.name, "{advisory}");
        self.advisories_listed += 1;
        true
    }

    /// List the advisories a conditioning pass produced.
    pub(crate) fn list_condition_report(&mut self, slot: ClassSlot, report: ConditionReport) {
        if report.zero_variances_reset {
            self.list_advisory(slot, Advisory::ZeroVariancesReset);
        }
        if report.variances_equal_reset {
            self.list_advisory(slot, Advisory::VariancesEqualReset);
        }
    }
}
