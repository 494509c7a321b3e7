//! Cancellation and progress reporting for long operations.
//!
//! Scans poll a [`CancelCheck`] once per image line and once per class, and
//! report [`ProgressEvent`]s to a [`ProgressSink`]. Progress is advisory;
//! nothing the sink does changes the result.
//!
//! # Example
//!
//! ```
//! use trainstat_core::control::{CancelCheck, CancellationToken};
//!
//! let token = CancellationToken::new();
//! let handle = token.clone();
//! assert!(!token.is_canceled());
//! handle.cancel();
//! assert!(token.is_canceled());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Source of cancellation requests.
pub trait CancelCheck {
    /// True once the current operation should stop.
    fn is_canceled(&self) -> bool;
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not canceled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    /// Clear a previous request.
    pub fn reset(&self) {
        self.canceled.store(false, Ordering::Relaxed);
    }
}

impl CancelCheck for CancellationToken {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelCheck for NeverCancel {
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Statistics of a class are being updated.
    ClassStarted {
        /// Class name
        name: String,
        /// Position among the classes being processed
        index: usize,
        /// Number of classes being processed
        total: usize,
    },
    /// A field is being scanned.
    FieldStarted {
        /// Field name
        name: String,
    },
    /// Lines of the current scan completed.
    Lines {
        /// Lines done
        done: u32,
        /// Lines in the scan
        total: u32,
    },
    /// A class was added to the pooled covariance.
    ClassPooled {
        /// Classes pooled so far
        done: usize,
        /// Classes with positive weight
        total: usize,
    },
}

/// Receiver of progress notifications.
pub trait ProgressSink {
    /// Handle one notification.
    fn report(&mut self, event: ProgressEvent);
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&mut self, _event: ProgressEvent) {}
}

impl ProgressSink for Vec<ProgressEvent> {
    fn report(&mut self, event: ProgressEvent) {
        self.push(event);
    }
}
