//! The error channel.
//!
//! An [`ErrorContext`] remembers the last error reported by operations run
//! against it. It is attached to a [`Vfs`](crate::Vfs) and inherited by every
//! [`File`](crate::File) the `Vfs` opens; clones share the same slot.
//!
//! Callers that prefer hard failures simply use the `Result` values. Callers
//! that prefer soft failures use the element-style calls and inspect the
//! channel afterwards.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{ErrorCode, FsError};

/// The last error recorded in an [`ErrorContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// Error class.
    pub code: ErrorCode,
    /// Rendered error message.
    pub message: String,
}

/// Whether an open failure is recorded in the error channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorReporting {
    /// Leave the channel untouched.
    #[default]
    Silent,
    /// Record the failure.
    Record,
}

/// Shared last-error slot.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    slot: Arc<Mutex<Option<LastError>>>,
}

impl ErrorContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error` as the last error.
    pub fn record(&self, error: &FsError) {
        tracing::debug!(code = ?error.code(), %error, "recording error");
        *self.slot.lock() = Some(LastError {
            code: error.code(),
            message: error.to_string(),
        });
    }

    /// Forget the last error.
    pub fn reset(&self) {
        *self.slot.lock() = None;
    }

    /// The last error, if any.
    pub fn last(&self) -> Option<LastError> {
        self.slot.lock().clone()
    }

    /// Numeric code of the last error; 0 when none is pending.
    pub fn last_error_no(&self) -> u32 {
        self.slot
            .lock()
            .as_ref()
            .map_or(ErrorCode::None, |e| e.code) as u32
    }

    /// Message of the last error; empty when none is pending.
    pub fn last_error_msg(&self) -> String {
        self.slot
            .lock()
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default()
    }
}
