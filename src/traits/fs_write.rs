//! Namespace-mutating operations.

use crate::{Context, FsError};

/// Removing and renaming entries.
///
/// Read-only handlers (archives, network placeholders) keep the default
/// implementations, which report [`FsError::NotSupported`].
///
/// # Object Safety
///
/// This trait is object-safe and can be used as `dyn FsWrite`.
pub trait FsWrite: Send + Sync {
    /// Remove a file.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the path does not exist
    /// - [`FsError::NotAFile`] if the path is a directory
    fn remove_file(&self, ctx: &Context<'_>, path: &str) -> Result<(), FsError> {
        let _ = (ctx, path);
        Err(FsError::NotSupported {
            operation: "remove_file",
        })
    }

    /// Rename a file or directory. Both paths belong to this handler.
    ///
    /// Renaming a directory moves every descendant with it.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if `from` does not exist
    fn rename(&self, ctx: &Context<'_>, from: &str, to: &str) -> Result<(), FsError> {
        let _ = (ctx, from, to);
        Err(FsError::NotSupported {
            operation: "rename",
        })
    }
}
