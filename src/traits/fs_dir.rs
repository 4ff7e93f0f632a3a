//! Directory operations for backend handlers.

use crate::{Context, FsError};

/// Directory operations of a backend handler.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`. Methods use `&self` to allow
/// concurrent access.
///
/// # Object Safety
///
/// This trait is object-safe and can be used as `dyn FsDir`.
pub trait FsDir: Send + Sync {
    /// List the names directly under `path`, in backend order.
    ///
    /// With `max_files = Some(n)` the listing stops as soon as more than `n`
    /// names were collected; see [`collect_listing`].
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the path does not exist or is not a
    ///   readable container
    /// - [`FsError::NotADirectory`] if the path is a file
    fn read_dir(
        &self,
        ctx: &Context<'_>,
        path: &str,
        max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError>;

    /// Create a directory (parent must exist where the backend tracks parents).
    ///
    /// # Errors
    ///
    /// - [`FsError::AlreadyExists`] if the path already exists
    fn create_dir(&self, ctx: &Context<'_>, path: &str) -> Result<(), FsError> {
        let _ = (ctx, path);
        Err(FsError::NotSupported {
            operation: "create_dir",
        })
    }

    /// Remove an empty directory.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the path does not exist
    /// - [`FsError::DirectoryNotEmpty`] if the directory is not empty
    fn remove_dir(&self, ctx: &Context<'_>, path: &str) -> Result<(), FsError> {
        let _ = (ctx, path);
        Err(FsError::NotSupported {
            operation: "remove_dir",
        })
    }
}

/// Collect names, stopping once more than `max_files` were gathered.
///
/// The extra name lets callers tell a cut listing from a complete one.
pub fn collect_listing<I>(names: I, max_files: Option<usize>) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    match max_files {
        Some(max) => names.into_iter().take(max.saturating_add(1)).collect(),
        None => names.into_iter().collect(),
    }
}
