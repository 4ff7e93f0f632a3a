//! Opening and stat-ing paths.

use crate::backends::MemFs;
use crate::{Context, FsError, Metadata, OpenFlags, OptionSpec, StatFlags, VirtualFile};

/// Open and stat operations of a backend handler.
///
/// Paths handed to a handler are the remainder after its prefix: the memory
/// handler registered under `/vsimem/` sees `dir/a` for `/vsimem/dir/a`, the
/// local handler sees the whole path.
///
/// # Thread Safety
///
/// Handlers are shared by every caller of a [`Vfs`](crate::Vfs) and must be
/// `Send + Sync`. Methods use `&self`; handlers use interior mutability.
///
/// # Object Safety
///
/// This trait is object-safe and is used as `dyn FileSystem`.
pub trait FsOpen: Send + Sync {
    /// Open a file.
    ///
    /// `ctx` lets the handler open its inner paths through the dispatcher
    /// (archive, subfile and gzip handlers all do).
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the file doesn't exist and `create` is false
    /// - [`FsError::NotAFile`] if the path is a directory
    /// - [`FsError::NotSupported`] if the handler cannot satisfy the mode
    fn open(
        &self,
        ctx: &Context<'_>,
        path: &str,
        flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError>;

    /// Stat a path. Fields not covered by `flags` may be left unknown.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if the path does not exist
    fn stat(&self, ctx: &Context<'_>, path: &str, flags: StatFlags) -> Result<Metadata, FsError>;

    /// Whether files under `path` can be sparse.
    fn supports_sparse_files(&self, path: &str) -> bool {
        let _ = path;
        false
    }

    /// Options this handler understands.
    fn options(&self) -> &'static [OptionSpec] {
        &[]
    }

    /// The memory store behind this handler, for buffer exchange.
    fn memory(&self) -> Option<&MemFs> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_open_is_object_safe() {
        fn _check(_: &dyn FsOpen) {}
    }

    #[test]
    fn fs_open_requires_send_sync() {
        fn _assert_send_sync<T: Send + Sync>() {}
        fn _check<T: FsOpen>() {
            _assert_send_sync::<T>();
        }
    }
}
