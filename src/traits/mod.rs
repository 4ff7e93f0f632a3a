//! # Backend Traits
//!
//! Two kinds of objects make up a backend:
//!
//! - a **handler**, registered once under a path prefix, implementing
//!   [`FsOpen`] + [`FsWrite`] + [`FsDir`] (together: [`FileSystem`]);
//! - the **handles** it opens, implementing [`VirtualFile`].
//!
//! ```text
//! FsOpen + FsWrite + FsDir = FileSystem   ──open()──▶  Box<dyn VirtualFile>
//! ```
//!
//! | Trait | Methods | Defaults |
//! |-------|---------|----------|
//! | [`FsOpen`] | `open`, `stat`, `supports_sparse_files`, `options` | sparse: `false`, options: none |
//! | [`FsWrite`] | `remove_file`, `rename` | `NotSupported` |
//! | [`FsDir`] | `read_dir`, `create_dir`, `remove_dir` | create/remove: `NotSupported` |
//! | [`VirtualFile`] | `read`, `write`, `seek`, `tell`, `truncate`, `flush`, `eof`, `range_status`, `close` | generic truncate, no-op flush |

mod fs_dir;
mod fs_open;
mod fs_write;
mod virtual_file;

pub use fs_dir::{FsDir, collect_listing};
pub use fs_open::FsOpen;
pub use fs_write::FsWrite;
pub use virtual_file::{VirtualFile, truncate_by_extension};

/// A complete backend handler.
///
/// # Blanket Implementation
///
/// Automatically implemented for any type that implements all three component
/// traits. You never need to implement `FileSystem` directly.
///
/// # Example
///
/// ```rust
/// use routefs::{Context, FileSystem, FsDir, FsError, FsOpen, FsWrite, Metadata,
///               OpenFlags, StatFlags, VirtualFile};
///
/// /// A handler that knows no files at all.
/// struct Nothing;
///
/// impl FsOpen for Nothing {
///     fn open(&self, _: &Context<'_>, path: &str, _: OpenFlags)
///         -> Result<Box<dyn VirtualFile>, FsError> {
///         Err(FsError::NotFound { path: path.into() })
///     }
///     fn stat(&self, _: &Context<'_>, path: &str, _: StatFlags) -> Result<Metadata, FsError> {
///         Err(FsError::NotFound { path: path.into() })
///     }
/// }
/// impl FsWrite for Nothing {}
/// impl FsDir for Nothing {
///     fn read_dir(&self, _: &Context<'_>, path: &str, _: Option<usize>)
///         -> Result<Vec<String>, FsError> {
///         Err(FsError::NotFound { path: path.into() })
///     }
/// }
///
/// fn _takes_handler(_: &dyn FileSystem) {}
/// _takes_handler(&Nothing);
/// ```
pub trait FileSystem: FsOpen + FsWrite + FsDir {}

// Blanket implementation - any type implementing all three gets FileSystem for free
impl<T: FsOpen + FsWrite + FsDir> FileSystem for T {}
