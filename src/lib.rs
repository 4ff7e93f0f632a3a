//! # routefs
//!
//! A virtual filesystem that routes every path to a backend by its prefix.
//!
//! Paths such as `/vsimem/scratch.bin`, `/vsigzip//vsimem/data.gz` or
//! `/vsitar//data/archive.tar/member.txt` are resolved by a [`Registry`] of
//! handlers; paths without a registered prefix go to the local disk. Handlers
//! can open other paths themselves, so prefixes chain.
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust
//! use routefs::{StatFlags, Vfs};
//!
//! let vfs = Vfs::new();
//!
//! let mut f = vfs.open("/vsimem/notes.txt", "wb+").unwrap();
//! f.write(b"hello").unwrap();
//! f.truncate(3).unwrap();
//! f.close().unwrap();
//!
//! assert_eq!(&*vfs.mem_buffer("/vsimem/notes.txt").unwrap(), b"hel");
//! assert!(vfs.stat("/vsimem/absent", StatFlags::EXISTS).unwrap().is_none());
//! ```
//!
//! ---
//!
//! ## Built-in Prefixes
//!
//! | Prefix | Backend |
//! |--------|---------|
//! | *(none)* | Local disk |
//! | `/vsimem/` | Process-wide in-memory files |
//! | `/vsisubfile/<start>_<len>,<path>` | Byte-range window |
//! | `/vsitar/<archive>/<member>` | Tar and fuzzer-friendly archives, read-only |
//! | `/vsigzip/<path>` | Gzip streams, optionally compressed on worker threads |
//! | `/vsisparse/<descriptor>` | Composite file from a JSON descriptor |
//! | `/vsistdin/`, `/vsistdout/` | Process standard streams |
//! | `/vsicurl/`, `/vsis3/`, ... | Routed but never found |
//!
//! ---
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Vfs`] | Registry, configuration and error channel; entry point for every call |
//! | [`File`] | Open handle with sticky error flag and element-style I/O |
//! | [`VirtualFile`] | Handle contract every backend implements |
//! | [`FileSystem`] | Handler contract: [`FsOpen`] + [`FsWrite`] + [`FsDir`] |
//! | [`CacheLayer`] | Chunked LRU read cache wrapped around handles |
//! | [`DirWalker`] | Recursive directory enumeration |
//! | [`SyncPlan`] | Incremental copy between two trees |
//! | [`FsError`] | Error type with context |
//!
//! ---
//!
//! ## Error Handling
//!
//! Operations return `Result<T, FsError>`. A [`Vfs`] also owns an
//! [`ErrorContext`] that remembers the last failure for callers that only
//! look at element counts:
//!
//! ```rust
//! use routefs::{ErrorReporting, Vfs};
//!
//! let vfs = Vfs::new();
//! assert!(vfs.open("/vsimem/missing", "rb").is_err());
//! assert_eq!(vfs.errors().last_error_no(), 0);
//!
//! assert!(vfs.open_ex("/vsimem/missing", "rb", ErrorReporting::Record).is_err());
//! assert_eq!(vfs.errors().last_error_no(), 1);
//! ```
//!
//! ---
//!
//! ## Thread Safety
//!
//! [`Vfs`] and every handler are `Send + Sync`; handles are `Send` and owned
//! by one caller at a time. The memory backend shares file contents between
//! handles behind `parking_lot` locks.
//!
//! ---
//!
//! ## Configuration
//!
//! See [`Config`]. The configuration is snapshotted when a handle is opened.

// Private modules
mod cache;
mod config;
mod diagnostics;
mod dir;
mod dispatch;
mod error;
mod ext;
mod file;
mod layer;
mod sync;
mod traits;
mod types;
mod vfs;

// Backend handlers
pub mod backends;

// Public re-exports - entry points
pub use file::File;
pub use vfs::{Context, Vfs};

// Public re-exports - errors and diagnostics
pub use diagnostics::{ErrorContext, ErrorReporting, LastError};
pub use error::{ErrorCode, FsError};

// Public re-exports - core types
pub use types::{DirEntry, FileType, Metadata, OpenFlags, OptionSpec, RangeStatus, StatFlags};

// Public re-exports - backend traits
pub use traits::{
    FileSystem, FsDir, FsOpen, FsWrite, VirtualFile, collect_listing, truncate_by_extension,
};

// Public re-exports - path resolution
pub use dispatch::{MAX_NESTING_DEPTH, PathResolver, Registry, Resolved};

// Public re-exports - infrastructure
pub use cache::{CHUNK_SIZE, CacheLayer, CachedFile};
pub use config::{Config, DEFAULT_DEFLATE_CHUNK_SIZE, MAX_DEFLATE_CHUNK_SIZE, MAX_NUM_THREADS};
pub use dir::DirWalker;
pub use ext::{FileExt, IoAdapter};
pub use layer::{Layer, LayerExt};
pub use sync::{SyncOp, SyncPlan, sync};

// Public re-exports - handlers
pub use backends::{
    GzipFs, LocalFs, MemBuffer, MemFs, NetworkFs, SparseDescriptor, SparseFs, SparseRegion,
    StdinFs, StdoutFs, SubfileFs, TarFs,
};
