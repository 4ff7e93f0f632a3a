//! # Backends
//!
//! Handlers registered by [`Vfs::new`](crate::Vfs::new):
//!
//! | Prefix | Handler | Notes |
//! |--------|---------|-------|
//! | *(none)* | [`LocalFs`] | Operating-system files |
//! | `/vsimem/` | [`MemFs`] | Shared in-memory buffers |
//! | `/vsisubfile/` | [`SubfileFs`] | Byte-range window over another path |
//! | `/vsitar/` | [`TarFs`] | ustar and line-delimited archives, read-only |
//! | `/vsigzip/` | [`GzipFs`] | Gzip streams, optional parallel compression |
//! | `/vsisparse/` | [`SparseFs`] | Composite file described in JSON |
//! | `/vsistdin/`, `/vsistdout/` | [`StdinFs`], [`StdoutFs`] | Process streams |
//! | `/vsicurl/`, `/vsis3/`, ... | [`NetworkFs`] | Placeholders; nothing is found |

use std::io::SeekFrom;

use crate::FsError;

pub mod archive;
pub mod gzip;
pub mod local;
pub mod memory;
pub mod network;
pub mod sparse;
pub mod stdio;
pub mod subfile;

pub use archive::TarFs;
pub use gzip::GzipFs;
pub use local::LocalFs;
pub use memory::{MemBuffer, MemFs};
pub use network::NetworkFs;
pub use sparse::{SparseDescriptor, SparseFs, SparseRegion};
pub use stdio::{StdinFs, StdoutFs};
pub use subfile::SubfileFs;

/// Absolute position for `pos` given the current cursor and file size.
pub(crate) fn seek_target(current: u64, size: u64, pos: SeekFrom) -> Result<u64, FsError> {
    let (base, delta) = match pos {
        SeekFrom::Start(n) => return Ok(n),
        SeekFrom::Current(d) => (current, d),
        SeekFrom::End(d) => (size, d),
    };
    base.checked_add_signed(delta)
        .ok_or_else(|| FsError::InvalidArgument(format!("seek to {base} {delta:+} is out of range")))
}
