//! The file handle contract every backend implements.
//!
//! A [`VirtualFile`] is the object a backend returns from
//! [`FsOpen::open`](crate::FsOpen::open). It owns a cursor, the access mode it
//! was opened with and whatever state the backend needs (a buffer reference,
//! an OS descriptor, an inner handle plus region bounds).
//!
//! # Cursor rules
//!
//! - `seek` may move past end-of-file and past any backend maximum; only the
//!   subfile backend clamps to its region.
//! - `tell` reports exactly the position the last `seek`, `read` or `write`
//!   established.
//! - `eof` becomes `true` once a read ran past the available data and is
//!   cleared by a successful `seek`.
//! - `truncate` never moves the cursor.
//!
//! # Example
//!
//! ```rust
//! use routefs::{FsError, VirtualFile};
//! use std::io::SeekFrom;
//!
//! // Generic function that works with any handle
//! fn file_size(file: &mut dyn VirtualFile) -> Result<u64, FsError> {
//!     let pos = file.tell();
//!     let size = file.seek(SeekFrom::End(0))?;
//!     file.seek(SeekFrom::Start(pos))?;
//!     Ok(size)
//! }
//! ```

use std::io::SeekFrom;

use crate::{FsError, RangeStatus};

/// An open file handle.
///
/// Handles are `Send` so they can move between threads, but a single handle
/// is never used from two threads at once: the cursor is not synchronized.
pub trait VirtualFile: Send {
    /// Read into `buf`, returning the number of bytes read.
    ///
    /// A short read at end-of-stream is not an error; it sets [`eof`](Self::eof).
    ///
    /// # Errors
    ///
    /// - [`FsError::PermissionDenied`] if the handle is write-only
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Write `buf` at the cursor, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// - [`FsError::PermissionDenied`] if the handle is read-only
    /// - [`FsError::CapacityExceeded`] if the file cannot grow; nothing is
    ///   written in that case
    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError>;

    /// Move the cursor, returning the new position.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidArgument`] if the target would be negative
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError>;

    /// Current cursor position.
    fn tell(&self) -> u64;

    /// Set the file size, zero-filling on growth. The cursor does not move.
    ///
    /// The default is the generic [`truncate_by_extension`] fallback.
    ///
    /// # Errors
    ///
    /// - [`FsError::PermissionDenied`] on read-only handles
    /// - [`FsError::NotSupported`] when the backend cannot shrink
    fn truncate(&mut self, size: u64) -> Result<(), FsError> {
        truncate_by_extension(self, size)
    }

    /// Push buffered writes to the backend. Idempotent.
    fn flush(&mut self) -> Result<(), FsError> {
        Ok(())
    }

    /// Whether a read ran past the end of the data.
    fn eof(&self) -> bool;

    /// Allocation state of `len` bytes starting at `offset`.
    fn range_status(&mut self, offset: u64, len: u64) -> RangeStatus {
        let _ = (offset, len);
        RangeStatus::Unknown
    }

    /// Flush and release backend resources. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), FsError> {
        self.flush()
    }
}

impl<F: VirtualFile + ?Sized> VirtualFile for Box<F> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        (**self).write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        (**self).seek(pos)
    }

    fn tell(&self) -> u64 {
        (**self).tell()
    }

    fn truncate(&mut self, size: u64) -> Result<(), FsError> {
        (**self).truncate(size)
    }

    fn flush(&mut self) -> Result<(), FsError> {
        (**self).flush()
    }

    fn eof(&self) -> bool {
        (**self).eof()
    }

    fn range_status(&mut self, offset: u64, len: u64) -> RangeStatus {
        (**self).range_status(offset, len)
    }

    fn close(&mut self) -> Result<(), FsError> {
        (**self).close()
    }
}

/// Generic truncation for handles without native support.
///
/// Growth seeks to `size - 1` and writes a single zero byte, relying on the
/// backend to zero-fill the gap. Shrinking is reported as unsupported. The
/// cursor is restored in every case.
///
/// # Errors
///
/// - [`FsError::NotSupported`] if `size` is smaller than the current size
/// - whatever the handle's `seek`/`write` return
pub fn truncate_by_extension<F: VirtualFile + ?Sized>(
    file: &mut F,
    size: u64,
) -> Result<(), FsError> {
    let original = file.tell();
    let current = file.seek(SeekFrom::End(0))?;
    let result = if size > current {
        file.seek(SeekFrom::Start(size - 1))
            .and_then(|_| file.write(&[0]))
            .and_then(|n| {
                if n == 1 {
                    Ok(())
                } else {
                    Err(FsError::CapacityExceeded {
                        path: String::new(),
                        requested: size,
                        limit: current,
                    })
                }
            })
    } else if size == current {
        Ok(())
    } else {
        Err(FsError::NotSupported {
            operation: "truncate (shrink)",
        })
    };
    file.seek(SeekFrom::Start(original))?;
    result
}
