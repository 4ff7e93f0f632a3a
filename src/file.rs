//! The user-facing file object.

use std::io::{self, SeekFrom};

use crate::{ErrorContext, FsError, RangeStatus, VirtualFile};

/// An open file returned by [`Vfs::open`](crate::Vfs::open).
///
/// Every failed operation is recorded in the [`ErrorContext`] the file was
/// opened with and sets the sticky [`error`](Self::error) flag. The handle is
/// closed on drop if [`close`](Self::close) was not called.
///
/// # Example
///
/// ```rust
/// use routefs::Vfs;
/// use std::io::SeekFrom;
///
/// let vfs = Vfs::new();
/// let mut f = vfs.open("/vsimem/doc.bin", "wb+").unwrap();
/// assert_eq!(f.write_elements(b"abcdef", 2, 3), 3);
/// f.seek(SeekFrom::Start(0)).unwrap();
/// let mut buf = [0u8; 4];
/// assert_eq!(f.read_elements(&mut buf, 4, 2), 1);
/// assert_eq!(&buf, b"abcd");
/// ```
pub struct File {
    inner: Box<dyn VirtualFile>,
    path: String,
    errors: ErrorContext,
    closed: bool,
    error: bool,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.path)
            .field("pos", &self.inner.tell())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl File {
    pub(crate) fn new(inner: Box<dyn VirtualFile>, path: &str, errors: ErrorContext) -> Self {
        Self {
            inner,
            path: path.to_string(),
            errors,
            closed: false,
            error: false,
        }
    }

    /// The path this file was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn check<T>(&mut self, result: Result<T, FsError>) -> Result<T, FsError> {
        if let Err(err) = &result {
            self.error = true;
            self.errors.record(err);
        }
        result
    }

    /// Read into `buf`; see [`VirtualFile::read`].
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let result = self.inner.read(buf);
        self.check(result)
    }

    /// Write `buf`; see [`VirtualFile::write`].
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        let result = self.inner.write(buf);
        self.check(result)
    }

    /// Read up to `count` elements of `size` bytes, returning the number of
    /// whole elements read. Failures go to the error channel.
    pub fn read_elements(&mut self, buf: &mut [u8], size: usize, count: usize) -> usize {
        let Some(total) = element_bytes(buf.len(), size, count) else {
            return 0;
        };
        let mut done = 0;
        while done < total {
            match self.read(&mut buf[done..total]) {
                Ok(0) | Err(_) => break,
                Ok(n) => done += n,
            }
        }
        done / size
    }

    /// Write up to `count` elements of `size` bytes, returning the number of
    /// whole elements written. Failures go to the error channel.
    pub fn write_elements(&mut self, buf: &[u8], size: usize, count: usize) -> usize {
        let Some(total) = element_bytes(buf.len(), size, count) else {
            return 0;
        };
        let mut done = 0;
        while done < total {
            match self.write(&buf[done..total]) {
                Ok(0) | Err(_) => break,
                Ok(n) => done += n,
            }
        }
        done / size
    }

    /// Move the cursor; see [`VirtualFile::seek`].
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        let result = self.inner.seek(pos);
        self.check(result)
    }

    /// Current cursor position.
    pub fn tell(&self) -> u64 {
        self.inner.tell()
    }

    /// Set the file size; see [`VirtualFile::truncate`].
    pub fn truncate(&mut self, size: u64) -> Result<(), FsError> {
        let result = self.inner.truncate(size);
        self.check(result)
    }

    /// Push buffered writes to the backend.
    pub fn flush(&mut self) -> Result<(), FsError> {
        let result = self.inner.flush();
        self.check(result)
    }

    /// Whether a read ran past the end of the data.
    pub fn eof(&self) -> bool {
        self.inner.eof()
    }

    /// Whether any operation on this file failed.
    pub fn error(&self) -> bool {
        self.error
    }

    /// Allocation state of a byte range.
    pub fn range_status(&mut self, offset: u64, len: u64) -> RangeStatus {
        self.inner.range_status(offset, len)
    }

    /// Flush and release the handle.
    pub fn close(mut self) -> Result<(), FsError> {
        self.closed = true;
        let result = self.inner.close();
        self.check(result)
    }
}

/// Byte count of `count` elements of `size`, bounded by the buffer.
fn element_bytes(available: usize, size: usize, count: usize) -> Option<usize> {
    if size == 0 || count == 0 {
        return None;
    }
    let total = size.checked_mul(count)?.min(available);
    Some(total - total % size)
}

impl Drop for File {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.inner.close() {
            tracing::warn!(path = %self.path, error = %err, "close on drop failed");
            self.errors.record(&err);
        }
    }
}

impl io::Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(File::read(self, buf)?)
    }
}

impl io::Write for File {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(File::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(File::flush(self)?)
    }
}

impl io::Seek for File {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(File::seek(self, pos)?)
    }
}
