//! Extension helpers for file handles.
//!
//! This module provides convenience methods that build on [`VirtualFile`].
//! They are implemented as default methods with a blanket implementation, so
//! every handle (boxed or not) gets them for free.
//!
//! [`IoAdapter`] goes the other way: it lets code written against
//! `std::io::{Read, Write, Seek}` (decoders, tar readers) drive a handle.

use std::io::{self, SeekFrom};

use crate::{FsError, VirtualFile};

/// Buffer size used by [`FileExt::read_to_end`] and copy loops.
pub(crate) const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Convenience methods on any [`VirtualFile`].
///
/// # Example
///
/// ```rust
/// use routefs::{FileExt, FsError, VirtualFile};
///
/// fn slurp(file: &mut dyn VirtualFile) -> Result<Vec<u8>, FsError> {
///     file.read_to_end()
/// }
/// ```
pub trait FileExt: VirtualFile {
    /// Size of the file, leaving the cursor where it was.
    fn size(&mut self) -> Result<u64, FsError> {
        let pos = self.tell();
        let size = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(pos))?;
        Ok(size)
    }

    /// Read from the cursor to end-of-stream.
    fn read_to_end(&mut self) -> Result<Vec<u8>, FsError> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Write all of `buf`, failing if the handle stops accepting bytes.
    fn write_all(&mut self, mut buf: &[u8]) -> Result<(), FsError> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(FsError::CapacityExceeded {
                    path: String::new(),
                    requested: self.tell().saturating_add(buf.len() as u64),
                    limit: self.tell(),
                });
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

impl<F: VirtualFile + ?Sized> FileExt for F {}

/// `std::io` view of a handle.
#[derive(Debug)]
pub struct IoAdapter<F> {
    inner: F,
}

impl<F: VirtualFile> IoAdapter<F> {
    /// Wrap a handle.
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    /// Borrow the wrapped handle.
    pub fn get_mut(&mut self) -> &mut F {
        &mut self.inner
    }

    /// Unwrap the handle.
    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: VirtualFile> io::Read for IoAdapter<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.inner.read(buf)?)
    }
}

impl<F: VirtualFile> io::Write for IoAdapter<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.inner.write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.inner.flush()?)
    }
}

impl<F: VirtualFile> io::Seek for IoAdapter<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.inner.seek(pos)?)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.inner.tell())
    }
}
