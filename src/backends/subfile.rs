//! Byte-range windows over another path (`/vsisubfile/<start>_<length>,<path>`).
//!
//! An empty length means the window runs to the end of the inner file.

use std::io::SeekFrom;

use crate::{
    Context, FileExt, FsDir, FsError, FsOpen, FsWrite, Metadata, OpenFlags, RangeStatus,
    StatFlags, VirtualFile,
};

/// A parsed subfile path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubfileSpec<'p> {
    pub start: u64,
    pub length: Option<u64>,
    pub inner: &'p str,
}

impl<'p> SubfileSpec<'p> {
    pub(crate) fn parse(path: &'p str) -> Result<Self, FsError> {
        let invalid = |reason: &str| FsError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };
        let (range, inner) = path
            .split_once(',')
            .ok_or_else(|| invalid("expected <start>_<length>,<path>"))?;
        let (start, length) = range
            .split_once('_')
            .ok_or_else(|| invalid("expected <start>_<length>"))?;
        let start = start.parse().map_err(|_| invalid("bad start offset"))?;
        let length = if length.is_empty() {
            None
        } else {
            Some(length.parse().map_err(|_| invalid("bad length"))?)
        };
        Ok(Self {
            start,
            length,
            inner,
        })
    }
}

/// The subfile handler.
#[derive(Debug, Default)]
pub struct SubfileFs;

impl SubfileFs {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }
}

impl FsOpen for SubfileFs {
    fn open(
        &self,
        ctx: &Context<'_>,
        path: &str,
        flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError> {
        if flags.append {
            return Err(FsError::NotSupported {
                operation: "append on subfile",
            });
        }
        let spec = SubfileSpec::parse(path)?;
        let inner = if flags.write {
            match ctx.open(spec.inner, OpenFlags::READ_WRITE) {
                Err(FsError::NotFound { .. }) if flags.create => {
                    ctx.open(spec.inner, OpenFlags::READ_WRITE_CREATE)?
                }
                other => other?,
            }
        } else {
            ctx.open(spec.inner, OpenFlags::READ)?
        };
        Ok(Box::new(SubfileFile::new(
            inner,
            path,
            spec.start,
            spec.length,
            flags,
        )))
    }

    fn stat(&self, ctx: &Context<'_>, path: &str, _flags: StatFlags) -> Result<Metadata, FsError> {
        let spec = SubfileSpec::parse(path).map_err(|_| FsError::NotFound { path: path.into() })?;
        let inner = ctx.stat(spec.inner, StatFlags::SIZE)?;
        let size = match spec.length {
            Some(length) => length,
            None => inner.size.unwrap_or(0).saturating_sub(spec.start),
        };
        Ok(Metadata::file(size).with_modified(inner.modified))
    }
}

impl FsWrite for SubfileFs {}

impl FsDir for SubfileFs {
    fn read_dir(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        _max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError> {
        Err(FsError::NotFound { path: path.into() })
    }
}

/// A window of `length` bytes starting at `start` in an inner handle.
///
/// Positions are relative to the window. Used directly by the archive
/// handler for its members.
pub(crate) struct SubfileFile {
    inner: Box<dyn VirtualFile>,
    path: String,
    start: u64,
    length: Option<u64>,
    readable: bool,
    writable: bool,
    pos: u64,
    eof: bool,
}

impl SubfileFile {
    pub(crate) fn new(
        inner: Box<dyn VirtualFile>,
        path: &str,
        start: u64,
        length: Option<u64>,
        flags: OpenFlags,
    ) -> Self {
        Self {
            inner,
            path: path.to_string(),
            start,
            length,
            readable: flags.read,
            writable: flags.write,
            pos: 0,
            eof: false,
        }
    }

    fn inner_offset(&self, pos: u64) -> Result<u64, FsError> {
        self.start
            .checked_add(pos)
            .ok_or_else(|| FsError::InvalidArgument(format!("offset {pos} overflows subfile")))
    }
}

impl VirtualFile for SubfileFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        if !self.readable {
            return Err(FsError::PermissionDenied {
                path: self.path.clone(),
                operation: "read",
            });
        }
        let want = match self.length {
            Some(length) => {
                let available = length.saturating_sub(self.pos);
                buf.len().min(usize::try_from(available).unwrap_or(usize::MAX))
            }
            None => buf.len(),
        };
        let n = if want == 0 {
            0
        } else {
            self.inner.seek(SeekFrom::Start(self.inner_offset(self.pos)?))?;
            self.inner.read(&mut buf[..want])?
        };
        self.pos += n as u64;
        if n < buf.len() {
            self.eof = true;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if !self.writable {
            return Err(FsError::PermissionDenied {
                path: self.path.clone(),
                operation: "write",
            });
        }
        let allowed = match self.length {
            Some(length) => {
                if self.pos >= length && !buf.is_empty() {
                    return Err(FsError::CapacityExceeded {
                        path: self.path.clone(),
                        requested: self.pos.saturating_add(buf.len() as u64),
                        limit: length,
                    });
                }
                buf.len()
                    .min(usize::try_from(length - self.pos.min(length)).unwrap_or(usize::MAX))
            }
            None => buf.len(),
        };
        self.inner.seek(SeekFrom::Start(self.inner_offset(self.pos)?))?;
        let n = self.inner.write(&buf[..allowed])?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        let size = match (pos, self.length) {
            (SeekFrom::End(_), Some(length)) => length,
            (SeekFrom::End(_), None) => self.inner.size()?.saturating_sub(self.start),
            _ => 0,
        };
        let target = super::seek_target(self.pos, size, pos)?;
        self.pos = match self.length {
            Some(length) => target.min(length),
            None => target,
        };
        self.eof = false;
        Ok(self.pos)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn truncate(&mut self, size: u64) -> Result<(), FsError> {
        if !self.writable {
            return Err(FsError::PermissionDenied {
                path: self.path.clone(),
                operation: "truncate",
            });
        }
        match self.length {
            None => crate::truncate_by_extension(self, size),
            Some(_) if size == 0 => Err(FsError::NotSupported {
                operation: "truncate subfile to zero",
            }),
            Some(length) if size > length => Err(FsError::CapacityExceeded {
                path: self.path.clone(),
                requested: size,
                limit: length,
            }),
            Some(_) => {
                self.length = Some(size);
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<(), FsError> {
        self.inner.flush()
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn range_status(&mut self, offset: u64, len: u64) -> RangeStatus {
        match self.start.checked_add(offset) {
            Some(inner_offset) => self.inner.range_status(inner_offset, len),
            None => RangeStatus::Unknown,
        }
    }

    fn close(&mut self) -> Result<(), FsError> {
        self.inner.close()
    }
}
