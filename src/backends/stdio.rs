//! Process standard streams (`/vsistdin/`, `/vsistdout/`).
//!
//! Both are sequential: stdin only seeks forward (by reading and discarding),
//! stdout only reports how many bytes were written.

use std::io::{self, Read, SeekFrom, Write};

use crate::ext::COPY_BUFFER_SIZE;
use crate::{
    Context, FsDir, FsError, FsOpen, FsWrite, Metadata, OpenFlags, StatFlags, VirtualFile,
};

fn not_found(path: &str) -> FsError {
    FsError::NotFound { path: path.into() }
}

/// Read-only handler for standard input.
#[derive(Debug, Default)]
pub struct StdinFs;

impl StdinFs {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }
}

impl FsOpen for StdinFs {
    fn open(
        &self,
        _ctx: &Context<'_>,
        _path: &str,
        flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError> {
        if flags.write || flags.append {
            return Err(FsError::NotSupported {
                operation: "write to stdin",
            });
        }
        Ok(Box::new(SequentialReader::new(io::stdin(), "/vsistdin/")))
    }

    fn stat(&self, _ctx: &Context<'_>, path: &str, _flags: StatFlags) -> Result<Metadata, FsError> {
        Err(not_found(path))
    }
}

impl FsWrite for StdinFs {}

impl FsDir for StdinFs {
    fn read_dir(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        _max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError> {
        Err(not_found(path))
    }
}

/// Write-only handler for standard output.
#[derive(Debug, Default)]
pub struct StdoutFs;

impl StdoutFs {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }
}

impl FsOpen for StdoutFs {
    fn open(
        &self,
        _ctx: &Context<'_>,
        _path: &str,
        flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError> {
        if flags.read || !flags.write {
            return Err(FsError::NotSupported {
                operation: "read from stdout",
            });
        }
        Ok(Box::new(SequentialWriter::new(io::stdout(), "/vsistdout/")))
    }

    fn stat(&self, _ctx: &Context<'_>, path: &str, _flags: StatFlags) -> Result<Metadata, FsError> {
        Err(not_found(path))
    }
}

impl FsWrite for StdoutFs {}

impl FsDir for StdoutFs {
    fn read_dir(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        _max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError> {
        Err(not_found(path))
    }
}

/// Forward-only reader over any byte source.
struct SequentialReader<R> {
    source: R,
    path: &'static str,
    pos: u64,
    eof: bool,
}

impl<R: Read> SequentialReader<R> {
    fn new(source: R, path: &'static str) -> Self {
        Self {
            source,
            path,
            pos: 0,
            eof: false,
        }
    }
}

impl<R: Read + Send> SequentialReader<R> {
    fn skip(&mut self, mut count: u64) -> Result<(), FsError> {
        let mut scratch = vec![0u8; COPY_BUFFER_SIZE];
        while count > 0 {
            let want = usize::try_from(count).unwrap_or(usize::MAX).min(scratch.len());
            let n = VirtualFile::read(self, &mut scratch[..want])?;
            if n == 0 {
                break;
            }
            count -= n as u64;
        }
        Ok(())
    }
}

impl<R: Read + Send> VirtualFile for SequentialReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut total = 0;
        while total < buf.len() {
            match self.source.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(FsError::io("read", self.path, e)),
            }
        }
        self.pos += total as u64;
        if total < buf.len() {
            self.eof = true;
        }
        Ok(total)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::PermissionDenied {
            path: self.path.into(),
            operation: "write",
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        let target = match pos {
            SeekFrom::End(_) => {
                return Err(FsError::NotSupported {
                    operation: "seek from end of stream",
                });
            }
            other => super::seek_target(self.pos, 0, other)?,
        };
        if target < self.pos {
            return Err(FsError::NotSupported {
                operation: "backward seek on stream",
            });
        }
        self.skip(target - self.pos)?;
        self.eof = false;
        Ok(self.pos)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn eof(&self) -> bool {
        self.eof
    }
}

/// Append-only writer over any byte sink.
struct SequentialWriter<W> {
    sink: W,
    path: &'static str,
    written: u64,
}

impl<W: Write> SequentialWriter<W> {
    fn new(sink: W, path: &'static str) -> Self {
        Self {
            sink,
            path,
            written: 0,
        }
    }
}

impl<W: Write + Send> VirtualFile for SequentialWriter<W> {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, FsError> {
        Err(FsError::PermissionDenied {
            path: self.path.into(),
            operation: "read",
        })
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        self.sink
            .write_all(buf)
            .map_err(|e| FsError::io("write", self.path, e))?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        let target = super::seek_target(self.written, self.written, pos)?;
        if target != self.written {
            return Err(FsError::NotSupported {
                operation: "seek on stream",
            });
        }
        Ok(self.written)
    }

    fn tell(&self) -> u64 {
        self.written
    }

    fn flush(&mut self) -> Result<(), FsError> {
        self.sink
            .flush()
            .map_err(|e| FsError::io("flush", self.path, e))
    }

    fn eof(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<(), FsError> {
        self.flush()
    }
}
