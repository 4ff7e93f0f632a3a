//! Operating-system files, for every path without a registered prefix.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::{
    Context, FileType, FsDir, FsError, FsOpen, FsWrite, Metadata, OpenFlags, RangeStatus,
    StatFlags, VirtualFile, collect_listing,
};

/// The local disk handler.
#[derive(Debug, Default)]
pub struct LocalFs;

impl LocalFs {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }
}

fn metadata_of(meta: &fs::Metadata) -> Metadata {
    let file_type = if meta.is_dir() {
        FileType::Directory
    } else {
        FileType::File
    };
    Metadata {
        file_type: Some(file_type),
        size: (file_type == FileType::File).then(|| meta.len()),
        modified: meta.modified().ok(),
    }
}

impl FsOpen for LocalFs {
    fn open(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError> {
        let file = fs::OpenOptions::new()
            .read(flags.read)
            .write(flags.write && !flags.append)
            .append(flags.append)
            .create(flags.create)
            .truncate(flags.truncate)
            .open(path)
            .map_err(|e| FsError::io("open", path, e))?;
        let meta = file.metadata().map_err(|e| FsError::io("open", path, e))?;
        if meta.is_dir() {
            return Err(FsError::NotAFile { path: path.into() });
        }
        let pos = if flags.append { meta.len() } else { 0 };
        tracing::debug!(path, ?flags, "opened local file");
        Ok(Box::new(LocalFile {
            file,
            path: path.to_string(),
            flags,
            pos,
            eof: false,
        }))
    }

    fn stat(&self, _ctx: &Context<'_>, path: &str, _flags: StatFlags) -> Result<Metadata, FsError> {
        let meta = fs::metadata(path).map_err(|e| FsError::io("stat", path, e))?;
        Ok(metadata_of(&meta))
    }

    fn supports_sparse_files(&self, _path: &str) -> bool {
        cfg!(unix)
    }
}

impl FsWrite for LocalFs {
    fn remove_file(&self, _ctx: &Context<'_>, path: &str) -> Result<(), FsError> {
        fs::remove_file(path).map_err(|e| FsError::io("remove_file", path, e))
    }

    fn rename(&self, _ctx: &Context<'_>, from: &str, to: &str) -> Result<(), FsError> {
        fs::rename(from, to).map_err(|e| FsError::io("rename", from, e))
    }
}

impl FsDir for LocalFs {
    fn read_dir(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError> {
        let dir = if path.is_empty() { "." } else { path };
        let meta = fs::metadata(dir).map_err(|e| FsError::io("read_dir", path, e))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory { path: path.into() });
        }
        let mut names = fs::read_dir(dir)
            .map_err(|e| FsError::io("read_dir", path, e))?
            .map(|entry| {
                entry
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .map_err(|e| FsError::io("read_dir", path, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        names.sort();
        Ok(collect_listing(names, max_files))
    }

    fn create_dir(&self, _ctx: &Context<'_>, path: &str) -> Result<(), FsError> {
        fs::create_dir(path).map_err(|e| FsError::io("create_dir", path, e))
    }

    fn remove_dir(&self, _ctx: &Context<'_>, path: &str) -> Result<(), FsError> {
        fs::remove_dir(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::DirectoryNotEmpty => FsError::DirectoryNotEmpty { path: path.into() },
            _ => FsError::io("remove_dir", path, e),
        })
    }
}

struct LocalFile {
    file: fs::File,
    path: String,
    flags: OpenFlags,
    pos: u64,
    eof: bool,
}

impl LocalFile {
    fn sync_cursor(&mut self) -> Result<(), FsError> {
        self.file
            .seek(SeekFrom::Start(self.pos))
            .map_err(|e| FsError::io("seek", &self.path, e))?;
        Ok(())
    }
}

impl VirtualFile for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        if !self.flags.read {
            return Err(FsError::PermissionDenied {
                path: self.path.clone(),
                operation: "read",
            });
        }
        self.sync_cursor()?;
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FsError::io("read", &self.path, e)),
            }
        }
        self.pos += total as u64;
        if total < buf.len() {
            self.eof = true;
        }
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if !self.flags.write {
            return Err(FsError::PermissionDenied {
                path: self.path.clone(),
                operation: "write",
            });
        }
        if !self.flags.append {
            self.sync_cursor()?;
        }
        let n = self
            .file
            .write(buf)
            .map_err(|e| FsError::io("write", &self.path, e))?;
        self.pos = self
            .file
            .stream_position()
            .map_err(|e| FsError::io("write", &self.path, e))?;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        let size = match pos {
            SeekFrom::End(_) => self
                .file
                .metadata()
                .map_err(|e| FsError::io("seek", &self.path, e))?
                .len(),
            _ => 0,
        };
        self.pos = super::seek_target(self.pos, size, pos)?;
        self.eof = false;
        Ok(self.pos)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn truncate(&mut self, size: u64) -> Result<(), FsError> {
        if !self.flags.write {
            return Err(FsError::PermissionDenied {
                path: self.path.clone(),
                operation: "truncate",
            });
        }
        self.file
            .set_len(size)
            .map_err(|e| FsError::io("truncate", &self.path, e))
    }

    fn flush(&mut self) -> Result<(), FsError> {
        self.file
            .flush()
            .map_err(|e| FsError::io("flush", &self.path, e))
    }

    fn eof(&self) -> bool {
        self.eof
    }

    #[cfg(target_os = "linux")]
    fn range_status(&mut self, offset: u64, len: u64) -> RangeStatus {
        let Ok(start) = libc::off_t::try_from(offset) else {
            return RangeStatus::Unknown;
        };
        match seek_data(&self.file, start) {
            Ok(Some(data)) if data < offset.saturating_add(len) => RangeStatus::Data,
            Ok(_) => RangeStatus::Hole,
            Err(_) => RangeStatus::Unknown,
        }
    }
}

/// Offset of the first data byte at or after `start`, or `None` when only a
/// hole remains.
///
/// Moves the descriptor's cursor; callers re-seek before their next read or
/// write (`LocalFile::sync_cursor`).
#[cfg(target_os = "linux")]
fn seek_data(file: &fs::File, start: libc::off_t) -> std::io::Result<Option<u64>> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: `lseek` only reads its integer arguments, and the descriptor
    // comes from a live `fs::File` borrowed for the whole call.
    let data = unsafe { libc::lseek(file.as_raw_fd(), start, libc::SEEK_DATA) };
    if data >= 0 {
        return Ok(u64::try_from(data).ok());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ENXIO) => Ok(None),
        _ => Err(err),
    }
}
