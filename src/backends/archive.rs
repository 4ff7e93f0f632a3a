//! Read-only archive containers (`/vsitar/<archive>[/<member>]`).
//!
//! Two formats are recognized:
//!
//! - the line-delimited "fuzzer-friendly" format: a first line
//!   `FUZZER_FRIENDLY_ARCHIVE`, then members introduced by
//!   `***NEWFILE***:<name>\n` markers, each running verbatim up to the next
//!   marker (which need not start a line) or the end of the stream;
//! - ustar / GNU tar, via the `tar` crate.
//!
//! `.tgz` and `.tar.gz` archives are read through `/vsigzip/`. Members are
//! served as read-only windows over the archive stream.
//!
//! Member tables are kept per archive path and rebuilt when the archive's
//! size or modification time changes.

use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::SystemTime;

use lru::LruCache;
use parking_lot::Mutex;

use crate::backends::subfile::SubfileFile;
use crate::ext::IoAdapter;
use crate::{
    Context, FileExt, FsDir, FsError, FsOpen, FsWrite, Metadata, OpenFlags, StatFlags,
    VirtualFile, collect_listing,
};

/// First line of a fuzzer-friendly archive.
pub const FUZZER_SIGNATURE: &[u8] = b"FUZZER_FRIENDLY_ARCHIVE";

/// Marker introducing a member of a fuzzer-friendly archive.
pub const FUZZER_MARKER: &[u8] = b"***NEWFILE***:";

const ARCHIVE_EXTENSIONS: [&str; 3] = [".tar.gz", ".tgz", ".tar"];

/// Number of archive member tables kept by one handler.
const INDEX_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// One archive entry: a file (with its data window) or a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    data: Option<(u64, u64)>,
}

#[derive(Debug, Default)]
struct Index {
    entries: Vec<Entry>,
}

impl Index {
    fn file(&self, name: &str) -> Option<(u64, u64)> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.data)
    }

    fn is_dir(&self, name: &str) -> bool {
        if name.is_empty() {
            return true;
        }
        let prefix = format!("{name}/");
        self.entries
            .iter()
            .any(|e| (e.name == name && e.data.is_none()) || e.name.starts_with(&prefix))
    }

    /// Immediate children of `dir`, in archive order, with implied
    /// directories.
    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter_map(|e| e.name.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty() && seen.insert(name.to_string()))
            .map(str::to_string)
            .collect()
    }
}

/// Split `path` into archive path and member name.
///
/// Candidates end at a `.tar`, `.tgz` or `.tar.gz` component boundary,
/// shortest first. Without any candidate the whole path is the archive.
fn archive_candidates(path: &str) -> Vec<(&str, &str)> {
    let mut ends: Vec<usize> = ARCHIVE_EXTENSIONS
        .iter()
        .flat_map(|ext| {
            path.match_indices(ext)
                .map(move |(i, _)| i + ext.len())
                .filter(|&end| end == path.len() || path[end..].starts_with('/'))
        })
        .collect();
    ends.sort_unstable();
    ends.dedup();
    if ends.is_empty() {
        return vec![(path, "")];
    }
    ends.into_iter()
        .map(|end| (&path[..end], path[end..].trim_matches('/')))
        .collect()
}

/// Path actually opened for reading `archive`.
fn source_path(archive: &str) -> String {
    let compressed = archive.ends_with(".tgz") || archive.ends_with(".tar.gz");
    if compressed && !archive.starts_with("/vsigzip/") {
        format!("/vsigzip/{archive}")
    } else {
        archive.to_string()
    }
}

/// Parse a fuzzer-friendly archive held in `data`.
fn parse_fuzzer(data: &[u8]) -> Option<Index> {
    let body = data.strip_prefix(FUZZER_SIGNATURE)?;
    let body_start = FUZZER_SIGNATURE.len() + usize::from(body.first() == Some(&b'\n'));

    let markers: Vec<usize> = data
        .windows(FUZZER_MARKER.len())
        .enumerate()
        .filter(|(i, w)| *i >= body_start && *w == FUZZER_MARKER)
        .map(|(i, _)| i)
        .collect();

    let mut entries = Vec::new();
    for (k, &at) in markers.iter().enumerate() {
        let name_start = at + FUZZER_MARKER.len();
        let next = markers.get(k + 1).copied().unwrap_or(data.len());
        let Some(newline) = data[name_start..next].iter().position(|&b| b == b'\n') else {
            continue;
        };
        if newline == 0 {
            continue;
        }
        let name = String::from_utf8_lossy(&data[name_start..name_start + newline]).into_owned();
        let content_start = name_start + newline + 1;
        entries.push(Entry {
            name,
            data: Some((content_start as u64, (next - content_start) as u64)),
        });
    }
    Some(Index { entries })
}

/// Parse a ustar / GNU tar archive.
fn parse_tar(file: Box<dyn VirtualFile>, archive: &str) -> Result<Index, FsError> {
    let corrupted = |e: std::io::Error| FsError::CorruptedData {
        path: archive.to_string(),
        details: e.to_string(),
    };
    let mut reader = ::tar::Archive::new(IoAdapter::new(file));
    let mut entries = Vec::new();
    for entry in reader.entries_with_seek().map_err(corrupted)? {
        let entry = entry.map_err(corrupted)?;
        let name = entry
            .path()
            .map_err(corrupted)?
            .to_string_lossy()
            .trim_start_matches("./")
            .trim_end_matches('/')
            .to_string();
        if name.is_empty() {
            continue;
        }
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            entries.push(Entry { name, data: None });
        } else if kind.is_file() {
            entries.push(Entry {
                name,
                data: Some((entry.raw_file_position(), entry.size())),
            });
        }
    }
    Ok(Index { entries })
}

/// Size and modification time an index was built from.
type Signature = (Option<u64>, Option<SystemTime>);

/// The tar handler.
pub struct TarFs {
    indexes: Mutex<LruCache<String, (Signature, Arc<Index>)>>,
}

impl fmt::Debug for TarFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TarFs")
            .field("cached_indexes", &self.indexes.lock().len())
            .finish()
    }
}

impl Default for TarFs {
    fn default() -> Self {
        Self::new()
    }
}

impl TarFs {
    /// Create the handler.
    pub fn new() -> Self {
        Self {
            indexes: Mutex::new(LruCache::new(INDEX_CACHE_CAPACITY)),
        }
    }

    /// The member table of `archive`, reusing the last one built while the
    /// archive is unchanged.
    fn index(&self, ctx: &Context<'_>, archive: &str) -> Result<Arc<Index>, FsError> {
        let meta = ctx.stat(archive, StatFlags::ALL)?;
        let signature = (meta.size, meta.modified);
        let cacheable = signature != (None, None);
        if cacheable {
            if let Some((seen, index)) = self.indexes.lock().get(archive) {
                if *seen == signature {
                    tracing::trace!(archive, "archive index reused");
                    return Ok(Arc::clone(index));
                }
            }
        }
        let index = Arc::new(self.build_index(ctx, archive)?);
        if cacheable {
            self.indexes
                .lock()
                .put(archive.to_string(), (signature, Arc::clone(&index)));
        }
        Ok(index)
    }

    /// Read the member table of `archive`.
    fn build_index(&self, ctx: &Context<'_>, archive: &str) -> Result<Index, FsError> {
        let source = source_path(archive);
        let mut file = ctx.open(&source, OpenFlags::READ)?;
        let mut head = [0u8; FUZZER_SIGNATURE.len()];
        let mut filled = 0;
        while filled < head.len() {
            let n = file.read(&mut head[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let index = if &head[..filled] == FUZZER_SIGNATURE {
            file.seek(std::io::SeekFrom::Start(0))?;
            let data = file.read_to_end()?;
            file.close()?;
            parse_fuzzer(&data).ok_or_else(|| FsError::CorruptedData {
                path: archive.to_string(),
                details: "bad fuzzer archive".into(),
            })?
        } else {
            file.seek(std::io::SeekFrom::Start(0))?;
            parse_tar(file, archive)?
        };
        tracing::debug!(archive, entries = index.entries.len(), "indexed archive");
        Ok(index)
    }

    /// Resolve `path` to its archive, member and index.
    ///
    /// Archives that cannot be parsed report `NotFound`.
    fn locate<'p>(
        &self,
        ctx: &Context<'_>,
        path: &'p str,
    ) -> Result<(&'p str, &'p str, Arc<Index>), FsError> {
        for (archive, member) in archive_candidates(path) {
            match self.index(ctx, archive) {
                Ok(index) if index.file(member).is_some() || index.is_dir(member) => {
                    return Ok((archive, member, index));
                }
                Ok(_) => {}
                Err(err @ FsError::NestingTooDeep { .. }) => return Err(err),
                Err(err) => {
                    tracing::debug!(archive, error = %err, "not a readable archive");
                }
            }
        }
        Err(FsError::NotFound { path: path.into() })
    }
}

impl FsOpen for TarFs {
    fn open(
        &self,
        ctx: &Context<'_>,
        path: &str,
        flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError> {
        if flags.write {
            return Err(FsError::NotSupported {
                operation: "write to archive member",
            });
        }
        let (archive, member, index) = self.locate(ctx, path)?;
        let Some((offset, size)) = index.file(member) else {
            return Err(if index.is_dir(member) {
                FsError::NotAFile { path: path.into() }
            } else {
                FsError::NotFound { path: path.into() }
            });
        };
        let inner = ctx.open(&source_path(archive), OpenFlags::READ)?;
        tracing::debug!(archive, member, offset, size, "opened archive member");
        Ok(Box::new(SubfileFile::new(inner, path, offset, Some(size), OpenFlags::READ)))
    }

    fn stat(&self, ctx: &Context<'_>, path: &str, _flags: StatFlags) -> Result<Metadata, FsError> {
        let (_, member, index) = self.locate(ctx, path)?;
        if let Some((_, size)) = index.file(member) {
            return Ok(Metadata::file(size));
        }
        if index.is_dir(member) {
            return Ok(Metadata::directory());
        }
        Err(FsError::NotFound { path: path.into() })
    }
}

impl FsWrite for TarFs {}

impl FsDir for TarFs {
    fn read_dir(
        &self,
        ctx: &Context<'_>,
        path: &str,
        max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError> {
        let (_, member, index) = self.locate(ctx, path)?;
        if index.file(member).is_some() {
            return Err(FsError::NotADirectory { path: path.into() });
        }
        if !index.is_dir(member) {
            return Err(FsError::NotFound { path: path.into() });
        }
        Ok(collect_listing(index.children(member), max_files))
    }
}
