//! In-memory backend (`/vsimem/`).
//!
//! Files are byte buffers shared between every handle opened on the same
//! path. Directories are explicit entries; a file whose parents were never
//! created still lists them as implied directories.

use std::collections::{BTreeMap, BTreeSet};
use std::io::SeekFrom;
use std::ops::Deref;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{RawRwLock, RwLock};

use crate::{
    Context, FsDir, FsError, FsOpen, FsWrite, Metadata, OpenFlags, StatFlags, VirtualFile,
    collect_listing,
};

/// Largest size a memory file may reach.
const MAX_MEM_FILE_SIZE: u64 = isize::MAX as u64;

/// Contents of one memory file.
#[derive(Debug)]
pub(crate) struct MemFile {
    data: Vec<u8>,
    mtime: SystemTime,
}

impl MemFile {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            mtime: SystemTime::now(),
        }
    }

    /// Grow to at least `end` bytes, zero-filling. Leaves the file untouched
    /// on failure.
    fn ensure_len(&mut self, path: &str, end: u64) -> Result<(), FsError> {
        let current = self.data.len() as u64;
        if end <= current {
            return Ok(());
        }
        let capacity = || FsError::CapacityExceeded {
            path: path.to_string(),
            requested: end,
            limit: MAX_MEM_FILE_SIZE,
        };
        if end > MAX_MEM_FILE_SIZE {
            return Err(capacity());
        }
        let end = usize::try_from(end).map_err(|_| capacity())?;
        self.data
            .try_reserve(end - self.data.len())
            .map_err(|_| capacity())?;
        self.data.resize(end, 0);
        Ok(())
    }
}

type Node = Arc<RwLock<MemFile>>;

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<String, Node>,
    dirs: BTreeSet<String>,
}

impl Tree {
    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() || self.dirs.contains(path) {
            return true;
        }
        let prefix = format!("{path}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
            || self
                .dirs
                .range(prefix.clone()..)
                .next()
                .is_some_and(|k| k.starts_with(&prefix))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.is_dir(path)
    }

    fn children(&self, path: &str) -> BTreeSet<String> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        self.files
            .keys()
            .chain(self.dirs.iter())
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Normalize a memory path: no leading, trailing or doubled separators.
fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(p, _)| p)
}

/// The memory backend handler.
#[derive(Debug, Default)]
pub struct MemFs {
    tree: RwLock<Tree>,
}

impl MemFs {
    /// Create an empty memory filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `data` as the contents of `path`, replacing any file there.
    pub(crate) fn insert(&self, path: &str, data: Vec<u8>) -> Result<(), FsError> {
        let path = normalize(path);
        let mut tree = self.tree.write();
        if path.is_empty() || tree.is_dir(&path) {
            return Err(FsError::NotAFile { path });
        }
        tree.files
            .insert(path, Arc::new(RwLock::new(MemFile::new(data))));
        Ok(())
    }

    /// Read-locked view of the buffer behind `path`.
    pub(crate) fn buffer(&self, path: &str) -> Result<MemBuffer, FsError> {
        let path = normalize(path);
        let tree = self.tree.read();
        let node = tree
            .files
            .get(&path)
            .ok_or_else(|| FsError::NotFound { path: path.clone() })?;
        Ok(MemBuffer {
            guard: node.read_arc(),
        })
    }

    /// Unlink `path` and hand its buffer to the caller.
    ///
    /// Handles still open on the file keep working on their own copy.
    pub(crate) fn take(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let path = normalize(path);
        let node = self
            .tree
            .write()
            .files
            .remove(&path)
            .ok_or_else(|| FsError::NotFound { path: path.clone() })?;
        let data = match Arc::try_unwrap(node) {
            Ok(lock) => lock.into_inner().data,
            Err(shared) => shared.read().data.clone(),
        };
        Ok(data)
    }
}

impl FsOpen for MemFs {
    fn open(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError> {
        let path = normalize(path);
        let node = {
            let mut tree = self.tree.write();
            if tree.is_dir(&path) {
                return Err(FsError::NotAFile { path });
            }
            match tree.files.get(&path) {
                Some(node) => Arc::clone(node),
                None if flags.create => {
                    if tree.files.contains_key(parent(&path)) {
                        return Err(FsError::NotADirectory {
                            path: parent(&path).to_string(),
                        });
                    }
                    let node = Arc::new(RwLock::new(MemFile::new(Vec::new())));
                    tree.files.insert(path.clone(), Arc::clone(&node));
                    node
                }
                None => return Err(FsError::NotFound { path }),
            }
        };

        if flags.truncate {
            let mut file = node.write();
            file.data.clear();
            file.mtime = SystemTime::now();
        }
        let pos = if flags.append {
            node.read().data.len() as u64
        } else {
            0
        };
        tracing::debug!(path = %path, ?flags, "opened memory file");
        Ok(Box::new(MemHandle {
            node,
            path,
            flags,
            pos,
            eof: false,
        }))
    }

    fn stat(&self, _ctx: &Context<'_>, path: &str, _flags: StatFlags) -> Result<Metadata, FsError> {
        let path = normalize(path);
        let tree = self.tree.read();
        if let Some(node) = tree.files.get(&path) {
            let file = node.read();
            return Ok(Metadata::file(file.data.len() as u64).with_modified(Some(file.mtime)));
        }
        if tree.is_dir(&path) {
            return Ok(Metadata::directory());
        }
        Err(FsError::NotFound { path })
    }

    fn memory(&self) -> Option<&MemFs> {
        Some(self)
    }
}

impl FsWrite for MemFs {
    fn remove_file(&self, _ctx: &Context<'_>, path: &str) -> Result<(), FsError> {
        let path = normalize(path);
        let mut tree = self.tree.write();
        if tree.files.remove(&path).is_some() {
            return Ok(());
        }
        if tree.is_dir(&path) {
            return Err(FsError::NotAFile { path });
        }
        Err(FsError::NotFound { path })
    }

    fn rename(&self, _ctx: &Context<'_>, from: &str, to: &str) -> Result<(), FsError> {
        let from = normalize(from);
        let to = normalize(to);
        if from == to {
            return Ok(());
        }
        let mut tree = self.tree.write();

        if let Some(node) = tree.files.remove(&from) {
            if tree.is_dir(&to) {
                tree.files.insert(from, node);
                return Err(FsError::AlreadyExists {
                    path: to,
                    operation: "rename",
                });
            }
            tree.files.insert(to, node);
            return Ok(());
        }

        if from.is_empty() || !tree.is_dir(&from) {
            return Err(FsError::NotFound { path: from });
        }
        if to.starts_with(&format!("{from}/")) {
            return Err(FsError::InvalidArgument(format!(
                "cannot move {from} into itself"
            )));
        }
        if tree.exists(&to) {
            return Err(FsError::AlreadyExists {
                path: to,
                operation: "rename",
            });
        }

        let prefix = format!("{from}/");
        let moved_files: Vec<String> = tree
            .files
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved_files {
            if let Some(node) = tree.files.remove(&key) {
                tree.files.insert(format!("{to}/{}", &key[prefix.len()..]), node);
            }
        }
        let moved_dirs: Vec<String> = tree
            .dirs
            .iter()
            .filter(|k| **k == from || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved_dirs {
            tree.dirs.remove(&key);
            let renamed = if key == from {
                to.clone()
            } else {
                format!("{to}/{}", &key[prefix.len()..])
            };
            tree.dirs.insert(renamed);
        }
        tracing::debug!(%from, %to, "renamed memory directory");
        Ok(())
    }
}

impl FsDir for MemFs {
    fn read_dir(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError> {
        let path = normalize(path);
        let tree = self.tree.read();
        if tree.files.contains_key(&path) {
            return Err(FsError::NotADirectory { path });
        }
        if !tree.is_dir(&path) {
            return Err(FsError::NotFound { path });
        }
        Ok(collect_listing(tree.children(&path), max_files))
    }

    fn create_dir(&self, _ctx: &Context<'_>, path: &str) -> Result<(), FsError> {
        let path = normalize(path);
        let mut tree = self.tree.write();
        if tree.exists(&path) {
            return Err(FsError::AlreadyExists {
                path,
                operation: "create_dir",
            });
        }
        let parent = parent(&path);
        if !tree.is_dir(parent) {
            return Err(FsError::NotFound {
                path: parent.to_string(),
            });
        }
        tree.dirs.insert(path);
        Ok(())
    }

    fn remove_dir(&self, _ctx: &Context<'_>, path: &str) -> Result<(), FsError> {
        let path = normalize(path);
        let mut tree = self.tree.write();
        if tree.files.contains_key(&path) {
            return Err(FsError::NotADirectory { path });
        }
        if path.is_empty() || !tree.is_dir(&path) {
            return Err(FsError::NotFound { path });
        }
        if !tree.children(&path).is_empty() {
            return Err(FsError::DirectoryNotEmpty { path });
        }
        tree.dirs.remove(&path);
        Ok(())
    }
}

/// Read-locked view of a memory file's bytes.
///
/// Writers on the same file block while the view is alive.
pub struct MemBuffer {
    guard: ArcRwLockReadGuard<RawRwLock, MemFile>,
}

impl Deref for MemBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard.data
    }
}

impl std::fmt::Debug for MemBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemBuffer")
            .field("len", &self.guard.data.len())
            .finish()
    }
}

struct MemHandle {
    node: Node,
    path: String,
    flags: OpenFlags,
    pos: u64,
    eof: bool,
}

impl VirtualFile for MemHandle {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        if !self.flags.read {
            return Err(FsError::PermissionDenied {
                path: self.path.clone(),
                operation: "read",
            });
        }
        let file = self.node.read();
        let len = file.data.len() as u64;
        let n = if self.pos >= len {
            0
        } else {
            // pos < len <= usize::MAX here
            let start = self.pos as usize;
            let n = buf.len().min(file.data.len() - start);
            buf[..n].copy_from_slice(&file.data[start..start + n]);
            n
        };
        self.pos += n as u64;
        if n < buf.len() {
            self.eof = true;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if !self.flags.write {
            return Err(FsError::PermissionDenied {
                path: self.path.clone(),
                operation: "write",
            });
        }
        let mut file = self.node.write();
        if self.flags.append {
            self.pos = file.data.len() as u64;
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let end = self
            .pos
            .checked_add(buf.len() as u64)
            .ok_or_else(|| FsError::CapacityExceeded {
                path: self.path.clone(),
                requested: u64::MAX,
                limit: MAX_MEM_FILE_SIZE,
            })?;
        file.ensure_len(&self.path, end)?;
        let start = self.pos as usize;
        file.data[start..start + buf.len()].copy_from_slice(buf);
        file.mtime = SystemTime::now();
        self.pos = end;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        let len = self.node.read().data.len() as u64;
        self.pos = super::seek_target(self.pos, len, pos)?;
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
        let mut file = self.node.write();
        if size > file.data.len() as u64 {
            file.ensure_len(&self.path, size)?;
        } else {
            file.data.truncate(size as usize);
        }
        file.mtime = SystemTime::now();
        Ok(())
    }

    fn eof(&self) -> bool {
        self.eof
    }
}
