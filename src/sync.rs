//! Tree synchronization between any two paths.
//!
//! [`sync`] first builds a [`SyncPlan`] (what to create, what to copy) and
//! then executes it, reporting progress after every top-level item of the
//! source.

use std::time::SystemTime;

use crate::ext::COPY_BUFFER_SIZE;
use crate::{FsError, Metadata, StatFlags, Vfs};

/// One step of a [`SyncPlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    /// Create a directory unless it already exists.
    CreateDir(String),
    /// Copy a file unless the destination is already up to date.
    CopyFile {
        /// Source path.
        src: String,
        /// Destination path.
        dst: String,
        /// Source size.
        size: u64,
        /// Source modification time.
        modified: Option<SystemTime>,
    },
}

/// Ordered operations for one synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Operations run before any item (the destination root).
    pub prelude: Vec<SyncOp>,
    /// One entry per top-level item of the source.
    pub items: Vec<Vec<SyncOp>>,
}

fn join(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}

fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit_once('/').map_or(trimmed, |(_, name)| name)
}

fn stat(vfs: &Vfs, path: &str) -> Result<Option<Metadata>, FsError> {
    vfs.stat(path, StatFlags::ALL)
}

impl SyncPlan {
    /// Plan the synchronization of `src` into `dst`.
    ///
    /// A directory source ending in `/` has its contents replayed under
    /// `dst`; otherwise the directory itself is recreated as
    /// `dst/<basename>`. A missing `dst` is created (not recursively) right
    /// away, so planning fails if its parent is missing.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] if `src` does not exist
    pub fn build(vfs: &Vfs, src: &str, dst: &str) -> Result<Self, FsError> {
        let src_meta = stat(vfs, src.trim_end_matches('/'))?.ok_or_else(|| FsError::NotFound {
            path: src.to_string(),
        })?;

        if !src_meta.is_dir() {
            let dst_is_dir = dst.ends_with('/') || stat(vfs, dst)?.is_some_and(|m| m.is_dir());
            let target = if dst_is_dir {
                join(dst, basename(src))
            } else {
                dst.to_string()
            };
            return Ok(Self {
                prelude: Vec::new(),
                items: vec![vec![SyncOp::CopyFile {
                    src: src.to_string(),
                    dst: target,
                    size: src_meta.size.unwrap_or(0),
                    modified: src_meta.modified,
                }]],
            });
        }

        if stat(vfs, dst)?.is_none() {
            tracing::debug!(dst, "creating sync destination");
            vfs.create_dir(dst)?;
        }

        let mut plan = Self::default();
        let base = if src.ends_with('/') {
            dst.trim_end_matches('/').to_string()
        } else {
            let base = join(dst, basename(src));
            plan.prelude.push(SyncOp::CreateDir(base.clone()));
            base
        };

        let src_dir = src.trim_end_matches('/');
        for name in vfs.read_dir(src_dir)? {
            let mut ops = Vec::new();
            plan_entry(vfs, &join(src_dir, &name), &join(&base, &name), &mut ops)?;
            plan.items.push(ops);
        }
        Ok(plan)
    }

    /// Total number of operations.
    pub fn len(&self) -> usize {
        self.prelude.len() + self.items.iter().map(Vec::len).sum::<usize>()
    }

    /// Whether the plan does nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the plan, calling `progress` with the completed fraction after
    /// each item.
    pub fn execute(
        &self,
        vfs: &Vfs,
        mut progress: Option<&mut dyn FnMut(f64)>,
    ) -> Result<(), FsError> {
        for op in &self.prelude {
            run(vfs, op)?;
        }
        let total = self.items.len();
        for (done, item) in self.items.iter().enumerate() {
            for op in item {
                run(vfs, op)?;
            }
            if let Some(report) = progress.as_mut() {
                report((done + 1) as f64 / total as f64);
            }
        }
        if total == 0 {
            if let Some(report) = progress.as_mut() {
                report(1.0);
            }
        }
        Ok(())
    }
}

fn plan_entry(vfs: &Vfs, src: &str, dst: &str, ops: &mut Vec<SyncOp>) -> Result<(), FsError> {
    let meta = stat(vfs, src)?.ok_or_else(|| FsError::NotFound {
        path: src.to_string(),
    })?;
    if meta.is_dir() {
        ops.push(SyncOp::CreateDir(dst.to_string()));
        for name in vfs.read_dir(src)? {
            plan_entry(vfs, &join(src, &name), &join(dst, &name), ops)?;
        }
    } else {
        ops.push(SyncOp::CopyFile {
            src: src.to_string(),
            dst: dst.to_string(),
            size: meta.size.unwrap_or(0),
            modified: meta.modified,
        });
    }
    Ok(())
}

fn run(vfs: &Vfs, op: &SyncOp) -> Result<(), FsError> {
    match op {
        SyncOp::CreateDir(path) => {
            if stat(vfs, path)?.is_none() {
                vfs.create_dir(path)?;
            }
            Ok(())
        }
        SyncOp::CopyFile {
            src,
            dst,
            size,
            modified,
        } => {
            if let Some(existing) = stat(vfs, dst)? {
                let same_size = existing.size == Some(*size);
                let not_older = match (existing.modified, modified) {
                    (Some(d), Some(s)) => d >= *s,
                    _ => true,
                };
                if existing.is_file() && same_size && not_older {
                    tracing::debug!(%src, %dst, "up to date");
                    return Ok(());
                }
            }
            tracing::debug!(%src, %dst, size, "copying");
            copy_file(vfs, src, dst).inspect_err(|_| {
                if let Err(err) = vfs.remove_file(dst) {
                    tracing::debug!(%dst, error = %err, "cannot remove partial copy");
                }
            })
        }
    }
}

fn copy_file(vfs: &Vfs, src: &str, dst: &str) -> Result<(), FsError> {
    let mut input = vfs.open(src, "rb")?;
    let mut output = vfs.open(dst, "wb")?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let mut written = 0;
        while written < n {
            let w = output.write(&buf[written..n])?;
            if w == 0 {
                return Err(FsError::CapacityExceeded {
                    path: dst.to_string(),
                    requested: output.tell() + (n - written) as u64,
                    limit: output.tell(),
                });
            }
            written += w;
        }
    }
    input.close()?;
    output.close()
}

/// Synchronize `src` into `dst`.
///
/// Files whose destination already has the same size and a modification
/// time not older than the source are skipped, so running the same sync
/// twice copies nothing the second time. A copy that fails removes its
/// partial destination file.
///
/// # Example
///
/// ```rust
/// use routefs::Vfs;
///
/// let vfs = Vfs::new();
/// vfs.file_from_buffer("/vsimem/src/a.txt", b"a".to_vec()).unwrap();
/// vfs.file_from_buffer("/vsimem/src/b.txt", b"b".to_vec()).unwrap();
///
/// let mut seen = Vec::new();
/// let mut report = |pct: f64| seen.push(pct);
/// vfs.sync("/vsimem/src/", "/vsimem/dst", Some(&mut report)).unwrap();
/// assert_eq!(seen, [0.5, 1.0]);
/// assert_eq!(vfs.read_dir("/vsimem/dst").unwrap(), ["a.txt", "b.txt"]);
/// ```
pub fn sync(
    vfs: &Vfs,
    src: &str,
    dst: &str,
    progress: Option<&mut dyn FnMut(f64)>,
) -> Result<(), FsError> {
    let plan = SyncPlan::build(vfs, src, dst)?;
    tracing::debug!(src, dst, items = plan.items.len(), ops = plan.len(), "sync planned");
    plan.execute(vfs, progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(vfs: &Vfs) {
        vfs.create_dir("/vsimem/test_sync").unwrap();
        vfs.file_from_buffer("/vsimem/test_sync/foo.txt", b"bar".to_vec()).unwrap();
        vfs.create_dir("/vsimem/test_sync/subdir").unwrap();
        vfs.file_from_buffer("/vsimem/test_sync/subdir/bar.txt", b"baz".to_vec()).unwrap();
    }

    #[test]
    fn basename_and_join() {
        assert_eq!(basename("/vsimem/a/b/"), "b");
        assert_eq!(basename("file.txt"), "file.txt");
        assert_eq!(join("/vsimem/", "x"), "/vsimem/x");
    }

    #[test]
    fn missing_source_fails() {
        let vfs = Vfs::new();
        assert!(matches!(
            vfs.sync("/vsimem/i_do/not/exist", "/vsimem/", None).unwrap_err(),
            FsError::NotFound { .. }
        ));
    }

    #[test]
    fn contents_are_replayed_with_trailing_separator() {
        let vfs = Vfs::new();
        source(&vfs);
        vfs.sync("/vsimem/test_sync/", "/vsimem/out", None).unwrap();
        assert_eq!(vfs.read_dir("/vsimem/out").unwrap(), ["foo.txt", "subdir"]);
        assert_eq!(vfs.read_dir("/vsimem/out/subdir").unwrap(), ["bar.txt"]);
        assert_eq!(&*vfs.mem_buffer("/vsimem/out/subdir/bar.txt").unwrap(), b"baz");
    }

    #[test]
    fn directory_is_recreated_without_trailing_separator() {
        let vfs = Vfs::new();
        source(&vfs);
        let mut seen = Vec::new();
        let mut report = |pct: f64| seen.push(pct);
        vfs.sync("/vsimem/test_sync", "/vsimem/out", Some(&mut report))
            .unwrap();
        assert_eq!(seen, [0.5, 1.0]);
        assert_eq!(vfs.read_dir("/vsimem/out").unwrap(), ["test_sync"]);
        assert_eq!(
            vfs.read_dir("/vsimem/out/test_sync").unwrap(),
            ["foo.txt", "subdir"]
        );
    }

    #[test]
    fn missing_destination_parent_fails() {
        let vfs = Vfs::new();
        source(&vfs);
        assert!(vfs
            .sync("/vsimem/test_sync/", "/vsimem/i_do_not/exist", None)
            .is_err());
    }

    #[test]
    fn second_run_copies_nothing() {
        let vfs = Vfs::new();
        source(&vfs);
        vfs.sync("/vsimem/test_sync/", "/vsimem/out", None).unwrap();
        let before = vfs
            .stat("/vsimem/out/foo.txt", StatFlags::ALL)
            .unwrap()
            .unwrap()
            .modified;
        vfs.sync("/vsimem/test_sync/", "/vsimem/out", None).unwrap();
        let after = vfs
            .stat("/vsimem/out/foo.txt", StatFlags::ALL)
            .unwrap()
            .unwrap()
            .modified;
        assert_eq!(before, after);
    }

    #[test]
    fn file_into_directory_keeps_basename() {
        let vfs = Vfs::new();
        vfs.file_from_buffer("/vsimem/single.txt", b"12345".to_vec()).unwrap();
        vfs.create_dir("/vsimem/into").unwrap();
        let mut seen = Vec::new();
        let mut report = |pct: f64| seen.push(pct);
        vfs.sync("/vsimem/single.txt", "/vsimem/into", Some(&mut report))
            .unwrap();
        assert_eq!(seen, [1.0]);
        assert_eq!(&*vfs.mem_buffer("/vsimem/into/single.txt").unwrap(), b"12345");
    }

    #[test]
    fn empty_source_reports_completion() {
        let vfs = Vfs::new();
        vfs.create_dir("/vsimem/empty").unwrap();
        let mut seen = Vec::new();
        let mut report = |pct: f64| seen.push(pct);
        vfs.sync("/vsimem/empty/", "/vsimem/empty_out", Some(&mut report))
            .unwrap();
        assert_eq!(seen, [1.0]);
    }

    #[test]
    fn plan_lists_every_operation() {
        let vfs = Vfs::new();
        source(&vfs);
        vfs.create_dir("/vsimem/planned").unwrap();
        let plan = SyncPlan::build(&vfs, "/vsimem/test_sync", "/vsimem/planned").unwrap();
        assert_eq!(plan.prelude, [SyncOp::CreateDir("/vsimem/planned/test_sync".into())]);
        assert_eq!(plan.items.len(), 2);
        assert_eq!(plan.len(), 4);
    }
}
