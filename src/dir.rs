//! Recursive directory enumeration.

use std::collections::VecDeque;

use crate::{DirEntry, FsError, StatFlags, Vfs};

struct Frame {
    /// Name of the directory relative to the walk root ("" for the root).
    base: String,
    names: VecDeque<String>,
    depth: usize,
}

/// Depth-first, pre-order directory walk returned by
/// [`Vfs::open_dir`](crate::Vfs::open_dir).
///
/// Each directory is yielded before its children; children follow the
/// backend's listing order.
///
/// ```rust
/// use routefs::Vfs;
///
/// let vfs = Vfs::new();
/// vfs.file_from_buffer("/vsimem/walk/a/b.txt", b"x".to_vec()).unwrap();
/// let names: Vec<String> = vfs
///     .open_dir("/vsimem/walk", None)
///     .unwrap()
///     .map(|e| e.unwrap().name)
///     .collect();
/// assert_eq!(names, ["a", "a/b.txt"]);
/// ```
pub struct DirWalker<'a> {
    vfs: &'a Vfs,
    root: String,
    max_depth: Option<usize>,
    stack: Vec<Frame>,
}

impl<'a> DirWalker<'a> {
    pub(crate) fn new(vfs: &'a Vfs, path: &str, max_depth: Option<usize>) -> Result<Self, FsError> {
        let root = path.trim_end_matches('/').to_string();
        let names = vfs.read_dir(path)?;
        tracing::debug!(path, entries = names.len(), ?max_depth, "opened directory walk");
        Ok(Self {
            vfs,
            root,
            max_depth,
            stack: vec![Frame {
                base: String::new(),
                names: names.into(),
                depth: 0,
            }],
        })
    }

    /// Stop the walk and release its state.
    pub fn close(mut self) {
        self.stack.clear();
    }

    fn full_path(&self, relative: &str) -> String {
        format!("{}/{relative}", self.root)
    }

    fn next_entry(&mut self) -> Option<Result<DirEntry, FsError>> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(name) = frame.names.pop_front() else {
                self.stack.pop();
                continue;
            };
            let relative = if frame.base.is_empty() {
                name
            } else {
                format!("{}/{name}", frame.base)
            };
            let depth = frame.depth;

            let meta = match self.vfs.stat(&self.full_path(&relative), StatFlags::ALL) {
                Ok(meta) => meta.unwrap_or_default(),
                Err(err) => return Some(Err(err)),
            };
            let entry = DirEntry {
                name: relative.clone(),
                file_type: meta.file_type,
                size: meta.size,
                modified: meta.modified,
                extra: Default::default(),
            };

            if entry.is_dir() && self.max_depth.is_none_or(|max| depth < max) {
                match self.vfs.read_dir(&self.full_path(&relative)) {
                    Ok(names) => self.stack.push(Frame {
                        base: relative,
                        names: names.into(),
                        depth: depth + 1,
                    }),
                    Err(err) => {
                        tracing::debug!(name = %entry.name, error = %err, "cannot descend");
                    }
                }
            }
            return Some(Ok(entry));
        }
    }
}

impl Iterator for DirWalker<'_> {
    type Item = Result<DirEntry, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }
}

#[cfg(test)]
mod tests {
    use crate::Vfs;

    fn tree(vfs: &Vfs) {
        vfs.create_dir("/vsimem/t").unwrap();
        vfs.create_dir("/vsimem/t/subdir").unwrap();
        vfs.create_dir("/vsimem/t/subdir/subdir2").unwrap();
        vfs.file_from_buffer("/vsimem/t/subdir/subdir2/test2", b"x".to_vec()).unwrap();
        vfs.file_from_buffer("/vsimem/t/test", b"yy".to_vec()).unwrap();
    }

    fn names(vfs: &Vfs, depth: Option<usize>) -> Vec<String> {
        vfs.open_dir("/vsimem/t", depth)
            .unwrap()
            .map(|e| e.unwrap().name)
            .collect()
    }

    #[test]
    fn walk_is_preorder() {
        let vfs = Vfs::new();
        tree(&vfs);
        assert_eq!(
            names(&vfs, None),
            ["subdir", "subdir/subdir2", "subdir/subdir2/test2", "test"]
        );
    }

    #[test]
    fn depth_zero_lists_children_only() {
        let vfs = Vfs::new();
        tree(&vfs);
        assert_eq!(names(&vfs, Some(0)), ["subdir", "test"]);
        assert_eq!(names(&vfs, Some(1)), ["subdir", "subdir/subdir2", "test"]);
    }

    #[test]
    fn entries_carry_type_and_size() {
        let vfs = Vfs::new();
        tree(&vfs);
        let entries: Vec<_> = vfs
            .open_dir("/vsimem/t/", Some(0))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert!(entries[0].is_dir());
        assert_eq!(entries[1].size, Some(2));
    }

    #[test]
    fn missing_directory_fails_to_open() {
        let vfs = Vfs::new();
        assert!(vfs.open_dir("/vsimem/absent", None).is_err());
    }

    #[test]
    fn close_ends_the_walk() {
        let vfs = Vfs::new();
        tree(&vfs);
        let mut walker = vfs.open_dir("/vsimem/t", None).unwrap();
        assert!(walker.next().is_some());
        walker.close();
    }
}
