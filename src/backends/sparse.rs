//! Composite files assembled from regions of other files
//! (`/vsisparse/<descriptor>`).
//!
//! The descriptor is a JSON document:
//!
//! ```json
//! {
//!   "length": 1024,
//!   "regions": [
//!     { "kind": "subfile", "filename": "data.bin", "relative": true,
//!       "dst_offset": 0, "src_offset": 16, "length": 100 },
//!     { "kind": "constant", "dst_offset": 512, "value": 255, "length": 8 }
//!   ]
//! }
//! ```
//!
//! Bytes not covered by any region read as zero. When regions overlap, the
//! later one wins. A `length` of zero means "up to the end of the last
//! region".

use std::io::SeekFrom;

use serde::{Deserialize, Serialize};

use crate::{
    Context, FileExt, FsDir, FsError, FsOpen, FsWrite, Metadata, OpenFlags, RangeStatus,
    StatFlags, VirtualFile,
};

/// Parsed sparse-file descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseDescriptor {
    /// Logical file length; `0` derives it from the regions.
    #[serde(default)]
    pub length: u64,
    /// Regions in override order.
    #[serde(default)]
    pub regions: Vec<SparseRegion>,
}

/// One region of a sparse file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SparseRegion {
    /// Bytes copied from another file.
    Subfile {
        /// Source path.
        filename: String,
        /// Resolve `filename` against the descriptor's directory.
        #[serde(default)]
        relative: bool,
        /// Offset in the sparse file.
        dst_offset: u64,
        /// Offset in the source file.
        #[serde(default)]
        src_offset: u64,
        /// Number of bytes.
        length: u64,
    },
    /// A run of one repeated byte.
    Constant {
        /// Offset in the sparse file.
        dst_offset: u64,
        /// The repeated byte.
        value: u8,
        /// Number of bytes.
        length: u64,
    },
}

impl SparseRegion {
    fn span(&self) -> (u64, u64) {
        match *self {
            SparseRegion::Subfile {
                dst_offset, length, ..
            }
            | SparseRegion::Constant {
                dst_offset, length, ..
            } => (dst_offset, dst_offset.saturating_add(length)),
        }
    }
}

impl SparseDescriptor {
    /// Effective logical length.
    pub fn effective_length(&self) -> u64 {
        if self.length > 0 {
            return self.length;
        }
        self.regions.iter().map(|r| r.span().1).max().unwrap_or(0)
    }
}

fn resolve_source(descriptor_path: &str, filename: &str, relative: bool) -> String {
    if !relative {
        return filename.to_string();
    }
    match descriptor_path.rfind('/') {
        Some(i) => format!("{}/{filename}", &descriptor_path[..i]),
        None => filename.to_string(),
    }
}

fn load(ctx: &Context<'_>, path: &str) -> Result<SparseDescriptor, FsError> {
    let mut file = ctx.open(path, OpenFlags::READ)?;
    let json = file.read_to_end()?;
    file.close()?;
    serde_json::from_slice(&json).map_err(|e| FsError::CorruptedData {
        path: path.to_string(),
        details: format!("invalid sparse descriptor: {e}"),
    })
}

/// The sparse-file handler.
#[derive(Debug, Default)]
pub struct SparseFs;

impl SparseFs {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }
}

impl FsOpen for SparseFs {
    fn open(
        &self,
        ctx: &Context<'_>,
        path: &str,
        flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError> {
        if flags.write {
            return Err(FsError::NotSupported {
                operation: "write to sparse file",
            });
        }
        let descriptor = load(ctx, path)?;
        let length = descriptor.effective_length();
        let regions = descriptor
            .regions
            .into_iter()
            .map(|region| {
                let (start, end) = region.span();
                let source = match region {
                    SparseRegion::Subfile {
                        filename,
                        relative,
                        src_offset,
                        ..
                    } => {
                        let source = resolve_source(path, &filename, relative);
                        Source::File(ctx.open(&source, OpenFlags::READ)?, src_offset)
                    }
                    SparseRegion::Constant { value, .. } => Source::Constant(value),
                };
                Ok::<_, FsError>(OpenRegion { start, end, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(path, length, regions = regions.len(), "opened sparse file");
        Ok(Box::new(SparseFile {
            path: path.to_string(),
            length,
            regions,
            pos: 0,
            eof: false,
        }))
    }

    fn stat(&self, ctx: &Context<'_>, path: &str, _flags: StatFlags) -> Result<Metadata, FsError> {
        let modified = ctx.stat(path, StatFlags::ALL)?.modified;
        let descriptor = load(ctx, path)?;
        Ok(Metadata::file(descriptor.effective_length()).with_modified(modified))
    }

    fn supports_sparse_files(&self, _path: &str) -> bool {
        true
    }
}

impl FsWrite for SparseFs {}

impl FsDir for SparseFs {
    fn read_dir(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        _max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError> {
        Err(FsError::NotFound { path: path.into() })
    }
}

enum Source {
    File(Box<dyn VirtualFile>, u64),
    Constant(u8),
}

struct OpenRegion {
    start: u64,
    end: u64,
    source: Source,
}

struct SparseFile {
    path: String,
    length: u64,
    regions: Vec<OpenRegion>,
    pos: u64,
    eof: bool,
}

impl VirtualFile for SparseFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let available = self.length.saturating_sub(self.pos);
        let n = buf
            .len()
            .min(usize::try_from(available).unwrap_or(usize::MAX));
        let out = &mut buf[..n];
        out.fill(0);
        let (lo, hi) = (self.pos, self.pos + n as u64);

        for region in &mut self.regions {
            let start = region.start.max(lo);
            let end = region.end.min(hi);
            if start >= end {
                continue;
            }
            let slice = &mut out[(start - lo) as usize..(end - lo) as usize];
            match &mut region.source {
                Source::Constant(value) => slice.fill(*value),
                Source::File(file, src_offset) => {
                    file.seek(SeekFrom::Start(*src_offset + (start - region.start)))?;
                    let mut filled = 0;
                    while filled < slice.len() {
                        let got = file.read(&mut slice[filled..])?;
                        if got == 0 {
                            break;
                        }
                        filled += got;
                    }
                    slice[filled..].fill(0);
                }
            }
        }

        self.pos += n as u64;
        if n < buf.len() {
            self.eof = true;
        }
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::PermissionDenied {
            path: self.path.clone(),
            operation: "write",
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        self.pos = super::seek_target(self.pos, self.length, pos)?;
        self.eof = false;
        Ok(self.pos)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn range_status(&mut self, offset: u64, len: u64) -> RangeStatus {
        let end = offset.saturating_add(len);
        if self.regions.iter().any(|r| r.start < end && offset < r.end) {
            RangeStatus::Data
        } else {
            RangeStatus::Hole
        }
    }

    fn close(&mut self) -> Result<(), FsError> {
        let mut first_error = None;
        for region in &mut self.regions {
            if let Source::File(file, _) = &mut region.source {
                if let Err(err) = file.close() {
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vfs;

    fn setup(vfs: &Vfs, length: u64) {
        vfs.file_from_buffer("/vsimem/sp/data.bin", b"0123456789".to_vec()).unwrap();
        let descriptor = SparseDescriptor {
            length,
            regions: vec![
                SparseRegion::Subfile {
                    filename: "data.bin".into(),
                    relative: true,
                    dst_offset: 2,
                    src_offset: 4,
                    length: 4,
                },
                SparseRegion::Constant {
                    dst_offset: 10,
                    value: b'x',
                    length: 3,
                },
                SparseRegion::Constant {
                    dst_offset: 5,
                    value: b'#',
                    length: 1,
                },
            ],
        };
        vfs.file_from_buffer("/vsimem/sp/desc.json", serde_json::to_vec(&descriptor).unwrap())
            .unwrap();
    }

    #[test]
    fn regions_compose_with_zero_gaps() {
        let vfs = Vfs::new();
        setup(&vfs, 16);
        let mut f = vfs.context().open("/vsisparse//vsimem/sp/desc.json", OpenFlags::READ).unwrap();
        assert_eq!(f.read_to_end().unwrap(), b"\0\0456#\0\0\0\0xxx\0\0\0");
        assert!(f.eof());
    }

    #[test]
    fn length_defaults_to_last_region_end() {
        let vfs = Vfs::new();
        setup(&vfs, 0);
        let meta = vfs.stat("/vsisparse//vsimem/sp/desc.json", StatFlags::SIZE).unwrap().unwrap();
        assert_eq!(meta.size, Some(13));
    }

    #[test]
    fn range_status_follows_regions() {
        let vfs = Vfs::new();
        setup(&vfs, 64);
        let mut f = vfs.context().open("/vsisparse//vsimem/sp/desc.json", OpenFlags::READ).unwrap();
        assert_eq!(f.range_status(0, 2), RangeStatus::Hole);
        assert_eq!(f.range_status(0, 3), RangeStatus::Data);
        assert_eq!(f.range_status(20, 40), RangeStatus::Hole);
    }

    #[test]
    fn read_only() {
        let vfs = Vfs::new();
        setup(&vfs, 0);
        assert!(vfs.context().open("/vsisparse//vsimem/sp/desc.json", OpenFlags::WRITE).is_err());
    }

    #[test]
    fn bad_descriptor_is_corrupted_data() {
        let vfs = Vfs::new();
        vfs.file_from_buffer("/vsimem/bad.json", b"{not json".to_vec()).unwrap();
        assert!(matches!(
            vfs.context().open("/vsisparse//vsimem/bad.json", OpenFlags::READ).err(),
            Some(FsError::CorruptedData { .. })
        ));
    }

    #[test]
    fn descriptor_json_format() {
        let json = r#"{"length": 4, "regions": [{"kind": "constant", "dst_offset": 1, "value": 7, "length": 2}]}"#;
        let d: SparseDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.regions[0].span(), (1, 3));
        assert_eq!(d.effective_length(), 4);
    }
}
