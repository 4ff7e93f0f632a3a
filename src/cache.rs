//! Chunked read cache layered over any handle.
//!
//! Reads are served from [`CHUNK_SIZE`]-aligned chunks kept in an LRU. The
//! cache never changes what a read returns, only how often the wrapped
//! handle is asked.

use std::io::SeekFrom;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::backends::seek_target;
use crate::{FsError, Layer, RangeStatus, VirtualFile};

/// Size of one cached chunk.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Wraps handles in a [`CachedFile`].
///
/// `cache_size` bounds the bytes kept per handle: `Some(0)` disables storage
/// (reads pass straight through), `Some(n)` keeps `max(1, n / CHUNK_SIZE)`
/// chunks, `None` keeps every chunk read.
#[derive(Debug, Clone, Copy)]
pub struct CacheLayer {
    cache_size: Option<u64>,
}

impl CacheLayer {
    /// Create a layer with the given per-handle budget.
    pub fn new(cache_size: Option<u64>) -> Self {
        Self { cache_size }
    }
}

impl<F: VirtualFile> Layer<F> for CacheLayer {
    type File = CachedFile<F>;

    fn layer(self, file: F) -> Self::File {
        let chunks = match self.cache_size {
            Some(0) => None,
            Some(bytes) => {
                let count = usize::try_from(bytes / CHUNK_SIZE as u64).unwrap_or(usize::MAX);
                Some(LruCache::new(NonZeroUsize::new(count).unwrap_or(NonZeroUsize::MIN)))
            }
            None => Some(LruCache::unbounded()),
        };
        CachedFile {
            inner: file,
            chunks,
            pos: 0,
            eof: false,
            deferred: None,
        }
    }
}

/// A handle whose reads go through a chunk cache.
///
/// Seeks are always checked by the wrapped handle, so a cached handle
/// refuses exactly the positions the uncached one refuses.
pub struct CachedFile<F> {
    inner: F,
    chunks: Option<LruCache<u64, Arc<[u8]>>>,
    pos: u64,
    eof: bool,
    /// Failure hit after part of a read was already returned.
    deferred: Option<FsError>,
}

impl<F: VirtualFile> CachedFile<F> {
    /// Fetch chunk `index` from the wrapped handle.
    fn fetch(&mut self, index: u64) -> Result<Arc<[u8]>, FsError> {
        self.inner.seek(SeekFrom::Start(index * CHUNK_SIZE as u64))?;
        let mut data = vec![0u8; CHUNK_SIZE];
        let mut filled = 0;
        while filled < CHUNK_SIZE {
            let n = self.inner.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);
        Ok(data.into())
    }

    fn chunk(&mut self, index: u64) -> Result<Arc<[u8]>, FsError> {
        if let Some(chunk) = self.chunks.as_mut().and_then(|c| c.get(&index)) {
            tracing::trace!(index, "cache hit");
            return Ok(Arc::clone(chunk));
        }
        tracing::trace!(index, "cache miss");
        let chunk = self.fetch(index)?;
        if let Some(cache) = self.chunks.as_mut() {
            cache.put(index, Arc::clone(&chunk));
        }
        Ok(chunk)
    }

    /// Drop chunks touching `[start, end)` and any partial chunk, which may
    /// have ended at the old end-of-file.
    fn invalidate(&mut self, start: u64, end: u64) {
        let Some(cache) = self.chunks.as_mut() else {
            return;
        };
        let first = start / CHUNK_SIZE as u64;
        let last = end.div_ceil(CHUNK_SIZE as u64);
        let stale: Vec<u64> = cache
            .iter()
            .filter(|(index, chunk)| (first..last).contains(*index) || chunk.len() < CHUNK_SIZE)
            .map(|(index, _)| *index)
            .collect();
        for index in stale {
            cache.pop(&index);
        }
    }

    fn read_passthrough(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        self.inner.seek(SeekFrom::Start(self.pos))?;
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        self.eof = self.inner.eof() || n < buf.len();
        Ok(n)
    }
}

impl<F: VirtualFile> VirtualFile for CachedFile<F> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        if self.chunks.is_none() {
            return self.read_passthrough(buf);
        }
        let mut done = 0;
        while done < buf.len() {
            let index = self.pos / CHUNK_SIZE as u64;
            let offset = (self.pos % CHUNK_SIZE as u64) as usize;
            let chunk = match self.chunk(index) {
                Ok(chunk) => chunk,
                Err(err) if done > 0 => {
                    tracing::debug!(index, error = %err, "returning partial cached read");
                    self.deferred = Some(err);
                    return Ok(done);
                }
                Err(err) => return Err(err),
            };
            if offset >= chunk.len() {
                break;
            }
            let n = (chunk.len() - offset).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&chunk[offset..offset + n]);
            done += n;
            self.pos += n as u64;
            if chunk.len() < CHUNK_SIZE && offset + n == chunk.len() {
                break;
            }
        }
        if done < buf.len() {
            self.eof = true;
        }
        Ok(done)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        self.inner.seek(SeekFrom::Start(self.pos))?;
        let n = self.inner.write(buf)?;
        let end = self.inner.tell();
        self.pos = end;
        self.invalidate(end.saturating_sub(n as u64), end);
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        // The wrapped cursor moves on every fetch, so relative seeks are
        // resolved against the cached position first.
        let pos = match pos {
            SeekFrom::Current(_) => SeekFrom::Start(seek_target(self.pos, 0, pos)?),
            other => other,
        };
        self.pos = self.inner.seek(pos)?;
        self.deferred = None;
        self.eof = false;
        Ok(self.pos)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn truncate(&mut self, size: u64) -> Result<(), FsError> {
        self.inner.truncate(size)?;
        if let Some(cache) = self.chunks.as_mut() {
            cache.clear();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FsError> {
        self.inner.flush()
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn range_status(&mut self, offset: u64, len: u64) -> RangeStatus {
        self.inner.range_status(offset, len)
    }

    fn close(&mut self) -> Result<(), FsError> {
        if let Some(cache) = self.chunks.as_mut() {
            cache.clear();
        }
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileExt, LayerExt, OpenFlags, Vfs};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn cached(vfs: &Vfs, data: &[u8], size: Option<u64>) -> CachedFile<Box<dyn VirtualFile>> {
        vfs.file_from_buffer("/vsimem/cached.bin", data.to_vec()).unwrap();
        vfs.context()
            .open("/vsimem/cached.bin", OpenFlags::READ_WRITE)
            .unwrap()
            .layer(CacheLayer::new(size))
    }

    #[test]
    fn reads_match_source_for_every_budget() {
        let data = pattern(3 * CHUNK_SIZE + 123);
        for size in [Some(0), Some(65536), Some(1), None] {
            let vfs = Vfs::new();
            let mut f = cached(&vfs, &data, size);
            for (offset, len) in [(0, 10), (CHUNK_SIZE - 5, 10), (100, 2 * CHUNK_SIZE), (data.len() - 3, 10)] {
                f.seek(SeekFrom::Start(offset as u64)).unwrap();
                let mut buf = vec![0u8; len];
                let n = f.read(&mut buf).unwrap();
                let expected = &data[offset..(offset + len).min(data.len())];
                assert_eq!(&buf[..n], expected, "size {size:?} offset {offset}");
            }
        }
    }

    #[test]
    fn short_read_at_end_sets_eof() {
        let vfs = Vfs::new();
        let mut f = cached(&vfs, b"abc", None);
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf).unwrap(), 3);
        assert!(f.eof());
        f.seek(SeekFrom::Start(0)).unwrap();
        assert!(!f.eof());
    }

    #[test]
    fn writes_invalidate_cached_chunks() {
        let vfs = Vfs::new();
        let mut f = cached(&vfs, &pattern(100), None);
        let mut buf = [0u8; 10];
        f.read(&mut buf).unwrap();
        f.seek(SeekFrom::Start(2)).unwrap();
        f.write(b"XY").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f.read(&mut buf).unwrap();
        assert_eq!(&buf[2..4], b"XY");
    }

    #[test]
    fn growth_past_cached_tail_is_visible() {
        let vfs = Vfs::new();
        let mut f = cached(&vfs, b"abc", None);
        let mut buf = [0u8; 3];
        f.read(&mut buf).unwrap();
        f.seek(SeekFrom::Start(5)).unwrap();
        f.write(b"z").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(FileExt::read_to_end(&mut f).unwrap(), b"abc\0\0z");
    }

    /// Serves `data` but fails every read at or past `fail_from`.
    struct FailingTail {
        data: Vec<u8>,
        pos: u64,
        fail_from: u64,
    }

    impl VirtualFile for FailingTail {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
            if self.pos >= self.fail_from {
                return Err(FsError::CorruptedData {
                    path: "tail".into(),
                    details: "unreadable".into(),
                });
            }
            let start = self.pos as usize;
            let end = (start + buf.len()).min(self.fail_from as usize).min(self.data.len());
            buf[..end - start].copy_from_slice(&self.data[start..end]);
            self.pos = end as u64;
            Ok(end - start)
        }

        fn write(&mut self, _buf: &[u8]) -> Result<usize, FsError> {
            Err(FsError::NotSupported { operation: "write" })
        }

        fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
            self.pos = seek_target(self.pos, self.data.len() as u64, pos)?;
            Ok(self.pos)
        }

        fn tell(&self) -> u64 {
            self.pos
        }

        fn eof(&self) -> bool {
            self.pos >= self.data.len() as u64
        }
    }

    #[test]
    fn partial_read_is_returned_before_the_failure() {
        let data = pattern(3 * CHUNK_SIZE);
        let inner = FailingTail {
            data: data.clone(),
            pos: 0,
            fail_from: 2 * CHUNK_SIZE as u64,
        };
        let mut f = inner.layer(CacheLayer::new(None));
        let mut buf = vec![0u8; 3 * CHUNK_SIZE];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(n, 2 * CHUNK_SIZE);
        assert_eq!(buf[..n], data[..n]);
        assert!(matches!(
            f.read(&mut buf).unwrap_err(),
            FsError::CorruptedData { .. }
        ));
        assert_eq!(f.tell(), n as u64);
    }

    #[test]
    fn seeks_are_checked_by_the_wrapped_handle() {
        let vfs = Vfs::new();
        vfs.file_from_buffer("/vsimem/inner.bin", b"0123456789".to_vec()).unwrap();
        let mut f = vfs
            .context()
            .open("/vsisubfile/2_4,/vsimem/inner.bin", OpenFlags::READ)
            .unwrap()
            .layer(CacheLayer::new(None));
        assert_eq!(f.seek(SeekFrom::Start(100)).unwrap(), 4);
        assert_eq!(f.seek(SeekFrom::Current(-3)).unwrap(), 1);
        let mut buf = [0u8; 2];
        assert_eq!(f.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"34");
        assert_eq!(f.seek(SeekFrom::Current(0)).unwrap(), 3);
    }

    #[test]
    fn cached_gzip_refuses_seek_past_corruption() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let data: Vec<u8> = (0..300_000).map(|i| (i % 251) as u8 ^ (i / 7) as u8).collect();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&data).unwrap();
        let compressed = enc.finish().unwrap();

        let vfs = Vfs::new();
        vfs.file_from_buffer("/vsimem/broken.gz", compressed[..compressed.len() / 2].to_vec())
            .unwrap();
        let mut f = vfs
            .context()
            .open("/vsigzip//vsimem/broken.gz", OpenFlags::READ)
            .unwrap()
            .layer(CacheLayer::new(Some(65536)));

        let mut buf = vec![0u8; 50_000];
        let mut decoded = 0;
        loop {
            match f.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    assert_eq!(buf[..n], data[decoded..decoded + n]);
                    decoded += n;
                }
            }
        }
        assert!(decoded > 0 && decoded < data.len());
        assert!(f.seek(SeekFrom::Start(decoded as u64 + 1000)).is_err());

        assert_eq!(f.seek(SeekFrom::Start(0)).unwrap(), 0);
        assert_eq!(f.read(&mut buf[..10]).unwrap(), 10);
        assert_eq!(buf[..10], data[..10]);
    }

    #[test]
    fn truncate_clears_cache() {
        let vfs = Vfs::new();
        let mut f = cached(&vfs, b"abcdef", Some(65536));
        let mut buf = [0u8; 6];
        f.read(&mut buf).unwrap();
        f.truncate(2).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(FileExt::read_to_end(&mut f).unwrap(), b"ab");
    }
}
