//! Gzip streams over another path (`/vsigzip/<path>`).
//!
//! Reading decompresses on demand: seeking only moves the logical cursor,
//! and a read behind the decoder restarts decompression from the start of
//! the stream. Concatenated members are read as one stream.
//!
//! Writing produces a single gzip member. With more than one compression
//! worker configured (`num_threads`), the input is cut into
//! `deflate_chunk_size` chunks that are deflated independently on worker
//! threads and stitched together with full flushes, so any gzip reader can
//! decompress the result.

use std::collections::BTreeMap;
use std::io::{self, Read, SeekFrom, Write};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compress, Compression, Crc, FlushCompress, Status};

use crate::ext::{COPY_BUFFER_SIZE, IoAdapter};
use crate::{
    Context, FileExt, FsDir, FsError, FsOpen, FsWrite, Metadata, OpenFlags, OptionSpec,
    StatFlags, VirtualFile,
};

/// Fixed member header: no name, no mtime, unknown OS.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03];

const OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name: "num_threads",
        kind: "integer",
        description: "Compression worker threads, or ALL_CPUS",
    },
    OptionSpec {
        name: "deflate_chunk_size",
        kind: "size",
        description: "Bytes compressed independently per worker job",
    },
];

/// The gzip handler.
#[derive(Debug, Default)]
pub struct GzipFs;

impl GzipFs {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }
}

impl FsOpen for GzipFs {
    fn open(
        &self,
        ctx: &Context<'_>,
        path: &str,
        flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError> {
        if flags.append || (flags.read && flags.write) {
            return Err(FsError::NotSupported {
                operation: "gzip update or append",
            });
        }
        if !flags.write {
            let inner = ctx.open(path, OpenFlags::READ)?;
            return Ok(Box::new(GzipReader::new(inner, path)));
        }

        let inner = ctx.open(path, OpenFlags::WRITE)?;
        let config = ctx.config();
        let workers = config.compression_workers();
        if workers > 1 {
            tracing::debug!(path, workers, chunk = config.deflate_chunk_size, "parallel gzip writer");
            Ok(Box::new(ParallelGzipWriter::new(
                inner,
                path,
                workers,
                config.deflate_chunk_size,
            )?))
        } else {
            Ok(Box::new(GzipWriter::new(inner, path)))
        }
    }

    fn stat(&self, ctx: &Context<'_>, path: &str, _flags: StatFlags) -> Result<Metadata, FsError> {
        let inner_meta = ctx.stat(path, StatFlags::ALL)?;
        if inner_meta.is_dir() {
            return Ok(inner_meta);
        }
        let mut reader = GzipReader::new(ctx.open(path, OpenFlags::READ)?, path);
        let size = reader.total_size()?;
        reader.close()?;
        Ok(Metadata::file(size).with_modified(inner_meta.modified))
    }

    fn options(&self) -> &'static [OptionSpec] {
        OPTIONS
    }
}

impl FsWrite for GzipFs {}

impl FsDir for GzipFs {
    fn read_dir(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        _max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError> {
        Err(FsError::NotFound { path: path.into() })
    }
}

type Decoder = MultiGzDecoder<IoAdapter<Box<dyn VirtualFile>>>;

/// Decompressing reader with lazy seeks.
struct GzipReader {
    path: String,
    decoder: Option<Decoder>,
    /// Uncompressed bytes produced by the current decoder.
    decoded: u64,
    /// Logical cursor.
    pos: u64,
    size: Option<u64>,
    corrupted_at: Option<u64>,
    eof: bool,
}

enum Step {
    Data(usize),
    End,
    Fault,
}

impl GzipReader {
    fn new(inner: Box<dyn VirtualFile>, path: &str) -> Self {
        Self {
            path: path.to_string(),
            decoder: Some(MultiGzDecoder::new(IoAdapter::new(inner))),
            decoded: 0,
            pos: 0,
            size: None,
            corrupted_at: None,
            eof: false,
        }
    }

    fn corrupted(&self, details: impl Into<String>) -> FsError {
        FsError::CorruptedData {
            path: self.path.clone(),
            details: details.into(),
        }
    }

    fn restart(&mut self) -> Result<(), FsError> {
        let decoder = self
            .decoder
            .take()
            .ok_or_else(|| self.corrupted("decoder unavailable"))?;
        let mut inner = decoder.into_inner().into_inner();
        inner.seek(SeekFrom::Start(0))?;
        self.decoder = Some(MultiGzDecoder::new(IoAdapter::new(inner)));
        self.decoded = 0;
        tracing::trace!(path = %self.path, "restarted gzip decoder");
        Ok(())
    }

    /// Decode one batch into `buf`, recording the end or the first fault.
    fn step(&mut self, buf: &mut [u8]) -> Result<Step, FsError> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| FsError::CorruptedData {
                path: self.path.clone(),
                details: "decoder unavailable".into(),
            })?;
        loop {
            match decoder.read(buf) {
                Ok(0) => {
                    self.size = Some(self.decoded);
                    return Ok(Step::End);
                }
                Ok(n) => {
                    self.decoded += n as u64;
                    return Ok(Step::Data(n));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    if self.corrupted_at.is_none() {
                        tracing::warn!(path = %self.path, offset = self.decoded, error = %e, "corrupted gzip stream");
                    }
                    self.corrupted_at = Some(self.decoded);
                    return Ok(Step::Fault);
                }
            }
        }
    }

    /// Bring the decoder to the logical cursor. Returns false if the stream
    /// ends (or faults) first.
    fn reach_cursor(&mut self) -> Result<bool, FsError> {
        if self.pos < self.decoded {
            self.restart()?;
        }
        if self.decoded == self.pos {
            return Ok(true);
        }
        let mut scratch = vec![0u8; COPY_BUFFER_SIZE];
        while self.decoded < self.pos {
            let gap = usize::try_from(self.pos - self.decoded).unwrap_or(usize::MAX);
            let want = gap.min(scratch.len());
            match self.step(&mut scratch[..want])? {
                Step::Data(_) => {}
                Step::End | Step::Fault => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Uncompressed size, decoding the whole stream if not yet known.
    fn total_size(&mut self) -> Result<u64, FsError> {
        if let Some(size) = self.size {
            return Ok(size);
        }
        if let Some(at) = self.corrupted_at {
            return Err(self.corrupted(format!("stream corrupted at offset {at}")));
        }
        let mut scratch = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            match self.step(&mut scratch)? {
                Step::Data(_) => {}
                Step::End => return Ok(self.decoded),
                Step::Fault => {
                    return Err(self.corrupted(format!(
                        "stream corrupted at offset {}",
                        self.decoded
                    )));
                }
            }
        }
    }
}

impl VirtualFile for GzipReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let past_fault = self.corrupted_at.is_some_and(|at| self.pos >= at);
        let past_end = self.size.is_some_and(|size| self.pos >= size);
        if past_fault || past_end || !self.reach_cursor()? {
            self.eof = true;
            return Ok(0);
        }

        let mut total = 0;
        while total < buf.len() {
            match self.step(&mut buf[total..])? {
                Step::Data(n) => total += n,
                Step::End => {
                    self.eof = true;
                    break;
                }
                Step::Fault => {
                    self.eof = true;
                    if total == 0 {
                        return Err(self.corrupted(format!(
                            "stream corrupted at offset {}",
                            self.decoded
                        )));
                    }
                    break;
                }
            }
        }
        self.pos += total as u64;
        Ok(total)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::PermissionDenied {
            path: self.path.clone(),
            operation: "write",
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        let size = match pos {
            SeekFrom::End(_) => self.total_size()?,
            _ => 0,
        };
        let target = super::seek_target(self.pos, size, pos)?;
        if let Some(at) = self.corrupted_at.filter(|&at| target > 0 && target >= at) {
            return Err(self.corrupted(format!("cannot seek past offset {at}")));
        }
        self.pos = target;
        self.eof = false;
        Ok(self.pos)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn close(&mut self) -> Result<(), FsError> {
        match self.decoder.take() {
            Some(decoder) => decoder.into_inner().into_inner().close(),
            None => Ok(()),
        }
    }
}

/// Rejects any seek that would move the cursor of a sequential writer.
fn stationary_seek(written: u64, pos: SeekFrom) -> Result<u64, FsError> {
    let target = super::seek_target(written, written, pos)?;
    if target == written {
        Ok(written)
    } else {
        Err(FsError::NotSupported {
            operation: "seek in gzip writer",
        })
    }
}

/// Single-threaded compressing writer.
struct GzipWriter {
    path: String,
    encoder: Option<GzEncoder<IoAdapter<Box<dyn VirtualFile>>>>,
    written: u64,
}

impl GzipWriter {
    fn new(inner: Box<dyn VirtualFile>, path: &str) -> Self {
        Self {
            path: path.to_string(),
            encoder: Some(GzEncoder::new(IoAdapter::new(inner), Compression::default())),
            written: 0,
        }
    }
}

impl VirtualFile for GzipWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, FsError> {
        Err(FsError::PermissionDenied {
            path: self.path.clone(),
            operation: "read",
        })
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        let encoder = self.encoder.as_mut().ok_or(FsError::NotSupported {
            operation: "write after close",
        })?;
        encoder
            .write_all(buf)
            .map_err(|e| FsError::io("write", &self.path, e))?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        stationary_seek(self.written, pos)
    }

    fn tell(&self) -> u64 {
        self.written
    }

    fn eof(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<(), FsError> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        let mut inner = encoder
            .finish()
            .map_err(|e| FsError::io("close", &self.path, e))?
            .into_inner();
        inner.close()
    }
}

struct Job {
    index: usize,
    data: Vec<u8>,
    last: bool,
}

type JobResult = (usize, Result<Vec<u8>, flate2::CompressError>);

/// Deflate `data` as a raw stream ending on a byte boundary: a full flush for
/// intermediate chunks, a final block for the last one.
fn deflate_chunk(
    data: &[u8],
    level: Compression,
    last: bool,
) -> Result<Vec<u8>, flate2::CompressError> {
    let mut compress = Compress::new(level, false);
    let flush = if last {
        FlushCompress::Finish
    } else {
        FlushCompress::Full
    };
    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(64));
        }
        let consumed = usize::try_from(compress.total_in()).unwrap_or(data.len());
        let status = compress.compress_vec(&data[consumed.min(data.len())..], &mut out, flush)?;
        let drained = compress.total_in() as usize == data.len() && out.len() < out.capacity();
        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError if !last && drained => return Ok(out),
            Status::Ok | Status::BufError => {}
        }
    }
}

fn compress_worker(level: Compression, jobs: Receiver<Job>, results: Sender<JobResult>) {
    for job in jobs.iter() {
        let out = deflate_chunk(&job.data, level, job.last);
        if results.send((job.index, out)).is_err() {
            break;
        }
    }
}

/// Compressing writer that deflates chunks on a pool of worker threads.
struct ParallelGzipWriter {
    path: String,
    inner: Box<dyn VirtualFile>,
    chunk_size: usize,
    buffer: Vec<u8>,
    crc: Crc,
    written: u64,
    submitted: usize,
    flushed: usize,
    max_in_flight: usize,
    pending: BTreeMap<usize, Vec<u8>>,
    jobs: Option<Sender<Job>>,
    results: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    closed: bool,
}

impl ParallelGzipWriter {
    fn new(
        mut inner: Box<dyn VirtualFile>,
        path: &str,
        workers: usize,
        chunk_size: usize,
    ) -> Result<Self, FsError> {
        inner.write_all(&GZIP_HEADER)?;
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<JobResult>();
        let level = Compression::default();
        let handles = (0..workers)
            .map(|i| {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                std::thread::Builder::new()
                    .name(format!("gzip-worker-{i}"))
                    .spawn(move || compress_worker(level, jobs, results))
                    .map_err(|e| FsError::io("spawn", path, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            path: path.to_string(),
            inner,
            chunk_size: chunk_size.max(1),
            buffer: Vec::with_capacity(chunk_size.min(COPY_BUFFER_SIZE)),
            crc: Crc::new(),
            written: 0,
            submitted: 0,
            flushed: 0,
            max_in_flight: workers * 2,
            pending: BTreeMap::new(),
            jobs: Some(job_tx),
            results: result_rx,
            workers: handles,
            closed: false,
        })
    }

    /// Wait for one finished chunk and write out every chunk now in order.
    fn collect_one(&mut self) -> Result<(), FsError> {
        let (index, out) = self.results.recv().map_err(|_| FsError::Io {
            operation: "compress",
            path: self.path.clone(),
            source: io::Error::other("compression workers exited"),
        })?;
        let out = out.map_err(|e| FsError::io("compress", &self.path, io::Error::other(e)))?;
        self.pending.insert(index, out);
        while let Some(chunk) = self.pending.remove(&self.flushed) {
            self.inner.write_all(&chunk)?;
            self.flushed += 1;
        }
        Ok(())
    }

    fn submit(&mut self, data: Vec<u8>, last: bool) -> Result<(), FsError> {
        while self.submitted - self.flushed >= self.max_in_flight {
            self.collect_one()?;
        }
        let job = Job {
            index: self.submitted,
            data,
            last,
        };
        let jobs = self.jobs.as_ref().ok_or(FsError::NotSupported {
            operation: "write after close",
        })?;
        jobs.send(job).map_err(|_| FsError::Io {
            operation: "compress",
            path: self.path.clone(),
            source: io::Error::other("compression workers exited"),
        })?;
        self.submitted += 1;
        Ok(())
    }

    fn shutdown_workers(&mut self) -> Result<(), FsError> {
        self.jobs = None;
        let mut panicked = false;
        for worker in self.workers.drain(..) {
            panicked |= worker.join().is_err();
        }
        if panicked {
            return Err(FsError::Io {
                operation: "compress",
                path: self.path.clone(),
                source: io::Error::other("compression worker panicked"),
            });
        }
        Ok(())
    }
}

impl VirtualFile for ParallelGzipWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, FsError> {
        Err(FsError::PermissionDenied {
            path: self.path.clone(),
            operation: "read",
        })
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if self.closed {
            return Err(FsError::NotSupported {
                operation: "write after close",
            });
        }
        self.crc.update(buf);
        self.written += buf.len() as u64;
        self.buffer.extend_from_slice(buf);
        while self.buffer.len() >= self.chunk_size {
            let rest = self.buffer.split_off(self.chunk_size);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            self.submit(chunk, false)?;
        }
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        stationary_seek(self.written, pos)
    }

    fn tell(&self) -> u64 {
        self.written
    }

    fn eof(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<(), FsError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let last = std::mem::take(&mut self.buffer);
        self.submit(last, true)?;
        while self.flushed < self.submitted {
            self.collect_one()?;
        }
        self.shutdown_workers()?;

        let mut trailer = [0u8; 8];
        trailer[..4].copy_from_slice(&self.crc.sum().to_le_bytes());
        trailer[4..].copy_from_slice(&self.crc.amount().to_le_bytes());
        self.inner.write_all(&trailer)?;
        tracing::debug!(path = %self.path, chunks = self.submitted, bytes = self.written, "gzip stream finished");
        self.inner.close()
    }
}

impl Drop for ParallelGzipWriter {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_workers() {
            tracing::warn!(path = %self.path, error = %err, "gzip workers did not exit cleanly");
        }
    }
}
