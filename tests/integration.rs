//! Integration tests exercising the public API end to end.
//!
//! These tests verify that:
//! 1. Handle semantics (write/truncate/tell, read-only reopen, append, huge
//!    offsets) hold on both the memory and local backends
//! 2. The read cache never changes the bytes returned
//! 3. Archives, gzip streams and sync behave as documented
//! 4. A user-defined handler plugs into the registry like the built-in ones
//! 5. The error channel distinguishes silent and recorded opens

use std::io::SeekFrom;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use routefs::*;

// =============================================================================
// Helpers
// =============================================================================

fn scratch() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    (dir, path)
}

fn read_all(vfs: &Vfs, path: &str) -> Vec<u8> {
    let mut f = vfs.open(path, "rb").unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = f.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    f.close().unwrap();
    out
}

/// Small deterministic generator for offsets and lengths.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

// =============================================================================
// Mock Handler
// =============================================================================

/// Serves every path as the same fixed content and counts opens.
struct ConstantFs {
    content: &'static [u8],
    opens: AtomicUsize,
}

struct ConstantFile {
    content: &'static [u8],
    pos: u64,
    eof: bool,
}

impl VirtualFile for ConstantFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let start = (self.pos as usize).min(self.content.len());
        let n = buf.len().min(self.content.len() - start);
        buf[..n].copy_from_slice(&self.content[start..start + n]);
        self.pos += n as u64;
        self.eof = n < buf.len();
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::NotSupported {
            operation: "write",
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        self.pos = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::End(d) => (self.content.len() as i64 + d) as u64,
            SeekFrom::Current(d) => (self.pos as i64 + d) as u64,
        };
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

impl FsOpen for ConstantFs {
    fn open(
        &self,
        _ctx: &Context<'_>,
        _path: &str,
        flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError> {
        if flags.write {
            return Err(FsError::NotSupported {
                operation: "write",
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ConstantFile {
            content: self.content,
            pos: 0,
            eof: false,
        }))
    }

    fn stat(&self, _ctx: &Context<'_>, _path: &str, _flags: StatFlags) -> Result<Metadata, FsError> {
        Ok(Metadata::file(self.content.len() as u64))
    }
}

impl FsWrite for ConstantFs {}

impl FsDir for ConstantFs {
    fn read_dir(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        _max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError> {
        Err(FsError::NotADirectory { path: path.into() })
    }
}

#[test]
fn custom_handler_is_routed_and_nested() {
    let handler = Arc::new(ConstantFs {
        content: b"constant",
        opens: AtomicUsize::new(0),
    });
    let mut vfs = Vfs::new();
    vfs.register("/vsiconst", handler.clone());

    assert_eq!(read_all(&vfs, "/vsiconst/anything"), b"constant");
    assert_eq!(read_all(&vfs, "/vsisubfile/2_3,/vsiconst/x"), b"nst");
    assert_eq!(handler.opens.load(Ordering::SeqCst), 2);
    assert!(vfs.prefixes().contains(&"/vsiconst/"));
}

// =============================================================================
// Tests: Handle Semantics
// =============================================================================

fn check_write_truncate_tell(vfs: &Vfs, path: &str) {
    let mut f = vfs.open(path, "wb+").unwrap();
    assert_eq!(f.write(b"0123456789").unwrap(), 10);
    f.truncate(20).unwrap();
    assert_eq!(f.tell(), 10);
    f.seek(SeekFrom::Start(15)).unwrap();
    f.truncate(5).unwrap();
    assert_eq!(f.tell(), 15);
    assert_eq!(f.seek(SeekFrom::End(0)).unwrap(), 5);
    f.close().unwrap();

    let mut f = vfs.open(path, "rb").unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(f.read(&mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], b"01234");
    assert_eq!(f.write_elements(b"x", 1, 1), 0);
    assert!(f.error());
    assert!(f.truncate(1).is_err());
    drop(f);
}

#[test]
fn write_truncate_tell_on_memory() {
    check_write_truncate_tell(&Vfs::new(), "/vsimem/wtt.bin");
}

#[test]
fn write_truncate_tell_on_local_disk() {
    let (_dir, root) = scratch();
    check_write_truncate_tell(&Vfs::new(), &format!("{root}/wtt.bin"));
}

fn check_append(vfs: &Vfs, existing: &str, fresh: &str) {
    let mut f = vfs.open(existing, "wb").unwrap();
    f.write(b"abc").unwrap();
    f.close().unwrap();

    let mut f = vfs.open(existing, "ab").unwrap();
    f.write(b"def").unwrap();
    f.close().unwrap();
    assert_eq!(read_all(vfs, existing), b"abcdef");

    let mut f = vfs.open(fresh, "ab").unwrap();
    f.write(b"new").unwrap();
    f.close().unwrap();
    assert_eq!(read_all(vfs, fresh), b"new");
}

#[test]
fn append_on_memory_and_local_disk() {
    let vfs = Vfs::new();
    check_append(&vfs, "/vsimem/app1", "/vsimem/app2");
    let (_dir, root) = scratch();
    check_append(&vfs, &format!("{root}/app1"), &format!("{root}/app2"));
}

#[test]
fn huge_offsets_read_nothing_and_refuse_writes() {
    let vfs = Vfs::new();
    vfs.file_from_buffer("/vsimem/huge", b"data".to_vec()).unwrap();
    let mut f = vfs.open("/vsimem/huge", "rb+").unwrap();
    let offset = i64::MAX as u64;
    assert_eq!(f.seek(SeekFrom::Start(offset)).unwrap(), offset);
    let mut buf = [0u8; 4];
    assert_eq!(f.read(&mut buf).unwrap(), 0);
    assert!(f.eof());
    assert!(f.write(b"x").is_err());
    f.close().unwrap();
    assert_eq!(vfs.mem_buffer("/vsimem/huge").unwrap().len(), 4);
}

// =============================================================================
// Tests: Read Cache
// =============================================================================

#[test]
fn cache_returns_identical_bytes() {
    let reference: Vec<u8> = (0..5 * 32768u32).map(|i| (i * 7 % 256) as u8).collect();
    let vfs = Vfs::new();
    vfs.file_from_buffer("/vsimem/cached.bin", reference.clone()).unwrap();

    for size in [Some("0"), Some("65536"), None] {
        vfs.set_option("cache", Some("YES")).unwrap();
        vfs.set_option("cache_size", size).unwrap();
        let mut cached = vfs.open("/vsimem/cached.bin", "rb").unwrap();
        vfs.set_option("cache", None).unwrap();
        let mut plain = vfs.open("/vsimem/cached.bin", "rb").unwrap();

        let mut rng = Lcg(42);
        for _ in 0..200 {
            let offset = rng.next(reference.len() as u64 + 1000);
            let len = rng.next(3 * CHUNK_SIZE as u64) as usize;
            let mut a = vec![0u8; len];
            let mut b = vec![0u8; len];
            cached.seek(SeekFrom::Start(offset)).unwrap();
            plain.seek(SeekFrom::Start(offset)).unwrap();
            let na = cached.read(&mut a).unwrap();
            let nb = plain.read(&mut b).unwrap();
            assert_eq!(na, nb, "size {size:?} offset {offset} len {len}");
            assert_eq!(a[..na], b[..nb]);
        }
        cached.close().unwrap();
        plain.close().unwrap();
    }
}

#[test]
fn cached_and_plain_gzip_agree_on_corruption() {
    use std::io::Write;

    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8 ^ (i / 7) as u8).collect();
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(&data).unwrap();
    let compressed = enc.finish().unwrap();
    let vfs = Vfs::new();
    vfs.file_from_buffer("/vsimem/cut.gz", compressed[..compressed.len() / 2].to_vec())
        .unwrap();

    let mut outcomes = Vec::new();
    for cache in [None, Some("YES")] {
        vfs.set_option("cache", cache).unwrap();
        let mut f = vfs.open("/vsigzip//vsimem/cut.gz", "rb").unwrap();
        let mut buf = vec![0u8; 40_000];
        let mut decoded = 0u64;
        while let Ok(n) = f.read(&mut buf) {
            if n == 0 {
                break;
            }
            decoded += n as u64;
        }
        let past_fault = f.seek(SeekFrom::Start(decoded + 1000)).is_ok();
        outcomes.push((decoded, past_fault));
    }
    vfs.set_option("cache", None).unwrap();

    assert_eq!(outcomes[0], outcomes[1]);
    assert!(!outcomes[0].1);
}

#[test]
fn write_only_subfile_cannot_be_read() {
    let vfs = Vfs::new();
    vfs.file_from_buffer("/vsimem/base", b"abcd".to_vec()).unwrap();

    let mut plain = vfs.open("/vsimem/base", "rb+").unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(plain.read(&mut buf).unwrap(), 4);
    plain.close().unwrap();

    let mut f = vfs.open("/vsisubfile/0_,/vsimem/base", "wb").unwrap();
    assert!(matches!(
        f.read(&mut buf).unwrap_err(),
        FsError::PermissionDenied { .. }
    ));
}

#[test]
fn json_configuration_is_range_checked() {
    let huge = r#"{"num_threads": 4, "deflate_chunk_size": 18446744073709551615}"#;
    assert!(matches!(Config::from_json(huge), Err(FsError::InvalidArgument(_))));
}

// =============================================================================
// Tests: Archives And Compression
// =============================================================================

fn fuzzer_archive() -> Vec<u8> {
    let mut data = b"FUZZER_FRIENDLY_ARCHIVE\n".to_vec();
    data.extend_from_slice(b"***NEWFILE***:test.txt\nabc");
    data.extend_from_slice(b"***NEWFILE***:huge.txt\n");
    for _ in 0..48 {
        data.extend_from_slice(&[b'0'; 80]);
        data.push(b'\n');
    }
    data.extend_from_slice(b"***NEWFILE***:small.txt\na");
    data
}

#[test]
fn fuzzer_archive_members_in_order() {
    let vfs = Vfs::new();
    vfs.file_from_buffer("/vsimem/fuzz.tar", fuzzer_archive()).unwrap();
    let names = vfs.read_dir("/vsitar//vsimem/fuzz.tar").unwrap();
    assert_eq!(names, ["test.txt", "huge.txt", "small.txt"]);

    let sizes: Vec<_> = names
        .iter()
        .map(|n| {
            vfs.stat(&format!("/vsitar//vsimem/fuzz.tar/{n}"), StatFlags::SIZE)
                .unwrap()
                .unwrap()
                .size
                .unwrap()
        })
        .collect();
    assert_eq!(sizes, [3, 3888, 1]);
    assert_eq!(read_all(&vfs, "/vsitar//vsimem/fuzz.tar/test.txt"), b"abc");
}

#[test]
fn fuzzer_archive_edge_cases_parse() {
    let vfs = Vfs::new();
    vfs.file_from_buffer(
        "/vsimem/empty_member.tar",
        b"FUZZER_FRIENDLY_ARCHIVE\n***NEWFILE***:empty.txt\n***NEWFILE***:b.txt\nb".to_vec(),
    )
    .unwrap();
    assert_eq!(
        vfs.read_dir("/vsitar//vsimem/empty_member.tar").unwrap(),
        ["empty.txt", "b.txt"]
    );
    let meta = vfs
        .stat("/vsitar//vsimem/empty_member.tar/empty.txt", StatFlags::SIZE)
        .unwrap()
        .unwrap();
    assert_eq!(meta.size, Some(0));

    vfs.file_from_buffer(
        "/vsimem/trailing.tar",
        b"FUZZER_FRIENDLY_ARCHIVE\n***NEWFILE***:a.txt\naaa***NEWFILE***:".to_vec(),
    )
    .unwrap();
    assert_eq!(vfs.read_dir("/vsitar//vsimem/trailing.tar").unwrap(), ["a.txt"]);
    assert_eq!(read_all(&vfs, "/vsitar//vsimem/trailing.tar/a.txt"), b"aaa");
}

#[test]
fn rewritten_archive_is_reindexed() {
    let vfs = Vfs::new();
    vfs.file_from_buffer("/vsimem/live.tar", fuzzer_archive()).unwrap();
    let before = vfs.read_dir("/vsitar//vsimem/live.tar").unwrap();
    assert!(!before.is_empty());

    vfs.file_from_buffer(
        "/vsimem/live.tar",
        b"FUZZER_FRIENDLY_ARCHIVE\n***NEWFILE***:fresh.txt\nnew".to_vec(),
    )
    .unwrap();
    assert_eq!(vfs.read_dir("/vsitar//vsimem/live.tar").unwrap(), ["fresh.txt"]);
    assert_eq!(read_all(&vfs, "/vsitar//vsimem/live.tar/fresh.txt"), b"new");
}

#[test]
fn multithreaded_gzip_round_trip() {
    let vfs = Vfs::new();
    vfs.set_option("num_threads", Some("ALL_CPUS")).unwrap();
    vfs.set_option("deflate_chunk_size", Some("32K")).unwrap();
    let data = b"hello".repeat(100_000);

    let mut f = vfs.open("/vsigzip//vsimem/mt.gz", "wb").unwrap();
    assert_eq!(f.write_elements(&data, 1, data.len()), data.len());
    f.close().unwrap();

    vfs.set_option("num_threads", None).unwrap();
    assert_eq!(read_all(&vfs, "/vsigzip//vsimem/mt.gz"), data);
}

#[test]
fn gzip_tarball_members_are_readable() {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(4);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "inner.txt", &b"body"[..]).unwrap();
    let tarball = builder.into_inner().unwrap();

    let vfs = Vfs::new();
    let mut f = vfs.open("/vsigzip//vsimem/bundle.tgz", "wb").unwrap();
    f.write(&tarball).unwrap();
    f.close().unwrap();

    assert_eq!(vfs.read_dir("/vsitar//vsimem/bundle.tgz").unwrap(), ["inner.txt"]);
    assert_eq!(read_all(&vfs, "/vsitar//vsimem/bundle.tgz/inner.txt"), b"body");
}

#[test]
fn deeply_nested_archive_paths_fail_fast() {
    let vfs = Vfs::new();
    let path = format!("{}a.tgzb.tgzc.tgzd.tgze.tgzf.tgzg.tgzh.tgz", "/vsitar/".repeat(8));
    let started = std::time::Instant::now();
    assert!(vfs.open(&path, "rb").is_err());
    assert!(vfs.stat(&path, StatFlags::EXISTS).map_or(true, |m| m.is_none()));
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

// =============================================================================
// Tests: Directories And Sync
// =============================================================================

#[test]
fn sync_is_idempotent_and_reproduces_tree() {
    let vfs = Vfs::new();
    vfs.create_dir("/vsimem/src").unwrap();
    vfs.file_from_buffer("/vsimem/src/foo.txt", b"bar".to_vec()).unwrap();
    vfs.create_dir("/vsimem/src/subdir").unwrap();
    vfs.file_from_buffer("/vsimem/src/subdir/bar.txt", b"baz".to_vec()).unwrap();

    vfs.sync("/vsimem/src/", "/vsimem/out", None).unwrap();
    let first = vfs.read_dir("/vsimem/out").unwrap();
    vfs.sync("/vsimem/src/", "/vsimem/out", None).unwrap();
    assert_eq!(vfs.read_dir("/vsimem/out").unwrap(), first);
    assert_eq!(first, ["foo.txt", "subdir"]);
    assert_eq!(read_all(&vfs, "/vsimem/out/subdir/bar.txt"), b"baz");

    vfs.sync("/vsimem/src", "/vsimem/out2", None).unwrap();
    assert_eq!(vfs.read_dir("/vsimem/out2").unwrap(), ["src"]);
    assert_eq!(read_all(&vfs, "/vsimem/out2/src/foo.txt"), b"bar");
}

#[test]
fn sync_memory_tree_to_local_disk() {
    let (_dir, root) = scratch();
    let vfs = Vfs::new();
    vfs.file_from_buffer("/vsimem/tree/a.txt", b"a".to_vec()).unwrap();
    vfs.file_from_buffer("/vsimem/tree/nested/b.txt", b"bb".to_vec()).unwrap();

    let mut reports = Vec::new();
    let mut progress = |pct: f64| reports.push(pct);
    vfs.sync("/vsimem/tree/", &format!("{root}/copy"), Some(&mut progress))
        .unwrap();
    assert_eq!(reports.last(), Some(&1.0));
    assert_eq!(std::fs::read(format!("{root}/copy/nested/b.txt")).unwrap(), b"bb");
}

#[test]
fn renaming_a_directory_moves_descendants() {
    let vfs = Vfs::new();
    vfs.file_from_buffer("/vsimem/old/a.txt", b"a".to_vec()).unwrap();
    vfs.file_from_buffer("/vsimem/old/sub/b.txt", b"b".to_vec()).unwrap();

    vfs.rename("/vsimem/old", "/vsimem/new").unwrap();
    assert_eq!(read_all(&vfs, "/vsimem/new/sub/b.txt"), b"b");
    assert!(vfs.stat("/vsimem/old", StatFlags::EXISTS).unwrap().is_none());
    assert!(vfs.stat("/vsimem/old/a.txt", StatFlags::EXISTS).unwrap().is_none());
    assert!(vfs.rename("/vsimem/new", "/tmp/elsewhere").is_err());
}

#[test]
fn directory_walk_visits_every_entry() {
    let vfs = Vfs::new();
    vfs.file_from_buffer("/vsimem/walk/b.txt", b"b".to_vec()).unwrap();
    vfs.file_from_buffer("/vsimem/walk/a/c.txt", b"c".to_vec()).unwrap();
    let entries: Vec<DirEntry> = vfs
        .open_dir("/vsimem/walk", None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["a", "a/c.txt", "b.txt"]);
    assert!(entries[0].is_dir());
    assert_eq!(entries[2].size, Some(1));
}

// =============================================================================
// Tests: Dispatch And Error Channel
// =============================================================================

#[test]
fn prefixes_without_trailing_separator_do_not_crash() {
    let vfs = Vfs::new();
    for prefix in vfs.prefixes().iter().map(|p| p.trim_end_matches('/').to_string()) {
        if prefix == "/vsistdin" || prefix == "/vsistdout" {
            continue;
        }
        let _ = vfs.open(&prefix, "rb");
        let _ = vfs.stat(&prefix, StatFlags::ALL);
        let _ = vfs.read_dir(&prefix);
    }
}

#[test]
fn error_channel_records_only_when_asked() {
    let vfs = Vfs::new();
    assert!(vfs.open("/vsimem/absent", "rb").is_err());
    assert_eq!(vfs.errors().last_error_no(), 0);
    assert_eq!(vfs.errors().last_error_msg(), "");

    assert!(
        vfs.open_ex("/vsimem/absent", "rb", ErrorReporting::Record)
            .is_err()
    );
    assert_eq!(vfs.errors().last_error_no(), ErrorCode::NotFound as u32);
    assert!(!vfs.errors().last_error_msg().is_empty());

    vfs.errors().reset();
    assert_eq!(vfs.errors().last_error_no(), 0);
}

#[test]
fn configuration_from_json_drives_new_handles() {
    let config = Config::from_json(r#"{"cache_enabled": true, "cache_size": 65536}"#).unwrap();
    let vfs = Vfs::with_config(config);
    assert!(vfs.config().cache_enabled);
    vfs.file_from_buffer("/vsimem/cfg", vec![9u8; 100_000]).unwrap();
    assert_eq!(read_all(&vfs, "/vsimem/cfg").len(), 100_000);
    assert_eq!(
        vfs.options("/vsigzip/")
            .iter()
            .map(|o| o.name)
            .collect::<Vec<_>>(),
        ["num_threads", "deflate_chunk_size"]
    );
}
