//! # The `Vfs` facade
//!
//! [`Vfs`] owns the handler registry, the current [`Config`] and the attached
//! [`ErrorContext`]. Every user-facing operation starts here:
//!
//! ```rust
//! use routefs::{StatFlags, Vfs};
//!
//! let vfs = Vfs::new();
//! let mut f = vfs.open("/vsimem/hello.txt", "wb").unwrap();
//! f.write(b"hello").unwrap();
//! f.close().unwrap();
//!
//! let meta = vfs.stat("/vsimem/hello.txt", StatFlags::SIZE).unwrap().unwrap();
//! assert_eq!(meta.size, Some(5));
//! ```
//!
//! Handlers receive a [`Context`] so they can open the paths nested inside
//! their own (`/vsigzip//vsimem/a.gz` opens `/vsimem/a.gz`). Each nested open
//! counts against [`MAX_NESTING_DEPTH`].

use std::sync::Arc;

use parking_lot::RwLock;

use crate::backends::{
    GzipFs, LocalFs, MemBuffer, MemFs, NetworkFs, SparseFs, StdinFs, StdoutFs, SubfileFs, TarFs,
};
use crate::cache::CacheLayer;
use crate::dispatch::{MAX_NESTING_DEPTH, PathResolver, Registry, Resolved};
use crate::{
    Config, DirWalker, ErrorContext, ErrorReporting, File, FileSystem, FsError, LayerExt,
    Metadata, OpenFlags, OptionSpec, StatFlags, VirtualFile,
};

/// Per-call state handed to backend handlers.
///
/// Carries the configuration snapshot taken when the top-level call started
/// and the current nesting depth.
pub struct Context<'a> {
    vfs: &'a Vfs,
    config: Arc<Config>,
    depth: usize,
}

impl<'a> Context<'a> {
    /// Configuration in effect for this call.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of handlers between the caller and this context.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Resolve `path` one nesting level below this context.
    fn nested(&self, path: &str) -> Result<(Resolved, Context<'a>), FsError> {
        let depth = self.depth + 1;
        if depth > MAX_NESTING_DEPTH {
            return Err(FsError::NestingTooDeep {
                path: path.to_string(),
                limit: MAX_NESTING_DEPTH,
            });
        }
        let resolved = self.vfs.registry.resolve(path)?;
        let ctx = Context {
            vfs: self.vfs,
            config: Arc::clone(&self.config),
            depth,
        };
        Ok((resolved, ctx))
    }

    /// Open a nested path. No cache layer is applied.
    ///
    /// # Errors
    ///
    /// - [`FsError::NestingTooDeep`] past [`MAX_NESTING_DEPTH`] levels
    /// - whatever the target handler returns
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn VirtualFile>, FsError> {
        let (resolved, ctx) = self.nested(path)?;
        resolved.handler.open(&ctx, &resolved.remainder, flags)
    }

    /// Stat a nested path.
    pub fn stat(&self, path: &str, flags: StatFlags) -> Result<Metadata, FsError> {
        let (resolved, ctx) = self.nested(path)?;
        resolved.handler.stat(&ctx, &resolved.remainder, flags)
    }

    /// List a nested directory.
    pub fn read_dir(&self, path: &str, max_files: Option<usize>) -> Result<Vec<String>, FsError> {
        let (resolved, ctx) = self.nested(path)?;
        resolved.handler.read_dir(&ctx, &resolved.remainder, max_files)
    }
}

/// The virtual filesystem: prefix registry, configuration and error channel.
///
/// # Thread Safety
///
/// `Vfs` is `Send + Sync`; handlers synchronize internally. The
/// configuration is swapped atomically and snapshotted per call.
pub struct Vfs {
    registry: Registry,
    config: RwLock<Arc<Config>>,
    errors: ErrorContext,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Vfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vfs")
            .field("prefixes", &self.registry.prefixes())
            .field("config", &*self.config.read())
            .finish_non_exhaustive()
    }
}

impl Vfs {
    /// Prefix of the built-in memory backend.
    pub const MEM_PREFIX: &'static str = "/vsimem/";

    /// A `Vfs` with the default configuration and every built-in handler.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// A `Vfs` with the given configuration and every built-in handler.
    pub fn with_config(config: Config) -> Self {
        let mut registry = Registry::new(Arc::new(LocalFs::new()));
        registry.register(Self::MEM_PREFIX, Arc::new(MemFs::new()));
        registry.register("/vsisubfile/", Arc::new(SubfileFs::new()));
        registry.register("/vsitar/", Arc::new(TarFs::new()));
        registry.register("/vsigzip/", Arc::new(GzipFs::new()));
        registry.register("/vsisparse/", Arc::new(SparseFs::new()));
        for scheme in [
            "/vsicurl/",
            "/vsicurl_streaming/",
            "/vsis3/",
            "/vsis3_streaming/",
        ] {
            registry.register(scheme, Arc::new(NetworkFs::new(scheme)));
        }
        registry.register("/vsistdin/", Arc::new(StdinFs::new()));
        registry.register("/vsistdout/", Arc::new(StdoutFs::new()));

        Self {
            registry,
            config: RwLock::new(Arc::new(config)),
            errors: ErrorContext::new(),
        }
    }

    /// Register an additional handler (or replace a built-in one).
    pub fn register(&mut self, prefix: &str, handler: Arc<dyn FileSystem>) {
        self.registry.register(prefix, handler);
    }

    /// Attach a different error channel.
    pub fn with_error_context(mut self, errors: ErrorContext) -> Self {
        self.errors = errors;
        self
    }

    /// The handler registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The attached error channel.
    pub fn errors(&self) -> &ErrorContext {
        &self.errors
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config.read())
    }

    /// Replace the configuration. Affects handles opened afterwards.
    pub fn set_config(&self, config: Config) {
        *self.config.write() = Arc::new(config);
    }

    /// Set (`Some`) or clear (`None`) one configuration option.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidArgument`] for unknown keys or malformed values
    pub fn set_option(&self, key: &str, value: Option<&str>) -> Result<(), FsError> {
        let mut guard = self.config.write();
        let mut config = Config::clone(&guard);
        config.set_option(key, value)?;
        *guard = Arc::new(config);
        Ok(())
    }

    /// A top-level context, as handlers see it.
    pub fn context(&self) -> Context<'_> {
        Context {
            vfs: self,
            config: self.config(),
            depth: 0,
        }
    }

    /// Open `path` with an fopen-style mode. Failures are not recorded in the
    /// error channel.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidArgument`] for a malformed mode
    /// - whatever the resolved handler returns
    pub fn open(&self, path: &str, mode: &str) -> Result<File, FsError> {
        self.open_ex(path, mode, ErrorReporting::Silent)
    }

    /// Open `path`, recording a failure in the error channel when asked to.
    pub fn open_ex(
        &self,
        path: &str,
        mode: &str,
        reporting: ErrorReporting,
    ) -> Result<File, FsError> {
        let result = self.open_handle(path, mode);
        match result {
            Ok(handle) => Ok(File::new(handle, path, self.errors.clone())),
            Err(err) => {
                tracing::debug!(path, mode, error = %err, "open failed");
                if reporting == ErrorReporting::Record {
                    self.errors.record(&err);
                }
                Err(err)
            }
        }
    }

    fn open_handle(&self, path: &str, mode: &str) -> Result<Box<dyn VirtualFile>, FsError> {
        let flags = OpenFlags::parse(mode)?;
        let ctx = self.context();
        let resolved = self.registry.resolve(path)?;
        let handle = resolved.handler.open(&ctx, &resolved.remainder, flags)?;
        tracing::debug!(path, mode, prefix = %resolved.prefix, "opened");
        let config = ctx.config();
        if config.cache_enabled {
            Ok(Box::new(handle.layer(CacheLayer::new(config.cache_size))))
        } else {
            Ok(handle)
        }
    }

    /// Stat `path`.
    ///
    /// Returns `Ok(None)` for an absent path when `flags.exists` is set.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotFound`] for an absent path without `flags.exists`
    pub fn stat(&self, path: &str, flags: StatFlags) -> Result<Option<Metadata>, FsError> {
        let resolved = self.registry.resolve(path)?;
        match resolved
            .handler
            .stat(&self.context(), &resolved.remainder, flags)
        {
            Ok(meta) => Ok(Some(meta)),
            Err(FsError::NotFound { .. }) if flags.exists => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Names directly under `path`.
    pub fn read_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        self.read_dir_ex(path, None)
    }

    /// Names directly under `path`, stopping once more than `max_files` were
    /// collected.
    pub fn read_dir_ex(&self, path: &str, max_files: Option<usize>) -> Result<Vec<String>, FsError> {
        let resolved = self.registry.resolve(path)?;
        resolved
            .handler
            .read_dir(&self.context(), &resolved.remainder, max_files)
    }

    /// Walk `path` recursively; `max_depth = Some(0)` lists immediate
    /// children only.
    pub fn open_dir(&self, path: &str, max_depth: Option<usize>) -> Result<DirWalker<'_>, FsError> {
        DirWalker::new(self, path, max_depth)
    }

    /// Create one directory; the parent must exist.
    pub fn create_dir(&self, path: &str) -> Result<(), FsError> {
        let resolved = self.registry.resolve(path)?;
        resolved
            .handler
            .create_dir(&self.context(), &resolved.remainder)
    }

    /// Remove an empty directory.
    pub fn remove_dir(&self, path: &str) -> Result<(), FsError> {
        let resolved = self.registry.resolve(path)?;
        resolved
            .handler
            .remove_dir(&self.context(), &resolved.remainder)
    }

    /// Remove a directory and everything below it.
    pub fn remove_dir_all(&self, path: &str) -> Result<(), FsError> {
        let base = path.trim_end_matches('/');
        for name in self.read_dir(base)? {
            let child = format!("{base}/{name}");
            match self.stat(&child, StatFlags::NATURE)? {
                Some(meta) if meta.is_dir() => self.remove_dir_all(&child)?,
                _ => self.remove_file(&child)?,
            }
        }
        self.remove_dir(base)
    }

    /// Remove a file.
    pub fn remove_file(&self, path: &str) -> Result<(), FsError> {
        let resolved = self.registry.resolve(path)?;
        resolved
            .handler
            .remove_file(&self.context(), &resolved.remainder)
    }

    /// Rename a file or directory within one handler.
    ///
    /// # Errors
    ///
    /// - [`FsError::NotSupported`] if the paths belong to different handlers
    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let source = self.registry.resolve(from)?;
        let target = self.registry.resolve(to)?;
        if source.prefix != target.prefix {
            return Err(FsError::NotSupported {
                operation: "rename across handlers",
            });
        }
        source
            .handler
            .rename(&self.context(), &source.remainder, &target.remainder)
    }

    /// Synchronize `src` into `dst`; see [`sync`](crate::sync).
    pub fn sync(
        &self,
        src: &str,
        dst: &str,
        progress: Option<&mut dyn FnMut(f64)>,
    ) -> Result<(), FsError> {
        crate::sync::sync(self, src, dst, progress)
    }

    /// Registered prefixes in registration order.
    pub fn prefixes(&self) -> Vec<&str> {
        self.registry.prefixes()
    }

    /// Options understood by the handler under `prefix`.
    pub fn options(&self, prefix: &str) -> &'static [OptionSpec] {
        self.registry
            .handler(prefix)
            .map(|h| h.options())
            .unwrap_or_default()
    }

    /// Whether files under `path` can be sparse.
    pub fn supports_sparse_files(&self, path: &str) -> bool {
        self.registry
            .resolve(path)
            .is_ok_and(|r| r.handler.supports_sparse_files(&r.remainder))
    }

    /// Run `op` on the memory store `path` routes to, with the path relative
    /// to that store.
    fn with_memory<T>(
        &self,
        path: &str,
        op: impl FnOnce(&MemFs, &str) -> Result<T, FsError>,
    ) -> Result<T, FsError> {
        let resolved = self.registry.resolve(path)?;
        match resolved.handler.memory() {
            Some(mem) => op(mem, &resolved.remainder),
            None => Err(FsError::InvalidPath {
                path: path.to_string(),
                reason: format!("not a memory file (prefix {:?})", resolved.prefix),
            }),
        }
    }

    /// Install `data` as the memory file `path` (for example under
    /// `/vsimem/`), taking ownership of the buffer.
    pub fn file_from_buffer(&self, path: &str, data: Vec<u8>) -> Result<(), FsError> {
        self.with_memory(path, |mem, name| mem.insert(name, data))
    }

    /// Borrow the bytes of a memory file without copying.
    ///
    /// Writers on the file block until the returned view is dropped.
    pub fn mem_buffer(&self, path: &str) -> Result<MemBuffer, FsError> {
        self.with_memory(path, MemFs::buffer)
    }

    /// Unlink a memory file and return its bytes.
    pub fn take_mem_buffer(&self, path: &str) -> Result<Vec<u8>, FsError> {
        self.with_memory(path, MemFs::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfs_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Vfs>();
    }

    #[test]
    fn builtin_prefixes_are_registered() {
        let vfs = Vfs::new();
        let prefixes = vfs.prefixes();
        for p in ["/vsimem/", "/vsisubfile/", "/vsitar/", "/vsigzip/", "/vsistdout/"] {
            assert!(prefixes.contains(&p), "{p} missing");
        }
    }

    #[test]
    fn nested_context_counts_depth() {
        let vfs = Vfs::new();
        let ctx = vfs.context();
        let (_, nested) = ctx.nested("/vsimem/x").unwrap();
        assert_eq!(nested.depth(), 1);
    }

    #[test]
    fn nested_context_stops_at_limit() {
        let vfs = Vfs::new();
        let mut ctx = vfs.context();
        for _ in 0..MAX_NESTING_DEPTH {
            ctx = ctx.nested("/vsimem/x").unwrap().1;
        }
        assert!(matches!(
            ctx.open("/vsimem/x", OpenFlags::READ).err().unwrap(),
            FsError::NestingTooDeep { .. }
        ));
    }

    #[test]
    fn stat_existence_flag() {
        let vfs = Vfs::new();
        assert!(vfs.stat("/vsimem/none", StatFlags::EXISTS).unwrap().is_none());
        assert!(matches!(
            vfs.stat("/vsimem/none", StatFlags::SIZE).unwrap_err(),
            FsError::NotFound { .. }
        ));
    }

    #[test]
    fn set_option_swaps_snapshot() {
        let vfs = Vfs::new();
        let before = vfs.config();
        vfs.set_option("num_threads", Some("4")).unwrap();
        assert_eq!(before.num_threads, 1);
        assert_eq!(vfs.config().num_threads, 4);
        vfs.set_option("num_threads", None).unwrap();
        assert_eq!(vfs.config().num_threads, 1);
    }

    #[test]
    fn rename_across_handlers_is_refused() {
        let vfs = Vfs::new();
        vfs.file_from_buffer("/vsimem/a", Vec::new()).unwrap();
        assert!(matches!(
            vfs.rename("/vsimem/a", "/tmp/routefs-never-created").unwrap_err(),
            FsError::NotSupported { .. }
        ));
    }

    #[test]
    fn mem_buffer_helpers_need_mem_paths() {
        let vfs = Vfs::new();
        assert!(matches!(
            vfs.file_from_buffer("/tmp/x", Vec::new()).unwrap_err(),
            FsError::InvalidPath { .. }
        ));
    }

    #[test]
    fn buffers_follow_the_registered_memory_handler() {
        let mut vfs = Vfs::new();
        vfs.file_from_buffer("/vsimem/old", b"old".to_vec()).unwrap();

        vfs.register(Vfs::MEM_PREFIX, Arc::new(MemFs::new()));
        assert!(vfs.mem_buffer("/vsimem/old").is_err());
        vfs.file_from_buffer("/vsimem/new", b"new".to_vec()).unwrap();
        assert!(vfs.stat("/vsimem/new", StatFlags::EXISTS).unwrap().is_some());

        vfs.register("/scratch/", Arc::new(MemFs::new()));
        vfs.file_from_buffer("/scratch/a", b"abc".to_vec()).unwrap();
        assert_eq!(&*vfs.mem_buffer("/scratch/a").unwrap(), b"abc");
        assert_eq!(vfs.take_mem_buffer("/scratch/a").unwrap(), b"abc");
        assert!(vfs.stat("/scratch/a", StatFlags::EXISTS).unwrap().is_none());
    }

    #[test]
    fn remove_dir_all_clears_tree() {
        let vfs = Vfs::new();
        vfs.create_dir("/vsimem/tree").unwrap();
        vfs.create_dir("/vsimem/tree/a").unwrap();
        vfs.file_from_buffer("/vsimem/tree/a/f", b"x".to_vec()).unwrap();
        vfs.file_from_buffer("/vsimem/tree/g", b"y".to_vec()).unwrap();
        vfs.remove_dir_all("/vsimem/tree").unwrap();
        assert!(vfs.stat("/vsimem/tree", StatFlags::EXISTS).unwrap().is_none());
    }
}
