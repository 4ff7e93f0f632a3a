//! Network schemes (`/vsicurl/`, `/vsis3/`, ...).
//!
//! The prefixes are routed so that paths using them fail cleanly; no
//! protocol is spoken and nothing is ever found.

use crate::{Context, FsDir, FsError, FsOpen, FsWrite, Metadata, OpenFlags, StatFlags, VirtualFile};

/// Placeholder handler for a network scheme.
#[derive(Debug, Clone, Copy)]
pub struct NetworkFs {
    scheme: &'static str,
}

impl NetworkFs {
    /// Create the handler for `scheme` (its prefix, e.g. `/vsicurl/`).
    pub fn new(scheme: &'static str) -> Self {
        Self { scheme }
    }

    /// The prefix this handler was registered for.
    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    fn not_found(&self, path: &str) -> FsError {
        tracing::debug!(scheme = self.scheme, path, "network access is not available");
        FsError::NotFound {
            path: format!("{}{path}", self.scheme),
        }
    }
}

impl FsOpen for NetworkFs {
    fn open(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        _flags: OpenFlags,
    ) -> Result<Box<dyn VirtualFile>, FsError> {
        Err(self.not_found(path))
    }

    fn stat(&self, _ctx: &Context<'_>, path: &str, _flags: StatFlags) -> Result<Metadata, FsError> {
        Err(self.not_found(path))
    }
}

impl FsWrite for NetworkFs {}

impl FsDir for NetworkFs {
    fn read_dir(
        &self,
        _ctx: &Context<'_>,
        path: &str,
        _max_files: Option<usize>,
    ) -> Result<Vec<String>, FsError> {
        Err(self.not_found(path))
    }
}
