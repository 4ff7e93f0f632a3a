//! # Path Dispatcher
//!
//! Maps a path's prefix to the registered handler.
//!
//! ## Responsibility
//! - Longest-prefix matching over registered prefixes
//! - Recognizing a prefix written without its trailing separator
//! - Falling back to the local handler for unregistered paths
//! - Bounding prefix chains (`/vsitar//vsigzip//vsimem/...`)
//!
//! ## Usage
//!
//! ```rust
//! use routefs::{PathResolver, Vfs};
//!
//! let vfs = Vfs::new();
//! let resolved = vfs.registry().resolve("/vsigzip//vsimem/a.gz").unwrap();
//! assert_eq!(resolved.prefix, "/vsigzip/");
//! assert_eq!(resolved.remainder, "/vsimem/a.gz");
//! ```

use std::sync::Arc;

use crate::{FileSystem, FsError};

/// Maximum number of chained prefixes a path may carry.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Strategy for mapping a path to the handler that serves it.
///
/// # Object Safety
///
/// This trait is object-safe and can be used as `dyn PathResolver`.
pub trait PathResolver: Send + Sync {
    /// Resolve `path` to its handler.
    ///
    /// # Errors
    ///
    /// - [`FsError::NestingTooDeep`] if the path chains more than
    ///   [`MAX_NESTING_DEPTH`] prefixes
    fn resolve(&self, path: &str) -> Result<Resolved, FsError>;
}

/// Outcome of resolving a path.
#[derive(Clone)]
pub struct Resolved {
    /// The handler responsible for the path.
    pub handler: Arc<dyn FileSystem>,
    /// The matched prefix; empty for the local fallback.
    pub prefix: String,
    /// The path with the prefix removed (the whole path for the local fallback).
    pub remainder: String,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("prefix", &self.prefix)
            .field("remainder", &self.remainder)
            .finish_non_exhaustive()
    }
}

/// Registry of handlers keyed by prefix.
pub struct Registry {
    entries: Vec<(String, Arc<dyn FileSystem>)>,
    fallback: Arc<dyn FileSystem>,
}

impl Registry {
    /// Create a registry whose unregistered paths go to `fallback`.
    pub fn new(fallback: Arc<dyn FileSystem>) -> Self {
        Self {
            entries: Vec::new(),
            fallback,
        }
    }

    /// Register `handler` under `prefix`, replacing any previous handler.
    ///
    /// A trailing `/` is added when missing.
    pub fn register(&mut self, prefix: &str, handler: Arc<dyn FileSystem>) {
        let prefix = if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        match self.entries.iter_mut().find(|(p, _)| *p == prefix) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((prefix, handler)),
        }
    }

    /// Registered prefixes in registration order.
    pub fn prefixes(&self) -> Vec<&str> {
        self.entries.iter().map(|(p, _)| p.as_str()).collect()
    }

    /// The handler registered under `prefix` (with or without trailing `/`).
    pub fn handler(&self, prefix: &str) -> Option<Arc<dyn FileSystem>> {
        let trimmed = prefix.trim_end_matches('/');
        self.entries
            .iter()
            .find(|(p, _)| p.trim_end_matches('/') == trimmed)
            .map(|(_, h)| Arc::clone(h))
    }

    /// Longest registered prefix of `path`, with the remainder.
    fn match_prefix<'p>(&self, path: &'p str) -> Option<(usize, &'p str)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, (prefix, _))| {
                if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                    Some((i, prefix.len(), rest))
                } else if path == prefix.trim_end_matches('/') {
                    Some((i, prefix.len(), ""))
                } else {
                    None
                }
            })
            .max_by_key(|(_, len, _)| *len)
            .map(|(i, _, rest)| (i, rest))
    }
}

impl PathResolver for Registry {
    fn resolve(&self, path: &str) -> Result<Resolved, FsError> {
        let Some((index, remainder)) = self.match_prefix(path) else {
            return Ok(Resolved {
                handler: Arc::clone(&self.fallback),
                prefix: String::new(),
                remainder: path.to_string(),
            });
        };

        let mut depth = 0;
        let mut rest = remainder;
        while let Some((_, inner)) = self.match_prefix(rest) {
            depth += 1;
            if depth > MAX_NESTING_DEPTH {
                return Err(FsError::NestingTooDeep {
                    path: path.to_string(),
                    limit: MAX_NESTING_DEPTH,
                });
            }
            rest = inner;
        }

        let (prefix, handler) = &self.entries[index];
        tracing::trace!(path, prefix = %prefix, chained = depth, "resolved path");
        Ok(Resolved {
            handler: Arc::clone(handler),
            prefix: prefix.clone(),
            remainder: remainder.to_string(),
        })
    }
}
