//! Process configuration.
//!
//! A [`Config`] is an immutable snapshot taken by [`Vfs`](crate::Vfs) at open
//! time: changing the configuration only affects handles opened afterwards.
//!
//! | Key | Type | Default | Meaning |
//! |-----|------|---------|---------|
//! | `cache` | boolean | `false` | wrap opened handles in the read cache |
//! | `cache_size` | size | unset | cache bound in bytes; `0` disables storage, unset is unbounded |
//! | `num_threads` | integer / `ALL_CPUS` | `1` | gzip compression workers |
//! | `deflate_chunk_size` | size | `1M` | bytes per independently compressed chunk |

use serde::{Deserialize, Serialize};

use crate::FsError;

/// Default size of an independently compressed gzip chunk.
pub const DEFAULT_DEFLATE_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest accepted `deflate_chunk_size`.
pub const MAX_DEFLATE_CHUNK_SIZE: usize = 1024 * 1024 * 1024;

/// Largest accepted `num_threads`.
pub const MAX_NUM_THREADS: usize = 1024;

const ENV_PREFIX: &str = "ROUTEFS_";

/// Configuration snapshot handed to backends and the cache layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wrap opened handles in the chunked read cache.
    pub cache_enabled: bool,
    /// Cache bound in bytes; `Some(0)` bypasses storage, `None` is unbounded.
    pub cache_size: Option<u64>,
    /// Number of gzip compression workers; `1` compresses on the caller's thread.
    pub num_threads: usize,
    /// Size of each independently compressed chunk.
    pub deflate_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_enabled: false,
            cache_size: None,
            num_threads: 1,
            deflate_chunk_size: DEFAULT_DEFLATE_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Set (`Some`) or clear back to its default (`None`) a single option.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidArgument`] for unknown keys or unparsable values
    pub fn set_option(&mut self, key: &str, value: Option<&str>) -> Result<(), FsError> {
        let defaults = Config::default();
        match key.to_ascii_lowercase().as_str() {
            "cache" => {
                self.cache_enabled = value.map(parse_bool).transpose()?.unwrap_or(false);
            }
            "cache_size" => {
                self.cache_size = value.map(parse_size).transpose()?;
            }
            "num_threads" => {
                self.num_threads = match value {
                    Some(v) => check_threads(parse_threads(v)?)?,
                    None => defaults.num_threads,
                };
            }
            "deflate_chunk_size" => {
                self.deflate_chunk_size = match value {
                    Some(v) => check_chunk_size(parse_size(v)?)?,
                    None => defaults.deflate_chunk_size,
                };
            }
            other => {
                return Err(FsError::InvalidArgument(format!(
                    "unknown configuration option: {other}"
                )));
            }
        }
        tracing::debug!(key, ?value, "configuration option updated");
        Ok(())
    }

    /// Builder-style [`set_option`](Self::set_option).
    pub fn with_option(mut self, key: &str, value: &str) -> Result<Self, FsError> {
        self.set_option(key, Some(value))?;
        Ok(self)
    }

    /// Defaults overridden by `ROUTEFS_CACHE`, `ROUTEFS_CACHE_SIZE`,
    /// `ROUTEFS_NUM_THREADS` and `ROUTEFS_DEFLATE_CHUNK_SIZE`.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidArgument`] if a variable holds an unparsable value
    pub fn from_env() -> Result<Self, FsError> {
        let mut config = Config::default();
        for key in ["cache", "cache_size", "num_threads", "deflate_chunk_size"] {
            let var = format!("{ENV_PREFIX}{}", key.to_ascii_uppercase());
            if let Ok(value) = std::env::var(&var) {
                config.set_option(key, Some(&value))?;
            }
        }
        Ok(config)
    }

    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidArgument`] if the document is not valid or a value
    ///   is out of range
    pub fn from_json(json: &str) -> Result<Self, FsError> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| FsError::InvalidArgument(format!("invalid configuration: {e}")))?;
        config.validate()
    }

    /// Apply the range checks [`set_option`](Self::set_option) enforces.
    ///
    /// # Errors
    ///
    /// - [`FsError::InvalidArgument`] for a zero or oversized chunk size, or
    ///   too many threads
    pub fn validate(self) -> Result<Self, FsError> {
        check_chunk_size(self.deflate_chunk_size as u64)?;
        check_threads(self.num_threads)?;
        Ok(self)
    }

    /// Effective number of compression workers (never zero).
    pub(crate) fn compression_workers(&self) -> usize {
        self.num_threads.max(1)
    }
}

fn parse_bool(value: &str) -> Result<bool, FsError> {
    match value.to_ascii_uppercase().as_str() {
        "YES" | "TRUE" | "ON" | "1" => Ok(true),
        "NO" | "FALSE" | "OFF" | "0" => Ok(false),
        _ => Err(FsError::InvalidArgument(format!(
            "expected a boolean, got {value:?}"
        ))),
    }
}

/// Parse a byte size with an optional `K`, `M` or `G` suffix.
fn parse_size(value: &str) -> Result<u64, FsError> {
    let trimmed = value.trim();
    let invalid = || FsError::InvalidArgument(format!("expected a size, got {value:?}"));
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k' | 'K') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('m' | 'M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g' | 'G') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    n.checked_mul(multiplier).ok_or_else(invalid)
}

fn check_chunk_size(size: u64) -> Result<usize, FsError> {
    match usize::try_from(size) {
        Ok(size) if (1..=MAX_DEFLATE_CHUNK_SIZE).contains(&size) => Ok(size),
        _ => Err(FsError::InvalidArgument(format!(
            "deflate_chunk_size must be between 1 and {MAX_DEFLATE_CHUNK_SIZE}, got {size}"
        ))),
    }
}

fn check_threads(count: usize) -> Result<usize, FsError> {
    if count > MAX_NUM_THREADS {
        return Err(FsError::InvalidArgument(format!(
            "num_threads must be at most {MAX_NUM_THREADS}, got {count}"
        )));
    }
    Ok(count)
}

fn parse_threads(value: &str) -> Result<usize, FsError> {
    if value.eq_ignore_ascii_case("ALL_CPUS") {
        return Ok(std::thread::available_parallelism()
            .map_or(1, |n| n.get().min(MAX_NUM_THREADS)));
    }
    value
        .trim()
        .parse::<usize>()
        .map(|n| n.max(1))
        .map_err(|_| FsError::InvalidArgument(format!("expected a thread count, got {value:?}")))
}
