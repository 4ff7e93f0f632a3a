//! Error types for the routefs virtual filesystem.

/// Filesystem error type with contextual variants.
///
/// Every variant carries the path or operation that failed where that is
/// known. Uses `#[non_exhaustive]` for forward compatibility.
///
/// # Examples
///
/// ```rust
/// use routefs::{ErrorCode, FsError};
///
/// let err = FsError::NotFound { path: "/vsimem/missing".into() };
/// assert_eq!(err.to_string(), "not found: /vsimem/missing");
/// assert_eq!(err.code(), ErrorCode::NotFound);
/// ```
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    // Path/File Errors
    /// Path does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// The path that was not found.
        path: String,
    },

    /// Path already exists when it shouldn't.
    #[error("{operation}: already exists: {path}")]
    AlreadyExists {
        /// The path that already exists.
        path: String,
        /// The operation that failed.
        operation: &'static str,
    },

    /// Expected a file but found something else.
    #[error("not a file: {path}")]
    NotAFile {
        /// The path that is not a file.
        path: String,
    },

    /// Expected a directory but found something else.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// The path that is not a directory.
        path: String,
    },

    /// Directory is not empty when it should be.
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty {
        /// The path to the non-empty directory.
        path: String,
    },

    // Permission/Access Errors
    /// The handle's access mode does not allow the operation
    /// (write on a read-only handle, read on a write-only one).
    #[error("{operation}: permission denied: {path}")]
    PermissionDenied {
        /// The path where permission was denied.
        path: String,
        /// The operation that was denied.
        operation: &'static str,
    },

    // Resource Limit Errors
    /// The backend cannot grow the file to the requested size.
    #[error("capacity exceeded: {path} (requested {requested}, limit {limit})")]
    CapacityExceeded {
        /// The path to the file.
        path: String,
        /// The size that was requested.
        requested: u64,
        /// The largest size the backend can hold.
        limit: u64,
    },

    // Data Errors
    /// Corrupted archive or compressed stream.
    #[error("corrupted data: {path} ({details})")]
    CorruptedData {
        /// The path with corrupted data.
        path: String,
        /// Details about the corruption.
        details: String,
    },

    // Backend/Operation Errors
    /// Operation is not supported by this backend or handle.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: &'static str,
    },

    /// Malformed path composition.
    #[error("invalid path: {path} ({reason})")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Invalid argument (bad open mode, negative seek, bad option value).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Too many nested prefixes while resolving a path.
    #[error("nesting too deep: {path} (limit {limit})")]
    NestingTooDeep {
        /// The path being resolved.
        path: String,
        /// The maximum nesting depth.
        limit: usize,
    },

    /// I/O error with context.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The path involved in the operation.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Numeric error classes reported through the error channel.
///
/// `None` (0) means no error is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// No error.
    None = 0,
    /// Open or stat on an absent path.
    NotFound = 1,
    /// Operation not allowed by the handle's mode.
    PermissionOrMode = 2,
    /// Write or extension beyond the backend's limit.
    CapacityExceeded = 3,
    /// Archive or compressed stream parse failure.
    CorruptStream = 4,
    /// Operation unsupported by the backend.
    Unsupported = 5,
    /// Malformed path, argument or nesting depth.
    InvalidArgument = 6,
    /// Any other I/O failure.
    Io = 7,
}

impl FsError {
    /// The error class of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            FsError::NotFound { .. } => ErrorCode::NotFound,
            FsError::PermissionDenied { .. } => ErrorCode::PermissionOrMode,
            FsError::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
            FsError::CorruptedData { .. } => ErrorCode::CorruptStream,
            FsError::NotSupported { .. } => ErrorCode::Unsupported,
            FsError::InvalidPath { .. }
            | FsError::InvalidArgument(_)
            | FsError::NestingTooDeep { .. } => ErrorCode::InvalidArgument,
            FsError::AlreadyExists { .. }
            | FsError::NotAFile { .. }
            | FsError::NotADirectory { .. }
            | FsError::DirectoryNotEmpty { .. }
            | FsError::Io { .. } => ErrorCode::Io,
        }
    }

    /// Attach a path and operation to an I/O error, keeping the mapping of
    /// common kinds to the dedicated variants.
    pub(crate) fn io(operation: &'static str, path: &str, error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound { path: path.into() },
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied {
                path: path.into(),
                operation,
            },
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists {
                path: path.into(),
                operation,
            },
            _ => FsError::Io {
                operation,
                path: path.into(),
                source: error,
            },
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(error: std::io::Error) -> Self {
        FsError::io("io", "", error)
    }
}

impl From<FsError> for std::io::Error {
    fn from(error: FsError) -> Self {
        use std::io::ErrorKind;
        let kind = match &error {
            FsError::Io { source, .. } => source.kind(),
            FsError::NotFound { .. } => ErrorKind::NotFound,
            FsError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            FsError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            FsError::CorruptedData { .. } => ErrorKind::InvalidData,
            FsError::NotSupported { .. } => ErrorKind::Unsupported,
            FsError::InvalidPath { .. }
            | FsError::InvalidArgument(_)
            | FsError::NestingTooDeep { .. } => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, error)
    }
}
