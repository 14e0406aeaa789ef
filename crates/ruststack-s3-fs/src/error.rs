//! Store error types.
//!
//! Defines [`StoreError`], the error enum returned by every fallible store
//! operation. Absent buckets, objects and subresources are *not* errors: read
//! operations report them as `None`/`false`. Errors are reserved for invalid
//! names, unexpected I/O failures and damaged on-disk state.
//!
//! # Usage
//!
//! ```
//! use ruststack_s3_fs::error::StoreError;
//!
//! let err = StoreError::NoSuchUpload {
//!     upload_id: "abc".to_owned(),
//! };
//! assert!(err.is_not_found());
//! ```

use std::io;
use std::path::{Path, PathBuf};

/// Filesystem store error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    // -----------------------------------------------------------------------
    // Validation errors
    // -----------------------------------------------------------------------
    /// The bucket name cannot be mapped onto a directory.
    #[error("Invalid bucket name: {name}: {reason}")]
    InvalidBucketName {
        /// The rejected bucket name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The object key cannot be mapped onto a path.
    #[error("Invalid object key: {key}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The upload ID is not a single plain path segment.
    #[error("Invalid upload id: {upload_id}")]
    InvalidUploadId {
        /// The rejected upload ID.
        upload_id: String,
    },

    // -----------------------------------------------------------------------
    // Multipart errors
    // -----------------------------------------------------------------------
    /// The staging area for the upload does not exist.
    #[error("The specified upload does not exist: {upload_id}")]
    NoSuchUpload {
        /// The upload ID that was not found.
        upload_id: String,
    },

    // -----------------------------------------------------------------------
    // On-disk state errors
    // -----------------------------------------------------------------------
    /// An I/O operation on a backing file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file or directory being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A metadata document could not be parsed or serialized.
    #[error("Malformed metadata document {}: {source}", path.display())]
    MalformedMetadata {
        /// Path of the offending document.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    // -----------------------------------------------------------------------
    // Internal / catch-all
    // -----------------------------------------------------------------------
    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether this error means the addressed resource does not exist.
    ///
    /// True for [`StoreError::NoSuchUpload`] and for I/O errors of kind
    /// [`io::ErrorKind::NotFound`] (e.g. a missing part at completion).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NoSuchUpload { .. } => true,
            Self::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Attach the offending path to raw I/O results.
pub(crate) trait IoResultExt<T> {
    /// Map an [`io::Error`] into [`StoreError::Io`] carrying `path`.
    fn at(self, path: &Path) -> StoreResult<T>;

    /// Like [`IoResultExt::at`], but turn `NotFound` into `Ok(None)`.
    fn at_or_missing(self, path: &Path) -> StoreResult<Option<T>>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> StoreResult<T> {
        self.map_err(|e| StoreError::io(path, e))
    }

    fn at_or_missing(self, path: &Path) -> StoreResult<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}
