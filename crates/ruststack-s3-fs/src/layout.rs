//! On-disk layout: where every bucket, object and sidecar file lives.
//!
//! ```text
//! <root>/
//!   <bucket>/
//!     #s3fs.cors.xml                  bucket subresource
//!     #s3fs.uploads/<upload-id>/      multipart staging
//!     report#s3fs.object              content of key "report"
//!     report#s3fs.object.md5          digest sidecar
//!     report#s3fs.metadata.json       metadata document
//!     report/
//!       summary#s3fs.object           content of key "report/summary"
//! ```
//!
//! The last key segment and the resource kind are joined with
//! [`RESOURCE_MARKER`] into a single file name, so an object's files never
//! collide with the directory a deeper key nests under. The codec escapes
//! `#` in every segment, so an encoded segment never contains the marker:
//! file names split unambiguously and a directory name can never equal a
//! resource file name or the staging root.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::codec::KeyCodec;
use crate::error::{StoreError, StoreResult};
use crate::subresource::SubresourceType;

/// Separator between a key segment and its resource kind in a file name.
pub const RESOURCE_MARKER: &str = "#s3fs.";

/// Which backing file of an object or bucket a path refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Primary content file.
    Object,
    /// Hex MD5 sidecar of the content file.
    Digest,
    /// Serialized metadata document.
    Metadata,
    /// Root of the multipart staging area (bucket level only).
    Uploads,
    /// Opaque configuration document.
    Subresource(SubresourceType),
}

impl ResourceKind {
    /// File name suffix that follows [`RESOURCE_MARKER`].
    #[must_use]
    pub fn suffix(&self) -> Cow<'static, str> {
        match self {
            Self::Object => Cow::Borrowed("object"),
            Self::Digest => Cow::Borrowed("object.md5"),
            Self::Metadata => Cow::Borrowed("metadata.json"),
            Self::Uploads => Cow::Borrowed("uploads"),
            Self::Subresource(ty) => Cow::Owned(format!("{}.xml", ty.as_str())),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}

/// Join a key segment and resource kind into a file name.
#[must_use]
pub fn resource_file_name(segment: &str, kind: ResourceKind) -> String {
    format!("{segment}{RESOURCE_MARKER}{}", kind.suffix())
}

/// Split a file name into `(segment, kind suffix)`.
///
/// Returns `None` for names that carry no marker (foreign files).
///
/// # Examples
///
/// ```
/// use ruststack_s3_fs::layout::split_resource_file_name;
///
/// assert_eq!(split_resource_file_name("a#s3fs.object"), Some(("a", "object")));
/// assert_eq!(
///     split_resource_file_name("a#s3fs.object#s3fs.metadata.json"),
///     Some(("a#s3fs.object", "metadata.json"))
/// );
/// assert_eq!(split_resource_file_name("notes.txt"), None);
/// ```
#[must_use]
pub fn split_resource_file_name(name: &str) -> Option<(&str, &str)> {
    name.rsplit_once(RESOURCE_MARKER)
}

/// Resolves bucket/key/resource triples to absolute paths.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
    codec: KeyCodec,
}

impl StoreLayout {
    /// Create a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, codec: KeyCodec) -> Self {
        Self {
            root: root.into(),
            codec,
        }
    }

    /// The store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The key codec in use.
    #[must_use]
    pub fn codec(&self) -> KeyCodec {
        self.codec
    }

    /// Root directory of a bucket.
    pub fn bucket_path(&self, bucket: &str) -> StoreResult<PathBuf> {
        validate_bucket_name(bucket)?;
        Ok(self.root.join(bucket))
    }

    /// Absolute path of the file backing `kind` for `key` in `bucket`.
    ///
    /// The encoded key is split on `/`; every segment but the last becomes a
    /// directory and the last is folded into the file name together with the
    /// resource kind. An empty key addresses bucket-level resources.
    ///
    /// Encoded segments are never empty, `.` or `..`, so every key resolves
    /// to a path strictly inside the bucket directory.
    pub fn resource_path(&self, bucket: &str, key: &str, kind: ResourceKind) -> StoreResult<PathBuf> {
        let mut path = self.bucket_path(bucket)?;
        let encoded = self.codec.encode(key);
        let mut segments: Vec<&str> = encoded.split('/').collect();
        let last = segments.pop().unwrap_or_default();
        path.extend(segments);
        path.push(resource_file_name(last, kind));
        Ok(path)
    }

    /// Directories an object at `key` nests under, deepest first, excluding
    /// the bucket root.
    pub fn key_ancestors(&self, bucket: &str, key: &str) -> StoreResult<Vec<PathBuf>> {
        let object_path = self.resource_path(bucket, key, ResourceKind::Object)?;
        let bucket_path = self.bucket_path(bucket)?;
        Ok(object_path
            .ancestors()
            .skip(1)
            .take_while(|dir| *dir != bucket_path)
            .map(Path::to_path_buf)
            .collect())
    }

    /// Root of a bucket's multipart staging area.
    pub fn uploads_path(&self, bucket: &str) -> StoreResult<PathBuf> {
        self.resource_path(bucket, "", ResourceKind::Uploads)
    }

    /// Staging directory of a single upload.
    pub fn upload_dir(&self, bucket: &str, upload_id: &str) -> StoreResult<PathBuf> {
        if !is_plain_segment(upload_id) {
            return Err(StoreError::InvalidUploadId {
                upload_id: upload_id.to_owned(),
            });
        }
        Ok(self.uploads_path(bucket)?.join(upload_id))
    }
}

/// Reject bucket names that are not a single safe directory name.
pub fn validate_bucket_name(name: &str) -> StoreResult<()> {
    let reason = if !is_plain_segment(name) {
        Some("Bucket name must be a single non-empty path segment")
    } else if name.starts_with(RESOURCE_MARKER) {
        Some("Bucket name must not start with the reserved resource marker")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidBucketName {
            name: name.to_owned(),
            reason: reason.to_owned(),
        }),
        None => Ok(()),
    }
}

/// Reject keys that cannot address an object (the empty key).
pub fn validate_object_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey {
            key: String::new(),
            reason: "Object key must not be empty".to_owned(),
        });
    }
    Ok(())
}

fn is_plain_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains(['/', '\\', '\0'])
}
