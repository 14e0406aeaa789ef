//! Object metadata documents and digest sidecars.
//!
//! Every object carries two small files next to its content file:
//!
//! - `<segment>#s3fs.object.md5` holds the lower-case hex MD5 of the content;
//! - `<segment>#s3fs.metadata.json` holds the persisted request headers, the
//!   user metadata, the content size and the write timestamp.
//!
//! An object whose digest or document is missing is reported as absent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::content::{remove_file_if_exists, write_file};
use crate::error::{IoResultExt, StoreError, StoreResult};
use crate::layout::{ResourceKind, StoreLayout};

/// Header-name to value map, keyed by lower-case header name.
pub type MetadataMap = BTreeMap<String, String>;

/// Prefix that marks a user metadata field.
pub const USER_METADATA_PREFIX: &str = "x-amz-meta-";

/// Standard object headers persisted with an object.
pub const STORED_HEADERS: &[&str] = &[
    "cache-control",
    "content-disposition",
    "content-encoding",
    "content-language",
    "content-type",
    "expires",
];

/// Content type reported when none was stored.
pub const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

/// Keep only the fields that are persisted: [`STORED_HEADERS`] and anything
/// starting with [`USER_METADATA_PREFIX`]. Names are lower-cased.
///
/// # Examples
///
/// ```
/// use ruststack_s3_fs::metadata::{MetadataMap, persisted_fields};
///
/// let mut fields = MetadataMap::new();
/// fields.insert("Content-Type".into(), "text/plain".into());
/// fields.insert("x-amz-meta-owner".into(), "ops".into());
/// fields.insert("authorization".into(), "secret".into());
///
/// let kept = persisted_fields(&fields);
/// assert_eq!(kept.len(), 2);
/// assert_eq!(kept["content-type"], "text/plain");
/// ```
#[must_use]
pub fn persisted_fields(fields: &MetadataMap) -> MetadataMap {
    fields
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .filter(|(name, _)| {
            STORED_HEADERS.contains(&name.as_str()) || name.starts_with(USER_METADATA_PREFIX)
        })
        .map(|(name, value)| (name, value.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// ObjectMetadata
// ---------------------------------------------------------------------------

/// Externally visible metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// MIME type of the content.
    pub content_type: String,
    /// Lower-case hex MD5 of the content (unquoted).
    pub etag: String,
    /// When the object was last written.
    pub last_modified: DateTime<Utc>,
    /// Content size in bytes.
    pub content_length: u64,
    /// Persisted standard headers other than `content-type`.
    pub headers: MetadataMap,
    /// User metadata, keyed by full header name (`x-amz-meta-*`).
    pub user_metadata: MetadataMap,
}

impl ObjectMetadata {
    /// The ETag in its HTTP form (wrapped in double quotes).
    #[must_use]
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }

    /// All persisted fields, `content-type` included, as one map.
    #[must_use]
    pub fn to_fields(&self) -> MetadataMap {
        let mut fields = self.headers.clone();
        fields.extend(self.user_metadata.clone());
        fields.insert("content-type".to_owned(), self.content_type.clone());
        fields
    }

    fn from_document(doc: MetadataDocument, etag: String) -> Self {
        let mut headers = MetadataMap::new();
        let mut user_metadata = MetadataMap::new();
        let mut content_type = None;
        for (name, value) in doc.fields {
            if name == "content-type" {
                content_type = Some(value);
            } else if name.starts_with(USER_METADATA_PREFIX) {
                user_metadata.insert(name, value);
            } else {
                headers.insert(name, value);
            }
        }
        Self {
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned()),
            etag,
            last_modified: doc.mtime,
            content_length: doc.size,
            headers,
            user_metadata,
        }
    }
}

/// On-disk shape of `<segment>#s3fs.metadata.json`.
#[derive(Debug, Serialize, Deserialize)]
struct MetadataDocument {
    #[serde(flatten)]
    fields: MetadataMap,
    size: u64,
    mtime: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// MetadataStore
// ---------------------------------------------------------------------------

/// Reads and writes the digest sidecar and metadata document of objects.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    layout: StoreLayout,
}

impl MetadataStore {
    /// Create a metadata store over `layout`.
    #[must_use]
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Persist metadata for `bucket/key`.
    ///
    /// Writes the digest sidecar when `digest` is given, then a fresh
    /// document stamped with the current time. Fields outside the persisted
    /// set are dropped. Returns the metadata exactly as a later
    /// [`MetadataStore::get`] would report it.
    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        fields: &MetadataMap,
        size: u64,
        digest: Option<&str>,
    ) -> StoreResult<ObjectMetadata> {
        let digest_path = self.layout.resource_path(bucket, key, ResourceKind::Digest)?;
        let doc_path = self.layout.resource_path(bucket, key, ResourceKind::Metadata)?;

        if let Some(digest) = digest {
            write_file(&digest_path, digest.as_bytes()).await?;
        }

        let doc = MetadataDocument {
            fields: persisted_fields(fields),
            size,
            mtime: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&doc).map_err(|source| StoreError::MalformedMetadata {
            path: doc_path.clone(),
            source,
        })?;
        write_file(&doc_path, &json).await?;
        trace!(bucket, key, size, "wrote metadata document");

        let etag = match digest {
            Some(d) => d.to_owned(),
            None => self.read_digest(bucket, key).await?.unwrap_or_default(),
        };
        Ok(ObjectMetadata::from_document(doc, etag))
    }

    /// Read the metadata of `bucket/key`, or `None` if either file is absent.
    pub async fn get(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMetadata>> {
        let doc_path = self.layout.resource_path(bucket, key, ResourceKind::Metadata)?;
        let Some(raw) = tokio::fs::read(&doc_path).await.at_or_missing(&doc_path)? else {
            return Ok(None);
        };
        let Some(etag) = self.read_digest(bucket, key).await? else {
            return Ok(None);
        };
        let doc: MetadataDocument =
            serde_json::from_slice(&raw).map_err(|source| StoreError::MalformedMetadata {
                path: doc_path,
                source,
            })?;
        Ok(Some(ObjectMetadata::from_document(doc, etag)))
    }

    /// Read the digest sidecar, or `None` if it is absent.
    pub async fn read_digest(&self, bucket: &str, key: &str) -> StoreResult<Option<String>> {
        let path = self.layout.resource_path(bucket, key, ResourceKind::Digest)?;
        let digest = tokio::fs::read_to_string(&path).await.at_or_missing(&path)?;
        Ok(digest.map(|d| d.trim().to_owned()))
    }

    /// Copy both files of `src` over those of `dest` unchanged.
    pub async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> StoreResult<()> {
        for kind in [ResourceKind::Digest, ResourceKind::Metadata] {
            let src = self.layout.resource_path(src_bucket, src_key, kind)?;
            let dest = self.layout.resource_path(dest_bucket, dest_key, kind)?;
            let data = tokio::fs::read(&src).await.at(&src)?;
            write_file(&dest, &data).await?;
        }
        Ok(())
    }

    /// Remove both files, tolerating either being absent.
    pub async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        for kind in [ResourceKind::Digest, ResourceKind::Metadata] {
            remove_file_if_exists(&self.layout.resource_path(bucket, key, kind)?).await?;
        }
        Ok(())
    }
}
