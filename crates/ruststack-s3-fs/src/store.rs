//! The object store façade.
//!
//! [`FilesystemStore`] exposes bucket and object CRUD, listing, copy,
//! multipart upload and subresource documents on top of the layout, content,
//! metadata, listing and multipart components. It holds no in-memory state
//! beyond its configuration: every call goes straight to the filesystem, so
//! any number of calls may run concurrently.
//!
//! Absent buckets, objects and documents are reported as `None`/`false`,
//! never as errors.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::config::StoreConfig;
use crate::content::{ByteStream, ContentWriter, ObjectContent, remove_file_if_exists};
use crate::error::{IoResultExt, StoreResult};
use crate::layout::{ResourceKind, StoreLayout, validate_bucket_name, validate_object_key};
use crate::listing::{ListObjectsOptions, ListObjectsResult, ListingEngine};
use crate::metadata::{MetadataMap, MetadataStore, ObjectMetadata};
use crate::mirror::{BlobMirror, MirrorHandle, MirrorStats};
use crate::multipart::{MultipartAssembler, PartInfo};
use crate::subresource::{SubresourceStore, SubresourceType};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A bucket directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Bucket name (the directory name).
    pub name: String,
    /// Creation time of the directory, or its modification time on
    /// filesystems that do not record creation time.
    pub creation_date: DateTime<Utc>,
}

/// An object to be written.
#[derive(Debug)]
pub struct ObjectInput {
    /// Target bucket.
    pub bucket: String,
    /// Target key.
    pub key: String,
    /// Request metadata (headers keyed by name).
    pub metadata: MetadataMap,
    /// The object body.
    pub content: ObjectContent,
}

/// Outcome of a successful object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// Bytes written.
    pub size: u64,
    /// Lower-case hex MD5 of the bytes written.
    pub etag: String,
}

/// Requested byte window (both ends inclusive). A missing start means `0`;
/// a missing end means the last byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeRequest {
    /// First byte offset.
    pub start: Option<i64>,
    /// Last byte offset.
    pub end: Option<i64>,
}

impl RangeRequest {
    /// Range from `start` to `end`, inclusive.
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }
}

/// The effective byte window of a ranged read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte offset.
    pub start: i64,
    /// Last byte offset, clamped to the object's last byte.
    pub end: i64,
    /// Whether the window selects at least one byte. Unsatisfiable reads
    /// carry no content.
    pub satisfiable: bool,
}

impl ContentRange {
    /// Resolve `request` against an object of `len` bytes.
    #[must_use]
    pub fn resolve(request: RangeRequest, len: u64) -> Self {
        let last = i64::try_from(len).unwrap_or(i64::MAX) - 1;
        let start = request.start.unwrap_or(0);
        let end = request.end.map_or(last, |end| end.min(last));
        Self {
            start,
            end,
            satisfiable: start >= 0 && end >= start,
        }
    }

    /// Number of bytes selected.
    #[must_use]
    pub fn len(&self) -> u64 {
        if self.satisfiable {
            u64::try_from(self.end - self.start + 1).unwrap_or(0)
        } else {
            0
        }
    }

    /// Whether no bytes are selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of reading an object.
pub struct ObjectRead {
    /// The object's metadata.
    pub metadata: ObjectMetadata,
    /// The requested bytes; `None` when the range is unsatisfiable.
    pub content: Option<ByteStream>,
    /// The effective window, present only when a range was requested.
    pub range: Option<ContentRange>,
}

impl fmt::Debug for ObjectRead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRead")
            .field("metadata", &self.metadata)
            .field("content", &self.content.as_ref().map(|_| ".."))
            .field("range", &self.range)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// FilesystemStore
// ---------------------------------------------------------------------------

/// Filesystem-backed object store.
///
/// # Examples
///
/// ```
/// use ruststack_s3_fs::content::{ObjectContent, collect_bytes};
/// use ruststack_s3_fs::metadata::MetadataMap;
/// use ruststack_s3_fs::store::ObjectInput;
/// use ruststack_s3_fs::{FilesystemStore, StoreConfig};
///
/// # tokio_test::block_on(async {
/// let dir = tempfile::tempdir().unwrap();
/// let config = StoreConfig::builder().root_dir(dir.path().to_path_buf()).build();
/// let store = FilesystemStore::new(&config);
///
/// let result = store
///     .put_object(ObjectInput {
///         bucket: "my-bucket".into(),
///         key: "hello.txt".into(),
///         metadata: MetadataMap::new(),
///         content: ObjectContent::from("hello"),
///     })
///     .await
///     .unwrap();
/// assert_eq!(result.size, 5);
///
/// let read = store.get_object("my-bucket", "hello.txt", None).await.unwrap().unwrap();
/// let data = collect_bytes(read.content.unwrap()).await.unwrap();
/// assert_eq!(data.as_ref(), b"hello");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    layout: StoreLayout,
    writer: ContentWriter,
    metadata: MetadataStore,
    listing: ListingEngine,
    multipart: MultipartAssembler,
    subresources: SubresourceStore,
    mirror: Option<MirrorHandle>,
}

impl FilesystemStore {
    /// Create a store rooted at `config.root_dir`.
    #[must_use]
    pub fn new(config: &StoreConfig) -> Self {
        let layout = StoreLayout::new(&config.root_dir, config.key_codec);
        let writer = ContentWriter::new(config.write_buffer_size, config.read_chunk_size);
        let metadata = MetadataStore::new(layout.clone());
        Self {
            listing: ListingEngine::new(layout.clone(), metadata.clone()),
            multipart: MultipartAssembler::new(layout.clone(), writer),
            subresources: SubresourceStore::new(layout.clone()),
            metadata,
            writer,
            layout,
            mirror: None,
        }
    }

    /// Replicate every written file to `mirror` on a best-effort basis.
    #[must_use]
    pub fn with_mirror(mut self, mirror: Arc<dyn BlobMirror>) -> Self {
        self.mirror = Some(MirrorHandle::new(self.layout.root().to_path_buf(), mirror));
        self
    }

    /// Mirror counters, if a mirror is configured.
    #[must_use]
    pub fn mirror_stats(&self) -> Option<Arc<MirrorStats>> {
        self.mirror.as_ref().map(MirrorHandle::stats)
    }

    /// The store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    /// All buckets, sorted by name.
    pub async fn list_buckets(&self) -> StoreResult<Vec<Bucket>> {
        let root = self.layout.root();
        let Some(mut entries) = tokio::fs::read_dir(root).await.at_or_missing(root)? else {
            return Ok(Vec::new());
        };
        let mut buckets = Vec::new();
        while let Some(entry) = entries.next_entry().await.at(root)? {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if validate_bucket_name(&name).is_err() {
                continue;
            }
            let Some(meta) = entry.metadata().await.at_or_missing(&entry.path())? else {
                continue;
            };
            if meta.is_dir() {
                buckets.push(Bucket {
                    name,
                    creation_date: creation_date(&meta),
                });
            }
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    /// Look up a bucket.
    pub async fn get_bucket(&self, name: &str) -> StoreResult<Option<Bucket>> {
        let path = self.layout.bucket_path(name)?;
        let meta = tokio::fs::metadata(&path).await.at_or_missing(&path)?;
        Ok(meta.filter(std::fs::Metadata::is_dir).map(|meta| Bucket {
            name: name.to_owned(),
            creation_date: creation_date(&meta),
        }))
    }

    /// Create a bucket. Creating an existing bucket succeeds.
    pub async fn put_bucket(&self, name: &str) -> StoreResult<Bucket> {
        let path = self.layout.bucket_path(name)?;
        tokio::fs::create_dir_all(&path).await.at(&path)?;
        let meta = tokio::fs::metadata(&path).await.at(&path)?;
        debug!(bucket = name, "created bucket");
        Ok(Bucket {
            name: name.to_owned(),
            creation_date: creation_date(&meta),
        })
    }

    /// Remove a bucket and everything in it. Removing an absent bucket
    /// succeeds.
    pub async fn delete_bucket(&self, name: &str) -> StoreResult<()> {
        let path = self.layout.bucket_path(name)?;
        tokio::fs::remove_dir_all(&path).await.at_or_missing(&path)?;
        debug!(bucket = name, "deleted bucket");
        Ok(())
    }

    /// Remove every bucket.
    pub async fn reset(&self) -> StoreResult<()> {
        for bucket in self.list_buckets().await? {
            self.delete_bucket(&bucket.name).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// List objects in `bucket`.
    pub async fn list_objects(
        &self,
        bucket: &str,
        options: &ListObjectsOptions,
    ) -> StoreResult<ListObjectsResult> {
        self.listing.list(bucket, options).await
    }

    /// Whether `bucket/key` holds a complete object.
    pub async fn exists_object(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        let path = self.layout.resource_path(bucket, key, ResourceKind::Object)?;
        if !tokio::fs::try_exists(&path).await.at(&path)? {
            return Ok(false);
        }
        Ok(self.metadata.get(bucket, key).await?.is_some())
    }

    /// Metadata of `bucket/key` without opening its content.
    pub async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<Option<ObjectMetadata>> {
        if !self.exists_object(bucket, key).await? {
            return Ok(None);
        }
        self.metadata.get(bucket, key).await
    }

    /// Read an object, optionally a byte window of it.
    ///
    /// An unsatisfiable window yields the metadata, no content and a range
    /// flagged as unsatisfiable.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<RangeRequest>,
    ) -> StoreResult<Option<ObjectRead>> {
        let Some(metadata) = self.metadata.get(bucket, key).await? else {
            return Ok(None);
        };
        let path = self.layout.resource_path(bucket, key, ResourceKind::Object)?;

        let (start, len, range) = match range {
            None => (0, u64::MAX, None),
            Some(request) => {
                let resolved = ContentRange::resolve(request, metadata.content_length);
                if !resolved.satisfiable {
                    trace!(bucket, key, ?resolved, "unsatisfiable range");
                    return Ok(Some(ObjectRead {
                        metadata,
                        content: None,
                        range: Some(resolved),
                    }));
                }
                let start = u64::try_from(resolved.start).unwrap_or(0);
                (start, resolved.len(), Some(resolved))
            }
        };

        let content = match self.writer.read_range(&path, start, len).await {
            Ok(stream) => stream,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(ObjectRead {
            metadata,
            content: Some(content),
            range,
        }))
    }

    /// Write an object: content first, then its digest and metadata.
    pub async fn put_object(&self, object: ObjectInput) -> StoreResult<PutResult> {
        let ObjectInput {
            bucket,
            key,
            metadata,
            content,
        } = object;
        validate_object_key(&key)?;
        let path = self.layout.resource_path(&bucket, &key, ResourceKind::Object)?;

        let digest = self.writer.write(&path, content).await?;
        self.metadata
            .put(&bucket, &key, &metadata, digest.size, Some(&digest.md5_hex))
            .await?;
        self.mirror_object(&bucket, &key)?;

        debug!(%bucket, %key, size = digest.size, etag = %digest.md5_hex, "put object");
        Ok(PutResult {
            size: digest.size,
            etag: digest.md5_hex,
        })
    }

    /// Copy an object, optionally replacing its metadata.
    ///
    /// Content is copied when source and destination differ. Without
    /// `replacement` the digest and metadata document are copied unchanged;
    /// with it a fresh document is written and the source digest is kept.
    /// Returns `None` if the source does not exist.
    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        replacement: Option<&MetadataMap>,
    ) -> StoreResult<Option<ObjectMetadata>> {
        validate_object_key(dest_key)?;
        let Some(src_metadata) = self.metadata.get(src_bucket, src_key).await? else {
            return Ok(None);
        };
        let src_path = self
            .layout
            .resource_path(src_bucket, src_key, ResourceKind::Object)?;
        let dest_path = self
            .layout
            .resource_path(dest_bucket, dest_key, ResourceKind::Object)?;
        let same_object = src_path == dest_path;

        if !same_object {
            match self.writer.copy(&src_path, &dest_path).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        let metadata = match replacement {
            Some(fields) => {
                let size = tokio::fs::metadata(&dest_path).await.at(&dest_path)?.len();
                self.metadata
                    .put(dest_bucket, dest_key, fields, size, Some(&src_metadata.etag))
                    .await?
            }
            None if same_object => src_metadata,
            None => {
                self.metadata
                    .copy(src_bucket, src_key, dest_bucket, dest_key)
                    .await?;
                match self.metadata.get(dest_bucket, dest_key).await? {
                    Some(metadata) => metadata,
                    None => return Ok(None),
                }
            }
        };
        self.mirror_object(dest_bucket, dest_key)?;

        debug!(
            src_bucket,
            src_key,
            dest_bucket,
            dest_key,
            replaced = replacement.is_some(),
            "copied object"
        );
        Ok(Some(metadata))
    }

    /// Delete an object and any documents attached to it, then remove the
    /// directories above it that became empty (never the bucket root).
    /// Deleting an absent object succeeds.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        validate_object_key(key)?;
        let path = self.layout.resource_path(bucket, key, ResourceKind::Object)?;
        remove_file_if_exists(&path).await?;
        self.metadata.delete(bucket, key).await?;
        for ty in SubresourceType::ALL {
            self.subresources.delete(bucket, key, ty).await?;
        }

        for dir in self.layout.key_ancestors(bucket, key)? {
            // Stops at the first directory that is not empty (or already gone).
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                trace!(dir = %dir.display(), error = %e, "stopped pruning directories");
                break;
            }
            trace!(dir = %dir.display(), "removed empty directory");
        }

        debug!(bucket, key, "deleted object");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Multipart uploads
    // -----------------------------------------------------------------------

    /// Start a multipart upload of `key` under `upload_id`.
    pub async fn initiate_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        metadata: &MetadataMap,
    ) -> StoreResult<()> {
        self.multipart
            .initiate(bucket, key, upload_id, metadata)
            .await?;
        if let Some(mirror) = &self.mirror {
            mirror.submit(self.multipart.initiated_files(bucket, upload_id)?);
        }
        Ok(())
    }

    /// Stage one part of an upload.
    ///
    /// With a mirror configured the part and its digest are replicated once
    /// staged.
    pub async fn put_part(
        &self,
        bucket: &str,
        upload_id: &str,
        part_number: u32,
        content: ObjectContent,
    ) -> StoreResult<PartInfo> {
        let part = self
            .multipart
            .put_part(bucket, upload_id, part_number, content)
            .await?;
        if let Some(mirror) = &self.mirror {
            mirror.submit(self.multipart.part_files(bucket, upload_id, part_number)?);
        }
        Ok(part)
    }

    /// Parts staged so far, in ascending part-number order.
    pub async fn list_parts(&self, bucket: &str, upload_id: &str) -> StoreResult<Vec<PartInfo>> {
        self.multipart.list_parts(bucket, upload_id).await
    }

    /// Discard an upload. Returns whether it existed.
    pub async fn abort_upload(&self, bucket: &str, upload_id: &str) -> StoreResult<bool> {
        self.multipart.abort(bucket, upload_id).await
    }

    /// Complete an upload: write the listed parts, in ascending part-number
    /// order, as the upload's target object and discard the staging area.
    pub async fn put_object_multipart(
        &self,
        bucket: &str,
        upload_id: &str,
        parts: &[u32],
    ) -> StoreResult<PutResult> {
        let assembled = self.multipart.assemble(bucket, upload_id, parts).await?;
        let key = assembled.key.clone();
        let result = self
            .put_object(ObjectInput {
                bucket: bucket.to_owned(),
                key: assembled.key,
                metadata: assembled.metadata,
                content: assembled.content,
            })
            .await?;
        self.multipart.abort(bucket, upload_id).await?;

        debug!(
            bucket,
            %key,
            upload_id,
            parts = parts.len(),
            size = result.size,
            "completed multipart upload"
        );
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Subresources
    // -----------------------------------------------------------------------

    /// Read a configuration document; an empty key addresses the bucket.
    pub async fn get_subresource(
        &self,
        bucket: &str,
        key: &str,
        ty: SubresourceType,
    ) -> StoreResult<Option<String>> {
        self.subresources.get(bucket, key, ty).await
    }

    /// Store a configuration document; an empty key addresses the bucket.
    pub async fn put_subresource(
        &self,
        bucket: &str,
        key: &str,
        ty: SubresourceType,
        document: &str,
    ) -> StoreResult<()> {
        self.subresources.put(bucket, key, ty, document).await?;
        if let Some(mirror) = &self.mirror {
            mirror.submit(vec![
                self.layout
                    .resource_path(bucket, key, ResourceKind::Subresource(ty))?,
            ]);
        }
        Ok(())
    }

    /// Remove a configuration document. Removing an absent one succeeds.
    pub async fn delete_subresource(
        &self,
        bucket: &str,
        key: &str,
        ty: SubresourceType,
    ) -> StoreResult<()> {
        self.subresources.delete(bucket, key, ty).await
    }

    fn mirror_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let Some(mirror) = &self.mirror else {
            return Ok(());
        };
        let paths = [
            ResourceKind::Object,
            ResourceKind::Digest,
            ResourceKind::Metadata,
        ]
        .into_iter()
        .map(|kind| self.layout.resource_path(bucket, key, kind))
        .collect::<StoreResult<Vec<PathBuf>>>()?;
        mirror.submit(paths);
        Ok(())
    }
}

fn creation_date(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.created()
        .or_else(|_| meta.modified())
        .map_or_else(|_| Utc::now(), DateTime::<Utc>::from)
}
