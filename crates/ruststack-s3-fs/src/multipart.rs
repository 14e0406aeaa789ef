//! Multipart upload staging and assembly.
//!
//! Every upload owns a staging directory under the bucket:
//!
//! ```text
//! <bucket>/#s3fs.uploads/<upload-id>/
//!   key           target key (raw text)
//!   metadata      request metadata captured at initiation (JSON)
//!   1, 1.md5      part 1 and its hex MD5
//!   2, 2.md5      ...
//! ```
//!
//! Parts occupy distinct files, so they can be uploaded concurrently and in
//! any order. Assembly streams the referenced parts in ascending part-number
//! order; the store routes that stream through the ordinary object write.

use std::io;
use std::path::PathBuf;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, trace};

use crate::content::{ContentWriter, ObjectContent, write_file};
use crate::error::{IoResultExt, StoreError, StoreResult};
use crate::layout::{ResourceKind, StoreLayout, validate_object_key};
use crate::metadata::{MetadataMap, persisted_fields};

const KEY_FILE: &str = "key";
const METADATA_FILE: &str = "metadata";
const DIGEST_EXTENSION: &str = "md5";

/// A staged part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    /// 1-based part number.
    pub part_number: u32,
    /// Part size in bytes.
    pub size: u64,
    /// Lower-case hex MD5 of the part.
    pub etag: String,
}

/// An upload ready to be written as an object.
#[derive(Debug)]
pub struct AssembledUpload {
    /// Target key recorded at initiation.
    pub key: String,
    /// Metadata recorded at initiation.
    pub metadata: MetadataMap,
    /// The referenced parts, concatenated in ascending part-number order.
    pub content: ObjectContent,
}

/// Generate a fresh upload id.
#[must_use]
pub fn generate_upload_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Manages the staging areas of multipart uploads.
#[derive(Debug, Clone)]
pub struct MultipartAssembler {
    layout: StoreLayout,
    writer: ContentWriter,
}

impl MultipartAssembler {
    /// Create an assembler writing parts with `writer`.
    #[must_use]
    pub fn new(layout: StoreLayout, writer: ContentWriter) -> Self {
        Self { layout, writer }
    }

    /// Create the staging area for `upload_id` and record its target.
    pub async fn initiate(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        metadata: &MetadataMap,
    ) -> StoreResult<()> {
        validate_object_key(key)?;
        // Reject keys that could never be written before accepting parts.
        self.layout.resource_path(bucket, key, ResourceKind::Object)?;

        let dir = self.layout.upload_dir(bucket, upload_id)?;
        tokio::fs::create_dir_all(&dir).await.at(&dir)?;
        write_file(&dir.join(KEY_FILE), key.as_bytes()).await?;

        let metadata_path = dir.join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(&persisted_fields(metadata)).map_err(|source| {
            StoreError::MalformedMetadata {
                path: metadata_path.clone(),
                source,
            }
        })?;
        write_file(&metadata_path, &json).await?;

        debug!(bucket, key, upload_id, "initiated multipart upload");
        Ok(())
    }

    /// Stage one part. Re-uploading a part number replaces it.
    pub async fn put_part(
        &self,
        bucket: &str,
        upload_id: &str,
        part_number: u32,
        content: ObjectContent,
    ) -> StoreResult<PartInfo> {
        let dir = self.staging_dir(bucket, upload_id).await?;
        let digest = self
            .writer
            .write(&dir.join(part_number.to_string()), content)
            .await?;
        write_file(&dir.join(part_digest_name(part_number)), digest.md5_hex.as_bytes()).await?;

        trace!(bucket, upload_id, part_number, size = digest.size, "staged part");
        Ok(PartInfo {
            part_number,
            size: digest.size,
            etag: digest.md5_hex,
        })
    }

    /// Staged parts in ascending part-number order.
    pub async fn list_parts(&self, bucket: &str, upload_id: &str) -> StoreResult<Vec<PartInfo>> {
        let dir = self.staging_dir(bucket, upload_id).await?;
        let mut entries = tokio::fs::read_dir(&dir).await.at(&dir)?;
        let mut parts = Vec::new();
        while let Some(entry) = entries.next_entry().await.at(&dir)? {
            let Some(part_number) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            let Some(meta) = entry.metadata().await.at_or_missing(&entry.path())? else {
                continue;
            };
            let digest_path = dir.join(part_digest_name(part_number));
            let Some(etag) = tokio::fs::read_to_string(&digest_path)
                .await
                .at_or_missing(&digest_path)?
            else {
                continue;
            };
            parts.push(PartInfo {
                part_number,
                size: meta.len(),
                etag: etag.trim().to_owned(),
            });
        }
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    /// Read back the upload's target and open the referenced parts as one
    /// stream.
    ///
    /// Part numbers are sorted and de-duplicated. Every referenced part must
    /// be staged; a missing part fails with a `NotFound` I/O error before any
    /// byte is written.
    pub async fn assemble(
        &self,
        bucket: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> StoreResult<AssembledUpload> {
        let dir = self.staging_dir(bucket, upload_id).await?;

        let key_path = dir.join(KEY_FILE);
        let key = tokio::fs::read_to_string(&key_path).await.at(&key_path)?;
        let metadata_path = dir.join(METADATA_FILE);
        let raw = tokio::fs::read(&metadata_path).await.at(&metadata_path)?;
        let metadata: MetadataMap =
            serde_json::from_slice(&raw).map_err(|source| StoreError::MalformedMetadata {
                path: metadata_path,
                source,
            })?;

        let mut numbers = part_numbers.to_vec();
        numbers.sort_unstable();
        numbers.dedup();

        let mut paths = Vec::with_capacity(numbers.len());
        for n in numbers {
            let path = dir.join(n.to_string());
            tokio::fs::metadata(&path).await.at(&path)?;
            paths.push(path);
        }

        Ok(AssembledUpload {
            key,
            metadata,
            content: self.concatenate(paths),
        })
    }

    /// Remove the staging area. Returns whether it existed.
    pub async fn abort(&self, bucket: &str, upload_id: &str) -> StoreResult<bool> {
        let dir = self.layout.upload_dir(bucket, upload_id)?;
        let removed = tokio::fs::remove_dir_all(&dir)
            .await
            .at_or_missing(&dir)?
            .is_some();
        if removed {
            debug!(bucket, upload_id, "removed multipart staging area");
        }
        Ok(removed)
    }

    /// Files written by [`MultipartAssembler::initiate`].
    pub(crate) fn initiated_files(&self, bucket: &str, upload_id: &str) -> StoreResult<Vec<PathBuf>> {
        let dir = self.layout.upload_dir(bucket, upload_id)?;
        Ok(vec![dir.join(KEY_FILE), dir.join(METADATA_FILE)])
    }

    /// Files written by [`MultipartAssembler::put_part`] for one part.
    pub(crate) fn part_files(
        &self,
        bucket: &str,
        upload_id: &str,
        part_number: u32,
    ) -> StoreResult<Vec<PathBuf>> {
        let dir = self.layout.upload_dir(bucket, upload_id)?;
        Ok(vec![
            dir.join(part_number.to_string()),
            dir.join(part_digest_name(part_number)),
        ])
    }

    /// Open the staging directory of an upload, failing with
    /// [`StoreError::NoSuchUpload`] if it was never initiated.
    async fn staging_dir(&self, bucket: &str, upload_id: &str) -> StoreResult<PathBuf> {
        let dir = self.layout.upload_dir(bucket, upload_id)?;
        let key_path = dir.join(KEY_FILE);
        if !tokio::fs::try_exists(&key_path).await.at(&key_path)? {
            return Err(StoreError::NoSuchUpload {
                upload_id: upload_id.to_owned(),
            });
        }
        Ok(dir)
    }

    /// Lazily chain the given files; each is opened only when the previous
    /// one is exhausted.
    fn concatenate(&self, paths: Vec<PathBuf>) -> ObjectContent {
        let writer = self.writer;
        let chained = stream::iter(paths)
            .then(move |path| async move {
                writer.read_all(&path).await.map_err(|e| match e {
                    StoreError::Io { source, .. } => source,
                    other => io::Error::other(other),
                })
            })
            .try_flatten();
        ObjectContent::from_stream(chained)
    }
}

fn part_digest_name(part_number: u32) -> String {
    format!("{part_number}.{DIGEST_EXTENSION}")
}
