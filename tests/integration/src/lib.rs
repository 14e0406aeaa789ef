//! End-to-end tests for the filesystem object store.
//!
//! Each test opens a [`FilesystemStore`] on a fresh temporary directory and
//! drives it through its public API only, then inspects the resulting tree.
//!
//! Run them with:
//! ```text
//! cargo test -p ruststack-s3-fs-integration
//! ```

use std::sync::Once;

use bytes::Bytes;
use ruststack_s3_fs::codec::KeyCodec;
use ruststack_s3_fs::content::{ObjectContent, collect_bytes};
use ruststack_s3_fs::metadata::MetadataMap;
use ruststack_s3_fs::store::ObjectInput;
use ruststack_s3_fs::{FilesystemStore, StoreConfig};
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A store on a temporary directory that lives as long as the value.
#[derive(Debug)]
pub struct TestStore {
    /// The store under test.
    pub store: FilesystemStore,
    dir: TempDir,
}

impl TestStore {
    /// Open a store using the platform's native key codec.
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(KeyCodec::native())
    }

    /// Open a store using `codec`.
    #[must_use]
    pub fn with_codec(codec: KeyCodec) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = StoreConfig::builder()
            .root_dir(dir.path().to_path_buf())
            .key_codec(codec)
            .read_chunk_size(4)
            .build();
        Self {
            store: FilesystemStore::new(&config),
            dir,
        }
    }

    /// The store root directory.
    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Write `body` at `bucket/key` with no request metadata.
    pub async fn put(&self, bucket: &str, key: &str, body: &'static str) {
        self.put_with(bucket, key, MetadataMap::new(), ObjectContent::from(body))
            .await;
    }

    /// Write `content` at `bucket/key` with the given metadata.
    pub async fn put_with(
        &self,
        bucket: &str,
        key: &str,
        metadata: MetadataMap,
        content: ObjectContent,
    ) {
        self.store
            .put_object(ObjectInput {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                metadata,
                content,
            })
            .await
            .unwrap_or_else(|e| panic!("put {bucket}/{key} failed: {e}"));
    }

    /// Read the whole content of `bucket/key`.
    pub async fn read(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let read = self
            .store
            .get_object(bucket, key, None)
            .await
            .expect("get_object failed")?;
        let stream = read.content.expect("full read carries content");
        Some(collect_bytes(stream).await.expect("failed to read content"))
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a unique bucket name for a test.
#[must_use]
pub fn test_bucket_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("test-{prefix}-{}", &id[..8])
}

mod test_multipart;
mod test_object;
