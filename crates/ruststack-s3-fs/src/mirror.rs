//! Best-effort replication of written files to a secondary blob store.
//!
//! After a successful write the store hands every file it produced to the
//! configured [`BlobMirror`] on a detached task. Mirroring never blocks or
//! fails the primary operation: failures are logged and counted in
//! [`MirrorStats`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{trace, warn};

/// A secondary store that receives copies of written files.
#[async_trait]
pub trait BlobMirror: Send + Sync + fmt::Debug {
    /// Store `data` under `path`, which is relative to the store root.
    async fn mirror(&self, path: &Path, data: Bytes) -> anyhow::Result<()>;
}

/// Counters of mirror outcomes.
#[derive(Debug, Default)]
pub struct MirrorStats {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl MirrorStats {
    /// Files handed to the mirror.
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Files the mirror accepted.
    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Files that could not be read back or that the mirror rejected.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Fans written files out to a [`BlobMirror`].
#[derive(Debug, Clone)]
pub(crate) struct MirrorHandle {
    root: PathBuf,
    mirror: Arc<dyn BlobMirror>,
    stats: Arc<MirrorStats>,
}

impl MirrorHandle {
    pub(crate) fn new(root: PathBuf, mirror: Arc<dyn BlobMirror>) -> Self {
        Self {
            root,
            mirror,
            stats: Arc::new(MirrorStats::default()),
        }
    }

    pub(crate) fn stats(&self) -> Arc<MirrorStats> {
        Arc::clone(&self.stats)
    }

    /// Read each file back and mirror it on a detached task.
    pub(crate) fn submit(&self, paths: Vec<PathBuf>) {
        for path in paths {
            let Ok(rel) = path.strip_prefix(&self.root).map(Path::to_path_buf) else {
                warn!(path = %path.display(), "refusing to mirror file outside the store root");
                continue;
            };
            self.stats.submitted.fetch_add(1, Ordering::Relaxed);
            let mirror = Arc::clone(&self.mirror);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                let outcome = match tokio::fs::read(&path).await {
                    Ok(data) => mirror.mirror(&rel, Bytes::from(data)).await,
                    Err(e) => Err(anyhow::Error::new(e).context("failed to read file for mirroring")),
                };
                match outcome {
                    Ok(()) => {
                        stats.succeeded.fetch_add(1, Ordering::Relaxed);
                        trace!(path = %rel.display(), "mirrored file");
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(path = %rel.display(), error = %e, "mirror write failed");
                    }
                }
            });
        }
    }
}

/// Mirrors files into a second local directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryMirror {
    root: PathBuf,
}

impl DirectoryMirror {
    /// Mirror into `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobMirror for DirectoryMirror {
    async fn mirror(&self, path: &Path, data: Bytes) -> anyhow::Result<()> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &data).await?;
        Ok(())
    }
}
