//! Content files: streaming writes with an incremental MD5, ranged reads.
//!
//! Content is written to a temporary sibling and renamed over the target once
//! every byte has landed, so a reader never observes a half-written content
//! file under the final name. Memory use is bounded by the write buffer and
//! the largest incoming chunk, whatever the object size.

use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{trace, warn};

use crate::error::{IoResultExt, StoreError, StoreResult};

/// A boxed stream of content chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

// ---------------------------------------------------------------------------
// ObjectContent
// ---------------------------------------------------------------------------

/// Object content as supplied by a caller.
pub enum ObjectContent {
    /// The whole body in one contiguous buffer.
    Bytes(Bytes),
    /// The body as an incremental chunk stream.
    Stream(ByteStream),
}

impl fmt::Debug for ObjectContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(data) => f.debug_struct("Bytes").field("len", &data.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl ObjectContent {
    /// Wrap any chunk stream.
    pub fn from_stream(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Self {
        Self::Stream(Box::pin(stream))
    }

    /// View the content as a stream regardless of how it was supplied.
    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        match self {
            Self::Bytes(data) => Box::pin(stream::once(async move { Ok(data) })),
            Self::Stream(s) => s,
        }
    }
}

impl From<Bytes> for ObjectContent {
    fn from(data: Bytes) -> Self {
        Self::Bytes(data)
    }
}

impl From<Vec<u8>> for ObjectContent {
    fn from(data: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(data))
    }
}

impl From<&'static str> for ObjectContent {
    fn from(data: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(data.as_bytes()))
    }
}

// ---------------------------------------------------------------------------
// ContentWriter
// ---------------------------------------------------------------------------

/// Size and hex MD5 of a written content file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Number of bytes written.
    pub size: u64,
    /// Lower-case hex MD5 of the bytes written.
    pub md5_hex: String,
}

/// Writes and reads content files with bounded buffers.
#[derive(Debug, Clone, Copy)]
pub struct ContentWriter {
    write_buffer_size: usize,
    read_chunk_size: usize,
}

impl ContentWriter {
    /// Create a writer with the given buffer sizes (both clamped to at least
    /// one byte).
    #[must_use]
    pub fn new(write_buffer_size: usize, read_chunk_size: usize) -> Self {
        Self {
            write_buffer_size: write_buffer_size.max(1),
            read_chunk_size: read_chunk_size.max(1),
        }
    }

    /// Persist `content` at `path`, hashing every chunk on its way to disk.
    ///
    /// Missing parent directories are created. Whole-buffer and streamed
    /// input with the same bytes produce the same [`ContentDigest`].
    pub async fn write(&self, path: &Path, content: ObjectContent) -> StoreResult<ContentDigest> {
        ensure_parent(path).await?;
        let tmp = temp_sibling(path);
        let digest = match self.write_hashed(&tmp, content).await {
            Ok(digest) => digest,
            Err(e) => {
                discard(&tmp).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            discard(&tmp).await;
            return Err(StoreError::io(path, e));
        }
        trace!(path = %path.display(), size = digest.size, "wrote content file");
        Ok(digest)
    }

    async fn write_hashed(&self, tmp: &Path, content: ObjectContent) -> StoreResult<ContentDigest> {
        let file = tokio::fs::File::create(tmp).await.at(tmp)?;
        let mut writer = BufWriter::with_capacity(self.write_buffer_size, file);
        let mut hasher = Md5::new();
        let mut size = 0u64;

        let mut chunks = content.into_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.at(tmp)?;
            hasher.update(&chunk);
            writer.write_all(&chunk).await.at(tmp)?;
            size += chunk.len() as u64;
        }
        writer.flush().await.at(tmp)?;

        Ok(ContentDigest {
            size,
            md5_hex: hex::encode(hasher.finalize()),
        })
    }

    /// Copy a content file byte-for-byte, replacing `dest` atomically.
    pub async fn copy(&self, src: &Path, dest: &Path) -> StoreResult<u64> {
        ensure_parent(dest).await?;
        let tmp = temp_sibling(dest);
        let copied = match tokio::fs::copy(src, &tmp).await {
            Ok(n) => n,
            Err(e) => {
                discard(&tmp).await;
                return Err(StoreError::io(src, e));
            }
        };
        if let Err(e) = tokio::fs::rename(&tmp, dest).await {
            discard(&tmp).await;
            return Err(StoreError::io(dest, e));
        }
        Ok(copied)
    }

    /// Stream `len` bytes of the file at `path` starting at `start`.
    ///
    /// The file is opened eagerly so a missing file surfaces here; bytes are
    /// read lazily in chunks of at most the configured read size.
    pub async fn read_range(&self, path: &Path, start: u64, len: u64) -> StoreResult<ByteStream> {
        let mut file = tokio::fs::File::open(path).await.at(path)?;
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await.at(path)?;
        }
        Ok(chunked(file.take(len), self.read_chunk_size))
    }

    /// Stream the whole file at `path`.
    pub async fn read_all(&self, path: &Path) -> StoreResult<ByteStream> {
        self.read_range(path, 0, u64::MAX).await
    }
}

impl Default for ContentWriter {
    fn default() -> Self {
        Self::new(256 * 1024, 64 * 1024)
    }
}

fn chunked<R>(reader: R, chunk_size: usize) -> ByteStream
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    Box::pin(stream::try_unfold(reader, move |mut reader| async move {
        let mut buf = BytesMut::with_capacity(chunk_size);
        let n = reader.read_buf(&mut buf).await?;
        Ok::<_, io::Error>((n > 0).then(|| (buf.freeze(), reader)))
    }))
}

/// Drain a chunk stream into one buffer.
pub async fn collect_bytes(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

// ---------------------------------------------------------------------------
// Small-file helpers
// ---------------------------------------------------------------------------

/// Replace the file at `path` with `data` via a temporary sibling.
pub(crate) async fn write_file(path: &Path, data: &[u8]) -> StoreResult<()> {
    ensure_parent(path).await?;
    let tmp = temp_sibling(path);
    if let Err(e) = tokio::fs::write(&tmp, data).await {
        discard(&tmp).await;
        return Err(StoreError::io(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        discard(&tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

/// Remove a file, treating an already-missing file as success.
pub(crate) async fn remove_file_if_exists(path: &Path) -> StoreResult<()> {
    tokio::fs::remove_file(path)
        .await
        .at_or_missing(path)
        .map(|_| ())
}

async fn ensure_parent(path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.at(parent)?;
    }
    Ok(())
}

/// `<name>.<uuid>.tmp` next to `path`. The suffix keeps the resource kind
/// distinct from every real kind, so listings never pick it up.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

async fn discard(tmp: &Path) {
    if let Err(e) = tokio::fs::remove_file(tmp).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %tmp.display(), error = %e, "failed to remove temp file");
        }
    }
}
