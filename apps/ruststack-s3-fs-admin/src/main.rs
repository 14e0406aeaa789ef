//! RustStack S3 FS Admin - operator CLI for a filesystem-backed S3 store.
//!
//! Inspects and edits a store directory without going through an S3 server.
//!
//! # Usage
//!
//! ```text
//! ruststack-s3-fs-admin --root ./s3-data buckets
//! ruststack-s3-fs-admin ls photos --prefix 2024/ --delimiter /
//! ruststack-s3-fs-admin put photos 2024/cat.jpg ./cat.jpg --content-type image/jpeg
//! ruststack-s3-fs-admin cat photos 2024/cat.jpg --start 0 --end 99
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `S3FS_ROOT_DIR` | `./s3-data` | Store root (overridden by `--root`) |
//! | `S3FS_KEY_CODEC` | platform | `identity` or `escaped` (overridden by `--codec`) |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use ruststack_s3_fs::codec::KeyCodec;
use ruststack_s3_fs::content::ObjectContent;
use ruststack_s3_fs::listing::ListObjectsOptions;
use ruststack_s3_fs::metadata::MetadataMap;
use ruststack_s3_fs::mirror::{DirectoryMirror, MirrorStats};
use ruststack_s3_fs::store::{ObjectInput, RangeRequest};
use ruststack_s3_fs::{FilesystemStore, StoreConfig};

/// Chunk size used when streaming a local file into the store.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// How long to wait for outstanding mirror writes before exiting.
const MIRROR_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Operator CLI for a filesystem-backed S3 store.
#[derive(Parser, Debug)]
#[command(name = "ruststack-s3-fs-admin")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Store root directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Key codec (`identity` or `escaped`).
    #[arg(long, global = true)]
    codec: Option<KeyCodec>,

    /// Replicate every written file into this directory.
    #[arg(long, global = true)]
    mirror: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List buckets
    Buckets,

    /// Create a bucket
    Mb {
        /// Bucket name
        bucket: String,
    },

    /// Remove a bucket and everything in it
    Rb {
        /// Bucket name
        bucket: String,
    },

    /// List objects
    Ls {
        /// Bucket name
        bucket: String,
        /// Only keys starting with this prefix
        #[arg(long, default_value = "")]
        prefix: String,
        /// Group keys by this delimiter
        #[arg(long)]
        delimiter: Option<String>,
        /// List keys after this one
        #[arg(long, default_value = "")]
        start_after: String,
        /// Maximum number of keys
        #[arg(long)]
        max_keys: Option<usize>,
    },

    /// Show object metadata
    Stat {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
    },

    /// Write object content to stdout
    Cat {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
        /// First byte offset
        #[arg(long, allow_negative_numbers = true)]
        start: Option<i64>,
        /// Last byte offset (inclusive)
        #[arg(long, allow_negative_numbers = true)]
        end: Option<i64>,
    },

    /// Upload a local file
    Put {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
        /// Local file to upload
        file: PathBuf,
        /// Content type to record
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Delete an object
    Rm {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = StoreConfig::from_env();
    if let Some(root) = cli.root {
        config.root_dir = root;
    }
    if let Some(codec) = cli.codec {
        config.key_codec = codec;
    }

    init_tracing(&config.log_level)?;
    debug!(root = %config.root_dir.display(), codec = %config.key_codec, "opening store");

    let mut store = FilesystemStore::new(&config);
    if let Some(dir) = cli.mirror {
        debug!(mirror = %dir.display(), "mirroring writes");
        store = store.with_mirror(Arc::new(DirectoryMirror::new(dir)));
    }

    let outcome = run(&store, cli.command).await;
    if let Some(stats) = store.mirror_stats() {
        settle_mirror(&stats).await;
    }
    outcome
}

/// Wait until every submitted mirror write has finished, or the timeout
/// passes.
async fn settle_mirror(stats: &MirrorStats) {
    let deadline = tokio::time::Instant::now() + MIRROR_SETTLE_TIMEOUT;
    while stats.succeeded() + stats.failed() < stats.submitted() {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                pending = stats.submitted() - stats.succeeded() - stats.failed(),
                "gave up waiting for mirror writes"
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    if stats.failed() > 0 {
        warn!(failed = stats.failed(), "some files were not mirrored");
    }
}

/// Initialize the tracing subscriber with the given log level.
///
/// If `RUST_LOG` is set, it takes precedence over `log_level`.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn run(store: &FilesystemStore, command: Command) -> Result<()> {
    match command {
        Command::Buckets => {
            for bucket in store.list_buckets().await? {
                println!("{}\t{}", bucket.creation_date.to_rfc3339(), bucket.name);
            }
        }
        Command::Mb { bucket } => {
            store.put_bucket(&bucket).await?;
            println!("created {bucket}");
        }
        Command::Rb { bucket } => {
            store.delete_bucket(&bucket).await?;
            println!("removed {bucket}");
        }
        Command::Ls {
            bucket,
            prefix,
            delimiter,
            start_after,
            max_keys,
        } => {
            let options = ListObjectsOptions {
                prefix,
                delimiter,
                start_after,
                max_keys,
            };
            let listing = store.list_objects(&bucket, &options).await?;
            for cp in &listing.common_prefixes {
                println!("{:>32}  {:>12}  {cp}", "PRE", "");
            }
            for object in &listing.objects {
                println!(
                    "{}  {:>12}  {}",
                    object.metadata.last_modified.to_rfc3339(),
                    object.metadata.content_length,
                    object.key
                );
            }
            if let Some(marker) = listing.next_marker {
                println!("(truncated; continue with --start-after {marker:?})");
            }
        }
        Command::Stat { bucket, key } => {
            let meta = store
                .head_object(&bucket, &key)
                .await?
                .with_context(|| format!("no such object: {bucket}/{key}"))?;
            println!("content-type:   {}", meta.content_type);
            println!("content-length: {}", meta.content_length);
            println!("etag:           {}", meta.quoted_etag());
            println!("last-modified:  {}", meta.last_modified.to_rfc3339());
            for (name, value) in meta.headers.iter().chain(&meta.user_metadata) {
                println!("{name}: {value}");
            }
        }
        Command::Cat {
            bucket,
            key,
            start,
            end,
        } => {
            let range = (start.is_some() || end.is_some()).then_some(RangeRequest { start, end });
            let read = store
                .get_object(&bucket, &key, range)
                .await?
                .with_context(|| format!("no such object: {bucket}/{key}"))?;
            let mut content = read.content.with_context(|| {
                format!(
                    "range not satisfiable for object of {} bytes",
                    read.metadata.content_length
                )
            })?;
            let mut stdout = std::io::stdout().lock();
            while let Some(chunk) = content.next().await {
                stdout.write_all(&chunk?)?;
            }
            stdout.flush()?;
        }
        Command::Put {
            bucket,
            key,
            file,
            content_type,
        } => {
            let source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("failed to open {}", file.display()))?;
            let mut metadata = MetadataMap::new();
            if let Some(ct) = content_type {
                metadata.insert("content-type".to_owned(), ct);
            }
            let result = store
                .put_object(ObjectInput {
                    bucket,
                    key,
                    metadata,
                    content: file_content(source),
                })
                .await?;
            println!("{} bytes, etag \"{}\"", result.size, result.etag);
        }
        Command::Rm { bucket, key } => {
            store.delete_object(&bucket, &key).await?;
            println!("deleted {bucket}/{key}");
        }
    }
    Ok(())
}

/// Stream a local file in fixed-size chunks.
fn file_content(file: tokio::fs::File) -> ObjectContent {
    ObjectContent::from_stream(futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(UPLOAD_CHUNK_SIZE);
        let n = file.read_buf(&mut buf).await?;
        Ok::<_, std::io::Error>((n > 0).then(|| (buf.freeze(), file)))
    }))
}
