//! Filesystem store configuration.
//!
//! Provides [`StoreConfig`], built once and handed to
//! [`FilesystemStore::new`](crate::store::FilesystemStore::new). Values can be
//! loaded from environment variables via [`StoreConfig::from_env`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::codec::KeyCodec;

const DEFAULT_ROOT_DIR: &str = "./s3-data";
const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Filesystem store configuration.
///
/// # Examples
///
/// ```
/// use ruststack_s3_fs::config::StoreConfig;
///
/// let config = StoreConfig::builder().root_dir("/srv/s3".into()).build();
/// assert_eq!(config.read_chunk_size, 65_536);
/// assert_eq!(config.log_level, "info");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Directory holding one sub-directory per bucket.
    #[builder(default = PathBuf::from(DEFAULT_ROOT_DIR))]
    pub root_dir: PathBuf,

    /// How keys are mapped onto file names.
    #[builder(default = KeyCodec::native())]
    pub key_codec: KeyCodec,

    /// Largest chunk handed out when streaming content back.
    #[builder(default = DEFAULT_READ_CHUNK_SIZE)]
    pub read_chunk_size: usize,

    /// Buffer in front of content files while writing.
    #[builder(default = DEFAULT_WRITE_BUFFER_SIZE)]
    pub write_buffer_size: usize,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            key_codec: KeyCodec::native(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            log_level: String::from("info"),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables (falling back to defaults;
    /// unparsable values are ignored):
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `S3FS_ROOT_DIR` | `./s3-data` |
    /// | `S3FS_KEY_CODEC` | `escaped` on Windows, `identity` elsewhere |
    /// | `S3FS_READ_CHUNK_SIZE` | `65536` |
    /// | `S3FS_WRITE_BUFFER_SIZE` | `262144` |
    /// | `LOG_LEVEL` | `info` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("S3FS_ROOT_DIR") {
            config.root_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("S3FS_KEY_CODEC") {
            if let Ok(codec) = v.parse::<KeyCodec>() {
                config.key_codec = codec;
            }
        }
        if let Ok(v) = std::env::var("S3FS_READ_CHUNK_SIZE") {
            if let Some(n) = parse_size(&v) {
                config.read_chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("S3FS_WRITE_BUFFER_SIZE") {
            if let Some(n) = parse_size(&v) {
                config.write_buffer_size = n;
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }
}

/// Parse a strictly positive byte count.
fn parse_size(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|n| *n > 0)
}
