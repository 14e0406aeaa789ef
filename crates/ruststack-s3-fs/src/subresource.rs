//! Bucket and object configuration documents (CORS, website, policy, ...).
//!
//! Documents are opaque text; parsing and validation belong to the request
//! layer. Each lives at `resource_path(bucket, key, "<type>.xml")`, with an
//! empty key for bucket-level documents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::content::{remove_file_if_exists, write_file};
use crate::error::{IoResultExt, StoreResult};
use crate::layout::{ResourceKind, StoreLayout};

/// Kind of configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubresourceType {
    /// Cross-origin resource sharing rules.
    Cors,
    /// Static website hosting configuration.
    Website,
    /// Access policy.
    Policy,
    /// Tag set.
    Tagging,
    /// Lifecycle rules.
    Lifecycle,
    /// Access control list.
    Acl,
}

impl SubresourceType {
    /// Every subresource type.
    pub const ALL: [Self; 6] = [
        Self::Cors,
        Self::Website,
        Self::Policy,
        Self::Tagging,
        Self::Lifecycle,
        Self::Acl,
    ];

    /// Name used in file names and on the command line.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cors => "cors",
            Self::Website => "website",
            Self::Policy => "policy",
            Self::Tagging => "tagging",
            Self::Lifecycle => "lifecycle",
            Self::Acl => "acl",
        }
    }
}

impl fmt::Display for SubresourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`SubresourceType`] from a string fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown subresource type: {0}")]
pub struct ParseSubresourceTypeError(String);

impl FromStr for SubresourceType {
    type Err = ParseSubresourceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseSubresourceTypeError(s.to_owned()))
    }
}

/// Reads and writes opaque configuration documents.
#[derive(Debug, Clone)]
pub struct SubresourceStore {
    layout: StoreLayout,
}

impl SubresourceStore {
    /// Create a subresource store over `layout`.
    #[must_use]
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// Read a document, or `None` if it was never stored.
    pub async fn get(
        &self,
        bucket: &str,
        key: &str,
        ty: SubresourceType,
    ) -> StoreResult<Option<String>> {
        let path = self
            .layout
            .resource_path(bucket, key, ResourceKind::Subresource(ty))?;
        tokio::fs::read_to_string(&path).await.at_or_missing(&path)
    }

    /// Store (or overwrite) a document.
    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        ty: SubresourceType,
        document: &str,
    ) -> StoreResult<()> {
        let path = self
            .layout
            .resource_path(bucket, key, ResourceKind::Subresource(ty))?;
        write_file(&path, document.as_bytes()).await?;
        debug!(bucket, key, subresource = %ty, "stored subresource");
        Ok(())
    }

    /// Remove a document. Removing an absent document succeeds.
    pub async fn delete(&self, bucket: &str, key: &str, ty: SubresourceType) -> StoreResult<()> {
        let path = self
            .layout
            .resource_path(bucket, key, ResourceKind::Subresource(ty))?;
        remove_file_if_exists(&path).await
    }
}
