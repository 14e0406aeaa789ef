//! `ListObjects` over a directory tree.
//!
//! A listing is answered in two phases:
//!
//! 1. **Scan** (blocking pool): walk the bucket directory in key order,
//!    pruning subtrees that cannot contribute, and collect candidate keys,
//!    common prefixes and the truncation flag.
//! 2. **Resolve** (async): load the metadata of every candidate concurrently
//!    and drop candidates deleted since the scan.
//!
//! Siblings are visited by decoded key fragment (a file sorts as its key
//! segment, a directory as its segment followed by `/`), so the walk yields
//! objects in exactly the order of their keys and the first `max_keys`
//! accepted keys are the lexicographically smallest ones.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path};

use tracing::debug;
use typed_builder::TypedBuilder;

use crate::codec::KeyCodec;
use crate::error::{StoreError, StoreResult};
use crate::layout::{RESOURCE_MARKER, ResourceKind, StoreLayout, split_resource_file_name};
use crate::metadata::{MetadataStore, ObjectMetadata};
use crate::walker::DirectoryWalker;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Parameters of a listing request.
///
/// # Examples
///
/// ```
/// use ruststack_s3_fs::listing::ListObjectsOptions;
///
/// let opts = ListObjectsOptions::builder()
///     .prefix("photos/")
///     .delimiter("/")
///     .max_keys(100)
///     .build();
/// assert_eq!(opts.prefix, "photos/");
/// assert!(opts.start_after.is_empty());
/// ```
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct ListObjectsOptions {
    /// Only keys starting with this prefix are listed.
    #[builder(default, setter(into))]
    pub prefix: String,
    /// Groups keys sharing the text up to the first delimiter after the
    /// prefix. `None` or empty disables grouping.
    #[builder(default, setter(into, strip_option))]
    pub delimiter: Option<String>,
    /// Exclusive lower bound on returned keys.
    #[builder(default, setter(into))]
    pub start_after: String,
    /// Upper bound on returned keys. `None` is unbounded.
    #[builder(default, setter(strip_option))]
    pub max_keys: Option<usize>,
}

impl ListObjectsOptions {
    fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref().filter(|d| !d.is_empty())
    }
}

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// The object key.
    pub key: String,
    /// The object's metadata.
    pub metadata: ObjectMetadata,
}

/// A page of listing results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsResult {
    /// Matching objects in key order.
    pub objects: Vec<ObjectSummary>,
    /// Collapsed common prefixes, ascending.
    pub common_prefixes: Vec<String>,
    /// Whether more keys matched than were returned.
    pub is_truncated: bool,
    /// When truncated, the key to pass as `start_after` to continue.
    pub next_marker: Option<String>,
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

/// Outcome of the blocking scan phase.
#[derive(Debug, Default, PartialEq, Eq)]
struct ScanResult {
    keys: Vec<String>,
    common_prefixes: Vec<String>,
    is_truncated: bool,
}

/// Walk `bucket_root` and select keys per `options`.
fn scan(bucket_root: &Path, codec: KeyCodec, options: &ListObjectsOptions) -> io::Result<ScanResult> {
    let prefix = options.prefix.as_str();
    let start_after = options.start_after.as_str();
    let delimiter = options.delimiter();
    let max_keys = options.max_keys.unwrap_or(usize::MAX);

    // Shared by the pruning predicate and the selection loop: a subtree is
    // only skipped once the common prefix it collapses into is recorded.
    let seen_prefixes = RefCell::new(BTreeSet::new());

    let walker = DirectoryWalker::new(bucket_root)
        .sort_by(move |name, is_dir| sort_key(codec, name, is_dir))
        .should_descend(|dir| {
            let Some(dir_prefix) = relative_dir_prefix(bucket_root, dir, codec) else {
                return false;
            };
            !prunes(&dir_prefix, prefix, start_after, delimiter, &seen_prefixes.borrow())
        });

    let mut result = ScanResult::default();
    for file in walker {
        let file = file?;
        let Some(key) = object_key(bucket_root, &file, codec) else {
            continue;
        };
        if key.as_str() <= start_after || !key.starts_with(prefix) {
            continue;
        }

        if let Some(cp) = delimiter.and_then(|d| common_prefix(&key, prefix, d)) {
            seen_prefixes.borrow_mut().insert(cp);
            continue;
        }

        if result.keys.len() >= max_keys {
            result.is_truncated = true;
            break;
        }
        result.keys.push(key);
    }

    result.common_prefixes = seen_prefixes.into_inner().into_iter().collect();
    Ok(result)
}

/// Whether a directory whose keys all start with `dir_prefix` can be skipped.
fn prunes(
    dir_prefix: &str,
    prefix: &str,
    start_after: &str,
    delimiter: Option<&str>,
    seen_prefixes: &BTreeSet<String>,
) -> bool {
    // Entirely before the resume point.
    if !start_after.is_empty() && dir_prefix < start_after && !start_after.starts_with(dir_prefix) {
        return true;
    }
    // Cannot intersect the requested prefix.
    if !dir_prefix.starts_with(prefix) && !prefix.starts_with(dir_prefix) {
        return true;
    }
    // Collapses into a common prefix that is already reported.
    if let Some(d) = delimiter {
        if let Some(cp) = common_prefix(dir_prefix, prefix, d) {
            return seen_prefixes.contains(&cp);
        }
    }
    false
}

/// The common prefix `key` collapses into: everything up to and including
/// the first `delimiter` after `prefix`.
fn common_prefix(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    let rest = key.strip_prefix(prefix)?;
    let pos = rest.find(delimiter)?;
    Some(format!("{prefix}{}{delimiter}", &rest[..pos]))
}

/// Sibling order: decoded key fragment, directories suffixed with `/`.
fn sort_key(codec: KeyCodec, name: &str, is_dir: bool) -> String {
    if is_dir {
        let decoded = codec.decode_segment(name).unwrap_or(Cow::Borrowed(name));
        return format!("{decoded}/");
    }
    match split_resource_file_name(name) {
        Some((segment, _)) => codec
            .decode_segment(segment)
            .map_or_else(|| segment.to_owned(), Cow::into_owned),
        None => name.to_owned(),
    }
}

/// Decode the directories between `root` and `dir` into a key prefix ending
/// in `/`. `None` for staging directories and foreign names.
fn relative_dir_prefix(root: &Path, dir: &Path, codec: KeyCodec) -> Option<String> {
    let rel = dir.strip_prefix(root).ok()?;
    let mut prefix = String::new();
    for segment in decoded_segments(rel, codec)? {
        prefix.push_str(&segment);
        prefix.push('/');
    }
    Some(prefix)
}

/// Reconstruct the key of an object content file, or `None` for any other
/// file.
fn object_key(root: &Path, file: &Path, codec: KeyCodec) -> Option<String> {
    let rel = file.strip_prefix(root).ok()?;
    let name = rel.file_name()?.to_str()?;
    let (segment, kind) = split_resource_file_name(name)?;
    if kind != ResourceKind::Object.suffix() {
        return None;
    }
    let last = codec.decode_segment(segment)?;
    if last.contains('/') {
        return None;
    }

    let mut key = String::new();
    for dir in decoded_segments(rel.parent()?, codec)? {
        key.push_str(&dir);
        key.push('/');
    }
    key.push_str(&last);
    (!key.is_empty()).then_some(key)
}

fn decoded_segments(rel: &Path, codec: KeyCodec) -> Option<Vec<String>> {
    rel.components()
        .map(|c| match c {
            Component::Normal(os) => {
                let raw = os.to_str()?;
                if raw.contains(RESOURCE_MARKER) {
                    return None;
                }
                let decoded = codec.decode_segment(raw)?;
                (!decoded.contains('/')).then(|| decoded.into_owned())
            }
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ListingEngine
// ---------------------------------------------------------------------------

/// Answers listing requests for one store.
#[derive(Debug, Clone)]
pub struct ListingEngine {
    layout: StoreLayout,
    metadata: MetadataStore,
}

impl ListingEngine {
    /// Create a listing engine.
    #[must_use]
    pub fn new(layout: StoreLayout, metadata: MetadataStore) -> Self {
        Self { layout, metadata }
    }

    /// List the objects of `bucket`. A missing bucket lists as empty.
    pub async fn list(
        &self,
        bucket: &str,
        options: &ListObjectsOptions,
    ) -> StoreResult<ListObjectsResult> {
        let bucket_root = self.layout.bucket_path(bucket)?;
        let codec = self.layout.codec();
        let scan_root = bucket_root.clone();
        let scan_options = options.clone();

        let scanned = tokio::task::spawn_blocking(move || scan(&scan_root, codec, &scan_options))
            .await
            .map_err(|e| StoreError::Internal(anyhow::anyhow!("listing scan task failed: {e}")))?
            .map_err(|e| StoreError::io(&bucket_root, e))?;

        let next_marker = if scanned.is_truncated {
            scanned.keys.last().cloned()
        } else {
            None
        };

        let lookups = scanned.keys.into_iter().map(|key| async move {
            let metadata = self.metadata.get(bucket, &key).await?;
            Ok::<_, StoreError>(metadata.map(|metadata| ObjectSummary { key, metadata }))
        });
        let mut objects = Vec::new();
        for found in futures::future::join_all(lookups).await {
            // Deleted between scan and lookup.
            if let Some(summary) = found? {
                objects.push(summary);
            }
        }

        debug!(
            bucket,
            prefix = %options.prefix,
            objects = objects.len(),
            common_prefixes = scanned.common_prefixes.len(),
            is_truncated = scanned.is_truncated,
            "listed objects"
        );

        Ok(ListObjectsResult {
            objects,
            common_prefixes: scanned.common_prefixes,
            is_truncated: scanned.is_truncated,
            next_marker,
        })
    }
}
