//! Filesystem-backed S3 object store for RustStack.
//!
//! This crate maps the S3 bucket/key/object model onto an ordinary directory
//! tree. It answers prefix/delimiter/start-after/max-keys listings from a
//! pruned directory walk, assembles out-of-order multipart uploads, persists
//! MD5 ETags and keeps a metadata document next to every object.
//!
//! # Architecture
//!
//! ```text
//! request layer (HTTP, XML, auth; not part of this crate)
//!        |
//!        v
//! FilesystemStore (bucket/object CRUD, copy, delete cleanup)
//!        |
//!        +--> ListingEngine --> DirectoryWalker
//!        +--> MultipartAssembler
//!        +--> ContentWriter / MetadataStore / SubresourceStore
//!        |
//!        v
//! StoreLayout + KeyCodec (bucket/key/resource kind -> path)
//!        |
//!        +--> BlobMirror (optional best-effort replication)
//! ```

pub mod codec;
pub mod config;
pub mod content;
pub mod error;
pub mod layout;
pub mod listing;
pub mod metadata;
pub mod mirror;
pub mod multipart;
pub mod store;
pub mod subresource;
pub mod walker;

pub use config::StoreConfig;
pub use store::FilesystemStore;
