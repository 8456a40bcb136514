//! Random-access virtual files backed by Usenet article segments.
//!
//! A file posted to Usenet is split into many articles, each carrying a
//! yEnc-encoded slice of the file. This crate presents such a file as an
//! ordinary read-only handle: a byte range request is mapped onto the
//! articles that cover it, each article is fetched and decoded on demand,
//! and the decoded bytes are trimmed and concatenated in order.
//!
//! ## Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`filesystem`] | path resolution: [`MetadataFs::open`], [`MetadataFs::describe`] |
//! | [`virtual_file`] | [`VirtualFile`] read loop, windowing, per-handle reader cache |
//! | [`directory`] | [`VirtualDirectory`] listings |
//! | [`segmented`] | [`SegmentedReaderFactory`]: plan + fetch + decode + concatenate |
//! | [`planner`] | logical byte range to article slices |
//! | [`segment_stream`] | one article: sniff, decode, skip, bound |
//! | [`yenc`] | streaming yEnc decoder and encoder |
//! | [`metadata`] | file records and the [`MetadataStore`] trait |
//!
//! Network access is not part of the crate: articles come from an
//! [`ArticleFetcher`], or whole windows from any [`ReaderFactory`].
//!
//! ## Features
//! - Core library depends only on `thiserror`, `tracing` and `chrono`
//! - `async` - chunked reads on the tokio blocking pool
//! - `crypto` - AES-256-CBC encrypted files
//! - `serde` - serde derives and the JSON directory-backed metadata store

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
mod crc32;
pub mod directory;
pub mod encryption;
pub mod error;
pub mod filesystem;
pub mod health;
pub mod metadata;
pub mod planner;
pub mod range;
pub mod segment_stream;
pub mod segmented;
pub mod source;
pub mod virtual_file;
pub mod yenc;

#[cfg(feature = "async")]
#[cfg_attr(docsrs, doc(cfg(feature = "async")))]
pub mod async_stream;

pub use config::StreamConfig;
pub use directory::{FileInfo, VirtualDirectory};
pub use encryption::EncryptionAdapter;
pub use error::{Result, VfsError};
pub use filesystem::{normalize_path, Entry, MetadataFs, MetadataFsBuilder};
pub use health::{HealthReporter, NoopHealthReporter};
pub use metadata::{
    Encryption, FileDescriptor, FileMetadata, FileStatus, MemoryMetadataStore, MetadataStore,
    SegmentRecord,
};
pub use planner::{plan, plan_metadata, PhysicalSegment, ResolvedSegment, SegmentRange};
pub use range::{ByteRange, ServedRange};
pub use segment_stream::SegmentDecodeStream;
pub use segmented::{ArticleFetcher, SegmentedReaderFactory};
pub use source::{BoxedStream, ReadStream, ReaderFactory, ReaderFactoryFn};
pub use virtual_file::VirtualFile;

#[cfg(feature = "async")]
pub use async_stream::ChunkStream;

#[cfg(feature = "crypto")]
pub use encryption::AesCbcAdapter;

#[cfg(feature = "serde")]
pub use metadata::FsMetadataStore;
