//! Persistent per-document cache of linguistic-analysis results.
//!
//! Results of expensive document checks are saved to disk so that reopening a document in
//! a new editing session does not re-run them. The analysis caches themselves are opaque
//! here; this crate owns where they live and when their files are reclaimed.
//!
//! ## On-disk layout
//!
//! One cache directory (default `~/.ltoffice/cache`, see [`CacheConfig`]) holds:
//! - `LtCacheMap`: the [`CacheIndex`], mapping document identities to cache file names
//! - `LtCacheMap.lock`: advisory lock serializing writers (see [`CacheLock`])
//! - `LtCache<i>.lcz`: one payload file per cached document
//!
//! Both the index and the payloads are zstd-compressed bincode streams behind a small
//! versioned header, written via temp file + rename.
//!
//! ## Cleanup
//!
//! Every successful load queues a [`GarbageCollector`] pass on the [`CleanupExecutor`]
//! thread. The pass drops index entries whose document or payload disappeared and deletes
//! payload files no entry refers to.

mod cache_dir;
mod coordinator;
mod error;
mod executor;
mod gc;
mod identity;
mod index;
mod lock;
mod name;
mod payload;
mod store;
mod util;

pub use cache_dir::{CacheConfig, CacheDir, MIN_PARAGRAPHS_TO_SAVE_CACHE};
pub use coordinator::CacheCoordinator;
pub use error::{CacheError, Result};
pub use executor::CleanupExecutor;
pub use gc::{CleanupFailure, CleanupReport, GarbageCollector};
pub use identity::{identity_from_url, DocumentIdentity};
pub use index::{Allocation, CacheIndex};
pub use lock::CacheLock;
pub use name::{
    allocate_cache_file_name, cache_file_name, parse_cache_file_name, CACHE_FILE_EXTENSION,
    CACHE_FILE_PREFIX, CACHE_INDEX_FILENAME, CACHE_LOCK_FILENAME,
};
pub use payload::{AnalysisCacheBundle, BincodeCodec, PayloadCodec};
pub use store::IndexStore;
pub use util::BINCODE_PAYLOAD_LIMIT_BYTES;
