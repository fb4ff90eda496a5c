use crate::cache_dir::CacheDir;
use crate::error::CacheError;
use crate::executor::CleanupExecutor;
use crate::index::CacheIndex;
use crate::lock::CacheLock;
use crate::util::{
    bincode_deserialize_from, bincode_serialize_into, read_compressed, write_compressed,
    FileHeader, LOG_TARGET,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const INDEX_MAGIC: [u8; 8] = *b"LTCMAP01";
const INDEX_FORMAT_VERSION: u32 = 1;

/// Durable home of the [`CacheIndex`] for one cache directory.
///
/// The index file is rewritten in full (temp file + rename) after every mutation, before
/// the mutating call returns.
#[derive(Debug)]
pub struct IndexStore {
    dir: CacheDir,
    index: CacheIndex,
}

impl IndexStore {
    /// Loads the index of `dir`.
    ///
    /// A missing index file is created empty right away. An unreadable one is logged and
    /// replaced by an empty index in memory; it is overwritten on the next mutation.
    pub fn open(dir: CacheDir) -> Self {
        let index_path = dir.index_path();
        match read_index(&index_path) {
            Ok(index) => Self { dir, index },
            Err(err) if err.is_not_found() => {
                let store = Self {
                    dir,
                    index: CacheIndex::new(),
                };
                store.initialize();
                store
            }
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    path = %index_path.display(),
                    error = %err,
                    "failed to read cache index; starting with an empty index"
                );
                Self {
                    dir,
                    index: CacheIndex::new(),
                }
            }
        }
    }

    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.index_path()
    }

    pub fn cache_file_path(&self, name: &str) -> PathBuf {
        self.dir.cache_file_path(name)
    }

    /// Returns the cache file name of `doc_id`, allocating and persisting a new mapping when
    /// none exists and `create` is set.
    ///
    /// A failed persist is logged; the returned name stays valid for this store.
    pub fn get_or_create_file_name(&mut self, doc_id: &str, create: bool) -> Option<String> {
        if let Some(name) = self.index.get(doc_id) {
            return Some(name.to_string());
        }
        if !create {
            return None;
        }

        let lock = match CacheLock::acquire(&self.dir) {
            Ok(lock) => lock,
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    dir = %self.dir.root().display(),
                    error = %err,
                    "failed to lock cache directory"
                );
                return None;
            }
        };
        self.get_or_create_file_name_locked(doc_id, &lock)
    }

    /// Allocating half of [`Self::get_or_create_file_name`] for a caller that already holds
    /// the directory lock, so it can write the payload before a cleanup pass sees the new
    /// mapping.
    pub(crate) fn get_or_create_file_name_locked(
        &mut self,
        doc_id: &str,
        _lock: &CacheLock,
    ) -> Option<String> {
        // Pick up mappings written since `open` (another store or a cleanup pass) so this
        // persist does not drop them.
        match read_index(&self.dir.index_path()) {
            Ok(on_disk) => self.index = on_disk,
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    path = %self.dir.index_path().display(),
                    error = %err,
                    "failed to refresh cache index before allocation"
                );
            }
        }

        let allocation = self.index.get_or_create(doc_id, true)?;
        if allocation.created {
            if let Err(err) = write_index(&self.dir, &self.index) {
                tracing::warn!(
                    target: LOG_TARGET,
                    path = %self.dir.index_path().display(),
                    error = %err,
                    "failed to persist cache index"
                );
            } else {
                tracing::debug!(
                    target: LOG_TARGET,
                    doc_id,
                    name = %allocation.name,
                    "allocated cache file"
                );
            }
        }
        Some(allocation.name)
    }

    /// Rewrites the index file from the in-memory index.
    pub fn persist(&self) -> Result<(), CacheError> {
        let _lock = CacheLock::acquire(&self.dir)?;
        write_index(&self.dir, &self.index)
    }

    /// Queues a cleanup pass over a snapshot of the current index.
    pub fn clean_up(&self, executor: &CleanupExecutor) {
        executor.submit(self.dir.clone(), self.index.snapshot());
    }

    fn initialize(&self) {
        let result = CacheLock::acquire(&self.dir).and_then(|_lock| {
            // Another store may have created it while we waited for the lock.
            if self.dir.index_path().exists() {
                return Ok(());
            }
            write_index(&self.dir, &self.index)
        });
        if let Err(err) = result {
            tracing::warn!(
                target: LOG_TARGET,
                path = %self.dir.index_path().display(),
                error = %err,
                "failed to create cache index"
            );
        }
    }
}

/// Decodes the index file at `path`.
pub(crate) fn read_index(path: &Path) -> Result<CacheIndex, CacheError> {
    let bytes = read_compressed(path)?;
    let mut reader = bytes.as_slice();
    let header: FileHeader = bincode_deserialize_from(&mut reader)?;
    header.check(path, INDEX_MAGIC, INDEX_FORMAT_VERSION)?;
    let entries: BTreeMap<String, String> = bincode_deserialize_from(&mut reader)?;
    Ok(CacheIndex::from_entries(entries))
}

/// Overwrites the index file of `dir`. Callers hold the directory lock.
pub(crate) fn write_index(dir: &CacheDir, index: &CacheIndex) -> Result<(), CacheError> {
    let header = FileHeader {
        magic: INDEX_MAGIC,
        format_version: INDEX_FORMAT_VERSION,
    };
    write_compressed(&dir.index_path(), |w| {
        bincode_serialize_into(&mut *w, &header)?;
        bincode_serialize_into(w, index.entries())
    })
}
