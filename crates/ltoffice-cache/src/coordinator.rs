use crate::cache_dir::{CacheConfig, CacheDir};
use crate::error::CacheError;
use crate::executor::CleanupExecutor;
use crate::identity::DocumentIdentity;
use crate::lock::CacheLock;
use crate::payload::{read_payload, write_payload, PayloadCodec};
use crate::store::IndexStore;
use crate::util::{remove_file_best_effort, LOG_TARGET};
use std::sync::Arc;

/// Saves and restores the analysis bundle of documents through the cache directory.
///
/// Nothing here fails loudly: every error is logged and turned into "no cache".
pub struct CacheCoordinator<C: PayloadCodec> {
    dir: CacheDir,
    min_paragraphs_to_save: usize,
    codec: C,
    executor: CleanupExecutor,
    bundle: Option<Arc<C::Bundle>>,
}

impl<C: PayloadCodec> CacheCoordinator<C> {
    pub fn new(
        config: &CacheConfig,
        codec: C,
        executor: CleanupExecutor,
    ) -> Result<Self, CacheError> {
        let dir = CacheDir::new(config)?;
        Ok(Self {
            dir,
            min_paragraphs_to_save: config.min_paragraphs_to_save,
            codec,
            executor,
            bundle: None,
        })
    }

    pub fn dir(&self) -> &CacheDir {
        &self.dir
    }

    pub fn executor(&self) -> &CleanupExecutor {
        &self.executor
    }

    /// The bundle most recently saved or loaded, until [`Self::reset`].
    pub fn bundle(&self) -> Option<&Arc<C::Bundle>> {
        self.bundle.as_ref()
    }

    /// Persists `bundle` for `document`.
    ///
    /// Documents with fewer than the configured minimum of paragraphs are not cached; any
    /// payload saved for them earlier is deleted.
    pub fn save<D: DocumentIdentity + ?Sized>(
        &mut self,
        document: &D,
        bundle: C::Bundle,
        size: usize,
    ) {
        let Some(doc_id) = document.document_identity() else {
            return;
        };

        if size < self.min_paragraphs_to_save {
            self.discard(&doc_id);
            return;
        }

        let bundle = Arc::new(bundle);
        self.bundle = Some(bundle.clone());

        // Open before locking: a fresh directory is initialized under the same lock.
        let mut store = IndexStore::open(self.dir.clone());
        let lock = match CacheLock::acquire(&self.dir) {
            Ok(lock) => lock,
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    dir = %self.dir.root().display(),
                    error = %err,
                    "failed to lock cache directory"
                );
                return;
            }
        };
        // The mapping and its payload appear together for any cleanup pass.
        let Some(name) = store.get_or_create_file_name_locked(&doc_id, &lock) else {
            return;
        };
        let path = store.cache_file_path(&name);
        let written = write_payload(&path, &self.codec, &bundle);
        drop(lock);
        match written {
            Ok(()) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    doc_id = %doc_id,
                    path = %path.display(),
                    "saved analysis cache"
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    doc_id = %doc_id,
                    path = %path.display(),
                    error = %err,
                    "failed to save analysis cache"
                );
            }
        }
    }

    /// Restores the bundle saved for `document`, if there is a readable one.
    ///
    /// A successful load queues a cleanup pass of the cache directory.
    pub fn load<D: DocumentIdentity + ?Sized>(&mut self, document: &D) -> Option<Arc<C::Bundle>> {
        let doc_id = document.document_identity()?;

        let mut store = IndexStore::open(self.dir.clone());
        let name = store.get_or_create_file_name(&doc_id, false)?;
        let path = store.cache_file_path(&name);

        match read_payload(&path, &self.codec) {
            Ok(bundle) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    doc_id = %doc_id,
                    path = %path.display(),
                    "read analysis cache"
                );
                let bundle = Arc::new(bundle);
                self.bundle = Some(bundle.clone());
                store.clean_up(&self.executor);
                Some(bundle)
            }
            Err(err) if err.is_not_found() => {
                tracing::debug!(
                    target: LOG_TARGET,
                    doc_id = %doc_id,
                    path = %path.display(),
                    "no analysis cache file"
                );
                None
            }
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    doc_id = %doc_id,
                    path = %path.display(),
                    error = %err,
                    "failed to read analysis cache"
                );
                None
            }
        }
    }

    /// Forgets the in-memory bundle. Files on disk are not touched.
    pub fn reset(&mut self) {
        self.bundle = None;
    }

    /// Queues a cleanup pass of the cache directory.
    pub fn clean_up(&self) {
        IndexStore::open(self.dir.clone()).clean_up(&self.executor);
    }

    fn discard(&self, doc_id: &str) {
        let mut store = IndexStore::open(self.dir.clone());
        let Some(name) = store.get_or_create_file_name(doc_id, false) else {
            return;
        };
        let path = store.cache_file_path(&name);

        let _lock = match CacheLock::acquire(&self.dir) {
            Ok(lock) => lock,
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    dir = %self.dir.root().display(),
                    error = %err,
                    "failed to lock cache directory"
                );
                return;
            }
        };
        if path.is_file() && remove_file_best_effort(&path, "save.below_threshold") {
            tracing::debug!(
                target: LOG_TARGET,
                doc_id,
                path = %path.display(),
                "deleted analysis cache of small document"
            );
        }
    }
}
