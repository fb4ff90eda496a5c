use crate::cache_dir::CacheDir;
use crate::error::CacheError;
use crate::index::CacheIndex;
use crate::lock::CacheLock;
use crate::name::is_reserved_name;
use crate::store::{read_index, write_index};
use crate::util::LOG_TARGET;
use std::collections::HashSet;
use std::io;
use std::path::Path;

/// Outcome of one cleanup pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Document identities whose mapping was dropped from the index.
    pub removed_entries: Vec<String>,
    /// Files deleted from the cache directory.
    pub deleted_files: Vec<String>,
    pub failed: Vec<CleanupFailure>,
    /// True if the index file was rewritten.
    pub index_persisted: bool,
}

impl CleanupReport {
    pub fn is_noop(&self) -> bool {
        self.removed_entries.is_empty() && self.deleted_files.is_empty() && !self.index_persisted
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupFailure {
    pub file: String,
    pub error: String,
}

/// Reclaims index entries and cache files that no longer belong to a live document.
///
/// The pass works from a snapshot taken by the caller, so mappings allocated while it runs
/// are never considered. Running it twice in a row is a no-op the second time.
#[derive(Clone, Debug)]
pub struct GarbageCollector {
    dir: CacheDir,
}

impl GarbageCollector {
    pub fn new(dir: CacheDir) -> Self {
        Self { dir }
    }

    /// Runs one cleanup pass:
    /// 1. drops every snapshot entry whose document or cache file is gone, deleting the
    ///    cache file if it is still there
    /// 2. rewrites the index if an entry was dropped
    /// 3. deletes every file in the cache directory that the index does not reference,
    ///    except the index and lock files
    pub fn collect(&self, snapshot: &CacheIndex) -> Result<CleanupReport, CacheError> {
        let _lock = CacheLock::acquire(&self.dir)?;
        let mut report = CleanupReport::default();

        // Start from the index as it is on disk now, so mappings written after the snapshot
        // survive the rewrite below.
        let mut working = match read_index(&self.dir.index_path()) {
            Ok(index) => index,
            Err(err) => {
                if !err.is_not_found() {
                    tracing::debug!(
                        target: LOG_TARGET,
                        path = %self.dir.index_path().display(),
                        error = %err,
                        "failed to read cache index during cleanup; using snapshot"
                    );
                }
                snapshot.snapshot()
            }
        };

        for (doc_id, name) in snapshot.iter() {
            let cache_path = self.dir.cache_file_path(name);
            let doc_exists = Path::new(doc_id).exists();
            let cache_exists = cache_path.exists();
            if doc_exists && cache_exists {
                continue;
            }

            if working.get(doc_id) == Some(name) {
                working.remove(doc_id);
                report.removed_entries.push(doc_id.to_string());
                tracing::debug!(
                    target: LOG_TARGET,
                    doc_id,
                    name,
                    doc_exists,
                    cache_exists,
                    "removing orphaned cache index entry"
                );
            }

            if cache_exists && !working.contains_name(name) {
                delete_file(&cache_path, &mut report);
            }
        }

        if !report.removed_entries.is_empty() {
            write_index(&self.dir, &working)?;
            report.index_persisted = true;
        }

        let referenced: HashSet<&str> = working.iter().map(|(_, name)| name).collect();
        for entry in std::fs::read_dir(self.dir.root())? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(
                        target: LOG_TARGET,
                        dir = %self.dir.root().display(),
                        error = %err,
                        "failed to read cache directory entry"
                    );
                    continue;
                }
            };
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => continue,
                Ok(_) => {}
                Err(err) => {
                    if err.kind() != io::ErrorKind::NotFound {
                        tracing::debug!(
                            target: LOG_TARGET,
                            path = %entry.path().display(),
                            error = %err,
                            "failed to read cache entry file type"
                        );
                    }
                    continue;
                }
            }

            // Names that are not UTF-8 can never be referenced by the index.
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str() {
                if is_reserved_name(name) || referenced.contains(name) {
                    continue;
                }
            }
            delete_file(&entry.path(), &mut report);
        }

        if !report.is_noop() || !report.failed.is_empty() {
            tracing::debug!(
                target: LOG_TARGET,
                dir = %self.dir.root().display(),
                removed_entries = report.removed_entries.len(),
                deleted_files = report.deleted_files.len(),
                failed = report.failed.len(),
                "cache cleanup finished"
            );
        }
        Ok(report)
    }
}

fn delete_file(path: &Path, report: &mut CleanupReport) {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match std::fs::remove_file(path) {
        Ok(()) => report.deleted_files.push(name),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::debug!(
                target: LOG_TARGET,
                path = %path.display(),
                error = %err,
                "failed to delete cache file"
            );
            report.failed.push(CleanupFailure {
                file: name,
                error: err.to_string(),
            });
        }
    }
}
