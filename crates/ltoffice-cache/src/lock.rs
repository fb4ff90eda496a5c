use crate::cache_dir::CacheDir;
use crate::error::CacheError;
use fs2::FileExt as _;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Exclusive lock over a cache directory.
///
/// Held while the index file is rewritten, while a payload file is written and for the
/// whole mutating part of a cleanup pass. Released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    // `fs2` locks are process-scoped on Unix and don't exclude other threads, so an
    // in-process mutex per lock path is held alongside the file lock.
    _guard: MutexGuard<'static, ()>,
}

impl CacheLock {
    /// Blocks until the lock for `dir` is available.
    pub fn acquire(dir: &CacheDir) -> Result<Self, CacheError> {
        Self::lock_path(&dir.lock_path())
    }

    fn lock_path(path: &Path) -> Result<Self, CacheError> {
        let guard = process_lock_for_path(path)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;

        Ok(Self {
            file,
            _guard: guard,
        })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn process_lock_for_path(path: &Path) -> &'static Mutex<()> {
    static PROCESS_LOCKS: OnceLock<Mutex<HashMap<PathBuf, &'static Mutex<()>>>> = OnceLock::new();
    let locks = PROCESS_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));

    let mut map = locks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *map.entry(path.to_path_buf())
        .or_insert_with(|| &*Box::leak(Box::new(Mutex::new(()))))
}
