use crate::error::CacheError;
use crate::name::{CACHE_INDEX_FILENAME, CACHE_LOCK_FILENAME};
use std::path::{Path, PathBuf};

/// Documents with fewer paragraphs than this are not worth caching.
pub const MIN_PARAGRAPHS_TO_SAVE_CACHE: usize = 30;

/// Configuration for the on-disk cache.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Override the cache directory (defaults to `~/.ltoffice/cache`).
    pub cache_dir_override: Option<PathBuf>,
    /// Minimum document size (in paragraphs) for which a payload is persisted.
    pub min_paragraphs_to_save: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir_override: None,
            min_paragraphs_to_save: MIN_PARAGRAPHS_TO_SAVE_CACHE,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            cache_dir_override: std::env::var_os("LTOFFICE_CACHE_DIR").map(PathBuf::from),
            ..Self::default()
        }
    }

    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir_override: Some(dir.into()),
            ..Self::default()
        }
    }
}

/// The cache directory: one index file, one lock file and the payload files it names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    /// Resolves the configured directory and creates it if needed.
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let root = match &config.cache_dir_override {
            Some(root) => root.clone(),
            None => default_cache_root()?,
        };
        Self::at(root)
    }

    pub fn at(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(CACHE_INDEX_FILENAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(CACHE_LOCK_FILENAME)
    }

    pub fn cache_file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

pub(crate) fn default_cache_root() -> Result<PathBuf, CacheError> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or(CacheError::MissingHomeDir)?;

    Ok(home.join(".ltoffice").join("cache"))
}
