use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced while reading or writing the cache directory.
///
/// None of these reach the host application: [`crate::CacheCoordinator`] logs them and
/// degrades to a cache miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to determine home directory for default cache path")]
    MissingHomeDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("payload codec error: {message}")]
    Codec { message: String },

    #[error("invalid header in {path}")]
    InvalidHeader { path: PathBuf },

    #[error("unsupported cache format version in {path}: expected {expected}, found {found}")]
    UnsupportedFormatVersion {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("cache file {path} is too large: {len} bytes (limit {limit} bytes)")]
    PayloadTooLarge { path: PathBuf, len: u64, limit: u64 },
}

impl CacheError {
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec {
            message: err.to_string(),
        }
    }

    /// True for failures that just mean "nothing cached yet".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound)
    }
}
