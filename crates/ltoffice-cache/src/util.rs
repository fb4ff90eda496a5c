use crate::error::CacheError;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Hard upper bound for any cache file (compressed or decompressed) we will read back.
///
/// A corrupted or hostile file should degrade to a cache miss, not an out-of-memory crash.
pub const BINCODE_PAYLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

/// zstd level 0 selects the library default.
const ZSTD_LEVEL: i32 = 0;

pub(crate) const LOG_TARGET: &str = "ltoffice.cache";

/// Self-describing prefix written before every index and payload body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FileHeader {
    pub magic: [u8; 8],
    pub format_version: u32,
}

impl FileHeader {
    pub fn check(&self, path: &Path, magic: [u8; 8], format_version: u32) -> Result<(), CacheError> {
        if self.magic != magic {
            return Err(CacheError::InvalidHeader {
                path: path.to_path_buf(),
            });
        }
        if self.format_version != format_version {
            return Err(CacheError::UnsupportedFormatVersion {
                path: path.to_path_buf(),
                expected: format_version,
                found: self.format_version,
            });
        }
        Ok(())
    }
}

pub(crate) fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

pub(crate) fn bincode_options_limited() -> impl bincode::Options + Copy {
    bincode_options().with_limit(BINCODE_PAYLOAD_LIMIT_BYTES as u64)
}

pub(crate) fn bincode_serialize_into<W: Write, T: Serialize>(
    writer: W,
    value: &T,
) -> Result<(), CacheError> {
    Ok(bincode_options().serialize_into(writer, value)?)
}

pub(crate) fn bincode_deserialize_from<R: Read, T: for<'de> Deserialize<'de>>(
    reader: R,
) -> Result<T, CacheError> {
    Ok(bincode_options_limited().deserialize_from(reader)?)
}

/// Atomically replaces `path` with a zstd stream produced by `write`.
pub(crate) fn write_compressed(
    path: &Path,
    write: impl FnOnce(&mut dyn Write) -> Result<(), CacheError>,
) -> Result<(), CacheError> {
    atomic_write_with(path, |file| {
        let mut encoder = zstd::Encoder::new(file, ZSTD_LEVEL)?;
        write(&mut encoder)?;
        encoder.finish()?;
        Ok(())
    })
}

/// Reads `path` and returns its decompressed contents.
///
/// Both the on-disk size and the decompressed size are capped at
/// [`BINCODE_PAYLOAD_LIMIT_BYTES`].
pub(crate) fn read_compressed(path: &Path) -> Result<Vec<u8>, CacheError> {
    let compressed = read_file_limited(path)?;
    let decoder = zstd::Decoder::with_buffer(compressed.as_slice())?;

    let limit = BINCODE_PAYLOAD_LIMIT_BYTES as u64;
    let mut out = Vec::new();
    decoder.take(limit + 1).read_to_end(&mut out)?;
    if out.len() as u64 > limit {
        return Err(CacheError::PayloadTooLarge {
            path: path.to_path_buf(),
            len: out.len() as u64,
            limit,
        });
    }
    Ok(out)
}

pub(crate) fn read_file_limited(path: &Path) -> Result<Vec<u8>, CacheError> {
    // Avoid following symlinks out of the cache directory.
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() || !meta.is_file() {
        remove_file_best_effort(path, "read_file_limited.invalid_type");
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a regular file").into());
    }

    let limit = BINCODE_PAYLOAD_LIMIT_BYTES as u64;
    if meta.len() > limit {
        remove_file_best_effort(path, "read_file_limited.oversize_meta");
        return Err(CacheError::PayloadTooLarge {
            path: path.to_path_buf(),
            len: meta.len(),
            limit,
        });
    }

    let bytes = fs::read(path)?;
    if bytes.len() as u64 > limit {
        remove_file_best_effort(path, "read_file_limited.oversize_read");
        return Err(CacheError::PayloadTooLarge {
            path: path.to_path_buf(),
            len: bytes.len() as u64,
            limit,
        });
    }
    Ok(bytes)
}

pub(crate) fn remove_file_best_effort(path: &Path, reason: &'static str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::debug!(
                target: LOG_TARGET,
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove cache file"
            );
            false
        }
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Marker embedded in temporary file names created by [`atomic_write_with`].
pub(crate) const TMP_MARKER: &str = ".tmp.";

pub(crate) fn atomic_write_with(
    path: &Path,
    write: impl FnOnce(&mut fs::File) -> Result<(), CacheError>,
) -> Result<(), CacheError> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent").into());
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };

    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let write_result = (|| -> Result<(), CacheError> {
        write(&mut file)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(err) = write_result {
        drop(file);
        remove_file_best_effort(&tmp_path, "atomic_write.write_failed");
        return Err(err);
    }
    drop(file);

    if let Err(err) = rename_replacing(&tmp_path, path) {
        remove_file_best_effort(&tmp_path, "atomic_write.rename_failed");
        return Err(err.into());
    }

    sync_dir_best_effort(parent);
    Ok(())
}

/// Attempts made before a rename blocked by a reader of the destination is reported.
const RENAME_ATTEMPTS: u32 = 5;

fn rename_replacing(from: &Path, to: &Path) -> io::Result<()> {
    rename_with_retry(from, to, |from, to| fs::rename(from, to))
}

/// Retries `rename` while the destination is held open by a reader.
///
/// Windows refuses to replace a file another handle has open (surfacing as
/// `PermissionDenied`) until that handle closes. Every other error is returned at once.
fn rename_with_retry(
    from: &Path,
    to: &Path,
    mut rename: impl FnMut(&Path, &Path) -> io::Result<()>,
) -> io::Result<()> {
    let mut attempt = 1;
    loop {
        match rename(from, to) {
            Ok(()) => return Ok(()),
            Err(err)
                if err.kind() == io::ErrorKind::PermissionDenied && attempt < RENAME_ATTEMPTS =>
            {
                tracing::trace!(
                    target: LOG_TARGET,
                    path = %to.display(),
                    attempt,
                    "cache file busy; retrying rename"
                );
                std::thread::sleep(Duration::from_millis(2 * u64::from(attempt)));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Makes the rename itself durable. Only meaningful on unix; failures are not fatal since
/// the file contents were already synced.
fn sync_dir_best_effort(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(err) = fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            tracing::trace!(
                target: LOG_TARGET,
                dir = %dir.display(),
                error = %err,
                "failed to sync cache directory"
            );
        }
    }

    #[cfg(not(unix))]
    let _ = dir;
}

/// Creates `<dest file name>.tmp.<pid>.<n>` next to `dest`. Stale names left by a crashed
/// writer are skipped; the cleanup sweep deletes them later.
fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let base = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let mut name = base.to_os_string();
        name.push(format!(
            "{TMP_MARKER}{pid}.{}",
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let tmp_path = parent.join(name);

        let opened = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path);
        match opened {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }
}
