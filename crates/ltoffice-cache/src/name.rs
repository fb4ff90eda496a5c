//! Cache file naming.
//!
//! Payload file names are generated (`LtCache<i>.lcz`), never derived from the document
//! identity, so arbitrary document paths never leak into the cache directory layout.

use std::collections::HashSet;

/// Reserved name of the index file inside the cache directory.
pub const CACHE_INDEX_FILENAME: &str = "LtCacheMap";

/// Reserved name of the lock file guarding the cache directory.
pub const CACHE_LOCK_FILENAME: &str = "LtCacheMap.lock";

pub const CACHE_FILE_PREFIX: &str = "LtCache";
pub const CACHE_FILE_EXTENSION: &str = ".lcz";

/// Formats sequence number `i` as a cache file name.
pub fn cache_file_name(i: u64) -> String {
    format!("{CACHE_FILE_PREFIX}{i}{CACHE_FILE_EXTENSION}")
}

/// Inverse of [`cache_file_name`]. Returns `None` for anything that is not a canonical
/// cache file name (`LtCache0.lcz`, `LtCache01.lcz` and `LtCacheMap` included).
pub fn parse_cache_file_name(name: &str) -> Option<u64> {
    let digits = name
        .strip_prefix(CACHE_FILE_PREFIX)?
        .strip_suffix(CACHE_FILE_EXTENSION)?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Returns the smallest-numbered cache file name not contained in `existing`.
///
/// `existing` is the set of names currently referenced by the index; the filesystem is not
/// consulted. Freed numbers are handed out again.
pub fn allocate_cache_file_name<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let taken: HashSet<&str> = existing.into_iter().collect();
    let mut i = 1u64;
    loop {
        let name = cache_file_name(i);
        if !taken.contains(name.as_str()) {
            return name;
        }
        i += 1;
    }
}

/// True for the names cleanup must never delete.
pub(crate) fn is_reserved_name(name: &str) -> bool {
    name == CACHE_INDEX_FILENAME || name == CACHE_LOCK_FILENAME
}
