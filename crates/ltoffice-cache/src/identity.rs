use crate::util::LOG_TARGET;
use std::path::{Path, PathBuf};
use url::Url;

/// Something that may have a durable backing location.
///
/// The identity is the key of the cache index. Documents without one (unsaved, remote,
/// embedded) are never cached.
pub trait DocumentIdentity {
    fn document_identity(&self) -> Option<String>;
}

impl DocumentIdentity for str {
    fn document_identity(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl DocumentIdentity for String {
    fn document_identity(&self) -> Option<String> {
        self.as_str().document_identity()
    }
}

impl DocumentIdentity for Path {
    fn document_identity(&self) -> Option<String> {
        if !self.is_absolute() {
            return None;
        }
        Some(self.to_string_lossy().into_owned())
    }
}

impl DocumentIdentity for PathBuf {
    fn document_identity(&self) -> Option<String> {
        self.as_path().document_identity()
    }
}

impl DocumentIdentity for Url {
    fn document_identity(&self) -> Option<String> {
        if self.scheme() != "file" {
            return None;
        }
        self.to_file_path().ok()?.document_identity()
    }
}

impl<T: DocumentIdentity + ?Sized> DocumentIdentity for &T {
    fn document_identity(&self) -> Option<String> {
        (**self).document_identity()
    }
}

/// Resolves the document URL reported by the office host to a filesystem path identity.
///
/// Only `file:` URLs have one. Empty URLs (new, never-saved documents) are silently
/// ignored; anything else is logged.
pub fn identity_from_url(url: &str) -> Option<String> {
    if url.is_empty() {
        return None;
    }
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::debug!(target: LOG_TARGET, url, error = %err, "invalid document URL");
            return None;
        }
    };
    if parsed.scheme() != "file" {
        tracing::debug!(target: LOG_TARGET, url, "not a file URL; document is not cached");
        return None;
    }
    parsed.document_identity()
}
