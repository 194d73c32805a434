//! Version fingerprint cache
//!
//! Stores the SHA-1 of the raw structure document between runs. An unchanged
//! fingerprint means the server tree has not moved and the whole
//! diff-and-download phase can be skipped.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::hash;

pub struct VersionCache {
    path: Option<PathBuf>,
}

impl VersionCache {
    /// An empty `file_name` disables the cache entirely.
    pub fn new(update_dir: &Path, file_name: &str) -> Self {
        let path = if file_name.is_empty() {
            None
        } else {
            Some(update_dir.join(file_name))
        };
        Self { path }
    }

    pub fn fingerprint(raw: &str) -> String {
        hash::sha1_hex(raw.as_bytes())
    }

    /// Whether the stored fingerprint differs from the given structure text.
    ///
    /// A disabled or missing cache always counts as outdated.
    pub fn is_outdated(&self, raw: &str) -> bool {
        match &self.path {
            None => true,
            Some(path) => match fs::read_to_string(path) {
                Ok(cached) => cached.trim() != Self::fingerprint(raw),
                Err(_) => true,
            },
        }
    }

    /// Persist the fingerprint; called only after a successful run.
    pub fn store(&self, raw: &str) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, Self::fingerprint(raw))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = VersionCache::new(dir.path(), ".version");

        assert!(cache.is_outdated("[]"));
        cache.store("[]").unwrap();
        assert!(!cache.is_outdated("[]"));
        assert!(cache.is_outdated(r#"[{"name":"a"}]"#));
    }

    #[test]
    fn test_disabled_cache_is_always_outdated() {
        let dir = TempDir::new().unwrap();
        let cache = VersionCache::new(dir.path(), "");

        cache.store("[]").unwrap();
        assert!(cache.is_outdated("[]"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
