//! Stable symlink namespace persisted out-of-band from file content
//! (SPEC_FULL.md §3, §4.A).
//!
//! Symlinks are not stored as object-store entries; they live in a separate
//! indexed table keyed by canonical path (§6 persistence). The namespace
//! loads that table in bulk at startup and serves resolution out of an
//! in-memory cache thereafter, funneling writes through a single-writer API.

use crate::error::{WasiErrorCode, WasiResult};
use crate::path::{canonicalize, CanonicalPath};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

/// POSIX `SYMLOOP_MAX`: the resolver gives up and reports *loop* after this
/// many target substitutions.
const SYMLOOP_MAX: usize = 40;

/// A single `{ path, target }` row of the persisted symlink table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymlinkEntry {
    pub path: CanonicalPath,
    pub target: String,
}

/// Backing store for the symlink table: a single indexed table with schema
/// `{ path: string primary-key, target: string }` (§6). Implementations
/// talk to whatever persistence layer the embedder provides (e.g. an
/// IndexedDB object store in the browser).
#[async_trait]
pub trait SymlinkStore: Send + Sync {
    /// Loads every row, for the bulk load at startup.
    async fn load_all(&self) -> std::io::Result<Vec<SymlinkEntry>>;
    /// Upserts a single row.
    async fn put(&self, entry: SymlinkEntry) -> std::io::Result<()>;
    /// Deletes every row whose path equals or is a descendant of `prefix`.
    async fn delete_prefix(&self, prefix: &CanonicalPath) -> std::io::Result<()>;
}

/// An in-memory symlink cache, loaded once from a [`SymlinkStore`] and kept
/// consistent with it on every write.
pub struct SymlinkNamespace {
    store: Box<dyn SymlinkStore>,
    cache: RwLock<HashMap<String, String>>,
}

impl SymlinkNamespace {
    /// Loads the full table from `store` into an in-memory cache.
    pub async fn load(store: Box<dyn SymlinkStore>) -> std::io::Result<Self> {
        let rows = store.load_all().await?;
        let mut cache = HashMap::with_capacity(rows.len());
        for row in rows {
            cache.insert(row.path.as_str().to_string(), row.target);
        }
        Ok(SymlinkNamespace {
            store,
            cache: RwLock::new(cache),
        })
    }

    /// Creates a symlink at `path` pointing at `target`. `path` must not
    /// already name a file, directory, or symlink.
    pub async fn create(&self, path: CanonicalPath, target: String) -> WasiResult<()> {
        if path.is_root() {
            return Err(WasiErrorCode::Invalid);
        }
        {
            let mut cache = self.cache.write();
            cache.insert(path.as_str().to_string(), target.clone());
        }
        self.store
            .put(SymlinkEntry { path, target })
            .await
            .map_err(WasiErrorCode::from)
    }

    /// Looks up the raw target of `path` if it names a symlink.
    pub fn target_of(&self, path: &CanonicalPath) -> Option<String> {
        self.cache.read().get(path.as_str()).cloned()
    }

    /// Removes every symlink under (and including) `prefix`. Called when a
    /// directory is removed.
    pub async fn remove_prefix(&self, prefix: &CanonicalPath) -> WasiResult<()> {
        {
            let mut cache = self.cache.write();
            cache.retain(|p, _| {
                let candidate = canonicalize(p).unwrap_or_else(|_| CanonicalPath::root());
                !prefix.is_prefix_of(&candidate)
            });
        }
        self.store
            .delete_prefix(prefix)
            .await
            .map_err(WasiErrorCode::from)
    }

    /// Resolves `path`, substituting any symlinked prefix component for its
    /// target and restarting resolution from the beginning, up to
    /// [`SYMLOOP_MAX`] substitutions. If `follow_final` is false, a symlink
    /// in the final component position is left unresolved.
    pub fn resolve(&self, path: &CanonicalPath, follow_final: bool) -> WasiResult<CanonicalPath> {
        let cache = self.cache.read();
        let mut remaining: VecDeque<String> =
            path.components().map(|c| c.to_string()).collect();
        let mut resolved: Vec<String> = Vec::new();
        let mut substitutions = 0usize;

        while let Some(component) = remaining.pop_front() {
            resolved.push(component);
            let is_final = remaining.is_empty();
            if is_final && !follow_final {
                continue;
            }
            let candidate = CanonicalPath::root()
                .join(&resolved.join("/"))
                .unwrap_or_else(|_| CanonicalPath::root());
            if let Some(target) = cache.get(candidate.as_str()) {
                substitutions += 1;
                if substitutions > SYMLOOP_MAX {
                    return Err(WasiErrorCode::Loop);
                }
                let parent = candidate.parent().unwrap_or_else(CanonicalPath::root);
                let new_prefix = if target.starts_with('/') {
                    canonicalize(target)?
                } else {
                    parent.join(target)?
                };
                resolved.clear();
                for c in new_prefix.components().rev() {
                    remaining.push_front(c.to_string());
                }
            }
        }
        Ok(CanonicalPath::root().join(&resolved.join("/")).unwrap_or_else(|_| CanonicalPath::root()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl SymlinkStore for MemoryStore {
        async fn load_all(&self) -> std::io::Result<Vec<SymlinkEntry>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .map(|(p, t)| SymlinkEntry {
                    path: canonicalize(p).unwrap(),
                    target: t.clone(),
                })
                .collect())
        }
        async fn put(&self, entry: SymlinkEntry) -> std::io::Result<()> {
            self.rows
                .lock()
                .unwrap()
                .insert(entry.path.as_str().to_string(), entry.target);
            Ok(())
        }
        async fn delete_prefix(&self, prefix: &CanonicalPath) -> std::io::Result<()> {
            self.rows
                .lock()
                .unwrap()
                .retain(|p, _| !prefix.is_prefix_of(&canonicalize(p).unwrap()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn resolves_single_symlink() {
        let ns = SymlinkNamespace::load(Box::new(MemoryStore::default()))
            .await
            .unwrap();
        ns.create(canonicalize("/a").unwrap(), "/b".to_string())
            .await
            .unwrap();
        let resolved = ns
            .resolve(&canonicalize("/a/c").unwrap(), true)
            .unwrap();
        assert_eq!(resolved.as_str(), "b/c");
    }

    #[tokio::test]
    async fn detects_loop() {
        let ns = SymlinkNamespace::load(Box::new(MemoryStore::default()))
            .await
            .unwrap();
        ns.create(canonicalize("/x").unwrap(), "/y".to_string())
            .await
            .unwrap();
        ns.create(canonicalize("/y").unwrap(), "/x".to_string())
            .await
            .unwrap();
        let err = ns.resolve(&canonicalize("/x").unwrap(), true).unwrap_err();
        assert_eq!(err, WasiErrorCode::Loop);
    }

    #[tokio::test]
    async fn follow_final_false_leaves_final_symlink() {
        let ns = SymlinkNamespace::load(Box::new(MemoryStore::default()))
            .await
            .unwrap();
        ns.create(canonicalize("/a").unwrap(), "/b".to_string())
            .await
            .unwrap();
        let resolved = ns.resolve(&canonicalize("/a").unwrap(), false).unwrap();
        assert_eq!(resolved.as_str(), "a");
    }

    #[tokio::test]
    async fn remove_prefix_clears_descendants() {
        let ns = SymlinkNamespace::load(Box::new(MemoryStore::default()))
            .await
            .unwrap();
        ns.create(canonicalize("/dir/link").unwrap(), "/target".to_string())
            .await
            .unwrap();
        ns.remove_prefix(&canonicalize("/dir").unwrap())
            .await
            .unwrap();
        assert!(ns.target_of(&canonicalize("/dir/link").unwrap()).is_none());
    }
}
