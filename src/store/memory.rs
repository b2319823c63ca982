//! An in-memory [`ObjectStore`] double used by the bridge's own tests and by
//! embedders that want the bridge's logic without a real browser storage
//! backend. It enforces the same `io::ErrorKind` contract as a real adapter
//! would (§4.B): *no-entry*, *is-directory*, *not-directory*, *permission*,
//! *io*.

use super::{DirHandle, EntryKind, FileHandle, ListEntry, ObjectStat, ObjectStore};
use crate::path::CanonicalPath;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug)]
enum Node {
    Dir,
    File { data: Vec<u8>, mtime_ms: u64 },
}

type Entries = Arc<Mutex<BTreeMap<String, Node>>>;

/// A process-local, in-memory object store keyed by canonical path.
pub struct MemoryObjectStore {
    entries: Entries,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        MemoryObjectStore::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(String::new(), Node::Dir);
        MemoryObjectStore {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    fn has_children(&self, prefix: &str) -> bool {
        let entries = self.entries.lock();
        let probe = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        entries
            .keys()
            .any(|k| k != prefix && (prefix.is_empty() || k.starts_with(&probe)))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn open_dir(&self, path: &CanonicalPath, create: bool) -> io::Result<DirHandle> {
        let mut entries = self.entries.lock();
        match entries.get(path.as_str()) {
            Some(Node::Dir) => Ok(DirHandle(path.clone())),
            Some(Node::File { .. }) => Err(io::Error::from(io::ErrorKind::NotADirectory)),
            None if create => {
                entries.insert(path.as_str().to_string(), Node::Dir);
                Ok(DirHandle(path.clone()))
            }
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    async fn open_file(&self, path: &CanonicalPath, create: bool) -> io::Result<FileHandle> {
        let mut entries = self.entries.lock();
        match entries.get(path.as_str()) {
            Some(Node::File { .. }) => Ok(FileHandle(path.clone())),
            Some(Node::Dir) => Err(io::Error::from(io::ErrorKind::IsADirectory)),
            None if create => {
                entries.insert(
                    path.as_str().to_string(),
                    Node::File {
                        data: Vec::new(),
                        mtime_ms: now_ms(),
                    },
                );
                Ok(FileHandle(path.clone()))
            }
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    async fn list(&self, dir: &DirHandle) -> io::Result<Vec<ListEntry>> {
        let entries = self.entries.lock();
        let prefix = dir.0.as_str();
        let probe = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        let mut out = Vec::new();
        for (key, node) in entries.iter() {
            if key == prefix {
                continue;
            }
            let Some(rest) = key.strip_prefix(probe.as_str()) else {
                continue;
            };
            if !prefix.is_empty() && probe.is_empty() {
                continue;
            }
            if rest.contains('/') {
                continue;
            }
            if rest.is_empty() {
                continue;
            }
            let (kind, size, mtime_ms) = match node {
                Node::Dir => (EntryKind::Dir, None, None),
                Node::File { data, mtime_ms } => (EntryKind::File, Some(data.len() as u64), Some(*mtime_ms)),
            };
            out.push(ListEntry {
                name: rest.to_string(),
                kind,
                size,
                mtime_ms,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn read_all(&self, file: &FileHandle) -> io::Result<Vec<u8>> {
        let entries = self.entries.lock();
        match entries.get(file.0.as_str()) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Dir) => Err(io::Error::from(io::ErrorKind::IsADirectory)),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    async fn write_all(&self, file: &FileHandle, data: &[u8]) -> io::Result<()> {
        let mut entries = self.entries.lock();
        match entries.get_mut(file.0.as_str()) {
            Some(Node::File { data: existing, mtime_ms }) => {
                *existing = data.to_vec();
                *mtime_ms = now_ms();
                Ok(())
            }
            Some(Node::Dir) => Err(io::Error::from(io::ErrorKind::IsADirectory)),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    async fn remove(&self, path: &CanonicalPath) -> io::Result<()> {
        if self.has_children(path.as_str()) {
            return Err(io::Error::from(io::ErrorKind::DirectoryNotEmpty));
        }
        let mut entries = self.entries.lock();
        if entries.remove(path.as_str()).is_none() {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok(())
    }

    async fn rename(&self, old: &CanonicalPath, new: &CanonicalPath) -> io::Result<()> {
        let mut entries = self.entries.lock();
        let old_prefix = format!("{}/", old.as_str());
        let keys: Vec<String> = entries
            .keys()
            .filter(|k| k.as_str() == old.as_str() || k.starts_with(&old_prefix))
            .cloned()
            .collect();
        if keys.is_empty() {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        for key in keys {
            let suffix = &key[old.as_str().len()..];
            let new_key = format!("{}{}", new.as_str(), suffix);
            if let Some(node) = entries.remove(&key) {
                entries.insert(new_key, node);
            }
        }
        Ok(())
    }

    async fn stat(&self, path: &CanonicalPath) -> io::Result<Option<ObjectStat>> {
        let entries = self.entries.lock();
        Ok(entries.get(path.as_str()).map(|node| match node {
            Node::Dir => ObjectStat {
                kind: EntryKind::Dir,
                size: 0,
                mtime_ms: 0,
            },
            Node::File { data, mtime_ms } => ObjectStat {
                kind: EntryKind::File,
                size: data.len() as u64,
                mtime_ms: *mtime_ms,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::canonicalize;

    #[tokio::test]
    async fn write_then_read() {
        let store = MemoryObjectStore::new();
        let path = canonicalize("/a.txt").unwrap();
        let fh = store.open_file(&path, true).await.unwrap();
        store.write_all(&fh, b"hello").await.unwrap();
        assert_eq!(store.read_all(&fh).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn remove_nonempty_dir_fails() {
        let store = MemoryObjectStore::new();
        let dir = canonicalize("/d").unwrap();
        store.open_dir(&dir, true).await.unwrap();
        let file = canonicalize("/d/f").unwrap();
        store.open_file(&file, true).await.unwrap();
        let err = store.remove(&dir).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::DirectoryNotEmpty);
    }

    #[tokio::test]
    async fn rename_moves_subtree() {
        let store = MemoryObjectStore::new();
        let dir = canonicalize("/d").unwrap();
        store.open_dir(&dir, true).await.unwrap();
        let file = canonicalize("/d/f").unwrap();
        store.open_file(&file, true).await.unwrap();
        store.write_all(&FileHandle(file.clone()), b"x").await.unwrap();
        store
            .rename(&dir, &canonicalize("/e").unwrap())
            .await
            .unwrap();
        let moved = canonicalize("/e/f").unwrap();
        assert_eq!(
            store.read_all(&FileHandle(moved)).await.unwrap(),
            b"x"
        );
    }
}
