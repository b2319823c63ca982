//! Directory Cache (SPEC_FULL.md §4.D).
//!
//! An in-memory mirror of the object store's directory structure, keyed by
//! canonical path. A directory node starts unscanned; the first listing
//! triggers one call through the sync bridge and the node is marked
//! scanned, after which the cache is authoritative — the object store is
//! never consulted again for that directory's children, since nothing but
//! this process ever mutates the store (§4.D).

use crate::bridge::SyncBridge;
use crate::error::{WasiErrorCode, WasiResult};
use crate::path::CanonicalPath;
use crate::store::{DirHandle, EntryKind, FileHandle};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Node {
    Dir {
        children: BTreeMap<String, Node>,
        scanned: bool,
    },
    File {
        size: u64,
        mtime_ms: u64,
    },
    Symlink {
        target: String,
    },
}

impl Node {
    fn new_dir() -> Self {
        Node::Dir {
            children: BTreeMap::new(),
            scanned: false,
        }
    }
}

/// A single row as reported to a filesystem-host caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub mtime_ms: Option<u64>,
}

/// In-memory mirror of the object store's directory tree, plus the
/// exclusive-write-handle cache described in §4.D.
pub struct DirectoryCache {
    bridge: Arc<dyn SyncBridge>,
    root: Mutex<Node>,
    write_handles: Mutex<BTreeMap<String, ()>>,
}

impl DirectoryCache {
    pub fn new(bridge: Arc<dyn SyncBridge>) -> Self {
        DirectoryCache {
            bridge,
            root: Mutex::new(Node::new_dir()),
            write_handles: Mutex::new(BTreeMap::new()),
        }
    }

    /// Lists a directory's children, scanning through the bridge on first
    /// access and serving every later call from the cache.
    pub fn list(&self, path: &CanonicalPath) -> WasiResult<Vec<CachedEntry>> {
        self.ensure_scanned(path)?;
        let root = self.root.lock();
        match find(&root, path) {
            Some(Node::Dir { children, .. }) => Ok(children
                .iter()
                .map(|(name, node)| to_entry(name, node))
                .collect()),
            Some(_) => Err(WasiErrorCode::NotDirectory),
            None => Err(WasiErrorCode::NoEntry),
        }
    }

    /// Ensures `path` (and, transitively, its ancestors) has been scanned at
    /// least once, creating intermediate cache nodes as needed.
    fn ensure_scanned(&self, path: &CanonicalPath) -> WasiResult<()> {
        {
            let root = self.root.lock();
            if let Some(Node::Dir { scanned: true, .. }) = find(&root, path) {
                return Ok(());
            }
        }
        let handle = self.bridge.open_dir(path, false)?;
        let entries = self.bridge.list(&handle)?;
        let mut root = self.root.lock();
        let node = find_or_create_dir(&mut root, path)?;
        if let Node::Dir { children, scanned } = node {
            for entry in entries {
                children
                    .entry(entry.name.clone())
                    .or_insert_with(|| match entry.kind {
                        EntryKind::Dir => Node::new_dir(),
                        EntryKind::File => Node::File {
                            size: entry.size.unwrap_or(0),
                            mtime_ms: entry.mtime_ms.unwrap_or(0),
                        },
                    });
            }
            *scanned = true;
        }
        Ok(())
    }

    /// Records that a file, directory, or symlink now exists at `path`,
    /// without re-scanning its parent.
    pub fn note_created(&self, path: &CanonicalPath, kind: EntryKind) {
        let mut root = self.root.lock();
        if let Some(parent) = path.parent() {
            if let Ok(Node::Dir { children, .. }) = find_or_create_dir(&mut root, &parent) {
                let name = path.file_name().unwrap_or_default().to_string();
                children.insert(
                    name,
                    match kind {
                        EntryKind::Dir => Node::new_dir(),
                        EntryKind::File => Node::File {
                            size: 0,
                            mtime_ms: 0,
                        },
                    },
                );
            }
        }
    }

    pub fn note_symlink(&self, path: &CanonicalPath, target: &str) {
        let mut root = self.root.lock();
        if let Some(parent) = path.parent() {
            if let Ok(Node::Dir { children, .. }) = find_or_create_dir(&mut root, &parent) {
                let name = path.file_name().unwrap_or_default().to_string();
                children.insert(
                    name,
                    Node::Symlink {
                        target: target.to_string(),
                    },
                );
            }
        }
    }

    /// Updates the cached size/mtime for a file whose content just changed.
    pub fn note_written(&self, path: &CanonicalPath, size: u64, mtime_ms: u64) {
        let mut root = self.root.lock();
        if let Some(Node::File {
            size: cached_size,
            mtime_ms: cached_mtime,
        }) = find_mut(&mut root, path)
        {
            *cached_size = size;
            *cached_mtime = mtime_ms;
        }
    }

    /// Removes a single cache entry. Fails with *not-empty* if it is a
    /// directory with children; callers must evict handles under the
    /// prefix before calling this (§4.D, §5 shared-resource discipline).
    pub fn note_removed(&self, path: &CanonicalPath) -> WasiResult<()> {
        let mut root = self.root.lock();
        if let Some(Node::Dir { children, .. }) = find(&root, path) {
            if !children.is_empty() {
                return Err(WasiErrorCode::NotEmpty);
            }
        }
        if let Some(parent) = path.parent() {
            if let Some(Node::Dir { children, .. }) = find_mut(&mut root, &parent) {
                children.remove(path.file_name().unwrap_or_default());
            }
        }
        self.evict_handles_under(path);
        Ok(())
    }

    /// Moves a cached subtree from `old` to `new`, matching a rename-at.
    pub fn note_renamed(&self, old: &CanonicalPath, new: &CanonicalPath) -> WasiResult<()> {
        let mut root = self.root.lock();
        let moved = if let Some(parent) = old.parent() {
            match find_mut(&mut root, &parent) {
                Some(Node::Dir { children, .. }) => {
                    children.remove(old.file_name().unwrap_or_default())
                }
                _ => None,
            }
        } else {
            None
        };
        let Some(moved) = moved else {
            return Err(WasiErrorCode::NoEntry);
        };
        if let Some(parent) = new.parent() {
            if let Ok(Node::Dir { children, .. }) = find_or_create_dir(&mut root, &parent) {
                children.insert(new.file_name().unwrap_or_default().to_string(), moved);
            }
        }
        self.rekey_handles_under(old, new);
        Ok(())
    }

    /// Records that a canonical path now has an open, exclusive write
    /// handle. Returns *busy* if one is already held.
    pub fn claim_write_handle(&self, path: &CanonicalPath) -> WasiResult<()> {
        let mut handles = self.write_handles.lock();
        if handles.contains_key(path.as_str()) {
            return Err(WasiErrorCode::Busy);
        }
        handles.insert(path.as_str().to_string(), ());
        Ok(())
    }

    pub fn release_write_handle(&self, path: &CanonicalPath) {
        self.write_handles.lock().remove(path.as_str());
    }

    fn evict_handles_under(&self, prefix: &CanonicalPath) {
        let mut handles = self.write_handles.lock();
        handles.retain(|key, _| {
            let keyed = CanonicalPath::root().join(key).ok();
            !matches!(keyed, Some(p) if prefix.is_prefix_of(&p))
        });
    }

    /// Moves write-handle tracking entries from under `old` to under `new`,
    /// mirroring `DescriptorTable::retarget_prefix` so a descriptor that
    /// holds a path open exclusively across a rename still blocks a second
    /// writer at the new location.
    fn rekey_handles_under(&self, old: &CanonicalPath, new: &CanonicalPath) {
        let mut handles = self.write_handles.lock();
        let moved: Vec<String> = handles
            .keys()
            .filter(|key| {
                let keyed = CanonicalPath::root().join(key).ok();
                matches!(keyed, Some(ref p) if old.is_prefix_of(p))
            })
            .cloned()
            .collect();
        for key in moved {
            handles.remove(&key);
            if let Ok(suffix) = CanonicalPath::root().join(&key) {
                if let Some(rest) = suffix.strip_prefix(old) {
                    let rekeyed = if rest.is_empty() {
                        new.clone()
                    } else if let Ok(joined) = new.join(&rest) {
                        joined
                    } else {
                        continue;
                    };
                    handles.insert(rekeyed.as_str().to_string(), ());
                }
            }
        }
    }

    /// Resolves the object-store handle for a canonical path, opening it
    /// through the bridge (and recording it in the cache) on first use.
    pub fn open_file(&self, path: &CanonicalPath, create: bool) -> WasiResult<FileHandle> {
        let handle = self.bridge.open_file(path, create)?;
        if create {
            self.note_created(path, EntryKind::File);
        }
        Ok(handle)
    }

    pub fn open_dir(&self, path: &CanonicalPath, create: bool) -> WasiResult<DirHandle> {
        let handle = self.bridge.open_dir(path, create)?;
        if create {
            self.note_created(path, EntryKind::Dir);
        }
        Ok(handle)
    }

    /// Passthrough read/write/remove/rename for the filesystem host, which
    /// otherwise has no direct reference to the sync bridge: the directory
    /// cache is the single owner of bridge access (§4.D).
    pub fn read_via_bridge(&self, handle: &FileHandle) -> WasiResult<Vec<u8>> {
        self.bridge.read_all(handle)
    }

    pub fn write_via_bridge(&self, handle: &FileHandle, data: &[u8]) -> WasiResult<()> {
        self.bridge.write_all(handle, data)
    }

    pub fn remove_via_bridge(&self, path: &CanonicalPath) -> WasiResult<()> {
        self.bridge.remove(path)
    }

    pub fn rename_via_bridge(&self, old: &CanonicalPath, new: &CanonicalPath) -> WasiResult<()> {
        self.bridge.rename(old, new)
    }
}

fn to_entry(name: &str, node: &Node) -> CachedEntry {
    match node {
        Node::Dir { .. } => CachedEntry {
            name: name.to_string(),
            kind: EntryKind::Dir,
            size: None,
            mtime_ms: None,
        },
        Node::File { size, mtime_ms } => CachedEntry {
            name: name.to_string(),
            kind: EntryKind::File,
            size: Some(*size),
            mtime_ms: Some(*mtime_ms),
        },
        Node::Symlink { .. } => CachedEntry {
            name: name.to_string(),
            kind: EntryKind::File,
            size: None,
            mtime_ms: None,
        },
    }
}

fn find<'a>(root: &'a Node, path: &CanonicalPath) -> Option<&'a Node> {
    let mut current = root;
    for component in path.components() {
        match current {
            Node::Dir { children, .. } => current = children.get(component)?,
            _ => return None,
        }
    }
    Some(current)
}

fn find_mut<'a>(root: &'a mut Node, path: &CanonicalPath) -> Option<&'a mut Node> {
    let mut current = root;
    for component in path.components() {
        match current {
            Node::Dir { children, .. } => current = children.get_mut(component)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Finds `path`'s node, creating intermediate (and the final, if missing)
/// directory nodes along the way. Fails if a non-final component is not a
/// directory.
fn find_or_create_dir<'a>(root: &'a mut Node, path: &CanonicalPath) -> WasiResult<&'a mut Node> {
    let mut current = root;
    for component in path.components() {
        current = match current {
            Node::Dir { children, .. } => {
                children.entry(component.to_string()).or_insert_with(Node::new_dir)
            }
            _ => return Err(WasiErrorCode::NotDirectory),
        };
    }
    Ok(current)
}
