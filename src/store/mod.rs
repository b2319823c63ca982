//! Object-Store Adapter (SPEC_FULL.md §4.B): the lowest-level async
//! operations against the browser object store. Every operation here fails
//! only with *no-entry*, *is-directory*, *not-directory*, *permission*, or
//! *io* — no other taxonomy kinds originate at this layer.

pub mod memory;

use crate::path::CanonicalPath;
use async_trait::async_trait;
use std::io;

/// An opaque capability for an open directory, scoped to a single
/// [`ObjectStore`] implementation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DirHandle(pub CanonicalPath);

/// An opaque capability for an open file, scoped to a single
/// [`ObjectStore`] implementation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileHandle(pub CanonicalPath);

/// The discriminant of an object-store entry as reported by [`ObjectStore::list`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EntryKind {
    File,
    Dir,
}

/// One row of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ListEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub mtime_ms: Option<u64>,
}

/// Metadata for a single object, used by the directory cache to populate a
/// freshly scanned node without a full read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObjectStat {
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_ms: u64,
}

/// The lowest-level async surface against the browser's origin-private
/// object store (or, in tests, an in-memory double). Every method is
/// wrapped by the sync bridge (§4.C) before a guest can call it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn open_dir(&self, path: &CanonicalPath, create: bool) -> io::Result<DirHandle>;
    async fn open_file(&self, path: &CanonicalPath, create: bool) -> io::Result<FileHandle>;
    async fn list(&self, dir: &DirHandle) -> io::Result<Vec<ListEntry>>;
    async fn read_all(&self, file: &FileHandle) -> io::Result<Vec<u8>>;
    async fn write_all(&self, file: &FileHandle, data: &[u8]) -> io::Result<()>;
    async fn remove(&self, path: &CanonicalPath) -> io::Result<()>;
    async fn rename(&self, old: &CanonicalPath, new: &CanonicalPath) -> io::Result<()>;
    /// Stats a single path without opening it. Not part of the minimal
    /// surface in SPEC_FULL.md §4.B, but every real object-store binding
    /// (IndexedDB, OPFS) exposes a cheap metadata read, and the directory
    /// cache (§4.D) needs it to populate scanned nodes without a full read.
    async fn stat(&self, path: &CanonicalPath) -> io::Result<Option<ObjectStat>>;
}
