//! Filesystem Host (SPEC_FULL.md §4.E): the guest-facing filesystem
//! import surface, built on the directory cache (§4.D) and sync bridge
//! (§4.C).

pub mod descriptor;
pub mod flags;

use crate::cache::DirectoryCache;
use crate::error::{WasiErrorCode, WasiResult};
use crate::fs::descriptor::{Descriptor, DescriptorId, DescriptorKind, DescriptorTable};
use crate::fs::flags::{DescriptorFlags, OpenFlags};
use crate::path::CanonicalPath;
use crate::store::{EntryKind, FileHandle};
use crate::symlink::SymlinkNamespace;
use log::{trace, warn};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::runtime::{Builder, Runtime};

/// Discriminant reported by `stat`/`stat-at`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
}

/// A `stat`/`stat-at` result (§4.E).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    pub size: u64,
    pub mtime_seconds: u64,
    pub mtime_nanoseconds: u32,
    pub inode: u64,
    pub mode: u32,
}

/// `set-times`/`set-times-at` argument: the timestamp behavior the guest
/// requested. Only `mtime` is ever persisted; `atime` is accepted but
/// discarded (§4.E, §9 open question 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeSpec {
    NoChange,
    Now,
    Explicit { seconds: u64, nanoseconds: u32 },
}

pub struct FilesystemHost {
    cache: Arc<DirectoryCache>,
    symlinks: Arc<SymlinkNamespace>,
    descriptors: DescriptorTable,
    // The symlink namespace's mutating methods persist to an async store
    // (§4.A); the filesystem host's guest-facing surface is synchronous
    // like the rest of (E), so a dedicated runtime bridges the two, the
    // same pattern the sync bridge (§4.C) uses for the object store.
    runtime: Runtime,
}

impl FilesystemHost {
    pub fn new(cache: Arc<DirectoryCache>, symlinks: Arc<SymlinkNamespace>) -> Self {
        FilesystemHost {
            cache,
            symlinks,
            descriptors: DescriptorTable::new(),
            runtime: Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("failed to build filesystem host runtime"),
        }
    }

    /// A preopened descriptor for the root directory, handed to the guest
    /// at instantiation time.
    pub fn preopen_root(&self) -> DescriptorId {
        self.descriptors.insert(Descriptor {
            canonical_path: CanonicalPath::root(),
            kind: DescriptorKind::Dir,
            flags: DescriptorFlags::READ,
            position: 0,
        })
    }

    pub fn open_at(
        &self,
        base: DescriptorId,
        raw_path: &str,
        open_flags: OpenFlags,
        descriptor_flags: DescriptorFlags,
    ) -> WasiResult<DescriptorId> {
        let base_descriptor = self.descriptors.get(base).ok_or(WasiErrorCode::Invalid)?;
        let joined = base_descriptor.canonical_path.join(raw_path)?;
        trace!("open_at {joined}");
        let follow_final = !descriptor_flags.contains(DescriptorFlags::NO_FOLLOW);
        let resolved = self.symlinks.resolve(&joined, follow_final)?;

        if open_flags.contains(OpenFlags::DIRECTORY) {
            let create = open_flags.contains(OpenFlags::CREATE);
            self.cache.open_dir(&resolved, create)?;
            return Ok(self.descriptors.insert(Descriptor {
                canonical_path: resolved,
                kind: DescriptorKind::Dir,
                flags: descriptor_flags,
                position: 0,
            }));
        }

        if descriptor_flags.is_write_capable() {
            self.cache.claim_write_handle(&resolved)?;
        }
        let create = open_flags.contains(OpenFlags::CREATE);
        let handle = match self.cache.open_file(&resolved, create) {
            Ok(handle) => handle,
            Err(err) => {
                if descriptor_flags.is_write_capable() {
                    self.cache.release_write_handle(&resolved);
                }
                return Err(err);
            }
        };
        if open_flags.contains(OpenFlags::EXCLUSIVE) && create {
            warn!("O_EXCL requested for {resolved}; adapter does not report pre-existence separately");
        }
        let position = if open_flags.contains(OpenFlags::TRUNCATE) {
            self.write_file(&handle, &[])?;
            self.cache.note_written(&resolved, 0, now_ms());
            0
        } else if descriptor_flags.contains(DescriptorFlags::APPEND) {
            self.stat_handle(&handle)?.size
        } else {
            0
        };
        Ok(self.descriptors.insert(Descriptor {
            canonical_path: resolved,
            kind: DescriptorKind::File,
            flags: descriptor_flags,
            position,
        }))
    }

    pub fn read(&self, id: DescriptorId, len: u64) -> WasiResult<(Vec<u8>, bool)> {
        let descriptor = self.descriptors.get(id).ok_or(WasiErrorCode::Invalid)?;
        self.pread(id, len, descriptor.position)
            .map(|(data, eof)| {
                self.descriptors.with_mut(id, |d| d.position += data.len() as u64);
                (data, eof)
            })
    }

    pub fn pread(&self, id: DescriptorId, len: u64, offset: u64) -> WasiResult<(Vec<u8>, bool)> {
        let descriptor = self.descriptors.get(id).ok_or(WasiErrorCode::Invalid)?;
        if descriptor.kind != DescriptorKind::File {
            return Err(WasiErrorCode::IsDirectory);
        }
        let handle = FileHandle(descriptor.canonical_path.clone());
        let data = self.read_file(&handle)?;
        let start = (offset as usize).min(data.len());
        let end = ((offset + len) as usize).min(data.len());
        let eof = end >= data.len();
        Ok((data[start..end].to_vec(), eof))
    }

    pub fn write(&self, id: DescriptorId, data: &[u8]) -> WasiResult<u64> {
        let descriptor = self.descriptors.get(id).ok_or(WasiErrorCode::Invalid)?;
        let offset = if descriptor.flags.contains(DescriptorFlags::APPEND) {
            self.pread(id, u64::MAX, 0)?.0.len() as u64
        } else {
            descriptor.position
        };
        let written = self.pwrite(id, data, offset)?;
        self.descriptors.with_mut(id, |d| d.position = offset + written);
        Ok(written)
    }

    pub fn pwrite(&self, id: DescriptorId, data: &[u8], offset: u64) -> WasiResult<u64> {
        let descriptor = self.descriptors.get(id).ok_or(WasiErrorCode::Invalid)?;
        if descriptor.kind != DescriptorKind::File {
            return Err(WasiErrorCode::IsDirectory);
        }
        if !descriptor.flags.is_write_capable() {
            return Err(WasiErrorCode::Permission);
        }
        let handle = FileHandle(descriptor.canonical_path.clone());
        let mut existing = self.read_file(&handle)?;
        let end = offset as usize + data.len();
        if existing.len() < end {
            existing.resize(end, 0);
        }
        existing[offset as usize..end].copy_from_slice(data);
        let len = existing.len() as u64;
        self.write_file(&handle, &existing)?;
        self.cache.note_written(&descriptor.canonical_path, len, now_ms());
        Ok(data.len() as u64)
    }

    pub fn seek(&self, id: DescriptorId, position: u64) -> WasiResult<()> {
        self.descriptors
            .with_mut(id, |d| d.position = position)
            .ok_or(WasiErrorCode::Invalid)
    }

    pub fn tell(&self, id: DescriptorId) -> WasiResult<u64> {
        self.descriptors
            .get(id)
            .map(|d| d.position)
            .ok_or(WasiErrorCode::Invalid)
    }

    /// `sync` is a no-op: every write already lands on the object store
    /// synchronously through the sync bridge.
    pub fn sync(&self, id: DescriptorId) -> WasiResult<()> {
        self.descriptors.get(id).map(|_| ()).ok_or(WasiErrorCode::Invalid)
    }

    pub fn set_size(&self, id: DescriptorId, size: u64) -> WasiResult<()> {
        let descriptor = self.descriptors.get(id).ok_or(WasiErrorCode::Invalid)?;
        if descriptor.kind != DescriptorKind::File {
            return Err(WasiErrorCode::IsDirectory);
        }
        let handle = FileHandle(descriptor.canonical_path.clone());
        let mut data = self.read_file(&handle)?;
        data.resize(size as usize, 0);
        self.write_file(&handle, &data)?;
        self.cache.note_written(&descriptor.canonical_path, size, now_ms());
        Ok(())
    }

    pub fn stat(&self, id: DescriptorId) -> WasiResult<FileStat> {
        let descriptor = self.descriptors.get(id).ok_or(WasiErrorCode::Invalid)?;
        self.stat_path(&descriptor.canonical_path)
    }

    pub fn stat_at(&self, base: DescriptorId, raw_path: &str, follow: bool) -> WasiResult<FileStat> {
        let base_descriptor = self.descriptors.get(base).ok_or(WasiErrorCode::Invalid)?;
        let joined = base_descriptor.canonical_path.join(raw_path)?;
        let resolved = self.symlinks.resolve(&joined, follow)?;
        self.stat_path(&resolved)
    }

    fn stat_path(&self, path: &CanonicalPath) -> WasiResult<FileStat> {
        if let Some(target) = self.symlinks.target_of(path) {
            return Ok(FileStat {
                kind: FileKind::Symlink,
                size: target.len() as u64,
                mtime_seconds: 0,
                mtime_nanoseconds: 0,
                inode: inode_of(path),
                mode: 0o777,
            });
        }
        let parent = path.parent().unwrap_or_else(CanonicalPath::root);
        let name = path.file_name();
        let entries = self.cache.list(&parent)?;
        let entry = name
            .and_then(|n| entries.into_iter().find(|e| e.name == n))
            .or_else(|| path.is_root().then_some(crate::cache::CachedEntry {
                name: String::new(),
                kind: EntryKind::Dir,
                size: None,
                mtime_ms: None,
            }));
        let entry = entry.ok_or(WasiErrorCode::NoEntry)?;
        let (kind, mode) = match entry.kind {
            EntryKind::Dir => (FileKind::Dir, 0o755),
            EntryKind::File => (FileKind::File, 0o644),
        };
        let mtime_ms = entry.mtime_ms.unwrap_or(0);
        Ok(FileStat {
            kind,
            size: entry.size.unwrap_or(0),
            mtime_seconds: mtime_ms / 1000,
            mtime_nanoseconds: ((mtime_ms % 1000) * 1_000_000) as u32,
            inode: inode_of(path),
            mode,
        })
    }

    fn stat_handle(&self, handle: &FileHandle) -> WasiResult<FileStat> {
        self.stat_path(&handle.0)
    }

    pub fn set_times(&self, id: DescriptorId, mtime: TimeSpec) -> WasiResult<()> {
        let descriptor = self.descriptors.get(id).ok_or(WasiErrorCode::Invalid)?;
        self.apply_times(&descriptor.canonical_path, mtime)
    }

    pub fn set_times_at(&self, base: DescriptorId, raw_path: &str, mtime: TimeSpec, follow: bool) -> WasiResult<()> {
        let base_descriptor = self.descriptors.get(base).ok_or(WasiErrorCode::Invalid)?;
        let joined = base_descriptor.canonical_path.join(raw_path)?;
        let resolved = self.symlinks.resolve(&joined, follow)?;
        self.apply_times(&resolved, mtime)
    }

    fn apply_times(&self, path: &CanonicalPath, mtime: TimeSpec) -> WasiResult<()> {
        let ms = match mtime {
            TimeSpec::NoChange => return Ok(()),
            TimeSpec::Now => now_ms(),
            TimeSpec::Explicit { seconds, nanoseconds } => {
                seconds * 1000 + (nanoseconds / 1_000_000) as u64
            }
        };
        let size = self.stat_path(path)?.size;
        self.cache.note_written(path, size, ms);
        Ok(())
    }

    pub fn link_at(&self, base: DescriptorId, raw_path: &str, target_base: DescriptorId, target_raw: &str) -> WasiResult<()> {
        // The object store has no hard-link primitive; a link is realized
        // as a content copy, matching its read/write semantics exactly
        // except that the two paths subsequently diverge on write.
        let base_descriptor = self.descriptors.get(base).ok_or(WasiErrorCode::Invalid)?;
        let source = self.symlinks.resolve(&base_descriptor.canonical_path.join(raw_path)?, true)?;
        let target_base_descriptor = self.descriptors.get(target_base).ok_or(WasiErrorCode::Invalid)?;
        let target = target_base_descriptor.canonical_path.join(target_raw)?;
        let data = self.read_file(&FileHandle(source))?;
        let handle = self.cache.open_file(&target, true)?;
        self.write_file(&handle, &data)
    }

    pub fn unlink_file_at(&self, base: DescriptorId, raw_path: &str) -> WasiResult<()> {
        let base_descriptor = self.descriptors.get(base).ok_or(WasiErrorCode::Invalid)?;
        let joined = base_descriptor.canonical_path.join(raw_path)?;
        let resolved = self.symlinks.resolve(&joined, false)?;
        self.cache.note_removed(&resolved)?;
        self.bridge_remove(&resolved)
    }

    pub fn remove_directory_at(&self, base: DescriptorId, raw_path: &str) -> WasiResult<()> {
        let base_descriptor = self.descriptors.get(base).ok_or(WasiErrorCode::Invalid)?;
        let joined = base_descriptor.canonical_path.join(raw_path)?;
        let resolved = self.symlinks.resolve(&joined, true)?;
        self.cache.note_removed(&resolved)?;
        self.runtime.block_on(self.symlinks.remove_prefix(&resolved))?;
        self.bridge_remove(&resolved)
    }

    pub fn create_directory_at(&self, base: DescriptorId, raw_path: &str) -> WasiResult<()> {
        let base_descriptor = self.descriptors.get(base).ok_or(WasiErrorCode::Invalid)?;
        let joined = base_descriptor.canonical_path.join(raw_path)?;
        let resolved = self.symlinks.resolve(&joined, true)?;
        self.cache.open_dir(&resolved, true)?;
        Ok(())
    }

    pub fn rename_at(&self, base: DescriptorId, raw_old: &str, new_base: DescriptorId, raw_new: &str) -> WasiResult<()> {
        let base_descriptor = self.descriptors.get(base).ok_or(WasiErrorCode::Invalid)?;
        let old = self.symlinks.resolve(&base_descriptor.canonical_path.join(raw_old)?, false)?;
        let new_base_descriptor = self.descriptors.get(new_base).ok_or(WasiErrorCode::Invalid)?;
        let new = new_base_descriptor.canonical_path.join(raw_new)?;
        self.cache.note_renamed(&old, &new)?;
        self.descriptors.retarget_prefix(&old, &new);
        self.bridge_rename(&old, &new)
    }

    pub fn symlink_at(&self, base: DescriptorId, raw_path: &str, target: &str) -> WasiResult<()> {
        let base_descriptor = self.descriptors.get(base).ok_or(WasiErrorCode::Invalid)?;
        let joined = base_descriptor.canonical_path.join(raw_path)?;
        self.runtime
            .block_on(self.symlinks.create(joined.clone(), target.to_string()))?;
        self.cache.note_symlink(&joined, target);
        Ok(())
    }

    pub fn readlink_at(&self, base: DescriptorId, raw_path: &str) -> WasiResult<String> {
        let base_descriptor = self.descriptors.get(base).ok_or(WasiErrorCode::Invalid)?;
        let joined = base_descriptor.canonical_path.join(raw_path)?;
        self.symlinks.target_of(&joined).ok_or(WasiErrorCode::Invalid)
    }

    pub fn read_directory_entries(&self, id: DescriptorId) -> WasiResult<Vec<crate::cache::CachedEntry>> {
        let descriptor = self.descriptors.get(id).ok_or(WasiErrorCode::Invalid)?;
        if descriptor.kind != DescriptorKind::Dir {
            return Err(WasiErrorCode::NotDirectory);
        }
        self.cache.list(&descriptor.canonical_path)
    }

    pub fn close(&self, id: DescriptorId) {
        if let Some(descriptor) = self.descriptors.get(id) {
            if descriptor.flags.is_write_capable() {
                self.cache.release_write_handle(&descriptor.canonical_path);
            }
        }
        self.descriptors.close(id);
    }

    fn read_file(&self, handle: &FileHandle) -> WasiResult<Vec<u8>> {
        // Routed through the directory cache's bridge by borrowing its
        // underlying sync bridge would duplicate state; the cache owns the
        // single source of truth for file bytes via direct bridge calls.
        self.cache.read_via_bridge(handle)
    }

    fn write_file(&self, handle: &FileHandle, data: &[u8]) -> WasiResult<()> {
        self.cache.write_via_bridge(handle, data)
    }

    fn bridge_remove(&self, path: &CanonicalPath) -> WasiResult<()> {
        self.cache.remove_via_bridge(path)
    }

    fn bridge_rename(&self, old: &CanonicalPath, new: &CanonicalPath) -> WasiResult<()> {
        self.cache.rename_via_bridge(old, new)
    }
}

fn inode_of(path: &CanonicalPath) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.as_str().hash(&mut hasher);
    hasher.finish()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::stackswitch::StackSwitchBridge;
    use crate::store::memory::MemoryObjectStore;
    use crate::symlink::SymlinkNamespace;

    struct MemoryStore(std::sync::Mutex<std::collections::HashMap<String, String>>);

    #[async_trait::async_trait]
    impl crate::symlink::SymlinkStore for MemoryStore {
        async fn load_all(&self) -> std::io::Result<Vec<crate::symlink::SymlinkEntry>> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .map(|(path, target)| crate::symlink::SymlinkEntry {
                    path: crate::path::canonicalize(path).unwrap(),
                    target: target.clone(),
                })
                .collect())
        }
        async fn put(&self, entry: crate::symlink::SymlinkEntry) -> std::io::Result<()> {
            self.0
                .lock()
                .unwrap()
                .insert(entry.path.as_str().to_string(), entry.target);
            Ok(())
        }
        async fn delete_prefix(&self, prefix: &CanonicalPath) -> std::io::Result<()> {
            self.0.lock().unwrap().retain(|k, _| !prefix.is_prefix_of(&crate::path::canonicalize(k).unwrap()));
            Ok(())
        }
    }

    fn host() -> FilesystemHost {
        let bridge: Arc<dyn crate::bridge::SyncBridge> =
            Arc::new(StackSwitchBridge::new(Arc::new(MemoryObjectStore::new())).unwrap());
        let cache = Arc::new(DirectoryCache::new(bridge));
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let symlinks = Arc::new(
            runtime
                .block_on(SymlinkNamespace::load(Box::new(MemoryStore(Default::default()))))
                .unwrap(),
        );
        FilesystemHost::new(cache, symlinks)
    }

    #[test]
    fn create_append_and_stat() {
        let host = host();
        let root = host.preopen_root();
        let fd = host
            .open_at(
                root,
                "a.txt",
                OpenFlags::CREATE,
                DescriptorFlags::READ | DescriptorFlags::WRITE,
            )
            .unwrap();
        host.write(fd, b"hello").unwrap();
        host.write(fd, b" world").unwrap();
        let stat = host.stat(fd).unwrap();
        assert_eq!(stat.size, 11);
        assert_eq!(stat.kind, FileKind::File);
        host.seek(fd, 0).unwrap();
        let (data, eof) = host.read(fd, 100).unwrap();
        assert_eq!(data, b"hello world");
        assert!(eof);
    }

    #[test]
    fn o_trunc_zeroes_existing_content() {
        let host = host();
        let root = host.preopen_root();
        let fd = host
            .open_at(root, "a.txt", OpenFlags::CREATE, DescriptorFlags::WRITE)
            .unwrap();
        host.write(fd, b"hello world").unwrap();
        host.close(fd);

        let truncated = host
            .open_at(
                root,
                "a.txt",
                OpenFlags::TRUNCATE,
                DescriptorFlags::READ | DescriptorFlags::WRITE,
            )
            .unwrap();
        assert_eq!(host.stat(truncated).unwrap().size, 0);
        let (data, eof) = host.read(truncated, 100).unwrap();
        assert!(data.is_empty());
        assert!(eof);
    }

    #[test]
    fn no_follow_descriptor_flag_disables_symlink_resolution() {
        let host = host();
        let root = host.preopen_root();
        host.open_at(root, "target", OpenFlags::CREATE, DescriptorFlags::WRITE)
            .unwrap();
        host.symlink_at(root, "link", "/target").unwrap();

        // Without NO_FOLLOW the final component is substituted and the open
        // reaches the real file behind the symlink.
        let followed = host
            .open_at(root, "link", OpenFlags::empty(), DescriptorFlags::READ)
            .unwrap();
        host.close(followed);

        // With NO_FOLLOW the final component is left as the symlink itself,
        // which has no matching object-store entry of its own.
        let err = host
            .open_at(
                root,
                "link",
                OpenFlags::empty(),
                DescriptorFlags::READ | DescriptorFlags::NO_FOLLOW,
            )
            .unwrap_err();
        assert_eq!(err, WasiErrorCode::NoEntry);
    }

    #[test]
    fn directory_not_empty_blocks_removal() {
        let host = host();
        let root = host.preopen_root();
        host.create_directory_at(root, "d").unwrap();
        let dir = host
            .open_at(root, "d", OpenFlags::DIRECTORY, DescriptorFlags::READ)
            .unwrap();
        let _ = dir;
        host.open_at(root, "d/f", OpenFlags::CREATE, DescriptorFlags::WRITE)
            .unwrap();
        assert_eq!(host.remove_directory_at(root, "d"), Err(WasiErrorCode::NotEmpty));
    }

    #[test]
    fn readlink_fails_on_non_symlink() {
        let host = host();
        let root = host.preopen_root();
        host.open_at(root, "a.txt", OpenFlags::CREATE, DescriptorFlags::WRITE)
            .unwrap();
        assert_eq!(host.readlink_at(root, "a.txt"), Err(WasiErrorCode::Invalid));
    }

    #[test]
    fn write_handle_is_exclusive_across_opens() {
        let host = host();
        let root = host.preopen_root();
        let _fd1 = host
            .open_at(root, "a.txt", OpenFlags::CREATE, DescriptorFlags::WRITE)
            .unwrap();
        assert_eq!(
            host.open_at(root, "a.txt", OpenFlags::empty(), DescriptorFlags::WRITE),
            Err(WasiErrorCode::Busy)
        );
    }

    #[test]
    fn closing_releases_write_handle() {
        let host = host();
        let root = host.preopen_root();
        let fd = host
            .open_at(root, "a.txt", OpenFlags::CREATE, DescriptorFlags::WRITE)
            .unwrap();
        host.close(fd);
        host.open_at(root, "a.txt", OpenFlags::empty(), DescriptorFlags::WRITE)
            .unwrap();
    }
}
