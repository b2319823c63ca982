//! Scenario tests covering the bridge's headline end-to-end behaviors.
//! Uses the in-memory object store and symlink store doubles so no browser
//! storage backend is required.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wasi_host_bridge::error::WasiErrorCode;
use wasi_host_bridge::fs::flags::{DescriptorFlags, OpenFlags};
use wasi_host_bridge::symlink::{SymlinkEntry, SymlinkStore};
use wasi_host_bridge::{CanonicalPath, Config, HostBridge, MemoryObjectStore};

#[derive(Default)]
struct MemorySymlinkStore(Mutex<HashMap<String, String>>);

#[async_trait]
impl SymlinkStore for MemorySymlinkStore {
    async fn load_all(&self) -> std::io::Result<Vec<SymlinkEntry>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|(path, target)| SymlinkEntry {
                path: wasi_host_bridge::canonicalize(path).unwrap(),
                target: target.clone(),
            })
            .collect())
    }

    async fn put(&self, entry: SymlinkEntry) -> std::io::Result<()> {
        self.0.lock().unwrap().insert(entry.path.as_str().to_string(), entry.target);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &CanonicalPath) -> std::io::Result<()> {
        self.0.lock().unwrap().retain(|path, _| {
            !prefix.is_prefix_of(&wasi_host_bridge::canonicalize(path).unwrap())
        });
        Ok(())
    }
}

async fn bridge() -> HostBridge {
    HostBridge::new(
        Arc::new(MemoryObjectStore::new()),
        Box::new(MemorySymlinkStore::default()),
        true,
        Config::default(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn init_then_list_root_is_empty_and_scanned() {
    let bridge = bridge().await;
    let root = bridge.filesystem.preopen_root();
    let entries = bridge.filesystem.read_directory_entries(root).unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn create_append_and_stat() {
    let bridge = bridge().await;
    let root = bridge.filesystem.preopen_root();
    let fd = bridge
        .filesystem
        .open_at(
            root,
            "a.txt",
            OpenFlags::CREATE,
            DescriptorFlags::READ | DescriptorFlags::WRITE | DescriptorFlags::APPEND,
        )
        .unwrap();
    bridge.filesystem.write(fd, b"hello").unwrap();
    bridge.filesystem.write(fd, b" world").unwrap();
    let stat = bridge.filesystem.stat(fd).unwrap();
    assert_eq!(stat.size, 11);
    bridge.filesystem.seek(fd, 0).unwrap();
    let (data, eof) = bridge.filesystem.read(fd, 100).unwrap();
    assert_eq!(data, b"hello world");
    assert!(eof);
}

#[tokio::test]
async fn symlink_loop_fails_with_loop_kind() {
    let bridge = bridge().await;
    let root = bridge.filesystem.preopen_root();
    bridge.filesystem.symlink_at(root, "x", "/y").unwrap();
    bridge.filesystem.symlink_at(root, "y", "/x").unwrap();
    let err = bridge
        .filesystem
        .open_at(root, "x", OpenFlags::empty(), DescriptorFlags::READ)
        .unwrap_err();
    assert_eq!(err, WasiErrorCode::Loop);
}

#[tokio::test]
async fn removing_a_directory_evicts_its_symlinks() {
    let bridge = bridge().await;
    let root = bridge.filesystem.preopen_root();
    bridge.filesystem.create_directory_at(root, "d").unwrap();
    bridge.filesystem.symlink_at(root, "d/link", "/target").unwrap();
    assert_eq!(bridge.filesystem.readlink_at(root, "d/link").unwrap(), "/target");
    bridge.filesystem.remove_directory_at(root, "d").unwrap();
    assert_eq!(
        bridge.filesystem.readlink_at(root, "d/link"),
        Err(WasiErrorCode::Invalid)
    );
}

#[tokio::test]
async fn rename_moves_a_directory_subtree_and_open_descriptors_follow() {
    let bridge = bridge().await;
    let root = bridge.filesystem.preopen_root();
    bridge.filesystem.create_directory_at(root, "d").unwrap();
    let fd = bridge
        .filesystem
        .open_at(root, "d/f", OpenFlags::CREATE, DescriptorFlags::WRITE)
        .unwrap();
    bridge.filesystem.write(fd, b"x").unwrap();
    bridge.filesystem.rename_at(root, "d", root, "e").unwrap();
    assert_eq!(bridge.filesystem.stat(fd).unwrap().size, 1);
    let moved = bridge
        .filesystem
        .open_at(root, "e/f", OpenFlags::empty(), DescriptorFlags::READ)
        .unwrap();
    assert_eq!(bridge.filesystem.read(moved, 10).unwrap().0, b"x");
}
