//! WASI Preview-2 host bridge
//!
//! Supplies the host interfaces a guest component needs when it runs
//! inside a browser worker: a POSIX-like filesystem backed by an
//! origin-private object store, an outbound HTTP client, wall/monotonic
//! clocks, and a lazy module loader that spawns child "commands" whose
//! stdio is plumbed back to the embedder.
//!
//! The crate's core problem is reconciling a synchronous, single-threaded
//! guest with an asynchronous host storage API across two different host
//! capability tiers ([`bridge::stackswitch`] and [`bridge::shared_memory`])
//! without the guest observing a difference.

#![warn(rust_2018_idioms, unreachable_pub)]

pub mod bridge;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fs;
pub mod http;
pub mod keyboard;
pub mod path;
pub mod process;
pub mod stdio;
pub mod store;
pub mod stream;
pub mod symlink;

pub use bridge::{BridgeTier, SyncBridge};
pub use cache::DirectoryCache;
pub use clock::ClockHost;
pub use config::Config;
pub use error::{WasiErrorCode, WasiResult};
pub use fs::FilesystemHost;
pub use http::HttpHost;
pub use path::{canonicalize, CanonicalPath};
pub use process::ProcessManager;
pub use store::{memory::MemoryObjectStore, ObjectStore};
pub use symlink::SymlinkNamespace;

use bridge::shared_memory::SharedMemoryBridge;
use bridge::stackswitch::StackSwitchBridge;
use std::sync::Arc;

/// Wires (A) through (D) and (J) into a single handle, selecting the sync
/// bridge tier once per process from host capability probing (§4.C, §9
/// "global state": the object-store root, symlink cache, and sync-bridge
/// buffer are process-wide singletons owned by this struct).
pub struct HostBridge {
    pub cache: Arc<DirectoryCache>,
    pub symlinks: Arc<SymlinkNamespace>,
    pub filesystem: FilesystemHost,
    pub clock: ClockHost,
    pub config: Config,
}

impl HostBridge {
    /// Builds a bridge backed by `object_store` and `symlink_store`, using
    /// the stack-switch tier when `supports_stack_switch` is true and the
    /// shared-memory tier otherwise (§4.C: selected once, never mixed).
    pub async fn new(
        object_store: Arc<dyn ObjectStore>,
        symlink_store: Box<dyn symlink::SymlinkStore>,
        supports_stack_switch: bool,
        config: Config,
    ) -> std::io::Result<Self> {
        let bridge: Arc<dyn SyncBridge> = if supports_stack_switch {
            Arc::new(StackSwitchBridge::new(object_store)?)
        } else {
            Arc::new(SharedMemoryBridge::new(object_store, &config))
        };
        let cache = Arc::new(DirectoryCache::new(bridge));
        let symlinks = Arc::new(SymlinkNamespace::load(symlink_store).await?);
        let clock = ClockHost::new(&config);
        let filesystem = FilesystemHost::new(cache.clone(), symlinks.clone());
        Ok(HostBridge {
            cache,
            symlinks,
            filesystem,
            clock,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symlink::{SymlinkEntry, SymlinkStore};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySymlinkStore(Mutex<HashMap<String, String>>);

    #[async_trait]
    impl SymlinkStore for MemorySymlinkStore {
        async fn load_all(&self) -> std::io::Result<Vec<SymlinkEntry>> {
            Ok(vec![])
        }
        async fn put(&self, entry: SymlinkEntry) -> std::io::Result<()> {
            self.0.lock().unwrap().insert(entry.path.as_str().to_string(), entry.target);
            Ok(())
        }
        async fn delete_prefix(&self, _prefix: &CanonicalPath) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn builds_with_either_bridge_tier_and_serves_root() {
        for supports_stack_switch in [true, false] {
            let bridge = HostBridge::new(
                Arc::new(MemoryObjectStore::new()),
                Box::new(MemorySymlinkStore::default()),
                supports_stack_switch,
                Config::default(),
            )
            .await
            .unwrap();
            let root = bridge.filesystem.preopen_root();
            assert_eq!(bridge.filesystem.read_directory_entries(root).unwrap().len(), 0);
        }
    }
}
