//! Stack-switch tier (SPEC_FULL.md §4.C).
//!
//! The host runtime can suspend the guest's stack when a promise is
//! returned to an import, so this wrapper just drives the adapter's future
//! to completion on a dedicated single-thread runtime and returns the
//! result — the guest observes plain blocking semantics with no
//! cross-thread handoff.

use super::SyncBridge;
use crate::error::{WasiErrorCode, WasiResult};
use crate::path::CanonicalPath;
use crate::store::{DirHandle, FileHandle, ListEntry, ObjectStat, ObjectStore};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

pub struct StackSwitchBridge {
    store: Arc<dyn ObjectStore>,
    runtime: Runtime,
}

impl StackSwitchBridge {
    pub fn new(store: Arc<dyn ObjectStore>) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        Ok(StackSwitchBridge { store, runtime })
    }
}

impl SyncBridge for StackSwitchBridge {
    fn open_dir(&self, path: &CanonicalPath, create: bool) -> WasiResult<DirHandle> {
        self.runtime
            .block_on(self.store.open_dir(path, create))
            .map_err(WasiErrorCode::from)
    }

    fn open_file(&self, path: &CanonicalPath, create: bool) -> WasiResult<FileHandle> {
        self.runtime
            .block_on(self.store.open_file(path, create))
            .map_err(WasiErrorCode::from)
    }

    fn list(&self, dir: &DirHandle) -> WasiResult<Vec<ListEntry>> {
        self.runtime
            .block_on(self.store.list(dir))
            .map_err(WasiErrorCode::from)
    }

    fn read_all(&self, file: &FileHandle) -> WasiResult<Vec<u8>> {
        self.runtime
            .block_on(self.store.read_all(file))
            .map_err(WasiErrorCode::from)
    }

    fn write_all(&self, file: &FileHandle, data: &[u8]) -> WasiResult<()> {
        self.runtime
            .block_on(self.store.write_all(file, data))
            .map_err(WasiErrorCode::from)
    }

    fn remove(&self, path: &CanonicalPath) -> WasiResult<()> {
        self.runtime
            .block_on(self.store.remove(path))
            .map_err(WasiErrorCode::from)
    }

    fn rename(&self, old: &CanonicalPath, new: &CanonicalPath) -> WasiResult<()> {
        self.runtime
            .block_on(self.store.rename(old, new))
            .map_err(WasiErrorCode::from)
    }

    fn stat(&self, path: &CanonicalPath) -> WasiResult<Option<ObjectStat>> {
        self.runtime
            .block_on(self.store.stat(path))
            .map_err(WasiErrorCode::from)
    }
}
