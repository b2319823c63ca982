//! Sync Bridge (SPEC_FULL.md §4.C): turns the Object-Store Adapter's async
//! operations into blocking calls the guest-serving thread can call directly.
//!
//! Two interchangeable strategies are provided, selected once per process
//! from host capability probing and never mixed (§5, §8 bridge-equivalence):
//! [`stackswitch::StackSwitchBridge`] and
//! [`shared_memory::SharedMemoryBridge`]. Both implement [`SyncBridge`] and
//! must produce byte-identical results for identical inputs.

pub mod shared_memory;
pub mod stackswitch;

use crate::error::WasiResult;
use crate::path::CanonicalPath;
use crate::store::{DirHandle, FileHandle, ListEntry, ObjectStat};

/// Synchronous façade over the Object-Store Adapter. Implementations hide
/// whichever strategy (§4.C) the host tier requires; callers never see the
/// difference.
pub trait SyncBridge: Send + Sync {
    fn open_dir(&self, path: &CanonicalPath, create: bool) -> WasiResult<DirHandle>;
    fn open_file(&self, path: &CanonicalPath, create: bool) -> WasiResult<FileHandle>;
    fn list(&self, dir: &DirHandle) -> WasiResult<Vec<ListEntry>>;
    fn read_all(&self, file: &FileHandle) -> WasiResult<Vec<u8>>;
    fn write_all(&self, file: &FileHandle, data: &[u8]) -> WasiResult<()>;
    fn remove(&self, path: &CanonicalPath) -> WasiResult<()>;
    fn rename(&self, old: &CanonicalPath, new: &CanonicalPath) -> WasiResult<()>;
    fn stat(&self, path: &CanonicalPath) -> WasiResult<Option<ObjectStat>>;
}

/// Which blocking strategy a process has committed to. Chosen once at
/// startup from host capability probing (§4.C) and never mixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeTier {
    /// The host runtime can suspend a stack when a promise is returned to a
    /// guest import; the bridge simply awaits the adapter.
    StackSwitch,
    /// No suspension available; a helper executor and a shared-memory
    /// rendezvous buffer stand in for it.
    SharedMemory,
}
