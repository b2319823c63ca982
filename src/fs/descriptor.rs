//! Descriptor table (SPEC_FULL.md §3 Descriptor, §9 Resource handles).
//!
//! Descriptors and streams form a handle table owned by the guest's
//! component instance; the host holds them as a tagged variant keyed by
//! integer. Closing frees the table slot and any cached native handle.

use crate::fs::flags::DescriptorFlags;
use crate::path::CanonicalPath;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorKind {
    File,
    Dir,
}

#[derive(Clone, Debug)]
pub struct Descriptor {
    pub canonical_path: CanonicalPath,
    pub kind: DescriptorKind,
    pub flags: DescriptorFlags,
    pub position: u64,
}

/// Integer handle for a descriptor, as exposed across the guest/host
/// boundary (§9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorId(pub u64);

#[derive(Default)]
pub struct DescriptorTable {
    next: Mutex<u64>,
    entries: Mutex<HashMap<u64, Descriptor>>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        DescriptorTable {
            next: Mutex::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, descriptor: Descriptor) -> DescriptorId {
        let mut next = self.next.lock();
        let id = *next;
        *next += 1;
        self.entries.lock().insert(id, descriptor);
        DescriptorId(id)
    }

    pub fn get(&self, id: DescriptorId) -> Option<Descriptor> {
        self.entries.lock().get(&id.0).cloned()
    }

    pub fn with_mut<R>(&self, id: DescriptorId, f: impl FnOnce(&mut Descriptor) -> R) -> Option<R> {
        self.entries.lock().get_mut(&id.0).map(f)
    }

    /// Closes a descriptor. Returns `true` if it existed; a closed
    /// descriptor's id is never reused, matching handle-safety (§8).
    pub fn close(&self, id: DescriptorId) -> bool {
        self.entries.lock().remove(&id.0).is_some()
    }

    /// Retargets every descriptor whose path is `old` or under it to the
    /// corresponding path under `new`, for rename-at of a directory.
    pub fn retarget_prefix(&self, old: &CanonicalPath, new: &CanonicalPath) {
        let mut entries = self.entries.lock();
        for descriptor in entries.values_mut() {
            if descriptor.canonical_path == *old {
                descriptor.canonical_path = new.clone();
            } else if old.is_prefix_of(&descriptor.canonical_path) {
                let suffix = &descriptor.canonical_path.as_str()[old.as_str().len()..];
                if let Ok(retargeted) = new.join(suffix.trim_start_matches('/')) {
                    descriptor.canonical_path = retargeted;
                }
            }
        }
    }
}
