//! Host-pointer registry consumed by the argument binder.
//!
//! The binder never owns registry entries: it looks them up by the address the
//! legacy client passed in and, for device-pointer arguments, flips their
//! mapping state for the duration of one dispatch.

pub mod mapping;

pub use mapping::HostMapping;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::{BackendError, BufferHandle, HostPtr, QueueHandle};

pub trait MemoryEntry: Send + Sync {
    fn device_buffer(&self) -> BufferHandle;

    /// True while the buffer is mapped for host access, so handing it to a
    /// kernel needs an unmap now and a remap after the dispatch.
    fn needs_remap(&self) -> bool;

    /// Both transitions are enqueued on `queue`, the queue the kernel runs on.
    fn unmap_for_device(&self, queue: QueueHandle) -> Result<BufferHandle, BackendError>;

    fn remap_for_host(&self, queue: QueueHandle) -> Result<(), BackendError>;
}

pub trait MemoryRegistry: Send + Sync {
    fn lookup(&self, host: HostPtr) -> Option<Arc<dyn MemoryEntry>>;
}

/// Exact-address registry.
#[derive(Default)]
pub struct PointerTable {
    entries: RwLock<HashMap<HostPtr, Arc<dyn MemoryEntry>>>,
}

impl PointerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<HostPtr, Arc<dyn MemoryEntry>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<HostPtr, Arc<dyn MemoryEntry>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the entry previously registered at `host`, if any.
    pub fn register(&self, host: HostPtr, entry: Arc<dyn MemoryEntry>) -> Option<Arc<dyn MemoryEntry>> {
        self.write().insert(host, entry)
    }

    pub fn unregister(&self, host: HostPtr) -> Option<Arc<dyn MemoryEntry>> {
        self.write().remove(&host)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl MemoryRegistry for PointerTable {
    fn lookup(&self, host: HostPtr) -> Option<Arc<dyn MemoryEntry>> {
        self.read().get(&host).cloned()
    }
}
