use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use super::MemoryEntry;
use crate::backend::{BackendError, BufferHandle, ComputeBackend, HostPtr, QueueHandle};

/// A device buffer that is normally mapped into host memory.
///
/// Allocated mapped; [`MemoryEntry::unmap_for_device`] and
/// [`MemoryEntry::remap_for_host`] toggle the mapping and are idempotent.
/// The host address handed out at allocation is the only one clients know,
/// so a remap that lands elsewhere is an error. Dropping the mapping unmaps
/// and frees the buffer.
pub struct HostMapping<B: ComputeBackend> {
    backend: Arc<B>,
    buffer: BufferHandle,
    size: usize,
    home: HostPtr,
    // Current address and the queue that mapped it.
    mapped: Mutex<Option<(HostPtr, QueueHandle)>>,
}

impl<B: ComputeBackend> HostMapping<B> {
    pub fn allocate(backend: Arc<B>, size: usize) -> Result<Arc<Self>, BackendError> {
        let queue = backend.default_queue();
        let buffer = backend.alloc_buffer(size)?;

        let home = match backend.map_buffer(queue, buffer, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                if let Err(release) = backend.release_buffer(buffer) {
                    warn!(target: "clbridge", error = %release, "release after failed map failed");
                }
                return Err(e);
            }
        };

        Ok(Arc::new(Self {
            backend,
            buffer,
            size,
            home,
            mapped: Mutex::new(Some((home, queue))),
        }))
    }

    fn state(&self) -> MutexGuard<'_, Option<(HostPtr, QueueHandle)>> {
        self.mapped.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current host address, `None` while the buffer is unmapped.
    pub fn host_ptr(&self) -> Option<HostPtr> {
        self.state().map(|(ptr, _)| ptr)
    }

    /// Address the buffer was first mapped at.
    pub fn home(&self) -> HostPtr {
        self.home
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl<B: ComputeBackend> MemoryEntry for HostMapping<B> {
    fn device_buffer(&self) -> BufferHandle {
        self.buffer
    }

    fn needs_remap(&self) -> bool {
        self.state().is_some()
    }

    fn unmap_for_device(&self, queue: QueueHandle) -> Result<BufferHandle, BackendError> {
        let mut mapped = self.state();
        if let Some((ptr, _)) = *mapped {
            self.backend.unmap_buffer(queue, self.buffer, ptr)?;
            *mapped = None;
        }
        Ok(self.buffer)
    }

    fn remap_for_host(&self, queue: QueueHandle) -> Result<(), BackendError> {
        let mut mapped = self.state();
        if mapped.is_some() {
            return Ok(());
        }

        let ptr = self.backend.map_buffer(queue, self.buffer, self.size)?;
        *mapped = Some((ptr, queue));
        if ptr != self.home {
            return Err(BackendError::MappingMoved { expected: self.home, actual: ptr });
        }
        Ok(())
    }
}

impl<B: ComputeBackend> Drop for HostMapping<B> {
    fn drop(&mut self) {
        let mapped = self.mapped.get_mut().map(|m| m.take()).unwrap_or_else(|p| p.into_inner().take());

        if let Some((ptr, queue)) = mapped {
            if let Err(e) = self.backend.unmap_buffer(queue, self.buffer, ptr) {
                warn!(target: "clbridge", error = %e, "unmap on drop failed");
            }
        }
        if let Err(e) = self.backend.release_buffer(self.buffer) {
            warn!(target: "clbridge", error = %e, "release on drop failed");
        }
    }
}
