//! Per-dispatch resource guards.
//!
//! The dispatcher settles each guard explicitly so release and remap errors
//! reach the caller. Any guard dropped unsettled (failed bind, failed launch,
//! abandoned cycle) cleans up on drop and logs what went wrong.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{BackendError, BufferHandle, ComputeBackend, QueueHandle};
use crate::registry::MemoryEntry;

/// Device buffer holding a copy of one by-value struct argument.
pub struct StagingBuffer<B: ComputeBackend> {
    backend: Arc<B>,
    buffer: BufferHandle,
    size: usize,
    settled: bool,
}

impl<B: ComputeBackend> StagingBuffer<B> {
    /// Allocates `bytes.len()` bytes and copies `bytes` in, blocking until
    /// the copy has landed.
    pub fn stage(backend: Arc<B>, queue: QueueHandle, bytes: &[u8]) -> Result<Self, BackendError> {
        let buffer = backend.alloc_buffer(bytes.len())?;
        let staged = Self {
            backend,
            buffer,
            size: bytes.len(),
            settled: false,
        };

        staged.backend.write_buffer(queue, buffer, bytes)?;
        Ok(staged)
    }

    pub fn handle(&self) -> BufferHandle {
        self.buffer
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn release(mut self) -> Result<(), BackendError> {
        self.settled = true;
        self.backend.release_buffer(self.buffer)
    }
}

impl<B: ComputeBackend> Drop for StagingBuffer<B> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        debug!(target: "clbridge", buffer = self.buffer.0, "releasing unsettled staging buffer");
        if let Err(e) = self.backend.release_buffer(self.buffer) {
            warn!(target: "clbridge", error = %e, "staging buffer release failed");
        }
    }
}

/// Obligation to hand an unmapped registry entry back to the host.
pub struct PendingRemap {
    entry: Option<Arc<dyn MemoryEntry>>,
    queue: QueueHandle,
}

impl PendingRemap {
    /// `queue` is the dispatch queue the entry was unmapped on.
    pub fn new(entry: Arc<dyn MemoryEntry>, queue: QueueHandle) -> Self {
        Self { entry: Some(entry), queue }
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        self.entry.as_ref().map(|e| e.device_buffer())
    }

    pub fn remap(mut self) -> Result<(), BackendError> {
        match self.entry.take() {
            Some(entry) => entry.remap_for_host(self.queue),
            None => Ok(()),
        }
    }
}

impl Drop for PendingRemap {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            debug!(target: "clbridge", buffer = entry.device_buffer().0, "remapping unsettled entry");
            if let Err(e) = entry.remap_for_host(self.queue) {
                warn!(target: "clbridge", error = %e, "remap failed");
            }
        }
    }
}
