//! Portable compute backend seam.
//!
//! The launch layer only talks to a device through [`ComputeBackend`]. Handles
//! are plain integers holding the raw driver handle so a backend can live in a
//! process-wide `Mutex` without wrapping raw pointers.

pub mod error;
pub mod opencl;
pub mod recording;

pub use error::BackendError;
pub use opencl::OpenClBackend;
pub use recording::{BackendEvent, RecordingBackend};

use std::fmt;

/// Host-visible address, as handed over by legacy client code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostPtr(pub usize);

impl HostPtr {
    pub fn from_raw<T>(ptr: *const T) -> Self {
        HostPtr(ptr as usize)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn as_mut_ptr(&self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }
}

impl fmt::Display for HostPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(pub u64);

/// A compiled, dispatchable kernel. Owned by whoever built it and returned to
/// the backend through [`ComputeBackend::release_kernel`].
#[derive(Debug, PartialEq, Eq)]
pub struct KernelHandle {
    pub kernel: u64,
    pub program: u64,
    pub name: String,
}

/// One positional kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Buffer(BufferHandle),
}

/// Work shape of a single dispatch, in work-items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkShape {
    pub global: [usize; 3],
    pub local: [usize; 3],
}

pub trait ComputeBackend: Send + Sync {
    fn build_kernel(&self, source: &str, name: &str) -> Result<KernelHandle, BackendError>;

    fn release_kernel(&self, kernel: KernelHandle) -> Result<(), BackendError>;

    fn set_arg(&self, kernel: &KernelHandle, index: u32, arg: &KernelArg) -> Result<(), BackendError>;

    /// Non-blocking enqueue. Ordering is FIFO per queue.
    fn enqueue(&self, kernel: &KernelHandle, queue: QueueHandle, shape: &WorkShape) -> Result<(), BackendError>;

    /// Blocks until every command previously issued on `queue` has completed.
    fn finish(&self, queue: QueueHandle) -> Result<(), BackendError>;

    fn alloc_buffer(&self, size: usize) -> Result<BufferHandle, BackendError>;

    /// Blocking host-to-device copy into the start of `buffer`.
    fn write_buffer(&self, queue: QueueHandle, buffer: BufferHandle, bytes: &[u8]) -> Result<(), BackendError>;

    fn release_buffer(&self, buffer: BufferHandle) -> Result<(), BackendError>;

    /// Makes `buffer` host-visible and returns the mapped address.
    fn map_buffer(&self, queue: QueueHandle, buffer: BufferHandle, size: usize) -> Result<HostPtr, BackendError>;

    /// Ends a host mapping previously returned by [`ComputeBackend::map_buffer`].
    fn unmap_buffer(&self, queue: QueueHandle, buffer: BufferHandle, mapped: HostPtr) -> Result<(), BackendError>;

    fn default_queue(&self) -> QueueHandle;
}
