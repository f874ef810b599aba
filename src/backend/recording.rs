//! Device-free backend that records every call.
//!
//! No kernel ever runs. Buffers are plain host allocations so that staged
//! bytes and mappings can be inspected after the fact, and faults can be
//! injected per operation to drive failure paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{
    BackendError, BufferHandle, ComputeBackend, HostPtr, KernelArg, KernelHandle, QueueHandle,
    WorkShape,
};

pub const RECORDING_DEFAULT_QUEUE: QueueHandle = QueueHandle(1);

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Build { kernel: u64, name: String },
    ReleaseKernel { kernel: u64 },
    SetArg { kernel: u64, index: u32, arg: KernelArg },
    Enqueue { kernel: u64, queue: QueueHandle, shape: WorkShape, args: Vec<KernelArg> },
    Finish { queue: QueueHandle },
    Alloc { buffer: BufferHandle, size: usize },
    Write { buffer: BufferHandle, bytes: Vec<u8> },
    Release { buffer: BufferHandle },
    Map { buffer: BufferHandle, queue: QueueHandle },
    Unmap { buffer: BufferHandle, queue: QueueHandle },
}

#[derive(Debug, Default)]
struct Faults {
    build: Option<String>,
    enqueue: bool,
    write: bool,
    release: bool,
    map: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    events: Vec<BackendEvent>,
    buffers: HashMap<u64, Vec<u8>>,
    kernels: HashSet<u64>,
    kernel_args: HashMap<u64, BTreeMap<u32, KernelArg>>,
    faults: Faults,
}

impl Inner {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        0x1000 + self.next_id
    }
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    inner: Mutex<Inner>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        // A poisoned recorder still holds a usable log.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `build_kernel` call fail with `log`.
    pub fn fail_next_build(&self, log: &str) {
        self.state().faults.build = Some(log.to_string());
    }

    pub fn fail_enqueue(&self, fail: bool) {
        self.state().faults.enqueue = fail;
    }

    pub fn fail_write(&self, fail: bool) {
        self.state().faults.write = fail;
    }

    pub fn fail_release(&self, fail: bool) {
        self.state().faults.release = fail;
    }

    pub fn fail_map(&self, fail: bool) {
        self.state().faults.map = fail;
    }

    pub fn events(&self) -> Vec<BackendEvent> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    pub fn count_events(&self, pred: impl Fn(&BackendEvent) -> bool) -> usize {
        self.state().events.iter().filter(|e| pred(e)).count()
    }

    /// Every enqueue seen so far, as `(shape, args)` in issue order.
    pub fn dispatches(&self) -> Vec<(WorkShape, Vec<KernelArg>)> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::Enqueue { shape, args, .. } => Some((*shape, args.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn live_buffers(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn live_kernels(&self) -> usize {
        self.state().kernels.len()
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state().buffers.get(&buffer.0).cloned()
    }
}

impl ComputeBackend for RecordingBackend {
    fn build_kernel(&self, source: &str, name: &str) -> Result<KernelHandle, BackendError> {
        let mut st = self.state();

        if let Some(log) = st.faults.build.take() {
            return Err(BackendError::Build { name: name.to_string(), log });
        }
        if name.is_empty() || !source.contains(name) {
            return Err(BackendError::Build {
                name: name.to_string(),
                log: format!("no kernel named `{name}` in program source"),
            });
        }

        let kernel = st.alloc_id();
        let program = st.alloc_id();
        st.kernels.insert(kernel);
        st.events.push(BackendEvent::Build { kernel, name: name.to_string() });

        Ok(KernelHandle { kernel, program, name: name.to_string() })
    }

    fn release_kernel(&self, kernel: KernelHandle) -> Result<(), BackendError> {
        let mut st = self.state();
        if !st.kernels.remove(&kernel.kernel) {
            return Err(BackendError::InvalidHandle);
        }
        st.kernel_args.remove(&kernel.kernel);
        st.events.push(BackendEvent::ReleaseKernel { kernel: kernel.kernel });
        Ok(())
    }

    fn set_arg(&self, kernel: &KernelHandle, index: u32, arg: &KernelArg) -> Result<(), BackendError> {
        let mut st = self.state();
        if !st.kernels.contains(&kernel.kernel) {
            return Err(BackendError::InvalidHandle);
        }
        if let KernelArg::Buffer(b) = arg {
            if !st.buffers.contains_key(&b.0) {
                return Err(BackendError::InvalidHandle);
            }
        }

        st.kernel_args.entry(kernel.kernel).or_default().insert(index, *arg);
        st.events.push(BackendEvent::SetArg { kernel: kernel.kernel, index, arg: *arg });
        Ok(())
    }

    fn enqueue(&self, kernel: &KernelHandle, queue: QueueHandle, shape: &WorkShape) -> Result<(), BackendError> {
        let mut st = self.state();
        if !st.kernels.contains(&kernel.kernel) {
            return Err(BackendError::InvalidHandle);
        }
        if st.faults.enqueue {
            return Err(BackendError::call("clEnqueueNDRangeKernel", -5));
        }

        let args: Vec<KernelArg> = st
            .kernel_args
            .get(&kernel.kernel)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default();

        st.events.push(BackendEvent::Enqueue { kernel: kernel.kernel, queue, shape: *shape, args });
        Ok(())
    }

    fn finish(&self, queue: QueueHandle) -> Result<(), BackendError> {
        self.state().events.push(BackendEvent::Finish { queue });
        Ok(())
    }

    fn alloc_buffer(&self, size: usize) -> Result<BufferHandle, BackendError> {
        if size == 0 {
            return Err(BackendError::call("clCreateBuffer", -61));
        }
        let mut st = self.state();
        let buffer = BufferHandle(st.alloc_id());
        st.buffers.insert(buffer.0, vec![0u8; size]);
        st.events.push(BackendEvent::Alloc { buffer, size });
        Ok(buffer)
    }

    fn write_buffer(&self, _queue: QueueHandle, buffer: BufferHandle, bytes: &[u8]) -> Result<(), BackendError> {
        let mut st = self.state();
        if st.faults.write {
            return Err(BackendError::call("clEnqueueWriteBuffer", -5));
        }

        let contents = st.buffers.get_mut(&buffer.0).ok_or(BackendError::InvalidHandle)?;
        if bytes.len() > contents.len() {
            return Err(BackendError::call("clEnqueueWriteBuffer", -30));
        }
        contents[..bytes.len()].copy_from_slice(bytes);

        st.events.push(BackendEvent::Write { buffer, bytes: bytes.to_vec() });
        Ok(())
    }

    fn release_buffer(&self, buffer: BufferHandle) -> Result<(), BackendError> {
        let mut st = self.state();
        if st.faults.release {
            return Err(BackendError::call("clReleaseMemObject", -38));
        }
        if st.buffers.remove(&buffer.0).is_none() {
            return Err(BackendError::InvalidHandle);
        }
        st.events.push(BackendEvent::Release { buffer });
        Ok(())
    }

    fn map_buffer(&self, queue: QueueHandle, buffer: BufferHandle, size: usize) -> Result<HostPtr, BackendError> {
        let mut st = self.state();
        if st.faults.map {
            return Err(BackendError::call("clEnqueueMapBuffer", -12));
        }
        let contents = st.buffers.get(&buffer.0).ok_or(BackendError::InvalidHandle)?;
        if size > contents.len() {
            return Err(BackendError::call("clEnqueueMapBuffer", -30));
        }
        let mapped = HostPtr::from_raw(contents.as_ptr());

        st.events.push(BackendEvent::Map { buffer, queue });
        Ok(mapped)
    }

    fn unmap_buffer(&self, queue: QueueHandle, buffer: BufferHandle, _mapped: HostPtr) -> Result<(), BackendError> {
        let mut st = self.state();
        if !st.buffers.contains_key(&buffer.0) {
            return Err(BackendError::InvalidHandle);
        }
        st.events.push(BackendEvent::Unmap { buffer, queue });
        Ok(())
    }

    fn default_queue(&self) -> QueueHandle {
        RECORDING_DEFAULT_QUEUE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_source_without_kernel() {
        let backend = RecordingBackend::new();
        let err = backend.build_kernel("__kernel void other() {}", "addVec").unwrap_err();
        assert!(matches!(err, BackendError::Build { .. }));
        assert_eq!(backend.live_kernels(), 0);
    }

    #[test]
    fn enqueue_reports_args_in_index_order() {
        let backend = RecordingBackend::new();
        let k = backend.build_kernel("__kernel void k() {}", "k").unwrap();
        backend.set_arg(&k, 1, &KernelArg::Int32(7)).unwrap();
        backend.set_arg(&k, 0, &KernelArg::Float32(1.5)).unwrap();

        let shape = WorkShape { global: [8, 1, 1], local: [8, 1, 1] };
        backend.enqueue(&k, RECORDING_DEFAULT_QUEUE, &shape).unwrap();

        let dispatches = backend.dispatches();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].1, vec![KernelArg::Float32(1.5), KernelArg::Int32(7)]);
    }

    #[test]
    fn released_buffer_is_gone() {
        let backend = RecordingBackend::new();
        let b = backend.alloc_buffer(4).unwrap();
        assert_eq!(backend.live_buffers(), 1);
        backend.release_buffer(b).unwrap();
        assert_eq!(backend.live_buffers(), 0);
        assert!(matches!(backend.release_buffer(b), Err(BackendError::InvalidHandle)));
    }
}
