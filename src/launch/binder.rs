use std::sync::Arc;

use tracing::debug;

use super::configuration::LaunchConfiguration;
use super::staging::{PendingRemap, StagingBuffer};
use super::{LaunchState, ShimError};
use crate::backend::{ComputeBackend, HostPtr, KernelArg, QueueHandle};
use crate::registry::MemoryEntry;

const BINDABLE: &[LaunchState] = &[LaunchState::GeometrySet, LaunchState::Binding];

/// Immediate kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int32(i32),
    Int64(i64),
    Float32(f32),
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int32(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int64(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float32(v)
    }
}

impl From<Scalar> for KernelArg {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Int32(v) => KernelArg::Int32(v),
            Scalar::Int64(v) => KernelArg::Int64(v),
            Scalar::Float32(v) => KernelArg::Float32(v),
        }
    }
}

// Each bind appends exactly one argument; position is call order.
impl<B: ComputeBackend> LaunchConfiguration<B> {
    fn push_arg(&mut self, arg: KernelArg) {
        debug!(target: "clbridge", index = self.args.len(), ?arg, "argument bound");
        self.args.push(arg);
        self.state = LaunchState::Binding;
    }

    fn dispatch_queue(&self, operation: &'static str) -> Result<QueueHandle, ShimError> {
        self.queue.ok_or(ShimError::PreconditionViolation { operation, state: self.state })
    }

    fn lookup(&self, host: HostPtr) -> Result<Arc<dyn MemoryEntry>, ShimError> {
        self.registry.lookup(host).ok_or(ShimError::UnknownPointer(host))
    }

    pub fn bind_scalar(&mut self, value: impl Into<Scalar>) -> Result<(), ShimError> {
        self.require("bind_scalar", BINDABLE)?;
        self.push_arg(value.into().into());
        Ok(())
    }

    /// Binds a registered buffer, temporarily unmapping it from the host if it
    /// is currently host-mapped. The dispatcher remaps it after the launch.
    pub fn bind_device_pointer(&mut self, host: HostPtr) -> Result<(), ShimError> {
        self.require("bind_device_pointer", BINDABLE)?;
        let queue = self.dispatch_queue("bind_device_pointer")?;
        let entry = self.lookup(host)?;

        let buffer = if entry.needs_remap() {
            debug!(target: "clbridge", %host, queue = queue.0, "unmapping for device access");
            let buffer = entry.unmap_for_device(queue)?;
            self.pending_remaps.push(PendingRemap::new(entry, queue));
            buffer
        } else {
            entry.device_buffer()
        };

        self.push_arg(KernelArg::Buffer(buffer));
        Ok(())
    }

    /// Binds a registered buffer as-is, with no mapping bookkeeping. Only for
    /// buffers known to stay device-resident for the whole call.
    pub fn bind_opaque_buffer(&mut self, host: HostPtr) -> Result<(), ShimError> {
        self.require("bind_opaque_buffer", BINDABLE)?;
        let buffer = self.lookup(host)?.device_buffer();
        self.push_arg(KernelArg::Buffer(buffer));
        Ok(())
    }

    /// Copies a by-value struct into a fresh device buffer and binds that.
    /// Nothing is copied back; the buffer is freed by the dispatcher.
    pub fn bind_value_struct(&mut self, bytes: &[u8]) -> Result<(), ShimError> {
        self.require("bind_value_struct", BINDABLE)?;
        let queue = self.dispatch_queue("bind_value_struct")?;

        let staged = StagingBuffer::stage(Arc::clone(&self.backend), queue, bytes)?;
        let buffer = staged.handle();
        debug!(target: "clbridge", size = bytes.len(), buffer = buffer.0, "struct staged");

        self.pending_releases.push(staged);
        self.push_arg(KernelArg::Buffer(buffer));
        Ok(())
    }
}
