//! Runtime shim that runs legacy GPU driver/runtime launch sequences on OpenCL.
//!
//! Client code keeps calling the legacy entry points exported by
//! [`shim::ffi`]; each cycle of `configureKernel → cudaConfigureCall →
//! setKernelArg* → kernelGo` becomes a single NDRange dispatch through a
//! [`backend::ComputeBackend`]. The same cycle is available to Rust callers
//! through an explicit [`launch::LaunchConfiguration`].

pub mod backend;
pub mod config;
pub mod launch;
pub mod registry;
pub mod runtime;
pub mod shim;

pub use backend::{
    BackendError, BufferHandle, ComputeBackend, HostPtr, KernelArg, KernelHandle, OpenClBackend,
    QueueHandle, RecordingBackend, WorkShape,
};
pub use config::{get_shim_config, DevicePreference, ShimConfig};
pub use launch::{Dim3, DispatchSummary, LaunchConfiguration, LaunchState, Scalar, ShimError};
pub use registry::{HostMapping, MemoryEntry, MemoryRegistry, PointerTable};
