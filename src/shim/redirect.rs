use tracing::debug;

use super::device::{LegacyStatus, LEGACY_SUCCESS};
use crate::backend::{ComputeBackend, HostPtr, QueueHandle};
use crate::launch::{Dim3, LaunchConfiguration, ShimError};

/// `cudaConfigureCall`: grid and block arrive as `(packed_xy, z)` pairs.
pub fn configure_call<B: ComputeBackend>(
    launch: &mut LaunchConfiguration<B>,
    grid_xy: u64,
    grid_z: u32,
    block_xy: u64,
    block_z: u32,
    shared_mem_bytes: usize,
    queue: Option<QueueHandle>,
) -> Result<LegacyStatus, ShimError> {
    let grid = Dim3::from_packed(grid_xy, grid_z);
    let block = Dim3::from_packed(block_xy, block_z);
    debug!(target: "clbridge", grid_xy, grid_z, block_xy, block_z, shared_mem_bytes, "configure_call");

    launch.set_geometry(grid, block, queue, shared_mem_bytes)?;
    Ok(LEGACY_SUCCESS)
}

pub fn configure_kernel<B: ComputeBackend>(
    launch: &mut LaunchConfiguration<B>,
    name: &str,
    source: &str,
) -> Result<(), ShimError> {
    launch.configure(name, source)
}

pub fn bind_arg_struct<B: ComputeBackend>(launch: &mut LaunchConfiguration<B>, bytes: &[u8]) -> Result<(), ShimError> {
    launch.bind_value_struct(bytes)
}

/// `float*` arguments carry mapping bookkeeping.
pub fn bind_arg_float_ptr<B: ComputeBackend>(launch: &mut LaunchConfiguration<B>, host: HostPtr) -> Result<(), ShimError> {
    launch.bind_device_pointer(host)
}

/// `char*` arguments are bound as opaque device buffers.
pub fn bind_arg_char_ptr<B: ComputeBackend>(launch: &mut LaunchConfiguration<B>, host: HostPtr) -> Result<(), ShimError> {
    launch.bind_opaque_buffer(host)
}

pub fn bind_arg_int32<B: ComputeBackend>(launch: &mut LaunchConfiguration<B>, value: i32) -> Result<(), ShimError> {
    launch.bind_scalar(value)
}

pub fn bind_arg_int64<B: ComputeBackend>(launch: &mut LaunchConfiguration<B>, value: i64) -> Result<(), ShimError> {
    launch.bind_scalar(value)
}

pub fn bind_arg_float<B: ComputeBackend>(launch: &mut LaunchConfiguration<B>, value: f32) -> Result<(), ShimError> {
    launch.bind_scalar(value)
}

pub fn launch_kernel<B: ComputeBackend>(launch: &mut LaunchConfiguration<B>) -> Result<(), ShimError> {
    launch.launch().map(|_| ())
}
