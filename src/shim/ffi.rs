//! C symbols that legacy client code links against.
//!
//! All launch entry points share one process-wide [`LaunchConfiguration`]
//! behind a mutex, built on first use together with the OpenCL context. Any
//! error is fatal: it is logged and the process aborts, so these functions
//! only ever return the legacy success code.
//!
//! Calls must arrive as `configureKernel`, then `cudaConfigureCall`, then the
//! `setKernelArg*` calls, then `kernelGo`. Objects built by the stock legacy
//! toolchain issue `cudaConfigureCall` first; against this library that is a
//! precondition violation and aborts the process.
//!
//! Buffers from `clbridgeAllocHostMapped` are unmapped and remapped on the
//! queue of the launch they are bound to, and must come back at the address
//! first returned. A driver that remaps elsewhere aborts the launch.
#![allow(non_snake_case)]

use std::borrow::Cow;
use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::slice;
use std::sync::{Arc, Mutex};

use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, error};

use super::device::{self, LegacyStatus, LEGACY_SUCCESS};
use super::redirect;
use crate::backend::{HostPtr, OpenClBackend, QueueHandle};
use crate::config::get_shim_config;
use crate::launch::{LaunchConfiguration, ShimError};
use crate::registry::{HostMapping, MemoryRegistry, PointerTable};
use crate::runtime::{global_backend, init_logging};

type GlobalLaunch = Mutex<LaunchConfiguration<OpenClBackend>>;

static REGISTRY: Lazy<Arc<PointerTable>> = Lazy::new(|| Arc::new(PointerTable::new()));

static LAUNCH: OnceCell<GlobalLaunch> = OnceCell::new();

/// Registry the legacy entry points resolve host pointers against.
pub fn global_registry() -> &'static Arc<PointerTable> {
    &REGISTRY
}

fn global_launch() -> Result<&'static GlobalLaunch, ShimError> {
    LAUNCH.get_or_try_init(|| -> Result<GlobalLaunch, ShimError> {
        let backend = Arc::clone(global_backend()?);
        let registry: Arc<dyn MemoryRegistry> = REGISTRY.clone();
        Ok(Mutex::new(LaunchConfiguration::with_config(backend, registry, get_shim_config())))
    })
}

fn fatal(entry: &'static str, err: &ShimError) -> ! {
    error!(target: "clbridge", entry, error = %err, "fatal error in legacy entry point");
    eprintln!("clbridge: {entry}: {err}");
    std::process::abort()
}

fn with_launch<T>(
    entry: &'static str,
    f: impl FnOnce(&mut LaunchConfiguration<OpenClBackend>) -> Result<T, ShimError>,
) -> T {
    init_logging();
    debug!(target: "clbridge", entry, "legacy call");

    let result = global_launch().and_then(|launch| {
        let mut guard = launch.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    });

    match result {
        Ok(value) => value,
        Err(e) => fatal(entry, &e),
    }
}

unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<Cow<'a, str>, ShimError> {
    if ptr.is_null() {
        return Err(ShimError::InvalidArgument(format!("{what} is null")));
    }
    unsafe { Ok(CStr::from_ptr(ptr).to_string_lossy()) }
}

unsafe fn write_out(out: *mut c_int, value: i32) {
    if !out.is_null() {
        unsafe { *out = value };
    }
}

fn queue_from_stream(stream: *mut c_void) -> Option<QueueHandle> {
    if stream.is_null() {
        None
    } else {
        Some(QueueHandle(stream as u64))
    }
}

/// # Safety
/// `count` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn cudaGetDeviceCount(count: *mut c_int) -> LegacyStatus {
    let (status, n) = device::device_count();
    unsafe { write_out(count, n) };
    status
}

/// # Safety
/// `count` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn cuDeviceGetCount(count: *mut c_int) -> LegacyStatus {
    unsafe { cudaGetDeviceCount(count) }
}

/// # Safety
/// `device` must be null or valid for writing a `c_int`.
#[no_mangle]
pub unsafe extern "C" fn cuDeviceGet(device: *mut c_void, ordinal: c_int) -> LegacyStatus {
    let (status, index) = device::device_get(ordinal);
    unsafe { write_out(device as *mut c_int, index) };
    status
}

/// # Safety
/// `device` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn cudaGetDevice(device: *mut c_int) -> LegacyStatus {
    let (status, index) = device::get_device();
    unsafe { write_out(device, index) };
    status
}

#[no_mangle]
pub extern "C" fn cudaSetDevice(device: c_int) -> LegacyStatus {
    device::set_device(device)
}

#[no_mangle]
pub extern "C" fn cudaGetLastError() -> LegacyStatus {
    device::get_last_error()
}

#[no_mangle]
pub extern "C" fn cudaGetErrorString(error: LegacyStatus) -> *const c_char {
    device::get_error_string(error).as_ptr()
}

#[no_mangle]
pub extern "C" fn cuInit(flags: c_uint) -> LegacyStatus {
    debug!(target: "clbridge", flags, "redirected cuInit");
    with_launch("cuInit", |_| Ok(LEGACY_SUCCESS))
}

#[no_mangle]
pub extern "C" fn cudaConfigureCall(
    grid_xy: u64,
    grid_z: c_uint,
    block_xy: u64,
    block_z: c_uint,
    shared_mem: usize,
    stream: *mut c_void,
) -> LegacyStatus {
    let queue = queue_from_stream(stream);
    with_launch("cudaConfigureCall", |launch| {
        redirect::configure_call(launch, grid_xy, grid_z, block_xy, block_z, shared_mem, queue)
    })
}

/// # Safety
/// Both arguments must be null or NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn configureKernel(kernel_name: *const c_char, source: *const c_char) {
    with_launch("configureKernel", |launch| {
        let name = unsafe { c_str(kernel_name, "kernel name")? };
        let source = unsafe { c_str(source, "kernel source")? };
        redirect::configure_kernel(launch, &name, &source)
    })
}

/// # Safety
/// `host_struct` must be valid for reading `size` bytes.
#[no_mangle]
pub unsafe extern "C" fn setKernelArgStruct(host_struct: *mut c_char, size: c_int) {
    with_launch("setKernelArgStruct", |launch| {
        if host_struct.is_null() || size <= 0 {
            return Err(ShimError::InvalidArgument(format!("struct argument of {size} bytes at {host_struct:p}")));
        }
        let bytes = unsafe { slice::from_raw_parts(host_struct as *const u8, size as usize) };
        redirect::bind_arg_struct(launch, bytes)
    })
}

#[no_mangle]
pub extern "C" fn setKernelArgFloatStar(host: *mut f32) {
    with_launch("setKernelArgFloatStar", |launch| {
        redirect::bind_arg_float_ptr(launch, HostPtr::from_raw(host))
    })
}

#[no_mangle]
pub extern "C" fn setKernelArgCharStar(host: *mut c_char) {
    with_launch("setKernelArgCharStar", |launch| {
        redirect::bind_arg_char_ptr(launch, HostPtr::from_raw(host))
    })
}

#[no_mangle]
pub extern "C" fn setKernelArgInt32(value: c_int) {
    with_launch("setKernelArgInt32", |launch| redirect::bind_arg_int32(launch, value))
}

#[no_mangle]
pub extern "C" fn setKernelArgInt64(value: i64) {
    with_launch("setKernelArgInt64", |launch| redirect::bind_arg_int64(launch, value))
}

#[no_mangle]
pub extern "C" fn setKernelArgFloat(value: f32) {
    with_launch("setKernelArgFloat", |launch| redirect::bind_arg_float(launch, value))
}

#[no_mangle]
pub extern "C" fn kernelGo() {
    with_launch("kernelGo", |launch| redirect::launch_kernel(launch))
}

/// Allocates a host-mapped device buffer of `size` bytes and registers it, so
/// the returned pointer can be bound with `setKernelArgFloatStar`.
#[no_mangle]
pub extern "C" fn clbridgeAllocHostMapped(size: usize) -> *mut c_void {
    with_launch("clbridgeAllocHostMapped", |launch| {
        let mapping = HostMapping::allocate(Arc::clone(launch.backend()), size)?;
        let host = mapping
            .host_ptr()
            .ok_or_else(|| ShimError::InvalidArgument("fresh mapping is not host-visible".into()))?;
        REGISTRY.register(host, mapping);
        Ok(host.as_mut_ptr())
    })
}

/// Unregisters and frees a buffer from `clbridgeAllocHostMapped`. Unknown
/// pointers are ignored.
#[no_mangle]
pub extern "C" fn clbridgeFreeHostMapped(host: *mut c_void) {
    if host.is_null() {
        return;
    }
    if REGISTRY.unregister(HostPtr::from_raw(host)).is_none() {
        debug!(target: "clbridge", host = ?host, "free of unregistered pointer ignored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn null_stream_selects_default_queue() {
        assert_eq!(queue_from_stream(ptr::null_mut()), None);
        assert_eq!(queue_from_stream(0x40 as *mut c_void), Some(QueueHandle(0x40)));
    }

    #[test]
    fn device_queries_tolerate_null_out_pointers() {
        unsafe {
            assert_eq!(cudaGetDeviceCount(ptr::null_mut()), LEGACY_SUCCESS);
            assert_eq!(cudaGetDevice(ptr::null_mut()), LEGACY_SUCCESS);
            assert_eq!(cuDeviceGet(ptr::null_mut(), 3), LEGACY_SUCCESS);
        }
    }

    #[test]
    fn null_kernel_name_is_rejected() {
        let err = unsafe { c_str(ptr::null(), "kernel name") }.unwrap_err();
        assert!(matches!(err, ShimError::InvalidArgument(_)));
    }
}
