use libloading::{Library, Symbol};
use std::ffi::{c_char, c_void, CString};
use std::mem::size_of;
use std::ptr;

use tracing::{debug, info, warn};

use super::{
    BackendError, BufferHandle, ComputeBackend, HostPtr, KernelArg, KernelHandle, QueueHandle,
    WorkShape,
};
use crate::config::{DevicePreference, ShimConfig};

type ClInt = i32;
type ClUint = u32;
type ClHandle = *mut c_void;

const CL_SUCCESS: ClInt = 0;
const CL_DEVICE_NOT_FOUND: ClInt = -1;

const CL_DEVICE_TYPE_CPU: u64 = 1 << 1;
const CL_DEVICE_TYPE_GPU: u64 = 1 << 2;
const CL_DEVICE_TYPE_ALL: u64 = 0xFFFF_FFFF;

const CL_MEM_READ_WRITE: u64 = 1 << 0;
const CL_MEM_ALLOC_HOST_PTR: u64 = 1 << 4;
const CL_MAP_READ: u64 = 1 << 0;
const CL_MAP_WRITE: u64 = 1 << 1;
const CL_TRUE: ClUint = 1;

const CL_PROGRAM_BUILD_LOG: ClUint = 0x1183;

const DRIVER_CANDIDATES: &[&str] = &[
    "OpenCL.dll",
    "libOpenCL.so.1",
    "libOpenCL.so",
    "/System/Library/Frameworks/OpenCL.framework/OpenCL",
];

fn device_search_order(preference: DevicePreference) -> &'static [u64] {
    match preference {
        DevicePreference::Gpu => &[CL_DEVICE_TYPE_GPU, CL_DEVICE_TYPE_CPU],
        DevicePreference::Cpu => &[CL_DEVICE_TYPE_CPU],
        DevicePreference::Any => &[CL_DEVICE_TYPE_ALL],
    }
}

fn check(call: &'static str, code: ClInt) -> Result<(), BackendError> {
    if code == CL_SUCCESS {
        return Ok(());
    }
    warn!(target: "clbridge", call, code, "OpenCL call failed");
    Err(BackendError::call(call, code))
}

unsafe fn symbol<'lib, T>(lib: &'lib Library, name: &[u8]) -> Result<Symbol<'lib, T>, BackendError> {
    unsafe {
        lib.get(name).map_err(|_| {
            let trimmed = name.strip_suffix(b"\0").unwrap_or(name);
            BackendError::MissingSymbol(String::from_utf8_lossy(trimmed).into())
        })
    }
}

/// OpenCL implementation of [`ComputeBackend`], bound to one device, one
/// context and one default in-order queue.
///
/// The ICD loader is opened at runtime, so the crate links without an OpenCL
/// SDK and fails with [`BackendError::DriverNotFound`] on hosts that lack one.
pub struct OpenClBackend {
    lib: Library,
    device: u64,
    context: u64,
    queue: u64,
    build_options: String,
}

impl OpenClBackend {
    pub fn new(config: &ShimConfig) -> Result<Self, BackendError> {
        let lib = Self::load_driver(config)?;

        let (device, context, queue) = unsafe { Self::open_device(&lib, config.device)? };
        info!(
            target: "clbridge",
            device = format_args!("{device:#x}"),
            queue = format_args!("{queue:#x}"),
            "OpenCL context ready"
        );

        Ok(Self {
            lib,
            device,
            context,
            queue,
            build_options: config.build_options.clone(),
        })
    }

    fn load_driver(config: &ShimConfig) -> Result<Library, BackendError> {
        let candidates = config
            .opencl_library
            .iter()
            .map(String::as_str)
            .chain(DRIVER_CANDIDATES.iter().copied());

        let mut last_error = String::from("no candidate library");
        for name in candidates {
            match unsafe { Library::new(name) } {
                Ok(lib) => {
                    debug!(target: "clbridge", library = name, "OpenCL driver loaded");
                    return Ok(lib);
                }
                Err(e) => last_error = format!("{name}: {e}"),
            }
        }

        Err(BackendError::DriverNotFound(last_error))
    }

    unsafe fn open_device(
        lib: &Library,
        preference: DevicePreference,
    ) -> Result<(u64, u64, u64), BackendError> {
        unsafe {
            let get_platform_ids: Symbol<unsafe extern "C" fn(ClUint, *mut ClHandle, *mut ClUint) -> ClInt> =
                symbol(lib, b"clGetPlatformIDs\0")?;

            let mut count: ClUint = 0;
            let res = get_platform_ids(0, ptr::null_mut(), &mut count);
            if res != CL_SUCCESS || count == 0 {
                return Err(BackendError::NoDevice);
            }

            let mut platforms: Vec<ClHandle> = vec![ptr::null_mut(); count as usize];
            check(
                "clGetPlatformIDs",
                get_platform_ids(count, platforms.as_mut_ptr(), ptr::null_mut()),
            )?;

            let device = Self::pick_device(lib, &platforms, preference)?;

            let create_context: Symbol<
                unsafe extern "C" fn(
                    *const isize,
                    ClUint,
                    *const ClHandle,
                    *const c_void,
                    *mut c_void,
                    *mut ClInt,
                ) -> ClHandle,
            > = symbol(lib, b"clCreateContext\0")?;

            let mut err: ClInt = CL_SUCCESS;
            let context = create_context(ptr::null(), 1, &device, ptr::null(), ptr::null_mut(), &mut err);
            if err != CL_SUCCESS || context.is_null() {
                return Err(BackendError::call("clCreateContext", err));
            }

            let create_queue: Symbol<unsafe extern "C" fn(ClHandle, ClHandle, u64, *mut ClInt) -> ClHandle> =
                symbol(lib, b"clCreateCommandQueue\0")?;

            let queue = create_queue(context, device, 0, &mut err);
            if err != CL_SUCCESS || queue.is_null() {
                return Err(BackendError::call("clCreateCommandQueue", err));
            }

            Ok((device as u64, context as u64, queue as u64))
        }
    }

    unsafe fn pick_device(
        lib: &Library,
        platforms: &[ClHandle],
        preference: DevicePreference,
    ) -> Result<ClHandle, BackendError> {
        unsafe {
            let get_device_ids: Symbol<
                unsafe extern "C" fn(ClHandle, u64, ClUint, *mut ClHandle, *mut ClUint) -> ClInt,
            > = symbol(lib, b"clGetDeviceIDs\0")?;

            for &device_type in device_search_order(preference) {
                for &platform in platforms {
                    let mut device: ClHandle = ptr::null_mut();
                    let mut found: ClUint = 0;
                    let res = get_device_ids(platform, device_type, 1, &mut device, &mut found);

                    if res == CL_SUCCESS && found > 0 && !device.is_null() {
                        return Ok(device);
                    }
                    if res != CL_SUCCESS && res != CL_DEVICE_NOT_FOUND {
                        debug!(target: "clbridge", code = res, device_type, "clGetDeviceIDs failed on platform");
                    }
                }
            }

            Err(BackendError::NoDevice)
        }
    }

    unsafe fn get<T>(&self, name: &[u8]) -> Result<Symbol<'_, T>, BackendError> {
        unsafe { symbol(&self.lib, name) }
    }

    unsafe fn build_log(&self, program: ClHandle) -> Result<String, BackendError> {
        unsafe {
            let build_info: Symbol<
                unsafe extern "C" fn(ClHandle, ClHandle, ClUint, usize, *mut c_void, *mut usize) -> ClInt,
            > = self.get(b"clGetProgramBuildInfo\0")?;

            let device = self.device as ClHandle;
            let mut size: usize = 0;
            check(
                "clGetProgramBuildInfo",
                build_info(program, device, CL_PROGRAM_BUILD_LOG, 0, ptr::null_mut(), &mut size),
            )?;
            if size <= 1 {
                return Ok(String::new());
            }

            let mut buf = vec![0u8; size];
            check(
                "clGetProgramBuildInfo",
                build_info(
                    program,
                    device,
                    CL_PROGRAM_BUILD_LOG,
                    size,
                    buf.as_mut_ptr() as *mut c_void,
                    ptr::null_mut(),
                ),
            )?;

            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            Ok(String::from_utf8_lossy(&buf[..end]).trim_end().to_string())
        }
    }

    unsafe fn release_program(&self, program: ClHandle) -> Result<(), BackendError> {
        unsafe {
            let release: Symbol<unsafe extern "C" fn(ClHandle) -> ClInt> = self.get(b"clReleaseProgram\0")?;
            check("clReleaseProgram", release(program))
        }
    }
}

fn to_cstring(name: &str, what: &str, value: &str) -> Result<CString, BackendError> {
    CString::new(value).map_err(|_| BackendError::Build {
        name: name.to_string(),
        log: format!("{what} contains an interior NUL byte"),
    })
}

impl ComputeBackend for OpenClBackend {
    fn build_kernel(&self, source: &str, name: &str) -> Result<KernelHandle, BackendError> {
        let src_c = to_cstring(name, "kernel source", source)?;
        let name_c = to_cstring(name, "kernel name", name)?;
        let options_c = to_cstring(name, "build options", &self.build_options)?;

        unsafe {
            let create_program: Symbol<
                unsafe extern "C" fn(ClHandle, ClUint, *const *const c_char, *const usize, *mut ClInt) -> ClHandle,
            > = self.get(b"clCreateProgramWithSource\0")?;

            let build_program: Symbol<
                unsafe extern "C" fn(ClHandle, ClUint, *const ClHandle, *const c_char, *const c_void, *mut c_void) -> ClInt,
            > = self.get(b"clBuildProgram\0")?;

            let create_kernel: Symbol<unsafe extern "C" fn(ClHandle, *const c_char, *mut ClInt) -> ClHandle> =
                self.get(b"clCreateKernel\0")?;

            let mut err: ClInt = CL_SUCCESS;
            let strings = [src_c.as_ptr()];
            let program = create_program(self.context as ClHandle, 1, strings.as_ptr(), ptr::null(), &mut err);
            if err != CL_SUCCESS || program.is_null() {
                return Err(BackendError::call("clCreateProgramWithSource", err));
            }

            let device = self.device as ClHandle;
            let res = build_program(program, 1, &device, options_c.as_ptr(), ptr::null(), ptr::null_mut());
            if res != CL_SUCCESS {
                let log = match self.build_log(program) {
                    Ok(log) if !log.is_empty() => log,
                    _ => format!("clBuildProgram returned {res}"),
                };
                let _ = self.release_program(program);
                return Err(BackendError::Build { name: name.to_string(), log });
            }

            let kernel = create_kernel(program, name_c.as_ptr(), &mut err);
            if err != CL_SUCCESS || kernel.is_null() {
                let _ = self.release_program(program);
                return Err(BackendError::Build {
                    name: name.to_string(),
                    log: format!("clCreateKernel returned {err}"),
                });
            }

            debug!(target: "clbridge", kernel = name, "kernel built");

            Ok(KernelHandle {
                kernel: kernel as u64,
                program: program as u64,
                name: name.to_string(),
            })
        }
    }

    fn release_kernel(&self, kernel: KernelHandle) -> Result<(), BackendError> {
        unsafe {
            let release: Symbol<unsafe extern "C" fn(ClHandle) -> ClInt> = self.get(b"clReleaseKernel\0")?;
            check("clReleaseKernel", release(kernel.kernel as ClHandle))?;
            self.release_program(kernel.program as ClHandle)
        }
    }

    fn set_arg(&self, kernel: &KernelHandle, index: u32, arg: &KernelArg) -> Result<(), BackendError> {
        unsafe {
            let set_kernel_arg: Symbol<unsafe extern "C" fn(ClHandle, ClUint, usize, *const c_void) -> ClInt> =
                self.get(b"clSetKernelArg\0")?;

            let k = kernel.kernel as ClHandle;
            let res = match arg {
                KernelArg::Int32(v) => set_kernel_arg(k, index, size_of::<i32>(), v as *const i32 as *const c_void),
                KernelArg::Int64(v) => set_kernel_arg(k, index, size_of::<i64>(), v as *const i64 as *const c_void),
                KernelArg::Float32(v) => set_kernel_arg(k, index, size_of::<f32>(), v as *const f32 as *const c_void),
                KernelArg::Buffer(b) => {
                    let mem = b.0 as ClHandle;
                    set_kernel_arg(k, index, size_of::<ClHandle>(), &mem as *const ClHandle as *const c_void)
                }
            };

            check("clSetKernelArg", res)
        }
    }

    fn enqueue(&self, kernel: &KernelHandle, queue: QueueHandle, shape: &WorkShape) -> Result<(), BackendError> {
        unsafe {
            let enqueue_nd_range: Symbol<
                unsafe extern "C" fn(
                    ClHandle,
                    ClHandle,
                    ClUint,
                    *const usize,
                    *const usize,
                    *const usize,
                    ClUint,
                    *const ClHandle,
                    *mut ClHandle,
                ) -> ClInt,
            > = self.get(b"clEnqueueNDRangeKernel\0")?;

            let flush: Symbol<unsafe extern "C" fn(ClHandle) -> ClInt> = self.get(b"clFlush\0")?;

            let q = queue.0 as ClHandle;
            check(
                "clEnqueueNDRangeKernel",
                enqueue_nd_range(
                    q,
                    kernel.kernel as ClHandle,
                    3,
                    ptr::null(),
                    shape.global.as_ptr(),
                    shape.local.as_ptr(),
                    0,
                    ptr::null(),
                    ptr::null_mut(),
                ),
            )?;

            check("clFlush", flush(q))
        }
    }

    fn finish(&self, queue: QueueHandle) -> Result<(), BackendError> {
        unsafe {
            let finish: Symbol<unsafe extern "C" fn(ClHandle) -> ClInt> = self.get(b"clFinish\0")?;
            check("clFinish", finish(queue.0 as ClHandle))
        }
    }

    fn alloc_buffer(&self, size: usize) -> Result<BufferHandle, BackendError> {
        unsafe {
            let create_buffer: Symbol<unsafe extern "C" fn(ClHandle, u64, usize, *mut c_void, *mut ClInt) -> ClHandle> =
                self.get(b"clCreateBuffer\0")?;

            let mut err: ClInt = CL_SUCCESS;
            let mem = create_buffer(
                self.context as ClHandle,
                CL_MEM_READ_WRITE | CL_MEM_ALLOC_HOST_PTR,
                size,
                ptr::null_mut(),
                &mut err,
            );
            if err != CL_SUCCESS || mem.is_null() {
                return Err(BackendError::call("clCreateBuffer", err));
            }

            Ok(BufferHandle(mem as u64))
        }
    }

    fn write_buffer(&self, queue: QueueHandle, buffer: BufferHandle, bytes: &[u8]) -> Result<(), BackendError> {
        unsafe {
            let write: Symbol<
                unsafe extern "C" fn(
                    ClHandle,
                    ClHandle,
                    ClUint,
                    usize,
                    usize,
                    *const c_void,
                    ClUint,
                    *const ClHandle,
                    *mut ClHandle,
                ) -> ClInt,
            > = self.get(b"clEnqueueWriteBuffer\0")?;

            check(
                "clEnqueueWriteBuffer",
                write(
                    queue.0 as ClHandle,
                    buffer.0 as ClHandle,
                    CL_TRUE,
                    0,
                    bytes.len(),
                    bytes.as_ptr() as *const c_void,
                    0,
                    ptr::null(),
                    ptr::null_mut(),
                ),
            )
        }
    }

    fn release_buffer(&self, buffer: BufferHandle) -> Result<(), BackendError> {
        unsafe {
            let release: Symbol<unsafe extern "C" fn(ClHandle) -> ClInt> = self.get(b"clReleaseMemObject\0")?;
            check("clReleaseMemObject", release(buffer.0 as ClHandle))
        }
    }

    fn map_buffer(&self, queue: QueueHandle, buffer: BufferHandle, size: usize) -> Result<HostPtr, BackendError> {
        unsafe {
            let map: Symbol<
                unsafe extern "C" fn(
                    ClHandle,
                    ClHandle,
                    ClUint,
                    u64,
                    usize,
                    usize,
                    ClUint,
                    *const ClHandle,
                    *mut ClHandle,
                    *mut ClInt,
                ) -> *mut c_void,
            > = self.get(b"clEnqueueMapBuffer\0")?;

            let mut err: ClInt = CL_SUCCESS;
            let mapped = map(
                queue.0 as ClHandle,
                buffer.0 as ClHandle,
                CL_TRUE,
                CL_MAP_READ | CL_MAP_WRITE,
                0,
                size,
                0,
                ptr::null(),
                ptr::null_mut(),
                &mut err,
            );
            if err != CL_SUCCESS || mapped.is_null() {
                return Err(BackendError::call("clEnqueueMapBuffer", err));
            }

            Ok(HostPtr::from_raw(mapped))
        }
    }

    fn unmap_buffer(&self, queue: QueueHandle, buffer: BufferHandle, mapped: HostPtr) -> Result<(), BackendError> {
        unsafe {
            let unmap: Symbol<
                unsafe extern "C" fn(ClHandle, ClHandle, *mut c_void, ClUint, *const ClHandle, *mut ClHandle) -> ClInt,
            > = self.get(b"clEnqueueUnmapMemObject\0")?;

            check(
                "clEnqueueUnmapMemObject",
                unmap(
                    queue.0 as ClHandle,
                    buffer.0 as ClHandle,
                    mapped.as_mut_ptr(),
                    0,
                    ptr::null(),
                    ptr::null_mut(),
                ),
            )
        }
    }

    fn default_queue(&self) -> QueueHandle {
        QueueHandle(self.queue)
    }
}

impl Drop for OpenClBackend {
    fn drop(&mut self) {
        unsafe {
            if let Ok(release_queue) = self.get::<unsafe extern "C" fn(ClHandle) -> ClInt>(b"clReleaseCommandQueue\0") {
                let _ = release_queue(self.queue as ClHandle);
            }
            if let Ok(release_context) = self.get::<unsafe extern "C" fn(ClHandle) -> ClInt>(b"clReleaseContext\0") {
                let _ = release_context(self.context as ClHandle);
            }
        }
    }
}
