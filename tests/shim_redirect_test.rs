use std::sync::Arc;

use proptest::prelude::*;

use clbridge::launch::unpack_xy;
use clbridge::shim::{redirect, LEGACY_SUCCESS};
use clbridge::{
    HostMapping, KernelArg, LaunchConfiguration, LaunchState, MemoryEntry, PointerTable,
    RecordingBackend, ShimError,
};

const SRC: &str = "__kernel void k(__global float* a, __global char* b, int n) {}";

fn setup() -> (Arc<RecordingBackend>, Arc<PointerTable>, LaunchConfiguration<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::new());
    let table = Arc::new(PointerTable::new());
    let launch = LaunchConfiguration::new(backend.clone(), table.clone());
    (backend, table, launch)
}

fn pack(x: u32, y: u32) -> u64 {
    ((y as u64) << 32) | x as u64
}

#[test]
fn legacy_cycle_produces_one_dispatch() {
    let (backend, table, mut launch) = setup();
    let floats = HostMapping::allocate(backend.clone(), 128).unwrap();
    let chars = HostMapping::allocate(backend.clone(), 128).unwrap();
    let f = floats.host_ptr().unwrap();
    let c = chars.host_ptr().unwrap();
    table.register(f, floats.clone());
    table.register(c, chars.clone());

    redirect::configure_kernel(&mut launch, "k", SRC).unwrap();
    let status = redirect::configure_call(&mut launch, pack(2, 1), 1, pack(16, 1), 1, 0, None).unwrap();
    assert_eq!(status, LEGACY_SUCCESS);

    redirect::bind_arg_float_ptr(&mut launch, f).unwrap();
    redirect::bind_arg_char_ptr(&mut launch, c).unwrap();
    redirect::bind_arg_int32(&mut launch, 32).unwrap();

    // Only the float* argument is unmapped for the dispatch.
    assert!(!floats.needs_remap());
    assert!(chars.needs_remap());
    assert_eq!(launch.pending_remap_count(), 1);

    redirect::launch_kernel(&mut launch).unwrap();

    let dispatches = backend.dispatches();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].0.global, [32, 1, 1]);
    assert_eq!(
        dispatches[0].1,
        vec![
            KernelArg::Buffer(floats.device_buffer()),
            KernelArg::Buffer(chars.device_buffer()),
            KernelArg::Int32(32),
        ]
    );
    assert!(floats.needs_remap());
    assert_eq!(launch.state(), LaunchState::Idle);
}

#[test]
fn scalar_redirects_keep_their_width() {
    let (backend, _table, mut launch) = setup();
    redirect::configure_kernel(&mut launch, "k", SRC).unwrap();
    redirect::configure_call(&mut launch, pack(1, 1), 1, pack(1, 1), 1, 0, None).unwrap();
    redirect::bind_arg_int64(&mut launch, i64::MAX).unwrap();
    redirect::bind_arg_float(&mut launch, 2.25).unwrap();
    redirect::bind_arg_struct(&mut launch, &[9u8; 3]).unwrap();
    redirect::launch_kernel(&mut launch).unwrap();

    let args = &backend.dispatches()[0].1;
    assert_eq!(args[0], KernelArg::Int64(i64::MAX));
    assert_eq!(args[1], KernelArg::Float32(2.25));
    assert!(matches!(args[2], KernelArg::Buffer(_)));
}

#[test]
fn configure_call_before_kernel_is_a_precondition_violation() {
    let (_backend, _table, mut launch) = setup();
    let err = redirect::configure_call(&mut launch, pack(1, 1), 1, pack(1, 1), 1, 0, None).unwrap_err();
    assert!(matches!(err, ShimError::PreconditionViolation { state: LaunchState::Idle, .. }));
}

proptest! {
    #[test]
    fn packed_geometry_yields_grid_times_block(
        gx in 1u32..64, gy in 1u32..64, gz in 1u32..8,
        bx in 1u32..64, by in 1u32..16, bz in 1u32..4,
    ) {
        prop_assert_eq!(unpack_xy(pack(gx, gy)), (gx, gy));

        let (backend, _table, mut launch) = setup();
        redirect::configure_kernel(&mut launch, "k", SRC).unwrap();
        redirect::configure_call(&mut launch, pack(gx, gy), gz, pack(bx, by), bz, 0, None).unwrap();
        redirect::launch_kernel(&mut launch).unwrap();

        let (shape, _) = backend.dispatches()[0].clone();
        prop_assert_eq!(
            shape.global,
            [(gx * bx) as usize, (gy * by) as usize, (gz * bz) as usize]
        );
        prop_assert_eq!(shape.local, [bx as usize, by as usize, bz as usize]);
    }

    #[test]
    fn any_shared_memory_request_is_unsupported(shared in 1usize..=usize::MAX) {
        let (_backend, _table, mut launch) = setup();
        redirect::configure_kernel(&mut launch, "k", SRC).unwrap();

        let err = redirect::configure_call(&mut launch, pack(1, 1), 1, pack(1, 1), 1, shared, None).unwrap_err();
        prop_assert!(matches!(err, ShimError::UnsupportedFeature(_)));
        prop_assert_eq!(launch.state(), LaunchState::Configured);
    }
}
