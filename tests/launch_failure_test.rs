use std::sync::Arc;

use clbridge::backend::BackendEvent;
use clbridge::{
    BackendError, Dim3, HostMapping, LaunchConfiguration, LaunchState, MemoryEntry, PointerTable,
    RecordingBackend, ShimError,
};

const SRC: &str = "__kernel void k(__global float* x, __global void* p) {}";

fn setup() -> (Arc<RecordingBackend>, Arc<PointerTable>, LaunchConfiguration<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::new());
    let table = Arc::new(PointerTable::new());
    let launch = LaunchConfiguration::new(backend.clone(), table.clone());
    (backend, table, launch)
}

#[test]
fn failed_enqueue_still_settles_every_resource() {
    let (backend, table, mut launch) = setup();
    let mapping = HostMapping::allocate(backend.clone(), 64).unwrap();
    let host = mapping.host_ptr().unwrap();
    table.register(host, mapping.clone());

    launch.configure("k", SRC).unwrap();
    launch.set_geometry(Dim3::new(1, 1, 1), Dim3::new(16, 1, 1), None, 0).unwrap();
    launch.bind_device_pointer(host).unwrap();
    launch.bind_value_struct(&[7u8; 12]).unwrap();
    assert_eq!(backend.live_buffers(), 2);

    backend.fail_enqueue(true);
    let err = launch.launch().unwrap_err();
    assert!(matches!(err, ShimError::Backend(BackendError::Call { call: "clEnqueueNDRangeKernel", .. })));

    assert_eq!(backend.live_buffers(), 1, "only the registered mapping survives");
    assert!(mapping.needs_remap());
    assert_eq!(launch.state(), LaunchState::Idle);
    assert_eq!(launch.pending_release_count(), 0);
    assert_eq!(launch.pending_remap_count(), 0);
    assert!(launch.last_dispatch().is_none());
    assert_eq!(backend.count_events(|e| matches!(e, BackendEvent::Finish { .. })), 0);
}

#[test]
fn release_failure_is_reported() {
    let (backend, _table, mut launch) = setup();
    launch.configure("k", SRC).unwrap();
    launch.set_geometry(Dim3::new(1, 1, 1), Dim3::new(1, 1, 1), None, 0).unwrap();
    launch.bind_value_struct(&[1u8; 4]).unwrap();

    backend.fail_release(true);
    let err = launch.launch().unwrap_err();
    assert!(matches!(err, ShimError::Backend(BackendError::Call { call: "clReleaseMemObject", .. })));

    assert_eq!(backend.dispatches().len(), 1, "the dispatch itself was issued");
    assert!(launch.last_dispatch().is_some());
    assert_eq!(launch.pending_release_count(), 0);
    backend.fail_release(false);
}

#[test]
fn failed_struct_copy_frees_the_staging_buffer() {
    let (backend, _table, mut launch) = setup();
    launch.configure("k", SRC).unwrap();
    launch.set_geometry(Dim3::new(1, 1, 1), Dim3::new(1, 1, 1), None, 0).unwrap();

    backend.fail_write(true);
    assert!(launch.bind_value_struct(&[0u8; 32]).is_err());

    assert_eq!(backend.live_buffers(), 0);
    assert!(launch.bound_args().is_empty());
    assert_eq!(launch.pending_release_count(), 0);
    assert_eq!(launch.state(), LaunchState::GeometrySet);
}

#[test]
fn empty_geometry_fails_at_launch_and_cleans_up() {
    let (backend, _table, mut launch) = setup();
    launch.configure("k", SRC).unwrap();
    launch.set_geometry(Dim3::new(0, 1, 1), Dim3::new(64, 1, 1), None, 0).unwrap();
    launch.bind_value_struct(&[0u8; 8]).unwrap();

    let err = launch.launch().unwrap_err();
    assert!(matches!(err, ShimError::InvalidGeometry(_)));
    assert!(backend.dispatches().is_empty());
    assert_eq!(backend.live_buffers(), 0);
    assert_eq!(launch.state(), LaunchState::Idle);
}

#[test]
fn reconfigure_mid_cycle_settles_leftovers() {
    let (backend, table, mut launch) = setup();
    let mapping = HostMapping::allocate(backend.clone(), 32).unwrap();
    let host = mapping.host_ptr().unwrap();
    table.register(host, mapping.clone());

    launch.configure("k", SRC).unwrap();
    launch.set_geometry(Dim3::new(1, 1, 1), Dim3::new(1, 1, 1), None, 0).unwrap();
    launch.bind_device_pointer(host).unwrap();
    launch.bind_value_struct(&[0u8; 8]).unwrap();
    assert!(!mapping.needs_remap());

    launch.configure("k", SRC).unwrap();

    assert!(mapping.needs_remap());
    assert_eq!(backend.live_buffers(), 1);
    assert!(launch.bound_args().is_empty());
    assert_eq!(launch.state(), LaunchState::Configured);
    assert!(backend.dispatches().is_empty());
}

#[test]
fn surplus_arguments_surface_from_the_backend() {
    let (backend, _table, mut launch) = setup();
    launch.configure("k", SRC).unwrap();
    launch.set_geometry(Dim3::new(1, 1, 1), Dim3::new(1, 1, 1), None, 0).unwrap();
    for _ in 0..3 {
        launch.bind_scalar(1i32).unwrap();
    }
    // Nothing validates arity locally; all three reach the backend.
    launch.launch().unwrap();
    assert_eq!(backend.dispatches()[0].1.len(), 3);
}
