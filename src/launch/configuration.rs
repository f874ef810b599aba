use std::sync::Arc;

use tracing::{debug, warn};

use super::dispatch::DispatchSummary;
use super::geometry::Dim3;
use super::staging::{PendingRemap, StagingBuffer};
use super::{LaunchState, ShimError};
use crate::backend::{ComputeBackend, KernelArg, KernelHandle, QueueHandle};
use crate::config::ShimConfig;
use crate::registry::MemoryRegistry;

/// Pending dispatch context.
///
/// Owns the pending kernel exclusively and borrows a queue handle from the
/// backend. Not internally synchronised: share it behind a `Mutex` when more
/// than one caller can reach it.
pub struct LaunchConfiguration<B: ComputeBackend> {
    pub(super) backend: Arc<B>,
    pub(super) registry: Arc<dyn MemoryRegistry>,
    pub(super) state: LaunchState,
    pub(super) grid: Dim3,
    pub(super) block: Dim3,
    pub(super) kernel: Option<KernelHandle>,
    pub(super) queue: Option<QueueHandle>,
    pub(super) args: Vec<KernelArg>,
    pub(super) pending_releases: Vec<StagingBuffer<B>>,
    pub(super) pending_remaps: Vec<PendingRemap>,
    pub(super) sync_before_remap: bool,
    pub(super) last_dispatch: Option<DispatchSummary>,
}

impl<B: ComputeBackend> LaunchConfiguration<B> {
    pub fn new(backend: Arc<B>, registry: Arc<dyn MemoryRegistry>) -> Self {
        Self::with_config(backend, registry, &ShimConfig::default())
    }

    pub fn with_config(backend: Arc<B>, registry: Arc<dyn MemoryRegistry>, config: &ShimConfig) -> Self {
        Self {
            backend,
            registry,
            state: LaunchState::Idle,
            grid: Dim3::default(),
            block: Dim3::default(),
            kernel: None,
            queue: None,
            args: Vec::new(),
            pending_releases: Vec::new(),
            pending_remaps: Vec::new(),
            sync_before_remap: config.sync_before_remap,
            last_dispatch: None,
        }
    }

    pub(super) fn require(&self, operation: &'static str, allowed: &[LaunchState]) -> Result<(), ShimError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ShimError::PreconditionViolation { operation, state: self.state })
        }
    }

    /// Builds `name` from `source` and makes it the pending kernel.
    ///
    /// On failure nothing changes. On success the previous kernel is
    /// destroyed and leftovers of an unfinished cycle are settled.
    pub fn configure(&mut self, name: &str, source: &str) -> Result<(), ShimError> {
        let kernel = self.backend.build_kernel(source, name)?;
        debug!(target: "clbridge", kernel = name, "kernel configured");

        let previous = self.kernel.replace(kernel);
        self.reset_pending();
        self.grid = Dim3::default();
        self.block = Dim3::default();
        self.queue = None;
        self.state = LaunchState::Configured;

        if let Some(old) = previous {
            self.backend.release_kernel(old)?;
        }
        Ok(())
    }

    /// Stores the work shape of the pending dispatch. `queue` of `None`
    /// selects the backend's default queue.
    pub fn set_geometry(
        &mut self,
        grid: Dim3,
        block: Dim3,
        queue: Option<QueueHandle>,
        shared_mem_bytes: usize,
    ) -> Result<(), ShimError> {
        if shared_mem_bytes != 0 {
            return Err(ShimError::UnsupportedFeature(format!(
                "non-zero shared memory ({shared_mem_bytes} bytes requested)"
            )));
        }
        self.require("set_geometry", &[LaunchState::Configured, LaunchState::GeometrySet])?;

        let queue = queue.unwrap_or_else(|| self.backend.default_queue());
        debug!(
            target: "clbridge",
            grid = ?grid.to_array(),
            block = ?block.to_array(),
            queue = queue.0,
            "geometry set"
        );

        self.grid = grid;
        self.block = block;
        self.queue = Some(queue);
        self.state = LaunchState::GeometrySet;
        Ok(())
    }

    fn reset_pending(&mut self) {
        if !self.pending_releases.is_empty() || !self.pending_remaps.is_empty() {
            warn!(
                target: "clbridge",
                releases = self.pending_releases.len(),
                remaps = self.pending_remaps.len(),
                "discarding resources of an unfinished launch"
            );
        }
        self.args.clear();
        self.pending_releases.clear();
        self.pending_remaps.clear();
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    pub fn grid(&self) -> Dim3 {
        self.grid
    }

    pub fn block(&self) -> Dim3 {
        self.block
    }

    pub fn queue(&self) -> Option<QueueHandle> {
        self.queue
    }

    pub fn kernel_name(&self) -> Option<&str> {
        self.kernel.as_ref().map(|k| k.name.as_str())
    }

    pub fn bound_args(&self) -> &[KernelArg] {
        &self.args
    }

    pub fn pending_release_count(&self) -> usize {
        self.pending_releases.len()
    }

    pub fn pending_remap_count(&self) -> usize {
        self.pending_remaps.len()
    }

    pub fn last_dispatch(&self) -> Option<&DispatchSummary> {
        self.last_dispatch.as_ref()
    }

    pub fn sync_before_remap(&self) -> bool {
        self.sync_before_remap
    }

    pub fn set_sync_before_remap(&mut self, sync: bool) {
        self.sync_before_remap = sync;
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<dyn MemoryRegistry> {
        &self.registry
    }
}

impl<B: ComputeBackend> Drop for LaunchConfiguration<B> {
    fn drop(&mut self) {
        self.reset_pending();
        if let Some(kernel) = self.kernel.take() {
            if let Err(e) = self.backend.release_kernel(kernel) {
                warn!(target: "clbridge", error = %e, "kernel release failed");
            }
        }
    }
}
