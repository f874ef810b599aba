use std::mem;

use tracing::{debug, info};

use super::configuration::LaunchConfiguration;
use super::geometry::work_shape;
use super::{LaunchState, ShimError};
use crate::backend::{BackendError, ComputeBackend, KernelArg, KernelHandle, QueueHandle, WorkShape};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub kernel: String,
    pub queue: QueueHandle,
    pub shape: WorkShape,
    pub arg_count: usize,
    pub released: usize,
    pub remapped: usize,
    pub waited: bool,
}

fn keep_first(slot: &mut Option<ShimError>, result: Result<(), BackendError>) {
    if let Err(e) = result {
        if slot.is_none() {
            *slot = Some(e.into());
        }
    }
}

impl<B: ComputeBackend> LaunchConfiguration<B> {
    fn issue(
        &self,
        kernel: &KernelHandle,
        queue: QueueHandle,
        shape: &WorkShape,
        args: &[KernelArg],
    ) -> Result<(), BackendError> {
        for (index, arg) in args.iter().enumerate() {
            self.backend.set_arg(kernel, index as u32, arg)?;
        }
        self.backend.enqueue(kernel, queue, shape)
    }

    /// Issues the pending kernel once, then frees staged struct buffers and
    /// remaps unmapped host buffers.
    ///
    /// Returns to [`LaunchState::Idle`] whatever the outcome, and every staged
    /// buffer and remap obligation is settled before returning. The first
    /// error met is returned. Does not wait for the kernel to finish unless
    /// host buffers need remapping and `sync_before_remap` is set.
    pub fn launch(&mut self) -> Result<DispatchSummary, ShimError> {
        self.require("launch", &[LaunchState::GeometrySet, LaunchState::Binding])?;

        let releases = mem::take(&mut self.pending_releases);
        let remaps = mem::take(&mut self.pending_remaps);
        let args = mem::take(&mut self.args);
        self.state = LaunchState::Idle;

        let (kernel, queue) = match (self.kernel.as_ref(), self.queue) {
            (Some(kernel), Some(queue)) => (kernel, queue),
            _ => return Err(ShimError::PreconditionViolation { operation: "launch", state: LaunchState::Idle }),
        };
        let shape = work_shape(self.grid, self.block)?;

        debug!(
            target: "clbridge",
            kernel = %kernel.name,
            global = ?shape.global,
            local = ?shape.local,
            args = args.len(),
            "launching"
        );

        let mut first_error = None;
        let issued = self.issue(kernel, queue, &shape, &args);
        let enqueued = issued.is_ok();
        keep_first(&mut first_error, issued);

        let waited = enqueued && self.sync_before_remap && !remaps.is_empty();
        if waited {
            keep_first(&mut first_error, self.backend.finish(queue));
        }

        let released = releases.len();
        for staged in releases {
            keep_first(&mut first_error, staged.release());
        }

        let remapped = remaps.len();
        for remap in remaps {
            keep_first(&mut first_error, remap.remap());
        }

        let summary = DispatchSummary {
            kernel: kernel.name.clone(),
            queue,
            shape,
            arg_count: args.len(),
            released,
            remapped,
            waited,
        };
        if enqueued {
            info!(target: "clbridge", kernel = %summary.kernel, "kernel queued");
            self.last_dispatch = Some(summary.clone());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}
