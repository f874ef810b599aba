//! Launch configuration, argument binding and dispatch.
//!
//! One dispatch cycle runs `configure → set_geometry → bind* → launch` on a
//! [`LaunchConfiguration`]. After `launch` the configuration is idle again and
//! holds no staged buffers or pending remaps.

pub mod binder;
pub mod configuration;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod staging;

pub use binder::Scalar;
pub use configuration::LaunchConfiguration;
pub use dispatch::DispatchSummary;
pub use error::ShimError;
pub use geometry::{unpack_xy, work_shape, Dim3};
pub use staging::{PendingRemap, StagingBuffer};

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    Configured,
    GeometrySet,
    Binding,
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchState::Idle => "idle",
            LaunchState::Configured => "configured",
            LaunchState::GeometrySet => "geometry-set",
            LaunchState::Binding => "binding",
        };
        f.write_str(name)
    }
}
