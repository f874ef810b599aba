//! Legacy driver/runtime entry points.
//!
//! `device` holds the stubs that need no state, `redirect` maps each launch
//! entry point onto a [`LaunchConfiguration`](crate::launch::LaunchConfiguration)
//! operation, and `ffi` exports both under their legacy C names.

pub mod device;
pub mod ffi;
pub mod redirect;

pub use device::{LegacyStatus, ERROR_STRING_PLACEHOLDER, LEGACY_SUCCESS};
