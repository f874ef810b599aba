use std::ffi::CStr;

use tracing::debug;

/// Status code returned across the legacy surface. Only success is ever
/// reported; backend failures terminate the process instead.
pub type LegacyStatus = usize;

pub const LEGACY_SUCCESS: LegacyStatus = 0;

pub const ERROR_STRING_PLACEHOLDER: &CStr = c"all was ok?";

pub fn device_count() -> (LegacyStatus, i32) {
    debug!(target: "clbridge", "device_count");
    (LEGACY_SUCCESS, 1)
}

pub fn device_get(ordinal: i32) -> (LegacyStatus, i32) {
    debug!(target: "clbridge", ordinal, "device_get redirected");
    (LEGACY_SUCCESS, 0)
}

pub fn get_device() -> (LegacyStatus, i32) {
    debug!(target: "clbridge", "get_device");
    (LEGACY_SUCCESS, 0)
}

pub fn set_device(index: i32) -> LegacyStatus {
    debug!(target: "clbridge", index, "set_device stub");
    LEGACY_SUCCESS
}

pub fn get_last_error() -> LegacyStatus {
    debug!(target: "clbridge", "get_last_error");
    LEGACY_SUCCESS
}

pub fn get_error_string(code: LegacyStatus) -> &'static CStr {
    debug!(target: "clbridge", code, "get_error_string");
    ERROR_STRING_PLACEHOLDER
}
