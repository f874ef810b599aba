use std::env;

use tracing::warn;

pub const ENV_OPENCL_LIBRARY: &str = "CLBRIDGE_OPENCL_LIBRARY";
pub const ENV_DEVICE: &str = "CLBRIDGE_DEVICE";
pub const ENV_SYNC_BEFORE_REMAP: &str = "CLBRIDGE_SYNC_BEFORE_REMAP";
pub const ENV_BUILD_OPTIONS: &str = "CLBRIDGE_BUILD_OPTIONS";

/// Which device class the backend opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// First GPU, otherwise first CPU.
    #[default]
    Gpu,
    Cpu,
    Any,
}

impl DevicePreference {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gpu" => Some(DevicePreference::Gpu),
            "cpu" => Some(DevicePreference::Cpu),
            "any" | "all" => Some(DevicePreference::Any),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimConfig {
    /// Explicit ICD loader path, tried before the platform defaults.
    pub opencl_library: Option<String>,
    pub device: DevicePreference,
    /// Wait for the queue to drain before handing unmapped host buffers back.
    /// When off, remaps happen right after the enqueue and the caller must
    /// synchronise before touching those buffers.
    pub sync_before_remap: bool,
    pub build_options: String,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            opencl_library: None,
            device: DevicePreference::Gpu,
            sync_before_remap: true,
            build_options: String::new(),
        }
    }
}

impl ShimConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Unknown or malformed
    /// values fall back to the defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_OPENCL_LIBRARY).filter(|p| !p.trim().is_empty()) {
            config.opencl_library = Some(path);
        }

        if let Some(raw) = lookup(ENV_DEVICE) {
            match DevicePreference::parse(&raw) {
                Some(device) => config.device = device,
                None => warn!(target: "clbridge", value = %raw, "ignoring unknown {ENV_DEVICE}"),
            }
        }

        if let Some(raw) = lookup(ENV_SYNC_BEFORE_REMAP) {
            match parse_flag(&raw) {
                Some(flag) => config.sync_before_remap = flag,
                None => warn!(target: "clbridge", value = %raw, "ignoring malformed {ENV_SYNC_BEFORE_REMAP}"),
            }
        }

        if let Some(options) = lookup(ENV_BUILD_OPTIONS) {
            config.build_options = options.replace('\0', "");
        }

        config
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_lookup_yields_defaults() {
        assert_eq!(ShimConfig::from_lookup(|_| None), ShimConfig::default());
    }

    #[test]
    fn reads_every_key() {
        let config = ShimConfig::from_lookup(lookup_from(&[
            (ENV_OPENCL_LIBRARY, "/opt/ocl/libOpenCL.so"),
            (ENV_DEVICE, "CPU"),
            (ENV_SYNC_BEFORE_REMAP, "off"),
            (ENV_BUILD_OPTIONS, "-cl-fast-relaxed-math"),
        ]));

        assert_eq!(config.opencl_library.as_deref(), Some("/opt/ocl/libOpenCL.so"));
        assert_eq!(config.device, DevicePreference::Cpu);
        assert!(!config.sync_before_remap);
        assert_eq!(config.build_options, "-cl-fast-relaxed-math");
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let config = ShimConfig::from_lookup(lookup_from(&[
            (ENV_DEVICE, "fpga"),
            (ENV_SYNC_BEFORE_REMAP, "maybe"),
        ]));
        assert_eq!(config.device, DevicePreference::Gpu);
        assert!(config.sync_before_remap);
    }
}
