//! Session configuration
//!
//! Environment overrides:
//! - `CLSESSION_PLATFORM`: platform index
//! - `CLSESSION_DEVICE_TYPE`: `gpu`, `cpu`, `accelerator`, `default` or `all`
//! - `CLSESSION_PROFILING`: `0`/`false` disables queue profiling
//! - `CLSESSION_SOURCE_PATH`: kernel source roots, separated like `PATH`
//! - `CLSESSION_BUILD_OPTIONS`: options passed to the kernel compiler

use crate::backend::DeviceType;
use log::warn;
use std::path::PathBuf;

/// Platform selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlatformSelector {
    /// First platform reported by the runtime
    #[default]
    First,
    /// Platform at the given index
    Index(usize),
}

impl PlatformSelector {
    pub fn index(self) -> usize {
        match self {
            PlatformSelector::First => 0,
            PlatformSelector::Index(index) => index,
        }
    }
}

/// Configuration for opening a session and building its tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Platform to open the session on
    pub platform: PlatformSelector,
    /// Device type filter used for device enumeration
    pub device_type: DeviceType,
    /// Enable profiling on the command queue
    pub profiling: bool,
    /// Directories searched for kernel source, in order
    pub source_roots: Vec<PathBuf>,
    /// Options passed to the kernel compiler
    pub build_options: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            platform: PlatformSelector::First,
            device_type: DeviceType::Gpu,
            profiling: true,
            source_roots: vec![PathBuf::from("kernels")],
            build_options: String::new(),
        }
    }
}

impl SessionConfig {
    pub const ENV_PLATFORM: &'static str = "CLSESSION_PLATFORM";
    pub const ENV_DEVICE_TYPE: &'static str = "CLSESSION_DEVICE_TYPE";
    pub const ENV_PROFILING: &'static str = "CLSESSION_PROFILING";
    pub const ENV_SOURCE_PATH: &'static str = "CLSESSION_SOURCE_PATH";
    pub const ENV_BUILD_OPTIONS: &'static str = "CLSESSION_BUILD_OPTIONS";

    /// Defaults with overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides from an arbitrary key lookup
    ///
    /// Values that fail to parse are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(Self::ENV_PLATFORM) {
            match value.trim().parse::<usize>() {
                Ok(index) => config.platform = PlatformSelector::Index(index),
                Err(_) => warn!("Ignoring {}={:?}: not an index", Self::ENV_PLATFORM, value),
            }
        }

        if let Some(value) = lookup(Self::ENV_DEVICE_TYPE) {
            match value.parse::<DeviceType>() {
                Ok(device_type) => config.device_type = device_type,
                Err(e) => warn!("Ignoring {}: {}", Self::ENV_DEVICE_TYPE, e),
            }
        }

        if let Some(value) = lookup(Self::ENV_PROFILING) {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" => config.profiling = true,
                "0" | "false" | "off" => config.profiling = false,
                _ => warn!("Ignoring {}={:?}", Self::ENV_PROFILING, value),
            }
        }

        if let Some(value) = lookup(Self::ENV_SOURCE_PATH) {
            let roots: Vec<PathBuf> = std::env::split_paths(&value)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if !roots.is_empty() {
                config.source_roots = roots;
            }
        }

        if let Some(value) = lookup(Self::ENV_BUILD_OPTIONS) {
            config.build_options = value;
        }

        config
    }

    /// Set the platform selector
    pub fn with_platform(mut self, platform: PlatformSelector) -> Self {
        self.platform = platform;
        self
    }

    /// Set the device type filter
    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    /// Enable or disable queue profiling
    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    /// Replace the source roots with a single root
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_roots = vec![root.into()];
        self
    }

    /// Set the kernel compiler options
    pub fn with_build_options(mut self, options: impl Into<String>) -> Self {
        self.build_options = options.into();
        self
    }
}
