//! Error types for session acquisition and kernel program lifecycle

use crate::backend::DeviceType;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ComputeError>;

/// Stage of native resource acquisition that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Platform listing
    Platform,
    /// Device enumeration on the selected platform
    Devices,
    /// Context creation over the filtered device set
    Context,
    /// Command queue creation on the primary device
    Queue,
    /// Kernel object creation from a built program
    Kernel,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Platform => "platform",
            Stage::Devices => "devices",
            Stage::Context => "context",
            Stage::Queue => "queue",
            Stage::Kernel => "kernel",
        };
        f.write_str(name)
    }
}

/// Errors raised by sessions, tools and the source loader
#[derive(Debug, Error)]
pub enum ComputeError {
    /// No platform exists at the selected index
    #[error("no compute platform available at index {index}")]
    PlatformNotFound { index: usize },

    /// The device-type filter matched no device on the platform
    #[error("no {device_type} devices found on the selected platform")]
    DeviceNotFound { device_type: DeviceType },

    /// Creating a native resource failed with the given status code
    #[error("failed to acquire {stage}: status {code}")]
    ResourceAcquisition { stage: Stage, code: i32 },

    /// The program build step reported failure
    #[error("kernel program failed to build:\n{log}")]
    Compile { log: String },

    /// The built program has no entry point with this name
    #[error("kernel `{name}` not found in program")]
    KernelNotFound { name: String },

    /// The resource path did not resolve under any source root
    #[error("kernel source `{path}` not found")]
    SourceNotFound { path: String },

    /// The resolved source file could not be opened or read
    #[error("failed to read kernel source `{path}`: {source}")]
    SourceRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid work size or queue submission failure
    #[error("dispatch failed: {reason}")]
    Dispatch { reason: String, code: Option<i32> },

    /// Completion wait failed or nothing was dispatched
    #[error("wait failed: {reason}")]
    Wait { reason: String, code: Option<i32> },
}

impl ComputeError {
    /// Native status code carried by the error, if any
    pub fn code(&self) -> Option<i32> {
        match self {
            ComputeError::ResourceAcquisition { code, .. } => Some(*code),
            ComputeError::Dispatch { code, .. } | ComputeError::Wait { code, .. } => *code,
            _ => None,
        }
    }
}
