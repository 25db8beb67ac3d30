//! Compute API boundary
//!
//! The [`ComputeApi`] trait is the runtime interface consumed by sessions and
//! tools. Handle types release their native resource when dropped, so the
//! owner decides the release order through field order.

#[cfg(any(test, feature = "host"))]
pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;

use std::fmt;
use std::str::FromStr;

/// OpenCL status codes reported through [`ApiError`]
pub mod status {
    pub const DEVICE_NOT_FOUND: i32 = -1;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const OUT_OF_HOST_MEMORY: i32 = -6;
    pub const BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_DEVICE: i32 = -33;
    pub const INVALID_COMMAND_QUEUE: i32 = -36;
    pub const INVALID_KERNEL_NAME: i32 = -46;
    pub const INVALID_GLOBAL_WORK_SIZE: i32 = -63;
    pub const INVALID_EVENT: i32 = -58;
    /// Status reported when the runtime gives no code
    pub const UNKNOWN: i32 = -9999;
}

/// Device type filter used to enumerate devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    /// The platform's default device type
    Default,
    Cpu,
    #[default]
    Gpu,
    Accelerator,
    /// Every device on the platform
    All,
}

impl DeviceType {
    /// Whether a device classified as `kind` passes this filter
    ///
    /// `Default` admits every kind; runtimes narrow it to their default device.
    pub fn matches(self, kind: DeviceType) -> bool {
        match self {
            DeviceType::All | DeviceType::Default => true,
            filter => filter == kind,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Default => "default",
            DeviceType::Cpu => "cpu",
            DeviceType::Gpu => "gpu",
            DeviceType::Accelerator => "accelerator",
            DeviceType::All => "any",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(DeviceType::Default),
            "cpu" => Ok(DeviceType::Cpu),
            "gpu" => Ok(DeviceType::Gpu),
            "accelerator" | "acc" => Ok(DeviceType::Accelerator),
            "all" | "any" => Ok(DeviceType::All),
            other => Err(format!("unknown device type `{}`", other)),
        }
    }
}

/// Failure reported by the compute runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Native status code
    pub code: i32,
    /// Runtime message; holds the build log for program build failures
    pub message: String,
}

impl ApiError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Runtime result alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Compute runtime interface
///
/// Implementations wrap a native accelerator runtime. All calls are
/// synchronous except kernel execution, whose completion is observed through
/// [`ComputeApi::wait`] and [`ComputeApi::finish`].
pub trait ComputeApi {
    type Platform: Clone + fmt::Debug;
    type Device: Clone + PartialEq + fmt::Debug;
    type Context;
    type Queue;
    type Program;
    type Kernel;
    type Event: Clone + fmt::Debug;

    /// List available platforms
    fn platforms(&self) -> ApiResult<Vec<Self::Platform>>;

    /// Enumerate the platform's devices passing `filter`
    fn devices(&self, platform: &Self::Platform, filter: DeviceType)
    -> ApiResult<Vec<Self::Device>>;

    /// Human readable device name
    fn device_name(&self, device: &Self::Device) -> ApiResult<String>;

    /// Create a context spanning `devices`
    fn create_context(
        &self,
        platform: &Self::Platform,
        devices: &[Self::Device],
    ) -> ApiResult<Self::Context>;

    /// Create a command queue bound to `device`
    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        profiling: bool,
    ) -> ApiResult<Self::Queue>;

    /// Create and build a program from source for a single device
    ///
    /// On build failure the error message carries the build log.
    fn build_program(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        source: &str,
        options: &str,
    ) -> ApiResult<Self::Program>;

    /// Create the kernel object named `name`
    fn create_kernel(&self, program: &Self::Program, name: &str) -> ApiResult<Self::Kernel>;

    /// Enqueue a one-dimensional range of `work_size` work-items
    fn enqueue_range(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        work_size: usize,
    ) -> ApiResult<Self::Event>;

    /// Block until `event` completes
    fn wait(&self, event: &Self::Event) -> ApiResult<()>;

    /// Block until every command enqueued on `queue` completes
    fn finish(&self, queue: &Self::Queue) -> ApiResult<()>;

    /// Tear down the runtime after every handle has been released
    fn shutdown(&self) {}
}
