//! clsession: accelerator compute sessions and kernel program lifecycle
//!
//! A [`ComputeSession`] acquires a device, a context and a command queue;
//! kernels are compiled and dispatched against it through [`KernelProgram`]
//! and the [`ComputeTool`] trait, and every native resource is released in a
//! fixed order when the session is closed or dropped.
//!
//! # Architecture
//!
//! - **backend**: the [`ComputeApi`](backend::ComputeApi) runtime boundary,
//!   an OpenCL implementation and an in-process host implementation
//! - **session**: device selection, context and queue ownership
//! - **tool**: program build, kernel creation, dispatch and completion
//! - **source**: kernel source resolution and loading
//! - **config**: session configuration and environment overrides
//!
//! # Usage
//!
//! ```ignore
//! use clsession::backend::opencl::OpenClApi;
//! use clsession::{ComputeSession, KernelProgram, SessionConfig};
//!
//! let session = ComputeSession::open(OpenClApi::new(), SessionConfig::from_env())?;
//! let mut program = KernelProgram::build(&session, "noop", "noop.cl")?;
//! let handle = program.dispatch(1024)?;
//! handle.wait()?;
//! session.finish_all()?;
//! drop(program);
//! session.close();
//! ```
//!
//! # Feature Flags
//!
//! - `opencl`: OpenCL runtime through the `ocl` crate
//! - `host`: in-process runtime (`backend::host`) for tests without a device

// ============================================================================
// Core Modules
// ============================================================================

pub mod backend;
pub mod config;
pub mod error;
pub mod session;
pub mod source;
pub mod tool;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{ApiError, ComputeApi, DeviceType};
pub use config::{PlatformSelector, SessionConfig};
pub use error::{ComputeError, Result, Stage};
pub use session::ComputeSession;
pub use source::SourceLoader;
pub use tool::{ComputeTool, ExecutionHandle, KernelProgram};

/// Session on the system OpenCL runtime
#[cfg(feature = "opencl")]
pub type OpenClSession = ComputeSession<backend::opencl::OpenClApi>;
