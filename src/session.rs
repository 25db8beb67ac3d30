//! Compute session
//!
//! A [`ComputeSession`] owns the selected device, the context spanning the
//! filtered device set and one command queue bound to the primary device.
//! Tools and execution handles borrow the session, so it cannot be closed
//! while any of them is alive.

use crate::backend::{ApiError, ComputeApi, status};
use crate::config::SessionConfig;
use crate::error::{ComputeError, Result, Stage};
use crate::source::SourceLoader;
use log::{debug, info, trace};

/// Owns the runtime and tears it down after every handle is released
struct Runtime<A: ComputeApi>(A);

impl<A: ComputeApi> Drop for Runtime<A> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

fn acquisition(stage: Stage) -> impl FnOnce(ApiError) -> ComputeError {
    move |e| {
        debug!("Failed to acquire {}: {}", stage, e);
        ComputeError::ResourceAcquisition {
            stage,
            code: e.code,
        }
    }
}

/// Accelerator session: device selection, context and command queue
///
/// Closing consumes the session, so nothing can touch it afterwards:
///
/// ```compile_fail
/// use clsession::backend::ComputeApi;
/// use clsession::ComputeSession;
///
/// fn close_twice<A: ComputeApi>(session: ComputeSession<A>) {
///     session.close();
///     let _ = session.finish_all();
/// }
/// ```
pub struct ComputeSession<A: ComputeApi> {
    // Fields drop in declaration order: queue, context, then the runtime
    queue: A::Queue,
    context: A::Context,
    device: A::Device,
    devices: Vec<A::Device>,
    platform: A::Platform,
    device_name: String,
    sources: SourceLoader,
    config: SessionConfig,
    runtime: Runtime<A>,
}

impl<A: ComputeApi> ComputeSession<A> {
    /// Open a session on the configured platform and device type
    ///
    /// ```
    /// use clsession::backend::ComputeApi;
    /// use clsession::{ComputeSession, DeviceType, SessionConfig};
    ///
    /// fn run_on_cpu<A: ComputeApi>(api: A) -> clsession::Result<()> {
    ///     let config = SessionConfig::default().with_device_type(DeviceType::Cpu);
    ///     let session = ComputeSession::open(api, config)?;
    ///     session.finish_all()?;
    ///     session.close();
    ///     Ok(())
    /// }
    /// ```
    pub fn open(api: A, config: SessionConfig) -> Result<Self> {
        // Wrapped first so every failed acquisition still tears the runtime down
        let runtime = Runtime(api);
        let index = config.platform.index();
        let platform = runtime
            .0
            .platforms()
            .map_err(acquisition(Stage::Platform))?
            .into_iter()
            .nth(index)
            .ok_or(ComputeError::PlatformNotFound { index })?;

        let devices = match runtime.0.devices(&platform, config.device_type) {
            Ok(devices) => devices,
            Err(e) if e.code == status::DEVICE_NOT_FOUND => Vec::new(),
            Err(e) => return Err(acquisition(Stage::Devices)(e)),
        };

        Self::acquire(runtime, platform, devices, config)
    }

    /// Open a session on the first GPU of the first platform
    pub fn open_default(api: A) -> Result<Self> {
        Self::open(api, SessionConfig::default())
    }

    /// Open a session with configuration taken from the environment
    pub fn open_from_env(api: A) -> Result<Self> {
        Self::open(api, SessionConfig::from_env())
    }

    /// Open a session over an explicit device list
    ///
    /// The context spans all of `devices`; the queue is bound to the first.
    pub fn with_devices(
        api: A,
        platform: A::Platform,
        devices: Vec<A::Device>,
        config: SessionConfig,
    ) -> Result<Self> {
        Self::acquire(Runtime(api), platform, devices, config)
    }

    fn acquire(
        runtime: Runtime<A>,
        platform: A::Platform,
        devices: Vec<A::Device>,
        config: SessionConfig,
    ) -> Result<Self> {
        let api = &runtime.0;
        let Some(device) = devices.first().cloned() else {
            return Err(ComputeError::DeviceNotFound {
                device_type: config.device_type,
            });
        };

        // Create context over the whole device set
        let context = api
            .create_context(&platform, &devices)
            .map_err(acquisition(Stage::Context))?;

        // Create command queue on the primary device; a failure drops the context
        let queue = api
            .create_queue(&context, &device, config.profiling)
            .map_err(acquisition(Stage::Queue))?;

        let device_name = api.device_name(&device).unwrap_or_else(|e| {
            debug!("Failed to query device name: {}", e);
            "Unknown".to_string()
        });
        info!(
            "Opened compute session on {} ({} device(s) in context, profiling={})",
            device_name,
            devices.len(),
            config.profiling
        );

        Ok(Self {
            queue,
            context,
            device,
            devices,
            platform,
            device_name,
            sources: SourceLoader::from_config(&config),
            config,
            runtime,
        })
    }

    /// Primary device the queue is bound to
    pub fn device(&self) -> &A::Device {
        &self.device
    }

    /// All devices the context spans
    pub fn devices(&self) -> &[A::Device] {
        &self.devices
    }

    pub fn platform(&self) -> &A::Platform {
        &self.platform
    }

    pub fn context(&self) -> &A::Context {
        &self.context
    }

    pub fn queue(&self) -> &A::Queue {
        &self.queue
    }

    /// Name of the primary device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Loader used by tools built against this session
    pub fn sources(&self) -> &SourceLoader {
        &self.sources
    }

    /// Runtime the session was opened with
    pub fn api(&self) -> &A {
        &self.runtime.0
    }

    /// Block until every command enqueued on the session's queue completes
    pub fn finish_all(&self) -> Result<()> {
        trace!("Waiting for queue on {} to drain", self.device_name);
        self.api()
            .finish(&self.queue)
            .map_err(|e| ComputeError::Wait {
                reason: format!("queue drain failed: {}", e.message),
                code: Some(e.code),
            })
    }

    /// Release the queue, then the context, then tear down the runtime
    pub fn close(self) {
        info!("Closing compute session on {}", self.device_name);
        drop(self);
    }
}
