//! OpenCL runtime
//!
//! Implements [`ComputeApi`] with the `ocl` crate. The `ocl` handle types
//! retain and release their native objects themselves, so dropping a queue or
//! context releases it.

use super::{ApiError, ApiResult, ComputeApi, DeviceType, status};
use log::debug;
use ocl::core::{self as core, Kernel as CoreKernel};
use ocl::flags::CommandQueueProperties;
use ocl::{Context, Device, Event, Platform, Program, Queue};

impl From<ocl::Error> for ApiError {
    fn from(e: ocl::Error) -> Self {
        let code = e
            .api_status()
            .map(|s| s as i32)
            .unwrap_or(status::UNKNOWN);
        ApiError::new(code, e.to_string())
    }
}

impl From<core::Error> for ApiError {
    fn from(e: core::Error) -> Self {
        ApiError::from(ocl::Error::from(e))
    }
}

/// OpenCL runtime backed by the system ICD loader
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClApi;

impl OpenClApi {
    pub fn new() -> Self {
        Self
    }

    /// Whether at least one platform with at least one device is visible
    pub fn is_available() -> bool {
        Platform::list()
            .into_iter()
            .any(|p| Device::list_all(p).map(|d| !d.is_empty()).unwrap_or(false))
    }
}

fn ocl_device_type(filter: DeviceType) -> ocl::DeviceType {
    match filter {
        DeviceType::Default => ocl::DeviceType::DEFAULT,
        DeviceType::Cpu => ocl::DeviceType::CPU,
        DeviceType::Gpu => ocl::DeviceType::GPU,
        DeviceType::Accelerator => ocl::DeviceType::ACCELERATOR,
        DeviceType::All => ocl::DeviceType::ALL,
    }
}

impl ComputeApi for OpenClApi {
    type Platform = Platform;
    type Device = Device;
    type Context = Context;
    type Queue = Queue;
    type Program = Program;
    type Kernel = CoreKernel;
    type Event = Event;

    fn platforms(&self) -> ApiResult<Vec<Platform>> {
        Ok(Platform::list())
    }

    fn devices(&self, platform: &Platform, filter: DeviceType) -> ApiResult<Vec<Device>> {
        match Device::list(platform, Some(ocl_device_type(filter))) {
            Ok(devices) => Ok(devices),
            // Some ICDs report an empty match as an error
            Err(e) if e.api_status().map(|s| s as i32) == Some(status::DEVICE_NOT_FOUND) => {
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn device_name(&self, device: &Device) -> ApiResult<String> {
        Ok(device.name()?)
    }

    fn create_context(&self, platform: &Platform, devices: &[Device]) -> ApiResult<Context> {
        let context = Context::builder()
            .platform(*platform)
            .devices(devices)
            .build()?;
        Ok(context)
    }

    fn create_queue(&self, context: &Context, device: &Device, profiling: bool) -> ApiResult<Queue> {
        let properties = profiling.then_some(CommandQueueProperties::PROFILING_ENABLE);
        Ok(Queue::new(context, *device, properties)?)
    }

    fn build_program(
        &self,
        context: &Context,
        device: &Device,
        source: &str,
        options: &str,
    ) -> ApiResult<Program> {
        let mut builder = Program::builder();
        builder.src(source).devices(*device);
        if !options.is_empty() {
            builder.cmplr_opt(options);
        }

        // The error message of a failed build embeds the device build log
        builder.build(context).map_err(|e| {
            let mut err = ApiError::from(e);
            if err.code == status::UNKNOWN {
                err.code = status::BUILD_PROGRAM_FAILURE;
            }
            err
        })
    }

    fn create_kernel(&self, program: &Program, name: &str) -> ApiResult<CoreKernel> {
        debug!("Creating OpenCL kernel `{}`", name);
        Ok(core::create_kernel(program.as_core(), name)?)
    }

    fn enqueue_range(&self, queue: &Queue, kernel: &CoreKernel, work_size: usize) -> ApiResult<Event> {
        let mut event = Event::empty();
        // SAFETY: the kernel's arguments are bound by the owning tool before
        // dispatch; the runtime rejects unset arguments with a status code.
        unsafe {
            core::enqueue_kernel(
                queue.as_core(),
                kernel,
                1,
                None,
                &[work_size, 1, 1],
                None,
                None::<&core::Event>,
                Some(&mut event),
            )?;
        }
        Ok(event)
    }

    fn wait(&self, event: &Event) -> ApiResult<()> {
        Ok(event.wait_for()?)
    }

    fn finish(&self, queue: &Queue) -> ApiResult<()> {
        Ok(queue.finish()?)
    }
}
