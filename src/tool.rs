//! Kernel programs and compute tools
//!
//! A [`KernelProgram`] owns one compiled program and one kernel built against
//! a session. Concrete kernels implement [`ComputeTool`] on top of it and bind
//! their own arguments before dispatching.

use crate::backend::{ApiError, ComputeApi, status};
use crate::error::{ComputeError, Result, Stage};
use crate::session::ComputeSession;
use log::{debug, trace, warn};

fn wait_on<A: ComputeApi>(session: &ComputeSession<A>, event: &A::Event) -> Result<()> {
    trace!("Waiting on {:?}", event);
    session.api().wait(event).map_err(|e| ComputeError::Wait {
        reason: e.message,
        code: Some(e.code),
    })
}

fn build_log(e: ApiError) -> String {
    if e.message.trim().is_empty() {
        format!("program build failed with status {}", e.code)
    } else {
        e.message
    }
}

/// Handle for one enqueued kernel execution
pub struct ExecutionHandle<'s, A: ComputeApi> {
    session: &'s ComputeSession<A>,
    event: A::Event,
    work_size: usize,
}

impl<'s, A: ComputeApi> ExecutionHandle<'s, A> {
    /// Block until this execution completes
    pub fn wait(&self) -> Result<()> {
        wait_on(self.session, &self.event)
    }

    /// Runtime event backing the handle
    pub fn event(&self) -> &A::Event {
        &self.event
    }

    /// Number of work-items dispatched
    pub fn work_size(&self) -> usize {
        self.work_size
    }
}

impl<A: ComputeApi> std::fmt::Debug for ExecutionHandle<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("event", &self.event)
            .field("work_size", &self.work_size)
            .finish()
    }
}

/// Compiled program and kernel bound to one session
pub struct KernelProgram<'s, A: ComputeApi> {
    session: &'s ComputeSession<A>,
    name: String,
    // The kernel is released before the program it was created from
    kernel: A::Kernel,
    program: A::Program,
    latest: Option<A::Event>,
}

impl<'s, A: ComputeApi> KernelProgram<'s, A> {
    /// Load `source_path` through the session's loader and build `kernel_name`
    pub fn build(
        session: &'s ComputeSession<A>,
        kernel_name: &str,
        source_path: &str,
    ) -> Result<Self> {
        let source = session.sources().load(source_path)?;
        Self::from_source(session, kernel_name, &source)
    }

    /// Build `kernel_name` from in-memory source
    pub fn from_source(
        session: &'s ComputeSession<A>,
        kernel_name: &str,
        source: &str,
    ) -> Result<Self> {
        let api = session.api();
        let options = &session.config().build_options;
        debug!(
            "Building kernel `{}` for {} (options: {:?})",
            kernel_name,
            session.device_name(),
            options
        );

        // Build program for the primary device
        let program = api
            .build_program(session.context(), session.device(), source, options)
            .map_err(|e| {
                warn!("Build of kernel `{}` failed:\n{}", kernel_name, e.message);
                ComputeError::Compile { log: build_log(e) }
            })?;

        // Load the kernel
        let kernel = api.create_kernel(&program, kernel_name).map_err(|e| {
            if e.code == status::INVALID_KERNEL_NAME {
                ComputeError::KernelNotFound {
                    name: kernel_name.to_string(),
                }
            } else {
                ComputeError::ResourceAcquisition {
                    stage: Stage::Kernel,
                    code: e.code,
                }
            }
        })?;

        Ok(Self {
            session,
            name: kernel_name.to_string(),
            kernel,
            program,
            latest: None,
        })
    }

    /// Enqueue a one-dimensional range of `work_size` work-items
    ///
    /// Does not wait for the execution. The returned handle is also recorded
    /// as the latest dispatch, replacing the previous record.
    pub fn dispatch(&mut self, work_size: usize) -> Result<ExecutionHandle<'s, A>> {
        if work_size == 0 {
            return Err(ComputeError::Dispatch {
                reason: format!("work size for kernel `{}` must be positive", self.name),
                code: None,
            });
        }

        let event = self
            .session
            .api()
            .enqueue_range(self.session.queue(), &self.kernel, work_size)
            .map_err(|e| ComputeError::Dispatch {
                reason: e.message,
                code: Some(e.code),
            })?;
        trace!("Dispatched kernel `{}` over {} work-items", self.name, work_size);

        self.latest = Some(event.clone());
        Ok(ExecutionHandle {
            session: self.session,
            event,
            work_size,
        })
    }

    /// Block until the latest dispatch completes
    ///
    /// Earlier dispatches are only waited on through their own handles.
    pub fn finish(&self) -> Result<()> {
        let event = self.latest.as_ref().ok_or_else(|| ComputeError::Wait {
            reason: format!("kernel `{}` has not been dispatched", self.name),
            code: None,
        })?;
        wait_on(self.session, event)
    }

    /// Event of the latest dispatch
    pub fn latest(&self) -> Option<&A::Event> {
        self.latest.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kernel object, for argument binding
    pub fn kernel(&self) -> &A::Kernel {
        &self.kernel
    }

    pub fn program(&self) -> &A::Program {
        &self.program
    }

    pub fn session(&self) -> &'s ComputeSession<A> {
        self.session
    }
}

/// Kernel wrapper built from a named source resource
///
/// Implementors describe one kernel and own its [`KernelProgram`]:
///
/// ```
/// use clsession::backend::ComputeApi;
/// use clsession::{ComputeTool, KernelProgram};
///
/// struct Noop<'s, A: ComputeApi>(KernelProgram<'s, A>);
///
/// impl<'s, A: ComputeApi + 's> ComputeTool<'s, A> for Noop<'s, A> {
///     const KERNEL_NAME: &'static str = "noop";
///     const SOURCE_PATH: &'static str = "noop.cl";
///
///     fn from_program(program: KernelProgram<'s, A>) -> Self {
///         Noop(program)
///     }
///
///     fn program(&self) -> &KernelProgram<'s, A> {
///         &self.0
///     }
///
///     fn program_mut(&mut self) -> &mut KernelProgram<'s, A> {
///         &mut self.0
///     }
/// }
/// ```
pub trait ComputeTool<'s, A: ComputeApi + 's>: Sized {
    /// Entry point to create from the compiled program
    const KERNEL_NAME: &'static str;
    /// Resource path of the kernel source
    const SOURCE_PATH: &'static str;

    fn from_program(program: KernelProgram<'s, A>) -> Self;

    fn program(&self) -> &KernelProgram<'s, A>;

    fn program_mut(&mut self) -> &mut KernelProgram<'s, A>;

    /// Load, compile and create this tool's kernel against `session`
    fn build(session: &'s ComputeSession<A>) -> Result<Self> {
        KernelProgram::build(session, Self::KERNEL_NAME, Self::SOURCE_PATH).map(Self::from_program)
    }

    fn dispatch(&mut self, work_size: usize) -> Result<ExecutionHandle<'s, A>> {
        self.program_mut().dispatch(work_size)
    }

    fn finish(&self) -> Result<()> {
        self.program().finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::{HostApi, HostCall};
    use crate::config::SessionConfig;
    use rstest::rstest;

    const NOOP: &str = "__kernel void noop() {\n}\n";

    fn session() -> ComputeSession<HostApi> {
        ComputeSession::open_default(HostApi::new()).unwrap()
    }

    #[test]
    fn test_build_from_source() {
        let session = session();
        let program = KernelProgram::from_source(&session, "noop", NOOP).unwrap();
        assert_eq!(program.name(), "noop");
        assert_eq!(program.kernel().name(), "noop");
        assert_eq!(program.program().device(), session.device());
        assert_eq!(program.program().kernel_names(), ["noop".to_string()]);
        assert!(program.latest().is_none());
    }

    #[rstest]
    #[case("__kernel void noop() {")]
    #[case("__kernel void noop() {}}")]
    fn test_syntax_error_is_compile_error_with_log(#[case] source: &str) {
        let session = session();
        let err = KernelProgram::from_source(&session, "noop", source).err().unwrap();
        match err {
            ComputeError::Compile { log } => {
                assert!(!log.is_empty());
                assert!(log.contains("error"), "{}", log);
            }
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_build_failure_log_is_never_empty() {
        let session = session();
        session.api().fail_next(HostCall::Build, status::BUILD_PROGRAM_FAILURE);
        let err = KernelProgram::from_source(&session, "noop", NOOP).err().unwrap();
        assert!(matches!(err, ComputeError::Compile { log } if !log.is_empty()));

        assert_eq!(
            build_log(ApiError::new(status::BUILD_PROGRAM_FAILURE, "  ")),
            "program build failed with status -11"
        );
    }

    #[test]
    fn test_missing_entry_point() {
        let session = session();
        let err = KernelProgram::from_source(&session, "K", NOOP).err().unwrap();
        assert!(matches!(err, ComputeError::KernelNotFound { name } if name == "K"));
    }

    #[test]
    fn test_other_kernel_failures_keep_status() {
        let session = session();
        session.api().fail_next(HostCall::Kernel, status::OUT_OF_HOST_MEMORY);
        let err = KernelProgram::from_source(&session, "noop", NOOP).err().unwrap();
        assert!(matches!(
            err,
            ComputeError::ResourceAcquisition {
                stage: Stage::Kernel,
                code: status::OUT_OF_HOST_MEMORY
            }
        ));
    }

    #[test]
    fn test_build_reports_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::default().with_source_root(dir.path());
        let session = ComputeSession::open(HostApi::new(), config).unwrap();

        let err = KernelProgram::build(&session, "noop", "noop.cl").err().unwrap();
        assert!(matches!(err, ComputeError::SourceNotFound { path } if path == "noop.cl"));
    }

    #[test]
    fn test_build_loads_from_session_roots() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("noop.cl"), NOOP).unwrap();
        let config = SessionConfig::default().with_source_root(dir.path());
        let session = ComputeSession::open(HostApi::new(), config).unwrap();

        let program = KernelProgram::build(&session, "noop", "noop.cl").unwrap();
        assert_eq!(program.name(), "noop");
    }

    #[test]
    fn test_zero_work_size_is_rejected() {
        let session = session();
        let mut program = KernelProgram::from_source(&session, "noop", NOOP).unwrap();
        let err = program.dispatch(0).err().unwrap();
        assert!(matches!(err, ComputeError::Dispatch { code: None, .. }));
        assert!(session.api().dispatches().is_empty());
        assert!(program.latest().is_none());
    }

    #[test]
    fn test_dispatch_does_not_block() {
        let session = session();
        let mut program = KernelProgram::from_source(&session, "noop", NOOP).unwrap();
        let handle = program.dispatch(64).unwrap();

        assert_eq!(handle.work_size(), 64);
        assert!(!session.api().is_complete(handle.event()));
        assert_eq!(program.latest(), Some(handle.event()));
    }

    #[test]
    fn test_finish_before_dispatch() {
        let session = session();
        let program = KernelProgram::from_source(&session, "noop", NOOP).unwrap();
        let err = program.finish().unwrap_err();
        assert!(matches!(err, ComputeError::Wait { code: None, .. }));
    }

    #[test]
    fn test_finish_waits_on_latest_dispatch() {
        let session = session();
        let mut program = KernelProgram::from_source(&session, "noop", NOOP).unwrap();
        let a = program.dispatch(1).unwrap();
        let b = program.dispatch(2).unwrap();
        assert_ne!(a.event(), b.event());
        assert_eq!(program.latest(), Some(b.event()));

        program.finish().unwrap();
        assert_eq!(session.api().waited(), vec![b.event().id()]);
        assert!(session.api().is_complete(b.event()));

        // The earlier dispatch keeps its own handle
        a.wait().unwrap();
        assert_eq!(session.api().waited(), vec![b.event().id(), a.event().id()]);
    }

    #[test]
    fn test_dispatch_failure_keeps_tool_usable() {
        let session = session();
        let mut program = KernelProgram::from_source(&session, "noop", NOOP).unwrap();
        let first = program.dispatch(8).unwrap();

        session.api().fail_next(HostCall::Enqueue, status::OUT_OF_RESOURCES);
        let err = program.dispatch(8).err().unwrap();
        assert_eq!(err.code(), Some(status::OUT_OF_RESOURCES));
        assert_eq!(program.latest(), Some(first.event()));

        program.dispatch(8).unwrap();
        program.finish().unwrap();
    }

    #[test]
    fn test_wait_failure_is_reported() {
        let session = session();
        let mut program = KernelProgram::from_source(&session, "noop", NOOP).unwrap();
        program.dispatch(4).unwrap();

        session.api().fail_next(HostCall::Wait, status::INVALID_EVENT);
        let err = program.finish().unwrap_err();
        assert!(matches!(
            err,
            ComputeError::Wait {
                code: Some(status::INVALID_EVENT),
                ..
            }
        ));
        program.finish().unwrap();
    }

    #[test]
    fn test_finish_all_completes_every_tool() {
        let session = session();
        let source = "__kernel void a() {}\n__kernel void b() {}\n";
        let mut first = KernelProgram::from_source(&session, "a", source).unwrap();
        let mut second = KernelProgram::from_source(&session, "b", source).unwrap();

        let ha = first.dispatch(16).unwrap();
        let hb = second.dispatch(32).unwrap();
        session.finish_all().unwrap();

        assert!(session.api().is_complete(ha.event()));
        assert!(session.api().is_complete(hb.event()));
        let kernels: Vec<String> = session
            .api()
            .dispatches()
            .into_iter()
            .map(|d| d.kernel)
            .collect();
        assert_eq!(kernels, vec!["a".to_string(), "b".to_string()]);
    }
}
