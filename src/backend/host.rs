//! In-process host runtime
//!
//! Only compiled for the crate's own tests or with the `host` feature.
//!
//! [`HostApi`] implements [`ComputeApi`] without an accelerator. Platforms and
//! devices are configured up front, "compilation" checks bracket balance and
//! collects `__kernel void name(...)` entry points, and enqueued work completes
//! in FIFO order when waited on. Every clone shares one state, so a test can
//! keep a clone as a probe after handing the first one to a session.

use super::{ApiError, ApiResult, ComputeApi, DeviceType, status};
use log::trace;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Runtime call that can be made to fail with [`HostApi::fail_next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCall {
    Platforms,
    Devices,
    DeviceName,
    Context,
    Queue,
    Build,
    Kernel,
    Enqueue,
    Wait,
    Finish,
}

/// Release record, in the order releases happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Released {
    Queue(u64),
    Context(u64),
    Runtime,
}

/// Host platform handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    index: usize,
    name: String,
}

impl HostPlatform {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Host device handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDevice {
    id: u64,
    name: String,
    kind: DeviceType,
}

impl HostDevice {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> DeviceType {
        self.kind
    }
}

/// Host context; records its release on drop
#[derive(Debug)]
pub struct HostContext {
    id: u64,
    devices: Vec<HostDevice>,
    state: Arc<Mutex<HostState>>,
}

impl HostContext {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn devices(&self) -> &[HostDevice] {
        &self.devices
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.live_contexts -= 1;
        state.released.push(Released::Context(self.id));
    }
}

/// Host command queue; records its release on drop
#[derive(Debug)]
pub struct HostQueue {
    id: u64,
    context: u64,
    device: HostDevice,
    profiling: bool,
    state: Arc<Mutex<HostState>>,
}

impl HostQueue {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the context the queue was created in
    pub fn context_id(&self) -> u64 {
        self.context
    }

    pub fn device(&self) -> &HostDevice {
        &self.device
    }

    pub fn profiling(&self) -> bool {
        self.profiling
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.live_queues -= 1;
        state.pending.remove(&self.id);
        state.released.push(Released::Queue(self.id));
    }
}

/// Built host program
#[derive(Debug)]
pub struct HostProgram {
    device: HostDevice,
    kernels: Vec<String>,
}

impl HostProgram {
    /// Entry points found in the source, in declaration order
    pub fn kernel_names(&self) -> &[String] {
        &self.kernels
    }

    pub fn device(&self) -> &HostDevice {
        &self.device
    }
}

/// Host kernel object
#[derive(Debug)]
pub struct HostKernel {
    name: String,
}

impl HostKernel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Host completion event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    id: u64,
    queue: u64,
}

impl HostEvent {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Recorded kernel dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDispatch {
    pub event: u64,
    pub kernel: String,
    pub work_size: usize,
}

#[derive(Debug)]
struct PlatformSetup {
    name: String,
    devices: Vec<HostDevice>,
}

#[derive(Debug, Default)]
struct HostState {
    platforms: Vec<PlatformSetup>,
    next_id: u64,
    faults: HashMap<HostCall, i32>,
    live_contexts: usize,
    live_queues: usize,
    contexts_created: usize,
    released: Vec<Released>,
    pending: HashMap<u64, VecDeque<u64>>,
    completed: HashSet<u64>,
    waited: Vec<u64>,
    dispatches: Vec<HostDispatch>,
}

impl HostState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_fault(&mut self, call: HostCall) -> ApiResult<()> {
        match self.faults.remove(&call) {
            Some(code) => Err(ApiError::new(
                code,
                format!("injected {:?} failure", call),
            )),
            None => Ok(()),
        }
    }
}

fn lock(state: &Mutex<HostState>) -> MutexGuard<'_, HostState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deterministic in-process compute runtime
#[derive(Debug, Clone)]
pub struct HostApi {
    state: Arc<Mutex<HostState>>,
}

impl Default for HostApi {
    fn default() -> Self {
        Self::new()
    }
}

impl HostApi {
    /// One platform exposing a GPU and a CPU device
    pub fn new() -> Self {
        Self::empty().with_platform("Host Platform", &[DeviceType::Gpu, DeviceType::Cpu])
    }

    /// A runtime without any platform
    pub fn empty() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    /// Add a platform exposing one device per entry of `kinds`
    pub fn with_platform(self, name: &str, kinds: &[DeviceType]) -> Self {
        {
            let mut state = lock(&self.state);
            let devices: Vec<HostDevice> = kinds
                .iter()
                .enumerate()
                .map(|(i, &kind)| HostDevice {
                    id: state.next_id(),
                    name: format!("{} {} {}", name, kind, i),
                    kind,
                })
                .collect();
            state.platforms.push(PlatformSetup {
                name: name.to_string(),
                devices,
            });
        }
        self
    }

    /// Make the next `call` fail with `code`
    pub fn fail_next(&self, call: HostCall, code: i32) {
        lock(&self.state).faults.insert(call, code);
    }

    /// Contexts currently alive
    pub fn live_contexts(&self) -> usize {
        lock(&self.state).live_contexts
    }

    /// Queues currently alive
    pub fn live_queues(&self) -> usize {
        lock(&self.state).live_queues
    }

    /// Contexts created over the runtime's lifetime
    pub fn contexts_created(&self) -> usize {
        lock(&self.state).contexts_created
    }

    /// Releases observed so far
    pub fn released(&self) -> Vec<Released> {
        lock(&self.state).released.clone()
    }

    /// Event ids passed to [`ComputeApi::wait`], in call order
    pub fn waited(&self) -> Vec<u64> {
        lock(&self.state).waited.clone()
    }

    /// Dispatches submitted so far
    pub fn dispatches(&self) -> Vec<HostDispatch> {
        lock(&self.state).dispatches.clone()
    }

    /// Whether the event has completed
    pub fn is_complete(&self, event: &HostEvent) -> bool {
        lock(&self.state).completed.contains(&event.id)
    }
}

impl ComputeApi for HostApi {
    type Platform = HostPlatform;
    type Device = HostDevice;
    type Context = HostContext;
    type Queue = HostQueue;
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Event = HostEvent;

    fn platforms(&self) -> ApiResult<Vec<HostPlatform>> {
        let mut state = lock(&self.state);
        state.take_fault(HostCall::Platforms)?;
        Ok(state
            .platforms
            .iter()
            .enumerate()
            .map(|(index, p)| HostPlatform {
                index,
                name: p.name.clone(),
            })
            .collect())
    }

    fn devices(&self, platform: &HostPlatform, filter: DeviceType) -> ApiResult<Vec<HostDevice>> {
        let mut state = lock(&self.state);
        state.take_fault(HostCall::Devices)?;
        let setup = state
            .platforms
            .get(platform.index)
            .ok_or_else(|| ApiError::new(status::INVALID_VALUE, "unknown platform"))?;

        let mut devices: Vec<HostDevice> = setup
            .devices
            .iter()
            .filter(|d| filter.matches(d.kind))
            .cloned()
            .collect();
        if filter == DeviceType::Default {
            devices.truncate(1);
        }
        Ok(devices)
    }

    fn device_name(&self, device: &HostDevice) -> ApiResult<String> {
        lock(&self.state).take_fault(HostCall::DeviceName)?;
        Ok(device.name.clone())
    }

    fn create_context(
        &self,
        _platform: &HostPlatform,
        devices: &[HostDevice],
    ) -> ApiResult<HostContext> {
        let mut state = lock(&self.state);
        state.take_fault(HostCall::Context)?;
        if devices.is_empty() {
            return Err(ApiError::new(status::INVALID_VALUE, "empty device list"));
        }

        let id = state.next_id();
        state.live_contexts += 1;
        state.contexts_created += 1;
        Ok(HostContext {
            id,
            devices: devices.to_vec(),
            state: Arc::clone(&self.state),
        })
    }

    fn create_queue(
        &self,
        context: &HostContext,
        device: &HostDevice,
        profiling: bool,
    ) -> ApiResult<HostQueue> {
        let mut state = lock(&self.state);
        state.take_fault(HostCall::Queue)?;
        if !context.devices.contains(device) {
            return Err(ApiError::new(
                status::INVALID_DEVICE,
                "device is not part of the context",
            ));
        }

        let id = state.next_id();
        state.live_queues += 1;
        state.pending.insert(id, VecDeque::new());
        Ok(HostQueue {
            id,
            context: context.id,
            device: device.clone(),
            profiling,
            state: Arc::clone(&self.state),
        })
    }

    fn build_program(
        &self,
        context: &HostContext,
        device: &HostDevice,
        source: &str,
        _options: &str,
    ) -> ApiResult<HostProgram> {
        lock(&self.state).take_fault(HostCall::Build)?;
        if !context.devices.contains(device) {
            return Err(ApiError::new(
                status::INVALID_DEVICE,
                "device is not part of the context",
            ));
        }

        let kernels = check_source(source)
            .map_err(|log| ApiError::new(status::BUILD_PROGRAM_FAILURE, log))?;
        Ok(HostProgram {
            device: device.clone(),
            kernels,
        })
    }

    fn create_kernel(&self, program: &HostProgram, name: &str) -> ApiResult<HostKernel> {
        lock(&self.state).take_fault(HostCall::Kernel)?;
        if !program.kernels.iter().any(|k| k == name) {
            return Err(ApiError::new(
                status::INVALID_KERNEL_NAME,
                format!("no kernel named `{}`", name),
            ));
        }
        Ok(HostKernel {
            name: name.to_string(),
        })
    }

    fn enqueue_range(
        &self,
        queue: &HostQueue,
        kernel: &HostKernel,
        work_size: usize,
    ) -> ApiResult<HostEvent> {
        let mut state = lock(&self.state);
        state.take_fault(HostCall::Enqueue)?;
        if work_size == 0 {
            return Err(ApiError::new(
                status::INVALID_GLOBAL_WORK_SIZE,
                "global work size is zero",
            ));
        }

        let id = state.next_id();
        state.pending.entry(queue.id).or_default().push_back(id);
        state.dispatches.push(HostDispatch {
            event: id,
            kernel: kernel.name.clone(),
            work_size,
        });
        trace!("host: enqueued `{}` x{} as event {}", kernel.name, work_size, id);
        Ok(HostEvent {
            id,
            queue: queue.id,
        })
    }

    fn wait(&self, event: &HostEvent) -> ApiResult<()> {
        let mut state = lock(&self.state);
        state.take_fault(HostCall::Wait)?;
        state.waited.push(event.id);
        if state.completed.contains(&event.id) {
            return Ok(());
        }

        // In-order queue: everything submitted before the event completes first
        let Some(pending) = state.pending.get_mut(&event.queue) else {
            return Err(ApiError::new(status::INVALID_EVENT, "queue was released"));
        };
        let Some(position) = pending.iter().position(|&id| id == event.id) else {
            return Err(ApiError::new(status::INVALID_EVENT, "unknown event"));
        };
        let done: Vec<u64> = pending.drain(..=position).collect();
        state.completed.extend(done);
        Ok(())
    }

    fn finish(&self, queue: &HostQueue) -> ApiResult<()> {
        let mut state = lock(&self.state);
        state.take_fault(HostCall::Finish)?;
        let done: Vec<u64> = state
            .pending
            .get_mut(&queue.id)
            .map(|pending| pending.drain(..).collect())
            .unwrap_or_default();
        state.completed.extend(done);
        Ok(())
    }

    fn shutdown(&self) {
        lock(&self.state).released.push(Released::Runtime);
    }
}

// ============================================================================
// Source checking
// ============================================================================

/// Validate bracket balance and collect kernel entry points
///
/// Returns the build log on failure.
fn check_source(source: &str) -> Result<Vec<String>, String> {
    let code = strip_comments(source);

    let mut open: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    for c in code.chars() {
        match c {
            '\n' => line += 1,
            '(' | '{' | '[' => open.push((c, line)),
            ')' | '}' | ']' => {
                let expected = match c {
                    ')' => '(',
                    '}' => '{',
                    _ => '[',
                };
                match open.pop() {
                    Some((opener, _)) if opener == expected => {}
                    _ => {
                        return Err(format!(
                            "<kernel source>:{}: error: unexpected '{}'",
                            line, c
                        ));
                    }
                }
            }
            _ => {}
        }
    }
    if let Some((opener, opened_at)) = open.pop() {
        return Err(format!(
            "<kernel source>:{}: error: '{}' is never closed",
            opened_at, opener
        ));
    }

    Ok(kernel_entry_points(&code))
}

/// Replace comments with spaces, keeping line breaks
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        match (c, next) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Names following `__kernel void` / `kernel void` and followed by `(`
fn kernel_entry_points(code: &str) -> Vec<String> {
    let mut tokens: Vec<&str> = Vec::new();
    let mut start = None;
    for (i, c) in code.char_indices() {
        let ident = c.is_ascii_alphanumeric() || c == '_';
        match (ident, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                tokens.push(&code[s..i]);
                start = None;
            }
            _ => {}
        }
        if !ident && !c.is_whitespace() {
            tokens.push(&code[i..i + c.len_utf8()]);
        }
    }
    if let Some(s) = start {
        tokens.push(&code[s..]);
    }

    tokens
        .windows(4)
        .filter(|w| matches!(w[0], "__kernel" | "kernel") && w[1] == "void" && w[3] == "(")
        .map(|w| w[2].to_string())
        .collect()
}
