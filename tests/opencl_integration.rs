//! Integration tests against the system OpenCL runtime
//!
//! Run with: `cargo test --features opencl`
//!
//! Tests are skipped when no platform is installed. They run serially since
//! some drivers do not tolerate concurrent context creation.

#![cfg(feature = "opencl")]

mod common;

use clsession::backend::opencl::OpenClApi;
use clsession::{ComputeError, ComputeSession, ComputeTool, DeviceType, OpenClSession, SessionConfig};
use common::{Broken, MissingEntry, Noop, init_logging, kernels_dir};
use serial_test::serial;

fn open(device_type: DeviceType) -> Option<OpenClSession> {
    init_logging();
    if !OpenClApi::is_available() {
        eprintln!("No OpenCL platform available, skipping test");
        return None;
    }

    let config = SessionConfig::default()
        .with_device_type(device_type)
        .with_source_root(kernels_dir());

    match ComputeSession::open(OpenClApi::new(), config) {
        Ok(session) => Some(session),
        Err(ComputeError::DeviceNotFound { device_type: found }) => {
            assert_eq!(found, device_type);
            eprintln!("No {} device available, skipping test", device_type);
            None
        }
        Err(e) => panic!("unexpected error opening session: {}", e),
    }
}

#[test]
#[serial]
fn test_noop_kernel_on_gpu() {
    let Some(session) = open(DeviceType::Gpu) else {
        return;
    };
    println!("Running on {}", session.device_name());

    {
        let mut noop = Noop::build(&session).unwrap();
        noop.dispatch(1).unwrap();
        noop.finish().unwrap();
        session.finish_all().unwrap();
    }
    session.close();
}

#[test]
#[serial]
fn test_handles_wait_independently() {
    let Some(session) = open(DeviceType::All) else {
        return;
    };

    let mut noop = Noop::build(&session).unwrap();
    let a = noop.dispatch(64).unwrap();
    let b = noop.dispatch(1024).unwrap();
    a.wait().unwrap();
    b.wait().unwrap();
    noop.finish().unwrap();
    assert_eq!(b.work_size(), 1024);
}

#[test]
#[serial]
fn test_compile_error_has_log() {
    let Some(session) = open(DeviceType::All) else {
        return;
    };

    match Broken::build(&session).err().unwrap() {
        ComputeError::Compile { log } => assert!(!log.is_empty()),
        other => panic!("expected compile error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_missing_kernel_name() {
    let Some(session) = open(DeviceType::All) else {
        return;
    };

    let err = MissingEntry::build(&session).err().unwrap();
    assert!(matches!(err, ComputeError::KernelNotFound { .. }), "{:?}", err);
}

#[test]
#[serial]
fn test_zero_work_size_and_early_finish() {
    let Some(session) = open(DeviceType::All) else {
        return;
    };

    let mut noop = Noop::build(&session).unwrap();
    assert!(matches!(noop.finish(), Err(ComputeError::Wait { .. })));
    assert!(matches!(noop.dispatch(0), Err(ComputeError::Dispatch { .. })));
}
