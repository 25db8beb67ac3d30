#![allow(dead_code)]

use clsession::{ComputeApi, ComputeTool, KernelProgram};
use std::path::PathBuf;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Directory holding the test kernel sources
pub fn kernels_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("kernels")
}

/// Declare a tool type for one kernel of a test source file
macro_rules! kernel_tool {
    ($tool:ident, $kernel:expr, $source:expr) => {
        pub struct $tool<'s, A: ComputeApi>(KernelProgram<'s, A>);

        impl<'s, A: ComputeApi + 's> ComputeTool<'s, A> for $tool<'s, A> {
            const KERNEL_NAME: &'static str = $kernel;
            const SOURCE_PATH: &'static str = $source;

            fn from_program(program: KernelProgram<'s, A>) -> Self {
                $tool(program)
            }

            fn program(&self) -> &KernelProgram<'s, A> {
                &self.0
            }

            fn program_mut(&mut self) -> &mut KernelProgram<'s, A> {
                &mut self.0
            }
        }
    };
}

kernel_tool!(Noop, "noop", "noop.cl");
kernel_tool!(Broken, "broken", "broken.cl");
kernel_tool!(MissingEntry, "K", "noop.cl");
kernel_tool!(MissingSource, "noop", "absent/noop.cl");
kernel_tool!(First, "first", "pair.cl");
kernel_tool!(Second, "second", "pair.cl");
