// pyworkbench: Rust library for staging a virtual Python workspace into a
// sandboxed filesystem, executing scripts and a pytest-style test suite via
// the RustPython VM, and estimating test coverage from generated test code.

pub mod coverage;
pub mod generate;
pub mod output;
pub mod paths;
pub mod sandbox;
pub mod session;
pub mod types;
pub(crate) mod vm;

pub use coverage::{
    compute_coverage, extract_function_names, file_coverage, global_coverage,
    is_function_referenced, CoverageReport,
};
pub use generate::{
    apply_generated_test, GenerateError, GenerateRequest, GenerateResponse, TestGenClient,
};
pub use output::TranscriptBuffer;
pub use sandbox::SandboxBridge;
pub use session::{ExecutionSession, SessionState};
pub use types::{
    SessionConfig, WorkspaceSnapshot, FAULT_MARKER, NOT_READY_MESSAGE, NO_INPUT_MESSAGE,
    NO_OUTPUT_MESSAGE, TEST_FRAMEWORK_MODULES,
};
