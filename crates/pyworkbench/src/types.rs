//! Foundational public types for the pyworkbench library.
//!
//! This module defines the data structures and sentinel strings used across
//! the library:
//! - [`WorkspaceSnapshot`] — the virtual file tree handed to the core per call
//! - [`SessionConfig`] — configuration for an execution session
//! - the fixed sentinel strings returned by session operations
//! - [`TEST_FRAMEWORK_MODULES`] — the package set preloaded at session init

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A point-in-time copy of the virtual workspace: workspace-relative,
/// forward-slash path → full file text.
///
/// The snapshot carries no explicit hierarchy; the sandbox bridge
/// reconstructs directories from the `/`-delimited path segments. A `BTreeMap`
/// keeps staging order deterministic across runs.
pub type WorkspaceSnapshot = BTreeMap<String, String>;

/// The test-framework modules that must import successfully before the
/// session can reach `Ready`. The interpreter registers these as frozen
/// modules at construction; a failed import keeps the session in
/// `Initializing` permanently.
pub const TEST_FRAMEWORK_MODULES: &[&str] = &["pytest"];

/// Returned by both run operations while the interpreter is still booting.
/// Callers are expected to retry after [`wait_until_ready`] rather than block.
///
/// [`wait_until_ready`]: crate::session::ExecutionSession::wait_until_ready
pub const NOT_READY_MESSAGE: &str = "Python runtime is still initializing.";

/// Returned by `run_script` when the submitted code is empty or whitespace.
/// The guard fires before any filesystem staging.
pub const NO_INPUT_MESSAGE: &str = "Nothing to run: the file is empty.";

/// Returned when a run completes without writing anything to the transcript.
pub const NO_OUTPUT_MESSAGE: &str = "Executed successfully (no output).";

/// Prefix of every diagnostic returned for a failed run. The captured
/// transcript (everything the program wrote before the fault) follows the
/// marker, then the interpreter's formatted traceback.
pub const FAULT_MARKER: &str = "Execution error:\n";

/// Configuration that governs a single [`ExecutionSession`].
///
/// [`ExecutionSession`]: crate::session::ExecutionSession
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of bytes a run may write to the combined transcript.
    /// Default: 1,048,576 bytes (1 MiB).
    pub max_output_bytes: usize,

    /// When `true`, test runs report one line per test (`-v`); otherwise the
    /// compact dot report (`-q`) is produced.
    pub verbose_tests: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: 1_048_576,
            verbose_tests: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default_max_output_bytes() {
        let config = SessionConfig::default();
        assert_eq!(config.max_output_bytes, 1_048_576);
    }

    #[test]
    fn test_session_config_default_is_quiet() {
        let config = SessionConfig::default();
        assert!(!config.verbose_tests);
    }

    #[test]
    fn test_sentinels_are_distinct() {
        let sentinels = [NOT_READY_MESSAGE, NO_INPUT_MESSAGE, NO_OUTPUT_MESSAGE, FAULT_MARKER];
        for (i, a) in sentinels.iter().enumerate() {
            for b in sentinels.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_session_config_serde_round_trip() {
        let config = SessionConfig {
            max_output_bytes: 4096,
            verbose_tests: true,
        };
        let json = serde_json::to_string(&config).expect("serialize SessionConfig");
        let back: SessionConfig = serde_json::from_str(&json).expect("deserialize SessionConfig");
        assert_eq!(back.max_output_bytes, 4096);
        assert!(back.verbose_tests);
    }
}
