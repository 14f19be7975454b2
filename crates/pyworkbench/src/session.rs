//! Execution session — interpreter lifecycle plus the two run operations.
//!
//! ## Design
//!
//! The session owns one dedicated OS thread that:
//! 1. Creates the sandbox root and builds one `PyInterp` at startup.
//! 2. Preloads the test-framework package set.
//! 3. Flips the session state to `Ready` and blocks on a `Receiver<Command>`.
//! 4. On receiving a command: stages files, runs code, sends the transcript
//!    back via the command's response channel.
//!
//! The interpreter NEVER crosses thread boundaries — this is the key design
//! invariant required because `PyInterp` is not `Send`. Only the `Sender` end
//! of the command channel (which is `Send`) is shared.
//!
//! ## Lifecycle
//!
//! `Uninitialized → Initializing → Ready`. Initialization starts at
//! construction, not lazily, and the constructor does not block. Calls made
//! before `Ready` return the fixed not-ready sentinel immediately — they are
//! neither queued nor blocked on. There is no transition back and no
//! teardown; the session lives for the hosting process.
//!
//! If interpreter construction or package preloading fails, the failure is
//! logged and the session stays in `Initializing` permanently; every
//! subsequent call keeps answering with the not-ready sentinel.
//!
//! ## Concurrency
//!
//! Both operations mutate shared sandbox state (filesystem, module registry,
//! output sink), so the single VM thread serializes them by construction. The
//! session performs no other locking; at most one in-flight run is the
//! intended usage, and cancellation is not supported.

use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::output::TranscriptBuffer;
use crate::sandbox::SandboxBridge;
use crate::types::{
    SessionConfig, WorkspaceSnapshot, FAULT_MARKER, NOT_READY_MESSAGE, NO_INPUT_MESSAGE,
};
use crate::vm::{self, PyInterp};

// ── State machine ────────────────────────────────────────────────────────────

/// Lifecycle phase of an [`ExecutionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed but the VM thread has not started booting yet.
    Uninitialized,
    /// The interpreter is booting and preloading the test framework.
    /// A failed boot parks the session here permanently.
    Initializing,
    /// Operations are being serviced.
    Ready,
}

struct SessionShared {
    state: Mutex<SessionState>,
    cvar: Condvar,
}

impl SessionShared {
    fn set(&self, state: SessionState) {
        let mut guard = self.state.lock().expect("session state poisoned");
        *guard = state;
        self.cvar.notify_all();
    }

    fn get(&self) -> SessionState {
        *self.state.lock().expect("session state poisoned")
    }
}

// ── Commands ─────────────────────────────────────────────────────────────────

enum Command {
    RunScript {
        path: String,
        code: String,
        response: SyncSender<String>,
    },
    RunTests {
        snapshot: WorkspaceSnapshot,
        response: SyncSender<String>,
    },
}

// ── Public API ───────────────────────────────────────────────────────────────

/// An embedded Python runtime bound to one sandbox filesystem.
///
/// Construction spawns the VM thread and returns immediately; poll
/// [`is_ready`](Self::is_ready) or block on
/// [`wait_until_ready`](Self::wait_until_ready) before expecting real output.
pub struct ExecutionSession {
    shared: Arc<SessionShared>,
    work_tx: SyncSender<Command>,
}

impl ExecutionSession {
    /// Session with default configuration.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Session with explicit configuration.
    pub fn with_config(config: SessionConfig) -> Self {
        let shared = Arc::new(SessionShared {
            state: Mutex::new(SessionState::Uninitialized),
            cvar: Condvar::new(),
        });

        // Capacity 1: the thread services one run at a time; a second caller
        // queues in channel order while the first run completes.
        let (work_tx, work_rx) = mpsc::sync_channel::<Command>(1);

        shared.set(SessionState::Initializing);

        let thread_shared = Arc::clone(&shared);
        let spawn_result = std::thread::Builder::new()
            .name("pyworkbench-vm".to_string())
            .spawn(move || vm_thread_main(thread_shared, work_rx, config));
        if let Err(e) = spawn_result {
            // The session stays in Initializing; every call will answer with
            // the not-ready sentinel.
            error!("failed to spawn VM thread: {e}");
        }

        Self { shared, work_tx }
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> SessionState {
        self.shared.get()
    }

    /// `true` once the interpreter has booted and the test framework loaded.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Block until the session is `Ready` or `timeout` elapses. Returns
    /// whether the session became ready.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.state.lock().expect("session state poisoned");
        while *guard != SessionState::Ready {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (next, result) = self
                .shared
                .cvar
                .wait_timeout(guard, remaining)
                .expect("session state poisoned");
            guard = next;
            if result.timed_out() && *guard != SessionState::Ready {
                return false;
            }
        }
        true
    }

    /// Stage `code` at `path` and execute it as a standalone script.
    ///
    /// Returns the combined transcript, a fixed sentinel (not ready, empty
    /// input, no output), or an error-prefixed diagnostic. Never panics or
    /// propagates a fault.
    pub fn run_script(&self, path: &str, code: &str) -> String {
        if code.trim().is_empty() {
            return NO_INPUT_MESSAGE.to_string();
        }
        if !self.is_ready() {
            return NOT_READY_MESSAGE.to_string();
        }
        let (response, result_rx) = mpsc::sync_channel::<String>(1);
        let command = Command::RunScript {
            path: path.to_string(),
            code: code.to_string(),
            response,
        };
        self.dispatch(command, result_rx)
    }

    /// Stage the full snapshot and run the test suite over `tests/`.
    ///
    /// Returns the framework's textual report, a fixed sentinel, or an
    /// error-prefixed diagnostic for staging/collection faults. Test failures
    /// are a normal report outcome, not a fault.
    pub fn run_test_suite(&self, snapshot: &WorkspaceSnapshot) -> String {
        if !self.is_ready() {
            return NOT_READY_MESSAGE.to_string();
        }
        let (response, result_rx) = mpsc::sync_channel::<String>(1);
        let command = Command::RunTests {
            snapshot: snapshot.clone(),
            response,
        };
        self.dispatch(command, result_rx)
    }

    fn dispatch(&self, command: Command, result_rx: Receiver<String>) -> String {
        if self.work_tx.send(command).is_err() {
            // VM thread is gone; treat like a session that never became ready.
            return NOT_READY_MESSAGE.to_string();
        }
        result_rx
            .recv()
            .unwrap_or_else(|_| format!("{FAULT_MARKER}interpreter thread terminated"))
    }
}

impl Default for ExecutionSession {
    fn default() -> Self {
        Self::new()
    }
}

// ── VM thread ────────────────────────────────────────────────────────────────

fn vm_thread_main(shared: Arc<SessionShared>, work_rx: Receiver<Command>, config: SessionConfig) {
    let started = Instant::now();

    let bridge = match SandboxBridge::new() {
        Ok(b) => b,
        Err(e) => {
            error!("sandbox root creation failed: {e}");
            return;
        }
    };

    let interp = vm::build_interpreter(bridge.root());

    if let Err(detail) = vm::preload_test_framework(&interp) {
        error!("test framework preload failed: {detail}");
        return;
    }

    shared.set(SessionState::Ready);
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        root = %bridge.root().display(),
        "session ready"
    );

    loop {
        let command = match work_rx.recv() {
            Ok(c) => c,
            Err(_) => break, // Session dropped. Exit.
        };
        match command {
            Command::RunScript {
                path,
                code,
                response,
            } => {
                let transcript = exec_script(&interp, &bridge, &config, &path, &code);
                // If the caller vanished, discard the result and continue.
                let _ = response.send(transcript);
            }
            Command::RunTests { snapshot, response } => {
                let transcript = exec_tests(&interp, &bridge, &config, &snapshot);
                let _ = response.send(transcript);
            }
        }
    }
}

fn exec_script(
    interp: &PyInterp,
    bridge: &SandboxBridge,
    config: &SessionConfig,
    path: &str,
    code: &str,
) -> String {
    debug!(path, "run script");
    let staged = match bridge.stage(path, code) {
        Ok(p) => p,
        Err(e) => return staging_fault(path, &e),
    };
    if let Err(e) = bridge.ensure_src_root() {
        return staging_fault("src", &e);
    }
    let output = TranscriptBuffer::new(config.max_output_bytes);
    vm::run_script(interp, &staged, code, output)
}

fn exec_tests(
    interp: &PyInterp,
    bridge: &SandboxBridge,
    config: &SessionConfig,
    snapshot: &WorkspaceSnapshot,
) -> String {
    debug!(files = snapshot.len(), "run test suite");

    // Strict order: caches, module registry, staging, capture, run.
    bridge.clear_cache_dirs();
    vm::purge_stale_modules(interp);

    for (path, content) in snapshot {
        if let Err(e) = bridge.stage(path, content) {
            return staging_fault(path, &e);
        }
    }
    if let Err(e) = bridge.ensure_src_root() {
        return staging_fault("src", &e);
    }
    if let Err(e) = bridge.ensure_tests_root() {
        return staging_fault("tests", &e);
    }

    let output = TranscriptBuffer::new(config.max_output_bytes);
    vm::run_test_suite(interp, bridge.root(), config.verbose_tests, output)
}

fn staging_fault(path: &str, err: &std::io::Error) -> String {
    format!("{FAULT_MARKER}failed to stage {path}: {err}")
}

// ── Tests ────────────────────────────────────────────────────────────────────
