//! Smoke tests for the pyworkbench library.
//!
//! These verify the most important script-execution invariants end to end:
//! 1. stdout capture works and is returned as the transcript
//! 2. stderr shares the stdout sink (one combined transcript)
//! 3. faults are surfaced as error-prefixed data, never as a panic
//! 4. the fixed sentinels for empty input and silent runs
//!
//! Run with: `cargo test -p pyworkbench --test smoke_test`

use std::time::Duration;

use pyworkbench::{
    ExecutionSession, FAULT_MARKER, NO_INPUT_MESSAGE, NO_OUTPUT_MESSAGE,
};

fn ready_session() -> ExecutionSession {
    let session = ExecutionSession::new();
    assert!(
        session.wait_until_ready(Duration::from_secs(180)),
        "session never became ready"
    );
    session
}

/// `print("hi")` produces exactly `"hi\n"`.
#[test]
fn test_run_script_hello_world() {
    let session = ready_session();
    let output = session.run_script("src/main.py", r#"print("hi")"#);
    assert_eq!(output, "hi\n");
}

/// stderr writes interleave into the same transcript as stdout.
#[test]
fn test_combined_transcript_ordering() {
    let session = ready_session();
    let code = "import sys\nprint('first')\nsys.stderr.write('second\\n')\nprint('third')\n";
    let output = session.run_script("src/main.py", code);
    assert_eq!(output, "first\nsecond\nthird\n");
}

/// A raising script returns the fault marker, the output written before the
/// fault, and the exception detail — it does not panic or throw.
#[test]
fn test_raising_script_is_surfaced_as_data() {
    let session = ready_session();
    let code = "print('partial')\nraise ValueError('boom')\n";
    let output = session.run_script("src/main.py", code);
    assert!(output.starts_with(FAULT_MARKER), "got: {output}");
    assert!(output.contains("partial"), "partial output lost: {output}");
    assert!(output.contains("boom"), "exception detail lost: {output}");
}

/// A syntax error is reported the same way, before anything executes.
#[test]
fn test_syntax_error_is_surfaced_as_data() {
    let session = ready_session();
    let output = session.run_script("src/main.py", "def f(:\n");
    assert!(output.starts_with(FAULT_MARKER), "got: {output}");
    assert!(output.contains("SyntaxError"), "got: {output}");
}

/// A script that writes nothing yields the fixed no-output sentinel.
#[test]
fn test_silent_script_sentinel() {
    let session = ready_session();
    let output = session.run_script("src/main.py", "x = 1 + 1");
    assert_eq!(output, NO_OUTPUT_MESSAGE);
}

/// Empty and whitespace-only input is rejected before staging.
#[test]
fn test_empty_input_guard() {
    let session = ready_session();
    assert_eq!(session.run_script("src/main.py", ""), NO_INPUT_MESSAGE);
    assert_eq!(session.run_script("src/main.py", "  \n\t "), NO_INPUT_MESSAGE);
}

/// Output never leaks between runs, even after a fault.
#[test]
fn test_capture_reset_between_runs() {
    let session = ready_session();
    let first = session.run_script("src/a.py", "print('alpha')\nraise RuntimeError('dead')\n");
    assert!(first.contains("alpha"));
    let second = session.run_script("src/b.py", "print('beta')");
    assert_eq!(second, "beta\n");
}
