//! RustPython VM lifecycle for the pyworkbench library.
//!
//! This module owns all RustPython API calls. It:
//! - Builds the session interpreter with the sandbox root on `sys.path`, the
//!   native stdlib modules, and the frozen test framework registered.
//! - Installs output capture (both interpreter streams rebound to one
//!   [`TranscriptBuffer`]) at the start of every run.
//! - Executes user scripts as the top-level run (`__name__ == "__main__"`).
//! - Drives the test framework's collection-and-run entry point and swallows
//!   its `SystemExit` inside the driver itself.
//! - Purges stale entries from the interpreter's module registry so re-runs
//!   observe the latest staged content, never a cached module.
//!
//! ## Output Capture
//!
//! `sys.stdout` and `sys.stderr` are replaced with the SAME minimal
//! Python-level object whose `write(s)` method appends to the shared
//! [`TranscriptBuffer`]. One sink means the transcript preserves program
//! output ordering; there are no independently retrievable streams. The
//! replacement happens at the start of each run (inside `enter()`), with a
//! fresh buffer per run.
//!
//! ## Frozen test framework
//!
//! The interpreter cannot download wheels, so the pytest-style framework is a
//! pure-Python module frozen into the binary and registered at interpreter
//! construction. It deliberately uses only native facilities (`sys`,
//! `os.listdir`, `open`, `compile`, `exec`) so it loads without a host Python
//! installation.
//!
//! ## Zero unsafe blocks
//!
//! This file contains no `unsafe` code. All RustPython integration uses the
//! safe public Rust API.

use std::path::Path;

use rustpython_vm::{
    builtins::PyBaseExceptionRef,
    compiler::Mode,
    function::FuncArgs,
    AsObject, Interpreter, PyObjectRef, PyResult, VirtualMachine,
};

use crate::output::{TranscriptBuffer, TranscriptOverflow};
use crate::paths;
use crate::types::{FAULT_MARKER, NO_OUTPUT_MESSAGE, TEST_FRAMEWORK_MODULES};

// ── Interpreter wrapper ──────────────────────────────────────────────────────

/// The session's configured interpreter.
///
/// Not `Send` — it must live on the session's dedicated VM thread and never
/// cross thread boundaries.
pub(crate) struct PyInterp {
    inner: Interpreter,
}

impl PyInterp {
    /// Execute a closure with access to the VirtualMachine.
    ///
    /// The closure must not store any references to the VM outside its scope.
    pub(crate) fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&VirtualMachine) -> R,
    {
        self.inner.enter(f)
    }
}

/// Return candidate filesystem paths for a host Python standard library.
///
/// RustPython can import pure-Python stdlib modules (collections, textwrap,
/// etc.) from a host installation when they are on `Settings::path_list`.
/// Native modules from `rustpython_stdlib::get_module_inits()` take
/// precedence over same-named files on these paths. The sandbox works without
/// a host installation; these paths only widen what user code may import.
fn python_stdlib_paths() -> Vec<String> {
    let candidates = [
        "/usr/local/lib/python3.13",
        "/usr/local/lib/python3.12",
        "/usr/local/lib/python3.11",
        "/usr/local/lib/python3.10",
        "/usr/lib/python3",
        "/usr/lib/python3.12",
        "/usr/lib/python3.11",
        "/usr/lib/python3.10",
    ];
    candidates
        .iter()
        .filter(|p| Path::new(p).is_dir())
        .map(|p| p.to_string())
        .collect()
}

/// Create the session interpreter.
///
/// `sandbox_root` and its `src/` subdirectory are placed on `sys.path` so
/// staged files import as modules and packages. The frozen test framework is
/// registered here; its importability is verified separately by
/// [`preload_test_framework`].
pub(crate) fn build_interpreter(sandbox_root: &Path) -> PyInterp {
    let mut settings = rustpython_vm::Settings::default();

    settings.path_list.push(sandbox_root.display().to_string());
    settings
        .path_list
        .push(sandbox_root.join(paths::SRC_ROOT).display().to_string());
    for path in python_stdlib_paths() {
        settings.path_list.push(path);
    }

    let inner = Interpreter::with_init(settings, move |vm| {
        // Native (Rust-implemented) stdlib modules: math, re, _json, etc.
        vm.add_native_modules(rustpython_stdlib::get_module_inits());

        // Frozen pytest-style test framework. Provides main(), raises(),
        // approx(), skip()/fail(), and a minimal mark.parametrize — the
        // surface generated test suites rely on.
        vm.add_frozen(rustpython_vm::py_freeze!(
            source = r#"
import os
import sys

__version__ = "0.1.0-embedded"


class UsageError(Exception):
    pass


class Skipped(Exception):
    pass


class Failed(Exception):
    pass


def skip(reason=""):
    raise Skipped(reason)


def fail(msg=""):
    raise Failed(msg)


class ExceptionInfo:
    def __init__(self):
        self.type = None
        self.value = None


class raises:
    def __init__(self, expected, match=None):
        self.expected = expected
        self.match = match
        self.info = ExceptionInfo()

    def __enter__(self):
        return self.info

    def __exit__(self, exc_type, exc_value, tb):
        if exc_type is None:
            raise Failed("DID NOT RAISE " + repr(self.expected))
        if not issubclass(exc_type, self.expected):
            return False
        if self.match is not None and self.match not in str(exc_value):
            raise Failed(
                "raised " + exc_type.__name__
                + " but " + repr(self.match)
                + " not found in " + repr(str(exc_value))
            )
        self.info.type = exc_type
        self.info.value = exc_value
        return True


class approx:
    def __init__(self, expected, rel=None, abs=None):
        self.expected = expected
        self.rel = rel if rel is not None else 1e-6
        self.abs_tol = abs if abs is not None else 1e-12

    def _bound(self):
        magnitude = self.expected if self.expected >= 0 else -self.expected
        bound = self.rel * magnitude
        if bound < self.abs_tol:
            bound = self.abs_tol
        return bound

    def __eq__(self, actual):
        diff = actual - self.expected
        if diff < 0:
            diff = -diff
        return diff <= self._bound()

    def __ne__(self, actual):
        return not self.__eq__(actual)

    def __repr__(self):
        return "approx(" + repr(self.expected) + ")"


class _MarkGenerator:
    def parametrize(self, argnames, argvalues):
        def wrap(func):
            func.__parametrize__ = (argnames, list(argvalues))
            return func
        return wrap

    def skip(self, reason=""):
        if callable(reason):
            func = reason
            func.__skip_reason__ = "unconditional skip"
            return func
        def wrap(func):
            func.__skip_reason__ = reason if reason else "unconditional skip"
            return func
        return wrap

    def __getattr__(self, name):
        def marker(*args, **kwargs):
            if len(args) == 1 and callable(args[0]) and not kwargs:
                return args[0]
            def wrap(func):
                return func
            return wrap
        return marker


mark = _MarkGenerator()


class _TestModule:
    def __init__(self, name, path):
        self.__name__ = name
        self.__file__ = path


def _module_name(path):
    name = path
    if name.endswith(".py"):
        name = name[: len(name) - 3]
    name = name.replace("\\", "/")
    while name.startswith("./"):
        name = name[2:]
    while name.startswith("/"):
        name = name[1:]
    return name.replace("/", ".")


def _load_module(path):
    handle = open(path)
    try:
        source = handle.read()
    finally:
        handle.close()
    name = _module_name(path)
    module = _TestModule(name, path)
    code = compile(source, path, "exec")
    sys.modules[name] = module
    exec(code, module.__dict__)
    return module


def _is_dir(path):
    try:
        os.listdir(path)
        return True
    except OSError:
        return False


def _collect_files(target):
    if target.endswith(".py"):
        return [target]
    try:
        names = sorted(os.listdir(target))
    except OSError:
        return []
    found = []
    for name in names:
        if name.startswith(".") or name == "__pycache__":
            continue
        child = target + "/" + name
        if _is_dir(child):
            found.extend(_collect_files(child))
        elif name.startswith("test_") and name.endswith(".py"):
            found.append(child)
    return found


def _skip_runner(reason):
    def run():
        raise Skipped(reason)
    return run


def _bind(func, bound):
    def run():
        func(*bound)
    return run


def _bind_method(cls, method_name):
    def run():
        instance = cls()
        getattr(instance, method_name)()
    return run


def _expand(name, func):
    reason = getattr(func, "__skip_reason__", None)
    if reason is not None:
        return [(name, _skip_runner(reason))]
    params = getattr(func, "__parametrize__", None)
    if params is None:
        return [(name, func)]
    argnames, argvalues = params
    arity = len([n for n in argnames.split(",") if n.strip()])
    cases = []
    index = 0
    for values in argvalues:
        if arity <= 1:
            bound = (values,)
        else:
            bound = tuple(values)
        cases.append((name + "[" + str(index) + "]", _bind(func, bound)))
        index += 1
    return cases


def _collect_items(module):
    items = []
    for attr in sorted(module.__dict__.keys()):
        obj = module.__dict__[attr]
        if attr.startswith("test_") and callable(obj) and not isinstance(obj, type):
            items.extend(_expand(attr, obj))
        elif attr.startswith("Test") and isinstance(obj, type):
            for method_name in sorted(dir(obj)):
                if method_name.startswith("test_"):
                    items.append((attr + "::" + method_name, _bind_method(obj, method_name)))
    return items


def main(args=None):
    args = list(args) if args else []
    verbose = "-v" in args
    targets = []
    for arg in args:
        if not arg.startswith("-"):
            targets.append(arg)
    if not targets:
        targets = ["tests"]

    print("=" * 25 + " test session starts " + "=" * 25)

    passed = 0
    failed = 0
    skipped_count = 0
    errors = 0
    failures = []
    progress = []

    for target in targets:
        files = _collect_files(target)
        if not files and not _is_dir(target):
            print("ERROR: file or directory not found: " + target)
            errors += 1
            continue
        for path in files:
            try:
                module = _load_module(path)
            except BaseException as exc:
                print("ERROR collecting " + path + ": " + exc.__class__.__name__ + ": " + str(exc))
                errors += 1
                continue
            for name, item in _collect_items(module):
                nodeid = path + "::" + name
                outcome = "passed"
                detail = None
                try:
                    item()
                except Skipped:
                    outcome = "skipped"
                except AssertionError as exc:
                    outcome = "failed"
                    detail = "AssertionError: " + str(exc)
                except BaseException as exc:
                    outcome = "failed"
                    detail = exc.__class__.__name__ + ": " + str(exc)

                if outcome == "passed":
                    passed += 1
                    if verbose:
                        print(nodeid + " PASSED")
                    else:
                        progress.append(".")
                elif outcome == "skipped":
                    skipped_count += 1
                    if verbose:
                        print(nodeid + " SKIPPED")
                    else:
                        progress.append("s")
                else:
                    failed += 1
                    failures.append((nodeid, detail))
                    if verbose:
                        print(nodeid + " FAILED")
                    else:
                        progress.append("F")

    if not verbose and progress:
        print("".join(progress))

    if failures:
        print("=" * 31 + " FAILURES " + "=" * 31)
        for nodeid, detail in failures:
            print("____ " + nodeid + " ____")
            print(detail)

    parts = []
    if passed:
        parts.append(str(passed) + " passed")
    if failed:
        parts.append(str(failed) + " failed")
    if skipped_count:
        parts.append(str(skipped_count) + " skipped")
    if errors:
        parts.append(str(errors) + " errors")
    if not parts:
        parts.append("no tests ran")
    print("=" * 20 + " " + ", ".join(parts) + " " + "=" * 20)

    if failed or errors:
        raise SystemExit(1)
    raise SystemExit(0)
"#,
            module_name = "pytest"
        ));
    });

    PyInterp { inner }
}

/// Import every module in [`TEST_FRAMEWORK_MODULES`] once, so a broken
/// framework registration is caught during session init rather than on the
/// first test run.
pub(crate) fn preload_test_framework(interp: &PyInterp) -> Result<(), String> {
    interp.enter(|vm| {
        for module in TEST_FRAMEWORK_MODULES {
            let source = format!("import {module}");
            let code = vm
                .compile(&source, Mode::Exec, "<preload>".to_owned())
                .map_err(|e| format!("preload compile failed for {module}: {e}"))?;
            let scope = vm.new_scope_with_builtins();
            vm.run_code_obj(code, scope).map_err(|exc| {
                let mut detail = String::new();
                let _ = vm.write_exception(&mut detail, &exc);
                format!("failed to load {module}: {detail}")
            })?;
        }
        Ok(())
    })
}

// ── Run protocols ────────────────────────────────────────────────────────────

/// Execute user source as the sandbox's top-level run.
///
/// The code runs with `__name__ == "__main__"` (so main-guard blocks fire)
/// and `__file__` set to the staged path. Faults are returned as data: the
/// captured transcript so far, error-marked, with the interpreter's formatted
/// traceback appended.
pub(crate) fn run_script(
    interp: &PyInterp,
    staged_path: &Path,
    code: &str,
    output: TranscriptBuffer,
) -> String {
    let filename = staged_path.display().to_string();
    run_in_fresh_scope(interp, code, &filename, Some(&filename), output)
}

/// Run the test framework over the staged `tests/` tree.
///
/// The driver snippet puts the sandbox root (and its `src/` subdirectory) on
/// `sys.path`, sets the working directory to the sandbox root so relative
/// imports resolve, and swallows the framework's `SystemExit` as normal
/// control flow. Anything else raised during collection is a fault and is
/// rendered like a script fault.
pub(crate) fn run_test_suite(
    interp: &PyInterp,
    sandbox_root: &Path,
    verbose: bool,
    output: TranscriptBuffer,
) -> String {
    let driver = test_driver_source(sandbox_root, verbose);
    run_in_fresh_scope(interp, &driver, "<test-driver>", None, output)
}

/// Drop every module registry entry whose name matches the conventional
/// test/source prefixes, so edited source is re-read from disk on the next
/// run instead of served from the in-memory cache.
pub(crate) fn purge_stale_modules(interp: &PyInterp) {
    interp.enter(|vm| {
        let sys_modules = match vm.sys_module.get_attr("modules", vm) {
            Ok(m) => m,
            Err(_) => return,
        };
        // Collect keys first; can't remove during iteration.
        let keys = match vm.call_method(&sys_modules, "keys", ()) {
            Ok(k) => k,
            Err(_) => return,
        };
        let iter = match vm.call_method(&keys, "__iter__", ()) {
            Ok(i) => i,
            Err(_) => return,
        };
        let mut stale: Vec<String> = Vec::new();
        loop {
            match vm.call_method(&iter, "__next__", ()) {
                Ok(key) => {
                    if let Ok(s) = key.str(vm) {
                        let name = s.as_str().to_owned();
                        if is_stale_module(&name) {
                            stale.push(name);
                        }
                    }
                }
                Err(_) => break, // StopIteration or error
            }
        }
        for name in stale {
            let _ = vm.call_method(&sys_modules, "__delitem__", (vm.ctx.new_str(name),));
        }
    });
}

/// Module names invalidated between test runs: the `src`/`tests` package
/// trees, bare `test_*` modules, and the conventional `main` module.
pub(crate) fn is_stale_module(name: &str) -> bool {
    name == "main"
        || name == "src"
        || name == "tests"
        || name.starts_with("main.")
        || name.starts_with("src.")
        || name.starts_with("tests.")
        || name.starts_with("test_")
}

// ── Private helpers ──────────────────────────────────────────────────────────

fn run_in_fresh_scope(
    interp: &PyInterp,
    code_str: &str,
    filename: &str,
    file_attr: Option<&str>,
    output: TranscriptBuffer,
) -> String {
    interp.enter(|vm| {
        install_output_capture(vm, output.clone());

        let code = match vm.compile(code_str, Mode::Exec, filename.to_owned()) {
            Ok(c) => c,
            Err(e) => return syntax_fault(output.into_string(), e),
        };

        let scope = vm.new_scope_with_builtins();
        let _ = scope
            .globals
            .set_item("__name__", vm.ctx.new_str("__main__").into(), vm);
        if let Some(path) = file_attr {
            let _ = scope
                .globals
                .set_item("__file__", vm.ctx.new_str(path).into(), vm);
        }

        match vm.run_code_obj(code, scope) {
            Ok(_) => {
                let transcript = output.into_string();
                if transcript.is_empty() {
                    NO_OUTPUT_MESSAGE.to_owned()
                } else {
                    transcript
                }
            }
            Err(exc) => raised_fault(vm, output.into_string(), exc),
        }
    })
}

/// The Python driver for one test run. Kept as a function of the sandbox root
/// so unit tests can assert its shape without a VM.
pub(crate) fn test_driver_source(sandbox_root: &Path, verbose: bool) -> String {
    let root_lit = py_string_literal(&sandbox_root.display().to_string());
    let src_lit = py_string_literal(
        &sandbox_root
            .join(paths::SRC_ROOT)
            .display()
            .to_string(),
    );
    let flag = if verbose { "-v" } else { "-q" };
    format!(
        "import os\n\
         import sys\n\
         if {root_lit} not in sys.path:\n    sys.path.insert(0, {root_lit})\n\
         if {src_lit} not in sys.path:\n    sys.path.insert(0, {src_lit})\n\
         os.chdir({root_lit})\n\
         import pytest\n\
         try:\n    pytest.main([\"{tests}\", \"{flag}\"])\nexcept SystemExit:\n    pass\n",
        tests = paths::TESTS_ROOT,
    )
}

/// Replace `sys.stdout` and `sys.stderr` with the SAME write-capturing
/// object, so the run produces one combined transcript.
fn install_output_capture(vm: &VirtualMachine, output: TranscriptBuffer) {
    let writer = build_writer_object(vm, output);
    let _ = vm.sys_module.set_attr("stdout", writer.clone(), vm);
    let _ = vm.sys_module.set_attr("stderr", writer, vm);
}

/// Build a minimal Python object with `write(s)` and `flush()` methods that
/// append to the shared transcript buffer.
fn build_writer_object(vm: &VirtualMachine, output: TranscriptBuffer) -> PyObjectRef {
    let write_buffer = output.clone();
    let flush_buffer = output;

    let write_fn = vm.new_function(
        "write",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let data: String = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();

            match write_buffer.write(data.as_bytes()) {
                Ok(()) => Ok(vm.ctx.new_int(data.len()).into()),
                Err(TranscriptOverflow { limit_bytes }) => Err(vm.new_exception_msg(
                    vm.ctx.exceptions.runtime_error.to_owned(),
                    format!("output limit exceeded: {limit_bytes} bytes"),
                )),
            }
        },
    );

    let flush_fn = vm.new_function(
        "flush",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            // Keep flush_buffer alive so the writer's buffer Arc stays valid.
            let _ = flush_buffer.is_limit_exceeded();
            Ok(vm.ctx.none())
        },
    );

    let ns = vm.new_module("<transcript>", vm.ctx.new_dict(), None);
    let _ = ns.set_attr("write", write_fn, vm);
    let _ = ns.set_attr("flush", flush_fn, vm);
    // Some Python code checks .closed and .encoding on stream objects.
    let _ = ns.set_attr("closed", vm.ctx.new_bool(false), vm);
    let _ = ns.set_attr("encoding", vm.ctx.new_str("utf-8"), vm);
    ns.into()
}

fn syntax_fault(transcript: String, err: rustpython_vm::compiler::CompileError) -> String {
    let (row, col) = err.python_location();
    let mut out = String::from(FAULT_MARKER);
    push_transcript(&mut out, &transcript);
    out.push_str(&format!("SyntaxError at line {row}, column {col}: {err}"));
    out
}

fn raised_fault(vm: &VirtualMachine, transcript: String, exc: PyBaseExceptionRef) -> String {
    // String implements rustpython's py_io::Write via write_fmt, so the full
    // Python-formatted traceback lands directly in `detail`.
    let mut detail = String::new();
    let _ = vm.write_exception(&mut detail, &exc);
    if detail.is_empty() {
        detail = exc
            .as_object()
            .str(vm)
            .map(|s| s.as_str().to_owned())
            .unwrap_or_else(|_| "unknown error".to_owned());
    }
    let mut out = String::from(FAULT_MARKER);
    push_transcript(&mut out, &transcript);
    out.push_str(&detail);
    out
}

fn push_transcript(out: &mut String, transcript: &str) {
    out.push_str(transcript);
    if !transcript.is_empty() && !transcript.ends_with('\n') {
        out.push('\n');
    }
}

/// Double-quoted Python string literal for embedding a host path in the
/// driver snippet.
fn py_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

// ── Tests ────────────────────────────────────────────────────────────────────
