use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use pyworkbench::generate::DEFAULT_ENDPOINT;
use pyworkbench::{
    apply_generated_test, global_coverage, ExecutionSession, GenerateRequest, SessionConfig,
    TestGenClient, WorkspaceSnapshot,
};

/// Stage a Python workspace directory into the sandbox, run scripts or the
/// test suite, and emit JSON results.
#[derive(Parser, Debug)]
#[command(
    name = "pyworkbench-cli",
    about = "Run Python workspace scripts and tests in an embedded sandbox"
)]
struct Args {
    /// Workspace directory holding src/ and tests/
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Maximum transcript size in bytes (default: 1048576)
    #[arg(long)]
    max_output_bytes: Option<usize>,

    /// Seconds to wait for the interpreter to become ready
    #[arg(long, default_value_t = 120)]
    ready_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one workspace file as a standalone script
    Run {
        /// Workspace-relative path, e.g. src/main.py
        file: String,
    },
    /// Run the test suite over tests/
    Test {
        /// One report line per test instead of the compact dot report
        #[arg(long)]
        verbose: bool,
    },
    /// Static coverage of declared source functions by test files
    Coverage,
    /// Generate tests for a file via the generation service and write them
    /// to the conventional tests/ path
    Generate {
        /// Workspace-relative path of the source file
        file: String,

        /// Generation service endpoint
        #[arg(long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let snapshot = match load_workspace(&args.workspace) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading workspace {}: {e}", args.workspace.display());
            std::process::exit(1);
        }
    };

    let max_output_bytes = args
        .max_output_bytes
        .or_else(|| {
            std::env::var("PYWB_MAX_OUTPUT_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(1_048_576);

    // Errors below are encoded in the JSON payload; the process always exits 0.
    let result = match args.command {
        Command::Run { file } => {
            let code = snapshot.get(&file).cloned().unwrap_or_default();
            if code.trim().is_empty() {
                serde_json::json!({ "op": "run", "file": file, "output": pyworkbench::NO_INPUT_MESSAGE })
            } else {
                let session = ready_session(max_output_bytes, false, args.ready_timeout);
                let output = session.run_script(&file, &code);
                serde_json::json!({ "op": "run", "file": file, "output": output })
            }
        }
        Command::Test { verbose } => {
            let session = ready_session(max_output_bytes, verbose, args.ready_timeout);
            let output = session.run_test_suite(&snapshot);
            serde_json::json!({ "op": "test", "output": output })
        }
        Command::Coverage => {
            let report = global_coverage(&snapshot);
            serde_json::json!({ "op": "coverage", "report": report })
        }
        Command::Generate { file, endpoint } => {
            let code = snapshot.get(&file).cloned().unwrap_or_default();
            if code.trim().is_empty() {
                serde_json::json!({ "op": "generate", "error": "source file is empty or missing" })
            } else {
                let client = TestGenClient::new(endpoint);
                match client.generate(&GenerateRequest::for_file(&file, code)) {
                    Ok(response) => {
                        let (updated, test_file) =
                            apply_generated_test(&file, &response.generated_code, &snapshot);
                        match write_workspace_file(&args.workspace, &test_file, &updated[&test_file])
                        {
                            Ok(()) => serde_json::json!({
                                "op": "generate",
                                "status": response.status,
                                "test_file": test_file,
                            }),
                            Err(e) => serde_json::json!({
                                "op": "generate",
                                "error": format!("failed to write {test_file}: {e}"),
                            }),
                        }
                    }
                    Err(e) => serde_json::json!({ "op": "generate", "error": e.to_string() }),
                }
            }
        }
    };

    println!("{result}");
}

fn ready_session(max_output_bytes: usize, verbose_tests: bool, timeout_secs: u64) -> ExecutionSession {
    let session = ExecutionSession::with_config(SessionConfig {
        max_output_bytes,
        verbose_tests,
    });
    // A timed-out wait is not fatal: the run call answers with the
    // not-ready sentinel and that lands in the JSON output.
    let _ = session.wait_until_ready(Duration::from_secs(timeout_secs));
    session
}

/// Collect every readable text file under `root` into a workspace snapshot,
/// keyed by forward-slash relative path. Hidden entries and __pycache__ are
/// skipped.
fn load_workspace(root: &Path) -> std::io::Result<WorkspaceSnapshot> {
    let mut snapshot = WorkspaceSnapshot::new();
    collect_files(root, root, &mut snapshot)?;
    Ok(snapshot)
}

fn collect_files(root: &Path, dir: &Path, snapshot: &mut WorkspaceSnapshot) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name == "__pycache__" {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, snapshot)?;
        } else if let Ok(content) = fs::read_to_string(&path) {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            snapshot.insert(rel, content);
        }
    }
    Ok(())
}

fn write_workspace_file(root: &Path, rel: &str, content: &str) -> std::io::Result<()> {
    let target = root.join(rel);
    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(target, content)
}
