//! Sandbox filesystem bridge — the sole writer of the sandbox filesystem on
//! behalf of the execution session.
//!
//! The bridge owns a per-session root directory and materializes workspace
//! snapshots beneath it:
//! - [`stage`](SandboxBridge::stage) normalizes a workspace path, creates the
//!   directory chain, synthesizes a package marker (`__init__.py`) at every
//!   level, and writes the content unconditionally.
//! - [`clear_cache_dirs`](SandboxBridge::clear_cache_dirs) removes the
//!   conventional bytecode/cache directories between test runs so stale
//!   artifacts never leak across runs.
//!
//! All operations are idempotent: directory and marker creation are
//! existence-checked, staging the same (path, content) twice leaves the same
//! filesystem state as staging it once.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::paths;

/// Synthesized at each directory level so staged directories import as
/// packages.
pub const PACKAGE_MARKER: &str = "__init__.py";

/// Cache directories cleared before every test run, relative to the sandbox
/// root.
const CACHE_DIRS: &[&str] = &[".pytest_cache", "tests/__pycache__", "src/__pycache__"];

/// Stages virtual workspace files into a sandboxed filesystem rooted at a
/// per-session temporary directory.
///
/// The root directory lives as long as the bridge; dropping the bridge
/// removes the whole sandbox.
pub struct SandboxBridge {
    root: TempDir,
}

impl SandboxBridge {
    /// Creates a fresh, empty sandbox root.
    pub fn new() -> io::Result<Self> {
        let root = tempfile::Builder::new().prefix("pyworkbench-").tempdir()?;
        debug!(root = %root.path().display(), "sandbox root created");
        Ok(Self { root })
    }

    /// Absolute path of the sandbox root on the host filesystem.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Maps a workspace path (with or without a leading `/`) to its staged
    /// location under the sandbox root.
    pub fn staged_path(&self, path: &str) -> PathBuf {
        self.root.path().join(paths::sandbox_relative(path))
    }

    /// Stages one file: creates the containing directory chain (idempotent),
    /// synthesizes package markers for every ancestor directory, and writes
    /// `content` at the normalized path, overwriting unconditionally.
    ///
    /// Returns the absolute staged path.
    pub fn stage(&self, path: &str, content: &str) -> io::Result<PathBuf> {
        let target = self.staged_path(path);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
            self.ensure_marker_chain(dir)?;
        }
        fs::write(&target, content)?;
        Ok(target)
    }

    /// Creates an empty `__init__.py` in `dir` if one does not already exist.
    /// Never clobbers an existing marker.
    pub fn ensure_package_marker(&self, dir: &Path) -> io::Result<()> {
        let marker = dir.join(PACKAGE_MARKER);
        if !marker.exists() {
            fs::write(&marker, "")?;
        }
        Ok(())
    }

    /// Ensures the `src/` root package exists (directory + marker), so
    /// `from src.<module> import ...` resolves even before any source file is
    /// staged beneath it.
    pub fn ensure_src_root(&self) -> io::Result<()> {
        self.ensure_package_dir(paths::SRC_ROOT)
    }

    /// Ensures the `tests/` package exists so the test runner has a
    /// collection root even for an empty suite.
    pub fn ensure_tests_root(&self) -> io::Result<()> {
        self.ensure_package_dir(paths::TESTS_ROOT)
    }

    /// Removes the conventional cache directories, ignoring absence.
    pub fn clear_cache_dirs(&self) {
        for rel in CACHE_DIRS {
            let dir = self.root.path().join(rel);
            let _ = fs::remove_dir_all(&dir);
        }
    }

    /// Reads back the staged content at a workspace path.
    pub fn read_back(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(self.staged_path(path))
    }

    fn ensure_package_dir(&self, rel: &str) -> io::Result<()> {
        let dir = self.root.path().join(rel);
        fs::create_dir_all(&dir)?;
        self.ensure_package_marker(&dir)
    }

    /// Markers for every directory level between the root (exclusive) and
    /// `dir` (inclusive), outermost first so parent packages exist before
    /// their children.
    fn ensure_marker_chain(&self, dir: &Path) -> io::Result<()> {
        let mut chain = Vec::new();
        let mut current = dir;
        while current != self.root.path() && current.starts_with(self.root.path()) {
            chain.push(current.to_path_buf());
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        for level in chain.into_iter().rev() {
            self.ensure_package_marker(&level)?;
        }
        Ok(())
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> SandboxBridge {
        SandboxBridge::new().expect("sandbox root")
    }

    // (1) staged content reads back byte-identical
    #[test]
    fn test_stage_round_trip() {
        let fs = bridge();
        fs.stage("src/main.py", "print('hi')\n").expect("stage");
        assert_eq!(fs.read_back("src/main.py").expect("read"), "print('hi')\n");
    }

    // (2) leading slash and slash-free paths land at the same location
    #[test]
    fn test_stage_normalizes_leading_slash() {
        let fs = bridge();
        fs.stage("/src/main.py", "a = 1\n").expect("stage");
        assert_eq!(fs.read_back("src/main.py").expect("read"), "a = 1\n");
    }

    // (3) staging is idempotent — same args twice, same state
    #[test]
    fn test_stage_idempotent() {
        let fs = bridge();
        fs.stage("src/pkg/mod.py", "x = 1\n").expect("first stage");
        fs.stage("src/pkg/mod.py", "x = 1\n").expect("second stage");
        assert_eq!(fs.read_back("src/pkg/mod.py").expect("read"), "x = 1\n");
    }

    // (4) restaging overwrites unconditionally
    #[test]
    fn test_stage_overwrites() {
        let fs = bridge();
        fs.stage("src/main.py", "old\n").expect("stage old");
        fs.stage("src/main.py", "new\n").expect("stage new");
        assert_eq!(fs.read_back("src/main.py").expect("read"), "new\n");
    }

    // (5) package markers synthesized at every directory level
    #[test]
    fn test_markers_for_every_level() {
        let fs = bridge();
        fs.stage("src/pkg/sub/mod.py", "pass\n").expect("stage");
        for dir in ["src", "src/pkg", "src/pkg/sub"] {
            let marker = fs.root().join(dir).join(PACKAGE_MARKER);
            assert!(marker.is_file(), "missing marker in {dir}");
        }
    }

    // (6) an existing marker with content is never clobbered
    #[test]
    fn test_marker_not_clobbered() {
        let fs = bridge();
        fs.stage("src/__init__.py", "VERSION = 1\n").expect("stage marker");
        fs.stage("src/main.py", "pass\n").expect("stage sibling");
        assert_eq!(fs.read_back("src/__init__.py").expect("read"), "VERSION = 1\n");
    }

    // (7) ensure_src_root creates the directory and marker, idempotently
    #[test]
    fn test_ensure_src_root_idempotent() {
        let fs = bridge();
        fs.ensure_src_root().expect("first");
        fs.ensure_src_root().expect("second");
        assert!(fs.root().join("src").join(PACKAGE_MARKER).is_file());
    }

    // (8) cache dirs removed when present, silently skipped when absent
    #[test]
    fn test_clear_cache_dirs() {
        let fs = bridge();
        let cache = fs.root().join("tests/__pycache__");
        std::fs::create_dir_all(&cache).expect("mkdir cache");
        std::fs::write(cache.join("test_main.cpython-311.pyc"), b"stale").expect("write pyc");

        fs.clear_cache_dirs();
        assert!(!cache.exists(), "cache dir should be removed");

        // absent dirs are not an error
        fs.clear_cache_dirs();
    }

    // (9) staged_path maps into the sandbox root
    #[test]
    fn test_staged_path_under_root() {
        let fs = bridge();
        let p = fs.staged_path("/tests/test_main.py");
        assert!(p.starts_with(fs.root()));
        assert!(p.ends_with("tests/test_main.py"));
    }
}
