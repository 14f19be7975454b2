//! Path conventions shared by the sandbox bridge and the coverage estimator.
//!
//! The workspace follows two load-bearing conventions:
//! - source files live under the `src/` root,
//! - test files live under `tests/` and are named `test_<basename>` after the
//!   source file they exercise.

/// Root directory treated as the importable source package.
pub const SRC_ROOT: &str = "src";

/// Root directory the test runner is scoped to.
pub const TESTS_ROOT: &str = "tests";

/// Normalizes a workspace path to its sandbox-absolute form (leading `/`).
///
/// Idempotent: an already-absolute path is returned unchanged.
pub fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Strips the leading `/` so the path can be joined under the sandbox root.
pub fn sandbox_relative(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Last `/`-delimited segment of a path, e.g. `src/foo/bar.py` → `bar.py`.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Conventional test-file path for a source file,
/// e.g. `src/main.py` → `tests/test_main.py`.
pub fn test_file_path(src_path: &str) -> String {
    let base = base_name(src_path);
    let stem = base.strip_suffix(".py").unwrap_or(base);
    format!("{TESTS_ROOT}/test_{stem}.py")
}

/// `true` for workspace-relative paths under the tests root.
pub fn is_test_path(path: &str) -> bool {
    let rel = sandbox_relative(path);
    rel == TESTS_ROOT || rel.starts_with("tests/")
}

/// `true` for paths with the `.py` extension.
pub fn is_python_file(path: &str) -> bool {
    path.ends_with(".py")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_leading_slash() {
        assert_eq!(normalize("src/main.py"), "/src/main.py");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        assert_eq!(normalize("/src/main.py"), "/src/main.py");
        assert_eq!(normalize(&normalize("tests/test_main.py")), "/tests/test_main.py");
    }

    #[test]
    fn test_sandbox_relative_strips_slash() {
        assert_eq!(sandbox_relative("/src/main.py"), "src/main.py");
        assert_eq!(sandbox_relative("src/main.py"), "src/main.py");
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("src/foo/bar.py"), "bar.py");
        assert_eq!(base_name("bar.py"), "bar.py");
    }

    #[test]
    fn test_test_file_path_mirrors_basename() {
        assert_eq!(test_file_path("src/main.py"), "tests/test_main.py");
        assert_eq!(test_file_path("src/pkg/calc.py"), "tests/test_calc.py");
    }

    #[test]
    fn test_test_file_path_without_extension() {
        assert_eq!(test_file_path("src/main"), "tests/test_main.py");
    }

    #[test]
    fn test_is_test_path() {
        assert!(is_test_path("tests/test_main.py"));
        assert!(is_test_path("/tests/test_main.py"));
        assert!(!is_test_path("src/main.py"));
        assert!(!is_test_path("testsuite/a.py"));
    }

    #[test]
    fn test_is_python_file() {
        assert!(is_python_file("src/main.py"));
        assert!(!is_python_file("README.md"));
    }
}
