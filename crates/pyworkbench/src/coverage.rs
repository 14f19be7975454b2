//! Static coverage estimator.
//!
//! Correlates function names declared in source files with their textual
//! occurrence in test files. This is a lexical heuristic, not a call-graph
//! analysis: it will false-positive on names appearing in strings or comments
//! and false-negative on calls made through aliases or attribute access. The
//! metric is advisory (never gating), so the imprecision is accepted and
//! documented rather than fixed.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::paths;
use crate::types::WorkspaceSnapshot;

/// Coverage summary for one generation event.
///
/// Recomputed from scratch on every call; never incrementally updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// `round(covered / total * 100)`, `0` when `total` is `0`.
    pub percent: u8,
    /// Number of distinct declared functions referenced by a test file.
    pub covered: usize,
    /// Number of distinct declared functions.
    pub total: usize,
    /// Functions referenced by at least one test file.
    pub tested_functions: BTreeSet<String>,
    /// Declared functions with no test reference.
    pub missing_functions: BTreeSet<String>,
}

fn def_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("def pattern is valid")
    })
}

/// Extracts declared function names from Python source text.
///
/// Scans the whole text for `def <identifier>(` in first-to-last order.
/// Duplicates are kept per occurrence; the constructor name `__init__` is
/// excluded.
pub fn extract_function_names(source: &str) -> Vec<String> {
    def_pattern()
        .captures_iter(source)
        .map(|cap| cap[1].to_string())
        .filter(|name| name != "__init__")
        .collect()
}

/// `true` if `text` contains `name` followed by optional whitespace and an
/// opening parenthesis, on a word boundary.
pub fn is_function_referenced(name: &str, text: &str) -> bool {
    let pattern = format!(r"\b{}\s*\(", regex::escape(name));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}

/// Computes coverage of `functions` against the test files in `files`.
///
/// Only entries whose path is under the conventional `tests/` prefix are
/// consulted; everything else is skipped. Duplicate function names collapse
/// to one set entry, so `total` counts distinct names.
pub fn compute_coverage<'a, I>(functions: &[String], files: I) -> CoverageReport
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let test_texts = files
        .into_iter()
        .filter(|(path, _)| paths::is_test_path(path))
        .map(|(_, content)| content);
    coverage_against(functions, test_texts)
}

/// Single-file scope: the functions of one source file against its generated
/// test body.
pub fn file_coverage(source_text: &str, test_text: &str) -> CoverageReport {
    let functions = extract_function_names(source_text);
    coverage_against(&functions, std::iter::once(test_text))
}

/// Global scope: every function declared in a non-test `.py` file against
/// every test file in the snapshot.
pub fn global_coverage(snapshot: &WorkspaceSnapshot) -> CoverageReport {
    let mut functions = Vec::new();
    for (path, content) in snapshot {
        if paths::is_python_file(path) && !paths::is_test_path(path) {
            functions.extend(extract_function_names(content));
        }
    }
    compute_coverage(
        &functions,
        snapshot.iter().map(|(p, c)| (p.as_str(), c.as_str())),
    )
}

fn coverage_against<'a, I>(functions: &[String], test_texts: I) -> CoverageReport
where
    I: IntoIterator<Item = &'a str>,
{
    let all: BTreeSet<String> = functions.iter().cloned().collect();
    let mut tested: BTreeSet<String> = BTreeSet::new();

    for text in test_texts {
        for name in &all {
            if !tested.contains(name) && is_function_referenced(name, text) {
                tested.insert(name.clone());
            }
        }
    }

    let total = all.len();
    let covered = tested.len();
    let percent = if total == 0 {
        0
    } else {
        ((covered as f64 / total as f64) * 100.0).round() as u8
    };
    let missing = all.difference(&tested).cloned().collect();

    CoverageReport {
        percent,
        covered,
        total,
        tested_functions: tested,
        missing_functions: missing,
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── extract_function_names ────────────────────────────────────────────────

    #[test]
    fn test_extract_simple_defs_in_order() {
        let src = "def add(a, b):\n    return a + b\n\ndef sub(a, b):\n    return a - b\n";
        assert_eq!(extract_function_names(src), vec!["add", "sub"]);
    }

    #[test]
    fn test_extract_excludes_init() {
        let src = "class Calc:\n    def __init__(self):\n        pass\n    def add(self, a, b):\n        return a + b\n";
        assert_eq!(extract_function_names(src), vec!["add"]);
    }

    #[test]
    fn test_extract_keeps_duplicates_per_occurrence() {
        let src = "def f():\n    pass\ndef f():\n    pass\n";
        assert_eq!(extract_function_names(src), vec!["f", "f"]);
    }

    #[test]
    fn test_extract_handles_whitespace_before_paren() {
        assert_eq!(extract_function_names("def spaced  (x):\n    pass\n"), vec!["spaced"]);
    }

    #[test]
    fn test_extract_empty_source() {
        assert!(extract_function_names("").is_empty());
    }

    // ── is_function_referenced ────────────────────────────────────────────────

    #[test]
    fn test_reference_direct_call() {
        assert!(is_function_referenced("add", "assert add(1, 2) == 3"));
    }

    #[test]
    fn test_reference_with_whitespace() {
        assert!(is_function_referenced("add", "result = add (1, 2)"));
    }

    #[test]
    fn test_reference_word_boundary() {
        // "madd(" must not count as a reference to "add"
        assert!(!is_function_referenced("add", "madd(1, 2)"));
    }

    #[test]
    fn test_reference_absent() {
        assert!(!is_function_referenced("sub", "assert add(1, 2) == 3"));
    }

    #[test]
    fn test_reference_false_positive_in_string_is_accepted() {
        // Documented heuristic limitation: a mention inside a string counts.
        assert!(is_function_referenced("add", "print('calling add(1)')"));
    }

    // ── compute_coverage / scopes ─────────────────────────────────────────────

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_worked_example_fifty_percent() {
        let functions = names(&["add", "sub"]);
        let files = vec![(
            "tests/test_main.py",
            "def test_add(): assert add(1,2)==3",
        )];
        let report = compute_coverage(&functions, files);
        assert_eq!(report.percent, 50);
        assert_eq!(report.covered, 1);
        assert_eq!(report.total, 2);
        assert!(report.tested_functions.contains("add"));
        assert!(report.missing_functions.contains("sub"));
    }

    #[test]
    fn test_empty_function_set_yields_zero_without_raising() {
        let report = compute_coverage(&[], vec![("tests/test_main.py", "anything()")]);
        assert_eq!(report.percent, 0);
        assert_eq!(report.covered, 0);
        assert_eq!(report.total, 0);
        assert!(report.tested_functions.is_empty());
        assert!(report.missing_functions.is_empty());
    }

    #[test]
    fn test_non_test_paths_are_skipped() {
        let functions = names(&["add"]);
        let files = vec![("src/main.py", "add(1, 2)")];
        let report = compute_coverage(&functions, files);
        assert_eq!(report.covered, 0, "references outside tests/ must not count");
    }

    #[test]
    fn test_monotonicity_adding_references_never_decreases_covered() {
        let functions = names(&["add", "sub", "mul"]);
        let sparse = compute_coverage(
            &functions,
            vec![("tests/test_a.py", "add(1)")],
        );
        let dense = compute_coverage(
            &functions,
            vec![("tests/test_a.py", "add(1)\nsub(2)\nmul(3)")],
        );
        assert!(dense.covered >= sparse.covered);
        assert_eq!(dense.percent, 100);
    }

    #[test]
    fn test_duplicate_declarations_collapse_to_one() {
        let functions = names(&["f", "f"]);
        let report = compute_coverage(&functions, vec![("tests/test_f.py", "f()")]);
        assert_eq!(report.total, 1);
        assert_eq!(report.percent, 100);
    }

    #[test]
    fn test_file_coverage_scope() {
        let source = "def add(a, b):\n    return a + b\n\ndef sub(a, b):\n    return a - b\n";
        let report = file_coverage(source, "def test_add():\n    assert add(1, 2) == 3\n");
        assert_eq!(report.percent, 50);
        assert!(report.missing_functions.contains("sub"));
    }

    #[test]
    fn test_global_coverage_scope() {
        let mut snapshot = WorkspaceSnapshot::new();
        snapshot.insert(
            "src/calc.py".to_string(),
            "def add(a, b):\n    return a + b\n".to_string(),
        );
        snapshot.insert(
            "src/util.py".to_string(),
            "def shout(s):\n    return s.upper()\n".to_string(),
        );
        snapshot.insert(
            "tests/test_calc.py".to_string(),
            "from src.calc import add\n\ndef test_add():\n    assert add(1, 2) == 3\n".to_string(),
        );
        let report = global_coverage(&snapshot);
        assert_eq!(report.total, 2);
        assert_eq!(report.covered, 1);
        assert_eq!(report.percent, 50);
        assert!(report.missing_functions.contains("shout"));
    }

    #[test]
    fn test_global_coverage_ignores_test_defs_as_sources() {
        let mut snapshot = WorkspaceSnapshot::new();
        snapshot.insert(
            "tests/test_x.py".to_string(),
            "def test_helper():\n    pass\n".to_string(),
        );
        let report = global_coverage(&snapshot);
        assert_eq!(report.total, 0);
        assert_eq!(report.percent, 0);
    }

    #[test]
    fn test_report_serde_round_trip() {
        let report = file_coverage("def add(a):\n    return a\n", "add(1)");
        let json = serde_json::to_string(&report).expect("serialize report");
        let back: CoverageReport = serde_json::from_str(&json).expect("deserialize report");
        assert_eq!(back, report);
    }
}
