//! Quality Guards: text-scan checks run as part of orchestration before
//! any evidence is captured — no mock test doubles, no placeholder
//! markers in production code.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

const SCANNED_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "py"];
const SKIPPED_DIRS: &[&str] = &["node_modules", ".next", "dist", "build"];

pub const DEFAULT_TEST_DIRS: &[&str] = &["tests"];
pub const DEFAULT_CODE_DIRS: &[&str] = &["app", "components", "data", "lib", "src"];

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub path: String,
    pub line_no: usize,
    pub line: String,
    pub rule: String,
}

#[derive(Debug, Default, Serialize)]
pub struct GuardReport {
    pub ok: bool,
    pub findings: Vec<Finding>,
}

struct Rule {
    name: &'static str,
    pattern: Regex,
}

fn js_rules() -> Vec<Rule> {
    [
        ("vi.mock", r"vi\.mock\("),
        ("jest.mock", r"jest\.mock\("),
        ("mockImplementation", r"mockImplementation"),
        ("mockReturnValue", r"mockReturnValue"),
        ("spyOn", r"spyOn\("),
        ("sinon", r"\bsinon\b"),
    ]
    .into_iter()
    .map(|(name, pat)| Rule { name, pattern: Regex::new(pat).unwrap() })
    .collect()
}

fn py_rules() -> Vec<Rule> {
    [
        ("unittest.mock", r"unittest\.mock"),
        ("MagicMock", r"MagicMock"),
        ("patch()", r"\bpatch\("),
    ]
    .into_iter()
    .map(|(name, pat)| Rule { name, pattern: Regex::new(pat).unwrap() })
    .collect()
}

fn placeholder_rules() -> Vec<Rule> {
    [
        ("TODO", r"\bTODO\b"),
        ("FIXME", r"\bFIXME\b"),
        ("placeholder", r"(?i)\bplaceholder\b"),
        ("stub", r"(?i)\bstub\b"),
        ("not implemented", r"(?i)not\s+implemented"),
    ]
    .into_iter()
    .map(|(name, pat)| Rule { name, pattern: Regex::new(pat).unwrap() })
    .collect()
}

pub fn no_mocks(root: &Path, test_dirs: &[&str]) -> GuardReport {
    let js = js_rules();
    let py = py_rules();
    let mut findings = Vec::new();
    for dir in test_dirs {
        for file in iter_files(&root.join(dir)) {
            let rules: &[Rule] = if is_python(&file) { &py } else { &js };
            findings.extend(scan_file(&file, rules));
        }
    }
    GuardReport { ok: findings.is_empty(), findings }
}

pub fn no_placeholders(root: &Path, code_dirs: &[&str]) -> GuardReport {
    let rules = placeholder_rules();
    let mut findings = Vec::new();
    for dir in code_dirs {
        for file in iter_files(&root.join(dir)) {
            findings.extend(scan_file(&file, &rules));
        }
    }
    GuardReport { ok: findings.is_empty(), findings }
}

fn is_python(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("py")
}

fn iter_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    walk(dir, &mut out);
    out
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if SKIPPED_DIRS.contains(&name) {
                continue;
            }
            walk(&path, out);
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if SCANNED_EXTENSIONS.contains(&ext) {
                out.push(path);
            }
        }
    }
}

fn scan_file(path: &Path, rules: &[Rule]) -> Vec<Finding> {
    let Ok(text) = std::fs::read_to_string(path) else { return Vec::new() };
    let mut findings = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        for rule in rules {
            if rule.pattern.is_match(line) {
                findings.push(Finding {
                    path: path.display().to_string(),
                    line_no: idx + 1,
                    line: line.to_string(),
                    rule: rule.name.to_string(),
                });
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("swarm_guards_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn detects_vitest_mock() {
        let dir = scratch_dir("mocks");
        fs::create_dir_all(dir.join("tests")).unwrap();
        fs::write(dir.join("tests/foo.test.ts"), "vi.mock('./x');\n").unwrap();
        let report = no_mocks(&dir, DEFAULT_TEST_DIRS);
        assert!(!report.ok);
        assert_eq!(report.findings[0].rule, "vi.mock");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn clean_tests_pass() {
        let dir = scratch_dir("clean");
        fs::create_dir_all(dir.join("tests")).unwrap();
        fs::write(dir.join("tests/foo.test.ts"), "expect(1).toBe(1);\n").unwrap();
        let report = no_mocks(&dir, DEFAULT_TEST_DIRS);
        assert!(report.ok);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn detects_todo_placeholder() {
        let dir = scratch_dir("placeholders");
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("src/lib.ts"), "// TODO: finish this\n").unwrap();
        let report = no_placeholders(&dir, DEFAULT_CODE_DIRS);
        assert!(!report.ok);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn skips_node_modules() {
        let dir = scratch_dir("skip");
        fs::create_dir_all(dir.join("src/node_modules")).unwrap();
        fs::write(dir.join("src/node_modules/x.js"), "// TODO\n").unwrap();
        let report = no_placeholders(&dir, DEFAULT_CODE_DIRS);
        assert!(report.ok);
        let _ = fs::remove_dir_all(&dir);
    }
}
