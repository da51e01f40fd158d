//! State-Diff Guard: compares two state snapshots across VCS refs to
//! confirm the history is append-only and exactly one legal transition
//! occurred between them.

use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{SwarmError, SwarmResult};
use crate::registry;

#[derive(Debug, Default, Serialize)]
pub struct DiffReport {
    pub ok: bool,
    pub changed: bool,
    pub errors: Vec<String>,
}

pub fn check(repo_root: &Path, base: &str, head: &str, state_path: &str) -> SwarmResult<DiffReport> {
    if state_path.starts_with('/') || PathBuf::from(state_path).is_absolute() {
        return Err(SwarmError::Schema("state path must be repo-relative for diff mode".into()));
    }

    let changed = run_git(repo_root, &["diff", "--name-only", &format!("{base}...{head}"), "--", state_path])?;
    if changed.trim().is_empty() {
        return Ok(DiffReport { ok: true, changed: false, errors: Vec::new() });
    }

    let base_state = load_json_from_git(repo_root, base, state_path)?;
    let head_state = load_json_from_git(repo_root, head, state_path)?;

    let mut errors = Vec::new();
    validate_transition(&base_state, &head_state, &mut errors);

    Ok(DiffReport { ok: errors.is_empty(), changed: true, errors })
}

fn load_json_from_git(repo_root: &Path, rev: &str, path: &str) -> SwarmResult<Value> {
    let text = run_git(repo_root, &["show", &format!("{rev}:{path}")])?;
    serde_json::from_str(&text).map_err(|e| SwarmError::Schema(format!("invalid JSON at {rev}:{path}: {e}")))
}

fn run_git(repo_root: &Path, args: &[&str]) -> SwarmResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| SwarmError::Io(format!("failed to run git {args:?}: {e}")))?;
    if !output.status.success() {
        return Err(SwarmError::Io(format!("git {args:?} failed: {}", String::from_utf8_lossy(&output.stderr))));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn is_sha256_hex(s: &str) -> bool {
    Regex::new(r"^[0-9a-f]{64}$").unwrap().is_match(s)
}

fn looks_like_iso_z(s: &str) -> bool {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\S*Z$").unwrap().is_match(s)
}

fn validate_transition(base: &Value, head: &Value, errors: &mut Vec<String>) {
    let base_next = base.get("next_phase").and_then(Value::as_str);
    let head_current = head.get("current_phase").and_then(Value::as_str);
    let head_next = head.get("next_phase").and_then(Value::as_str);

    match (base_next.and_then(|s| registry::canonicalize_phase(s).ok()), head_current.and_then(|s| registry::canonicalize_phase(s).ok())) {
        (Some(bn), Some(hc)) if bn != hc => {
            errors.push(format!("head.current_phase ({hc}) must equal base.next_phase ({bn})"))
        }
        (None, _) | (_, None) => errors.push("base.next_phase or head.current_phase is not a valid phase".to_string()),
        _ => {}
    }

    if let (Some(bn), Some(hn)) = (base_next, head_next) {
        if let (Ok(bn), Ok(hn)) = (registry::canonicalize_phase(bn), registry::canonicalize_phase(hn)) {
            if !registry::allowed_transitions_any_lane().contains(&(bn, hn)) {
                errors.push(format!("transition {bn} -> {hn} is not a legal transition in either lane"));
            }
        }
    }

    if base.get("required_phase_sequence") != head.get("required_phase_sequence") {
        errors.push("required_phase_sequence changed across the transition".to_string());
    }
    if base.get("is_locked") != head.get("is_locked") {
        errors.push("is_locked changed across the transition".to_string());
    }

    let base_hist = base.get("history").and_then(Value::as_array).cloned().unwrap_or_default();
    let head_hist = head.get("history").and_then(Value::as_array).cloned().unwrap_or_default();

    if head_hist.len() != base_hist.len() + 1 {
        errors.push(format!(
            "history must grow by exactly one entry (base={}, head={})",
            base_hist.len(),
            head_hist.len()
        ));
        return;
    }
    if head_hist[..base_hist.len()] != base_hist[..] {
        errors.push("history prefix was modified; history must be append-only".to_string());
        return;
    }

    let new_entry = &head_hist[base_hist.len()];
    let entry_phase = new_entry.get("phase").and_then(Value::as_str);
    if entry_phase != base_next {
        errors.push("new history entry's phase must equal base.next_phase".to_string());
    }
    if let Some(phase_str) = entry_phase {
        if let Ok(phase) = registry::canonicalize_phase(phase_str) {
            let expected_role = registry::role_for_phase(phase).as_str();
            if new_entry.get("by_role").and_then(Value::as_str) != Some(expected_role) {
                errors.push(format!("new history entry's by_role must be {expected_role}"));
            }
        }
    }
    if let Some(at) = new_entry.get("at").and_then(Value::as_str) {
        if !looks_like_iso_z(at) {
            errors.push(format!("new history entry's 'at' is not ISO-8601 UTC: {at:?}"));
        }
    }
    if let Some(sha) = new_entry.get("evidence").and_then(|e| e.get("sha256")).and_then(Value::as_str) {
        if !is_sha256_hex(sha) {
            errors.push(format!("new history entry's evidence.sha256 is not 64 lowercase hex chars: {sha:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_history_rewrite() {
        let base = json!({
            "next_phase": "ARCHITECT",
            "required_phase_sequence": ["ARCHITECT"],
            "is_locked": false,
            "history": [{"phase": "INIT"}],
        });
        let head = json!({
            "current_phase": "ARCHITECT",
            "next_phase": "QA_CONTRACT",
            "required_phase_sequence": ["ARCHITECT"],
            "is_locked": false,
            "history": [{"phase": "REWRITTEN"}, {"phase": "ARCHITECT", "by_role": "architect", "at": "2026-01-01T00:00:00Z"}],
        });
        let mut errors = Vec::new();
        validate_transition(&base, &head, &mut errors);
        assert!(!errors.is_empty());
    }

    #[test]
    fn accepts_legal_single_transition() {
        let base = json!({
            "next_phase": "ARCHITECT",
            "required_phase_sequence": ["ARCHITECT"],
            "is_locked": false,
            "history": [{"phase": "INIT"}],
        });
        let head = json!({
            "current_phase": "ARCHITECT",
            "next_phase": "QA_CONTRACT",
            "required_phase_sequence": ["ARCHITECT"],
            "is_locked": false,
            "history": [{"phase": "INIT"}, {"phase": "ARCHITECT", "by_role": "architect", "at": "2026-01-01T00:00:00.000Z"}],
        });
        let mut errors = Vec::new();
        validate_transition(&base, &head, &mut errors);
        assert!(errors.is_empty(), "{errors:?}");
    }
}
