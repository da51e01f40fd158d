//! Feedback Artifact: the Analyst's "fix required" markdown document,
//! immutable by default at its output path.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{SwarmError, SwarmResult};
use crate::state::now_utc_compact;

const FAILURE_PATTERN: &str = r"(?i)(FAIL|ERROR|Error:|AssertionError|Traceback|Unhandled|Exception)";
const TAIL_FALLBACK_LINES: usize = 80;

pub struct FeedbackRequest<'a> {
    pub state: &'a Value,
    pub task_id: Option<&'a str>,
    pub phase: Option<&'a str>,
    pub run_id: Option<&'a str>,
    pub evidence_path: Option<&'a Path>,
    pub summary: Option<&'a str>,
}

pub fn create_feedback(req: &FeedbackRequest, output: &Path, overwrite: bool) -> SwarmResult<PathBuf> {
    if output.exists() && !overwrite {
        return Err(SwarmError::Io(format!(
            "{} already exists; pass --overwrite to replace an existing feedback artifact",
            output.display()
        )));
    }

    let task_id = req
        .task_id
        .map(str::to_string)
        .or_else(|| req.state.get("task_id").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();
    let phase = req
        .phase
        .map(str::to_string)
        .or_else(|| req.state.get("next_phase").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();
    let feedback_id = format!("FB-{}", now_utc_compact());

    let (evidence_sha256, snippet) = match req.evidence_path {
        Some(p) => {
            let bytes = std::fs::read(p).map_err(|e| SwarmError::Io(format!("cannot read evidence {}: {e}", p.display())))?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let digest = format!("{:x}", hasher.finalize());
            let text = String::from_utf8_lossy(&bytes).to_string();
            (Some(digest), Some(extract_failure_snippet(&text)))
        }
        None => (None, None),
    };

    let mut doc = String::new();
    doc.push_str("# FIX REQUIRED\n\n");
    doc.push_str("## Metadata\n\n");
    doc.push_str(&format!("- task_id: {task_id}\n"));
    doc.push_str(&format!("- feedback_id: {feedback_id}\n"));
    doc.push_str(&format!("- phase: {phase}\n"));
    if let Some(run_id) = req.run_id {
        doc.push_str(&format!("- run_id: {run_id}\n"));
    }
    doc.push('\n');

    doc.push_str("## Summary\n\n");
    doc.push_str(req.summary.unwrap_or("A required gate failed; see evidence below."));
    doc.push_str("\n\n");

    doc.push_str("## Evidence (Authoritative)\n\n");
    match (req.evidence_path, &evidence_sha256) {
        (Some(path), Some(sha)) => doc.push_str(&format!("- path: `{}`\n- sha256: {sha}\n\n", path.display())),
        _ => doc.push_str("- (no evidence path supplied)\n\n"),
    }

    if let Some(snippet) = &snippet {
        doc.push_str("## Failure Snippet (From Evidence)\n\n```\n");
        doc.push_str(snippet);
        doc.push_str("\n```\n\n");
    }

    doc.push_str("## Required Fixes (Non-Negotiable)\n\n");
    doc.push_str("- Address the failure captured in the evidence above.\n");
    doc.push_str("- Re-run the same command and re-capture evidence before requesting review again.\n\n");

    doc.push_str("## Exit Criteria (Gate Conditions)\n\n");
    doc.push_str("- The captured command exits 0.\n");
    doc.push_str("- No new mock or placeholder findings are introduced.\n");

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SwarmError::Io(e.to_string()))?;
    }
    std::fs::write(output, doc).map_err(|e| SwarmError::Io(format!("cannot write feedback artifact: {e}")))?;
    Ok(output.to_path_buf())
}

fn extract_failure_snippet(text: &str) -> String {
    let re = Regex::new(FAILURE_PATTERN).unwrap();
    let matches: Vec<&str> = text.lines().filter(|l| re.is_match(l)).collect();
    if !matches.is_empty() {
        return matches.join("\n");
    }
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(TAIL_FALLBACK_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn refuses_to_overwrite_by_default() {
        let dir = std::env::temp_dir().join(format!("swarm_feedback_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("fb.md");
        std::fs::write(&out, "existing").unwrap();
        let state = json!({"task_id": "T1", "next_phase": "BACKEND"});
        let req = FeedbackRequest { state: &state, task_id: None, phase: None, run_id: None, evidence_path: None, summary: None };
        let err = create_feedback(&req, &out, false).unwrap_err();
        assert!(matches!(err, SwarmError::Io(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn extracts_failure_lines_over_tail_fallback() {
        let text = "all good\nFAIL: something broke\nmore context\n";
        let snippet = extract_failure_snippet(text);
        assert_eq!(snippet, "FAIL: something broke");
    }

    #[test]
    fn falls_back_to_tail_when_no_failure_markers() {
        let text = (0..5).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let snippet = extract_failure_snippet(&text);
        assert!(snippet.contains("line 4"));
    }
}
