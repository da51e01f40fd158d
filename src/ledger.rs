//! Evidence Ledger: append-only, HMAC-chained markdown log plus
//! content-addressed raw capture blobs.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::canonical_json::hmac_chain_link;
use crate::error::{SwarmError, SwarmResult};
use crate::state::{now_utc_compact, now_utc_iso_z};

pub const LOG_HMAC_KEY_ENV: &str = "SWARM_LOG_HMAC_KEY";
const SNIPPET_LINES: usize = 40;

pub struct CaptureOutcome {
    pub run_id: String,
    pub evidence_path: PathBuf,
}

#[allow(clippy::too_many_arguments)]
pub fn capture(
    input_path: &Path,
    command: &str,
    exit_code: i32,
    actor: &str,
    phase: &str,
    task_id: &str,
    ledger_path: &Path,
    evidence_dir: &Path,
) -> SwarmResult<CaptureOutcome> {
    let raw = fs::read(input_path).map_err(|e| SwarmError::Capture(format!("cannot read captured output: {e}")))?;
    let digest = sha256_hex(&raw);
    let ts = now_utc_iso_z();
    let ts_compact = now_utc_compact();
    let run_id = format!("L1-{ts_compact}-{}", &digest[..8]);

    fs::create_dir_all(evidence_dir).map_err(|e| SwarmError::Capture(format!("cannot create evidence dir: {e}")))?;
    let evidence_path = evidence_dir.join(format!("{run_id}_{digest}.log"));
    if !evidence_path.exists() {
        fs::write(&evidence_path, &raw).map_err(|e| SwarmError::Capture(format!("cannot write evidence blob: {e}")))?;
    }

    let text = String::from_utf8_lossy(&raw);
    let (head, tail) = head_and_tail(&text, SNIPPET_LINES);

    let mut block = format!(
        "## Run: {run_id}\n- timestamp_utc: {ts}\n- actor: {actor}\n- phase: {phase}\n- task_id: {task_id}\n- command: `{command}`\n- exit_code: {exit_code}\n- sha256: {digest}\n- evidence: `{}`\n",
        evidence_path.display()
    );
    block.push_str(&format!(
        "\n<details><summary>output</summary>\n\n### HEAD\n```\n{head}\n```\n\n### TAIL\n```\n{tail}\n```\n</details>\n\n"
    ));

    if let Ok(key) = std::env::var(LOG_HMAC_KEY_ENV) {
        if !key.is_empty() {
            let existing = fs::read_to_string(ledger_path).unwrap_or_default();
            let prev_hmac = find_last_hmac(&existing).unwrap_or_default();
            let sig = hmac_chain_link(key.as_bytes(), &prev_hmac, &block)?;
            block.push_str(&format!("- hmac: {sig}\n- prev_hmac: {prev_hmac}\n"));
        }
    }

    append_block(ledger_path, &block)?;
    Ok(CaptureOutcome { run_id, evidence_path })
}

fn append_block(ledger_path: &Path, block: &str) -> SwarmResult<()> {
    if let Some(parent) = ledger_path.parent() {
        fs::create_dir_all(parent).map_err(|e| SwarmError::Capture(format!("cannot create ledger dir: {e}")))?;
    }
    let needs_leading_newline = fs::read_to_string(ledger_path)
        .map(|existing| !existing.is_empty() && !existing.ends_with('\n'))
        .unwrap_or(false);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(ledger_path)
        .map_err(|e| SwarmError::Capture(format!("cannot open ledger {}: {e}", ledger_path.display())))?;
    if needs_leading_newline {
        file.write_all(b"\n").map_err(|e| SwarmError::Capture(e.to_string()))?;
    }
    file.write_all(block.as_bytes()).map_err(|e| SwarmError::Capture(e.to_string()))?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn head_and_tail(text: &str, n: usize) -> (String, String) {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= n * 2 {
        let all = lines.join("\n");
        return (all.clone(), all);
    }
    (lines[..n].join("\n"), lines[lines.len() - n..].join("\n"))
}

/// Finds the most recent `- hmac: <64-hex>` line in the existing ledger
/// text, scanning forward (the chain only ever grows at the end, so the
/// last match is authoritative).
fn find_last_hmac(existing: &str) -> Option<String> {
    let re = Regex::new(r"(?m)^- hmac:\s*([0-9a-f]{64})\s*$").unwrap();
    re.captures_iter(existing).last().map(|c| c[1].to_string())
}

/// Extracts the last `## Run: ` block's `run_id` and evidence path,
/// scanning from the end to tolerate legacy/manual content above it.
pub fn parse_last_run(ledger_path: &Path) -> SwarmResult<(String, PathBuf)> {
    let text = fs::read_to_string(ledger_path)
        .map_err(|e| SwarmError::Capture(format!("cannot read ledger {}: {e}", ledger_path.display())))?;
    let lines: Vec<&str> = text.lines().collect();
    let header_idx = lines
        .iter()
        .rposition(|l| l.starts_with("## Run: "))
        .ok_or_else(|| SwarmError::Capture("unable to locate last run header in ledger".into()))?;
    let run_id = lines[header_idx]["## Run: ".len()..].trim().to_string();

    let evidence_re = Regex::new(r"^- evidence: `([^`]+)`\s*$").unwrap();
    let mut evidence = None;
    for line in &lines[header_idx..] {
        if line.starts_with("## Run: ") && *line != lines[header_idx] {
            break;
        }
        if let Some(c) = evidence_re.captures(line) {
            evidence = Some(c[1].to_string());
            break;
        }
    }
    let evidence = evidence.ok_or_else(|| SwarmError::Capture(format!("unable to locate evidence path for run {run_id}")))?;
    Ok((run_id, PathBuf::from(evidence)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn head_and_tail_short_text_returns_whole() {
        let (h, t) = head_and_tail("a\nb\nc", 40);
        assert_eq!(h, "a\nb\nc");
        assert_eq!(t, "a\nb\nc");
    }

    #[test]
    fn empty_blob_hashes_to_known_sha256() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn capture_and_chain_round_trip() {
        let dir = env::temp_dir().join(format!("swarm_ledger_test_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let input = dir.join("in.log");
        fs::write(&input, b"PASS everything is fine\n").unwrap();
        let ledger = dir.join("CI_LOGS.md");
        let evidence_dir = dir.join("evidence");

        env::set_var(LOG_HMAC_KEY_ENV, "test-key");
        let out1 = capture(&input, "echo hi", 0, "orchestrator", "BACKEND", "T1", &ledger, &evidence_dir).unwrap();
        let out2 = capture(&input, "echo hi again", 0, "orchestrator", "BACKEND", "T1", &ledger, &evidence_dir).unwrap();
        env::remove_var(LOG_HMAC_KEY_ENV);

        assert_ne!(out1.run_id, out2.run_id);
        let text = fs::read_to_string(&ledger).unwrap();
        assert_eq!(text.matches("## Run: ").count(), 2);

        let (last_run_id, _) = parse_last_run(&ledger).unwrap();
        assert_eq!(last_run_id, out2.run_id);

        let _ = fs::remove_dir_all(&dir);
    }
}
