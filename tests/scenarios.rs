//! End-to-end scenarios exercising the public library surface the way
//! a real CLI invocation would, one test per scenario in the data
//! model's worked examples.

use std::fs;
use std::process::Command;

use serde_json::json;
use swarmctl::diff_guard;
use swarmctl::ledger;
use swarmctl::policy::{self, Actor, Mode, PolicyFlags};
use swarmctl::registry::Role;
use swarmctl::transition;

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("swarmctl_scenario_{name}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_state(dir: &std::path::Path, value: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.join("swarm_state.json");
    fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    path
}

/// Scenario A — happy path FULL lane: INIT -> ARCHITECT produces a
/// single history entry whose evidence hash is the well-known SHA-256
/// of an empty file.
#[test]
fn scenario_a_happy_path_full_lane() {
    let dir = scratch_dir("a");
    let state_path = write_state(
        &dir,
        &json!({
            "schema_version": "1.0",
            "enforcement_level": "L1",
            "task_id": "T1",
            "execution_lane": "FULL",
            "required_phase_sequence": ["ARCHITECT","QA_CONTRACT","BACKEND","ANALYST_CI_GATE","FRONTEND","QA_E2E","ANALYST_FINAL"],
            "current_phase": "INIT",
            "next_phase": "ARCHITECT",
            "is_locked": false,
            "history": [],
        }),
    );
    let evidence_path = dir.join("empty.log");
    fs::write(&evidence_path, b"").unwrap();

    transition::transition(&state_path, Role::Architect, "QA_CONTRACT", Some(&evidence_path), "plan", false).unwrap();

    let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&state_path).unwrap()).unwrap();
    assert_eq!(saved["current_phase"], json!("ARCHITECT"));
    assert_eq!(saved["next_phase"], json!("QA_CONTRACT"));
    let history = saved["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["phase"], json!("ARCHITECT"));
    assert_eq!(history[0]["by_role"], json!("architect"));
    assert_eq!(
        history[0]["evidence"]["sha256"],
        json!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
    );

    let _ = fs::remove_dir_all(&dir);
}

/// Scenario B — an illegal transition is rejected and the state file
/// is left untouched (no backup produced).
#[test]
fn scenario_b_illegal_transition_leaves_state_untouched() {
    let dir = scratch_dir("b");
    let state_path = write_state(
        &dir,
        &json!({
            "execution_lane": "FULL",
            "required_phase_sequence": ["ARCHITECT","QA_CONTRACT","BACKEND","ANALYST_CI_GATE","FRONTEND","QA_E2E","ANALYST_FINAL"],
            "current_phase": "ARCHITECT",
            "next_phase": "QA_CONTRACT",
            "is_locked": false,
            "history": [{"phase": "ARCHITECT"}],
        }),
    );
    let before = fs::read_to_string(&state_path).unwrap();

    let err = transition::transition(&state_path, Role::Qa, "FRONTEND", None, "skip ahead", false).unwrap_err();
    assert!(err.to_string().contains("not permitted"));

    let after = fs::read_to_string(&state_path).unwrap();
    assert_eq!(before, after);
    assert!(!dir.join("swarm_state.json.bak").exists());

    let _ = fs::remove_dir_all(&dir);
}

/// Scenario D — policy engine denies a backend-owned path change under
/// a QA-only test file.
#[test]
fn scenario_d_policy_denies_backend_editing_tests() {
    let flags = PolicyFlags::resolve(false, None, Mode::WorkingTree, "swarm_state.json");
    let changed = vec!["app/x.ts".to_string(), "tests/y.test.ts".to_string()];
    let report = policy::evaluate(Role::Backend, Actor::Agent, &changed, &flags);

    assert!(!report.ok);
    assert!(report.violations.iter().any(|v| v.path == "tests/y.test.ts"));
    assert!(!report.violations.iter().any(|v| v.path == "app/x.ts"));
}

/// Scenario C — skip detection: a required phase (QA_CONTRACT) absent
/// from both history and the phase being recorded means the transition
/// is rejected even though ANALYST_CI_GATE -> BACKEND-style edges are
/// otherwise legal and the new phase's role is the one executing it.
#[test]
fn scenario_c_skip_ahead_is_rejected() {
    let dir = scratch_dir("c");
    let state_path = write_state(
        &dir,
        &json!({
            "execution_lane": "FULL",
            "required_phase_sequence": ["ARCHITECT","QA_CONTRACT","BACKEND","ANALYST_CI_GATE","FRONTEND","QA_E2E","ANALYST_FINAL"],
            "current_phase": "ARCHITECT",
            "next_phase": "BACKEND",
            "is_locked": false,
            "history": [{"phase": "ARCHITECT"}],
        }),
    );

    let err = transition::transition(&state_path, Role::Backend, "ANALYST_CI_GATE", None, "skip QA_CONTRACT", false).unwrap_err();
    assert!(matches!(err, swarmctl::error::SwarmError::Semantic(_)));

    let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&state_path).unwrap()).unwrap();
    assert_eq!(saved["current_phase"], json!("ARCHITECT"));
    assert_eq!(saved["next_phase"], json!("BACKEND"));

    let _ = fs::remove_dir_all(&dir);
}

/// Scenario E — the state-diff guard cross-references a base and head
/// revision of the state file recorded as two commits in a real git
/// repository, rejecting a head whose history was rewritten instead of
/// appended to.
#[test]
fn scenario_e_diff_guard_rejects_rewritten_history() {
    let dir = scratch_dir("e");
    let run = |args: &[&str]| {
        let status = Command::new("git").args(args).current_dir(&dir).status().unwrap();
        assert!(status.success(), "git {args:?} failed");
    };
    run(&["init", "-q"]);
    run(&["config", "user.email", "swarm@example.com"]);
    run(&["config", "user.name", "swarm"]);

    let state_path = dir.join("swarm_state.json");
    fs::write(
        &state_path,
        serde_json::to_vec_pretty(&json!({
            "next_phase": "ARCHITECT",
            "required_phase_sequence": ["ARCHITECT"],
            "is_locked": false,
            "history": [{"phase": "INIT"}],
        }))
        .unwrap(),
    )
    .unwrap();
    run(&["add", "swarm_state.json"]);
    run(&["commit", "-q", "-m", "base"]);
    let base_rev = String::from_utf8(Command::new("git").args(["rev-parse", "HEAD"]).current_dir(&dir).output().unwrap().stdout)
        .unwrap()
        .trim()
        .to_string();

    fs::write(
        &state_path,
        serde_json::to_vec_pretty(&json!({
            "current_phase": "ARCHITECT",
            "next_phase": "QA_CONTRACT",
            "required_phase_sequence": ["ARCHITECT"],
            "is_locked": false,
            "history": [{"phase": "REWRITTEN"}, {"phase": "ARCHITECT", "by_role": "architect", "at": "2026-01-01T00:00:00Z"}],
        }))
        .unwrap(),
    )
    .unwrap();
    run(&["add", "swarm_state.json"]);
    run(&["commit", "-q", "-m", "head"]);
    let head_rev = String::from_utf8(Command::new("git").args(["rev-parse", "HEAD"]).current_dir(&dir).output().unwrap().stdout)
        .unwrap()
        .trim()
        .to_string();

    let report = diff_guard::check(&dir, &base_rev, &head_rev, "swarm_state.json").unwrap();
    assert!(!report.ok);
    assert!(report.errors.iter().any(|e| e.contains("append-only")));

    let _ = fs::remove_dir_all(&dir);
}

/// Scenario F — ledger chain: three captures under the same HMAC key
/// must each extend the hash chain, and the chain is only recoverable
/// in the order the blocks were appended.
#[test]
fn scenario_f_ledger_chain_round_trip() {
    let dir = scratch_dir("f");
    let ledger_path = dir.join("CI_LOGS.md");
    let evidence_dir = dir.join("evidence");

    std::env::set_var(ledger::LOG_HMAC_KEY_ENV, "k");

    let mut run_ids = Vec::new();
    for raw in [&b"a"[..], &b"b"[..], &b"c"[..]] {
        let input = dir.join(format!("in_{}.log", run_ids.len()));
        fs::write(&input, raw).unwrap();
        let outcome = ledger::capture(&input, "echo x", 0, "orchestrator", "BACKEND", "T1", &ledger_path, &evidence_dir).unwrap();
        run_ids.push(outcome.run_id);
    }
    std::env::remove_var(ledger::LOG_HMAC_KEY_ENV);

    assert_eq!(run_ids.len(), 3);
    assert_eq!(run_ids.iter().collect::<std::collections::HashSet<_>>().len(), 3);

    let text = fs::read_to_string(&ledger_path).unwrap();
    let hmac_lines: Vec<&str> = text.lines().filter(|l| l.starts_with("- hmac:")).collect();
    assert_eq!(hmac_lines.len(), 3);

    let (last_run_id, _) = ledger::parse_last_run(&ledger_path).unwrap();
    assert_eq!(last_run_id, run_ids[2]);

    let _ = fs::remove_dir_all(&dir);
}
