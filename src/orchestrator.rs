//! Orchestrator: composes validate -> policy -> quality guards ->
//! run+capture -> transition into a single Level-1 command.

use std::path::Path;

use tracing::info;

use crate::error::{SwarmError, SwarmResult};
use crate::guards::{self, DEFAULT_CODE_DIRS, DEFAULT_TEST_DIRS};
use crate::ledger;
use crate::policy::{self, Actor, Mode, PolicyFlags};
use crate::registry::Role;
use crate::runner::{self, CAPTURE_FAILURE_EXIT_CODE};
use crate::state;
use crate::transition;

pub struct OrchestrateRequest<'a> {
    pub state_path: &'a Path,
    pub repo_root: &'a Path,
    pub role: Role,
    pub to: &'a str,
    pub command: &'a str,
    pub note: &'a str,
    pub actor: &'a str,
    pub ledger_path: &'a Path,
    pub evidence_dir: &'a Path,
    pub allow_codeowners_edit: bool,
}

pub struct OrchestrateOutcome {
    pub exit_code: i32,
    pub transition_rendered: Option<String>,
}

pub async fn orchestrate(req: &OrchestrateRequest<'_>) -> SwarmResult<OrchestrateOutcome> {
    let state_value = state::load_readonly(req.state_path)?;
    let report = crate::validator::validate(&state_value, Some(req.role.as_str()), false);
    if !report.ok {
        for e in &report.errors {
            tracing::error!("validate: {e}");
        }
        return Ok(OrchestrateOutcome { exit_code: 1, transition_rendered: None });
    }

    let changed = policy::changed_files_working_tree(req.repo_root)?;
    let flags = PolicyFlags::resolve(
        req.allow_codeowners_edit,
        None,
        Mode::WorkingTree,
        req.state_path.to_string_lossy().as_ref(),
    );
    let policy_report = policy::evaluate(req.role, Actor::Agent, &changed, &flags);
    if !policy_report.ok {
        for v in &policy_report.violations {
            tracing::error!("policy: {}: {}", v.path, v.reason);
        }
        return Ok(OrchestrateOutcome { exit_code: 1, transition_rendered: None });
    }

    let mocks = guards::no_mocks(req.repo_root, DEFAULT_TEST_DIRS);
    if !mocks.ok {
        for f in &mocks.findings {
            tracing::error!("no-mocks: {}: {}: {}", f.rule, f.path, f.line);
        }
        return Ok(OrchestrateOutcome { exit_code: 1, transition_rendered: None });
    }
    let placeholders = guards::no_placeholders(req.repo_root, DEFAULT_CODE_DIRS);
    if !placeholders.ok {
        for f in &placeholders.findings {
            tracing::error!("no-placeholders: {}: {}: {}", f.rule, f.path, f.line);
        }
        return Ok(OrchestrateOutcome { exit_code: 1, transition_rendered: None });
    }

    let phase = state_value.get("next_phase").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let task_id = state_value.get("task_id").and_then(|v| v.as_str()).unwrap_or("").to_string();

    let run = runner::run_and_capture(req.command, req.actor, &phase, &task_id, req.ledger_path, req.evidence_dir).await;
    if run.exit_code == CAPTURE_FAILURE_EXIT_CODE && run.capture.is_none() {
        tracing::error!("evidence capture failed; refusing to transition state");
        return Ok(OrchestrateOutcome { exit_code: CAPTURE_FAILURE_EXIT_CODE, transition_rendered: None });
    }

    let (run_id, evidence_path) = match run.capture {
        Some(outcome) => (outcome.run_id, outcome.evidence_path),
        None => ledger::parse_last_run(req.ledger_path)?,
    };

    let note = format!("{} (cmd_exit={}, run_id={})", req.note, run.exit_code, run_id);
    match transition::transition(req.state_path, req.role, req.to, Some(&evidence_path), &note, false) {
        Ok(outcome) => {
            info!("orchestration succeeded; transitioned to {}", req.to);
            Ok(OrchestrateOutcome { exit_code: 0, transition_rendered: Some(outcome.rendered) })
        }
        Err(e) => {
            tracing::error!("transition: {e}");
            Ok(OrchestrateOutcome { exit_code: map_transition_error(&e), transition_rendered: None })
        }
    }
}

fn map_transition_error(e: &SwarmError) -> i32 {
    match e {
        SwarmError::Io(_) | SwarmError::Capture(_) => CAPTURE_FAILURE_EXIT_CODE,
        _ => 1,
    }
}
