use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use swarmctl::error::SwarmError;
use swarmctl::registry::Lane;
use swarmctl::{
    canonical_json, ci_gate, diff_guard, feedback, guards, lane, ledger, migrate, orchestrator, policy, registry,
    runner, state, transition, validator,
};

#[derive(Parser)]
#[command(name = "swarmctl", version, about = "Workflow enforcement engine for a multi-role development swarm")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read-only, aggregate check of a state document against every invariant.
    Validate {
        #[arg(long, default_value = "swarm_state.json")]
        state: PathBuf,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        require_hmac: bool,
        #[arg(long)]
        json: bool,
    },
    /// Apply a single legal phase transition.
    Transition {
        #[arg(long, default_value = "swarm_state.json")]
        state: PathBuf,
        #[arg(long)]
        role: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        evidence: Option<PathBuf>,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Enforce separation-of-concerns path policy for changed files.
    PolicyGuard {
        #[arg(long, default_value = "swarm_state.json")]
        state: PathBuf,
        #[arg(long)]
        role: String,
        #[arg(long, default_value = ".")]
        repo_root: PathBuf,
        #[arg(long)]
        diff_base: Option<String>,
        #[arg(long)]
        diff_head: Option<String>,
        #[arg(long)]
        allow_codeowners_edit: bool,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Append an evidence block for an already-captured command output.
    Capture {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        command: String,
        #[arg(long)]
        exit_code: i32,
        #[arg(long, default_value = "orchestrator")]
        actor: String,
        #[arg(long, default_value = "")]
        phase: String,
        #[arg(long, default_value = "")]
        task_id: String,
        #[arg(long, default_value = "tasks/logs/CI_LOGS.md")]
        out: PathBuf,
        #[arg(long, default_value = "tasks/evidence/test-runs")]
        evidence_dir: PathBuf,
    },
    /// Run a real command, capture its output, and append immutable evidence.
    RunAndCapture {
        #[arg(long)]
        command: String,
        #[arg(long, default_value = "orchestrator")]
        actor: String,
        #[arg(long, default_value = "")]
        phase: String,
        #[arg(long, default_value = "")]
        task_id: String,
        #[arg(long, default_value = "tasks/logs/CI_LOGS.md")]
        out: PathBuf,
        #[arg(long, default_value = "tasks/evidence/test-runs")]
        evidence_dir: PathBuf,
    },
    /// Scan test directories for forbidden mock/test-double patterns.
    NoMocksGuard {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        dirs: Vec<String>,
    },
    /// Scan source directories for TODO/FIXME/placeholder/stub markers.
    NoPlaceholdersGuard {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        dirs: Vec<String>,
    },
    /// Compare two state snapshots across VCS refs for append-only, single-transition history.
    StateDiffGuard {
        #[arg(long, default_value = ".")]
        repo_root: PathBuf,
        #[arg(long)]
        base: String,
        #[arg(long)]
        head: String,
        #[arg(long, default_value = "swarm_state.json")]
        state: String,
        #[arg(long)]
        json: bool,
    },
    /// Poll a GitHub PR for required check-run completion.
    CiGate {
        #[arg(long, default_value = ".")]
        repo_root: PathBuf,
        #[arg(long)]
        base: Option<String>,
        #[arg(long)]
        pr: Option<u64>,
        #[arg(long)]
        poll_seconds: Option<u64>,
        #[arg(long)]
        timeout_seconds: Option<u64>,
        #[arg(long)]
        approve: bool,
        #[arg(long)]
        merge: Option<String>,
    },
    /// Atomically switch the execution lane, subject to the architecture boundary.
    SetExecutionLane {
        #[arg(long, default_value = "swarm_state.json")]
        state: PathBuf,
        #[arg(long)]
        lane: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Upgrade a legacy state document to the current schema.
    MigrateState {
        #[arg(long, default_value = "swarm_state.json")]
        state: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value = "L1")]
        enforcement_level: String,
    },
    /// Generate an immutable-by-default "fix required" feedback artifact.
    CreateFeedback {
        #[arg(long, default_value = "swarm_state.json")]
        state: PathBuf,
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        phase: Option<String>,
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        evidence: Option<PathBuf>,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        overwrite: bool,
    },
    /// Single-command Level-1 wrapper: validate -> policy -> guards -> run+capture -> transition.
    Orchestrate {
        #[arg(long, default_value = "swarm_state.json")]
        state: PathBuf,
        #[arg(long, default_value = ".")]
        repo_root: PathBuf,
        #[arg(long)]
        role: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        command: String,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long, default_value = "orchestrator")]
        actor: String,
        #[arg(long)]
        allow_codeowners_edit: bool,
        #[arg(long, default_value = "tasks/logs/CI_LOGS.md")]
        ci_logs: PathBuf,
        #[arg(long, default_value = "tasks/evidence/test-runs")]
        evidence_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("swarmctl=info".parse().unwrap()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let code = match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "ERROR:".red().bold());
            1
        }
    };
    std::process::exit(code);
}

async fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Validate { state, role, require_hmac, json } => cmd_validate(&state, role.as_deref(), require_hmac, json),
        Commands::Transition { state, role, to, evidence, note, dry_run } => {
            cmd_transition(&state, &role, &to, evidence.as_deref(), &note, dry_run)
        }
        Commands::PolicyGuard { state, role, repo_root, diff_base, diff_head, allow_codeowners_edit, actor } => {
            cmd_policy_guard(&state, &role, &repo_root, diff_base.as_deref(), diff_head.as_deref(), allow_codeowners_edit, actor.as_deref())
        }
        Commands::Capture { input, command, exit_code, actor, phase, task_id, out, evidence_dir } => {
            cmd_capture(&input, &command, exit_code, &actor, &phase, &task_id, &out, &evidence_dir)
        }
        Commands::RunAndCapture { command, actor, phase, task_id, out, evidence_dir } => {
            cmd_run_and_capture(&command, &actor, &phase, &task_id, &out, &evidence_dir).await
        }
        Commands::NoMocksGuard { root, dirs } => cmd_no_mocks(&root, &dirs),
        Commands::NoPlaceholdersGuard { root, dirs } => cmd_no_placeholders(&root, &dirs),
        Commands::StateDiffGuard { repo_root, base, head, state, json } => cmd_state_diff_guard(&repo_root, &base, &head, &state, json),
        Commands::CiGate { repo_root, base, pr, poll_seconds, timeout_seconds, approve, merge } => {
            cmd_ci_gate(&repo_root, base.as_deref(), pr, poll_seconds, timeout_seconds, approve, merge).await
        }
        Commands::SetExecutionLane { state, lane, reason, force, dry_run } => {
            cmd_set_execution_lane(&state, &lane, reason.as_deref(), force, dry_run)
        }
        Commands::MigrateState { state, out, enforcement_level } => cmd_migrate_state(&state, out.as_deref(), &enforcement_level),
        Commands::CreateFeedback { state, task_id, phase, run_id, evidence, summary, output, overwrite } => {
            cmd_create_feedback(&state, task_id.as_deref(), phase.as_deref(), run_id.as_deref(), evidence.as_deref(), summary.as_deref(), &output, overwrite)
        }
        Commands::Orchestrate { state, repo_root, role, to, command, note, actor, allow_codeowners_edit, ci_logs, evidence_dir } => {
            cmd_orchestrate(&state, &repo_root, &role, &to, &command, &note, &actor, allow_codeowners_edit, &ci_logs, &evidence_dir).await
        }
    }
}

fn cmd_validate(state_path: &std::path::Path, role: Option<&str>, require_hmac: bool, as_json: bool) -> Result<i32> {
    let value = state::load_readonly(state_path).context("loading state")?;
    let report = validator::validate(&value, role, require_hmac);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for e in &report.errors {
            println!("{} {e}", "ERROR:".red().bold());
        }
        for w in &report.warnings {
            println!("{} {w}", "WARN:".yellow().bold());
        }
        if report.ok {
            println!("{}", "OK: state is valid.".green().bold());
        }
    }
    Ok(if report.ok { 0 } else { 1 })
}

fn cmd_transition(
    state_path: &std::path::Path,
    role: &str,
    to: &str,
    evidence: Option<&std::path::Path>,
    note: &str,
    dry_run: bool,
) -> Result<i32> {
    let role = registry::normalize_role(role).map_err(anyhow::Error::from)?;
    match transition::transition(state_path, role, to, evidence, note, dry_run) {
        Ok(outcome) => {
            if dry_run {
                println!("{}", outcome.rendered);
            }
            println!("{}", format!("OK: transitioned to {to}.").green().bold());
            Ok(0)
        }
        Err(e) => {
            eprintln!("{} {e}", "ERROR:".red().bold());
            Ok(exit_code_for(&e))
        }
    }
}

fn cmd_policy_guard(
    state_path: &std::path::Path,
    role: &str,
    repo_root: &std::path::Path,
    diff_base: Option<&str>,
    diff_head: Option<&str>,
    allow_codeowners_edit: bool,
    actor: Option<&str>,
) -> Result<i32> {
    let role = registry::normalize_role(role).map_err(anyhow::Error::from)?;
    let actor = match actor {
        Some(a) if a.eq_ignore_ascii_case("orchestrator") => policy::Actor::Orchestrator,
        _ => policy::Actor::Agent,
    };

    let (mode, changed) = match (diff_base, diff_head) {
        (Some(base), Some(head)) => (
            policy::Mode::Diff,
            policy::changed_files_diff(repo_root, base, head).map_err(anyhow::Error::from)?,
        ),
        _ => (
            policy::Mode::WorkingTree,
            policy::changed_files_working_tree(repo_root).map_err(anyhow::Error::from)?,
        ),
    };

    let flags = policy::PolicyFlags::resolve(allow_codeowners_edit, None, mode, &state_path.to_string_lossy());
    let report = policy::evaluate(role, actor, &changed, &flags);
    for v in &report.violations {
        println!("{} {}: {}", "DENY:".red().bold(), v.path, v.reason);
    }
    if report.ok {
        println!("{}", "OK: no policy violations.".green().bold());
    }
    Ok(if report.ok { 0 } else { 1 })
}

#[allow(clippy::too_many_arguments)]
fn cmd_capture(
    input: &std::path::Path,
    command: &str,
    exit_code: i32,
    actor: &str,
    phase: &str,
    task_id: &str,
    out: &std::path::Path,
    evidence_dir: &std::path::Path,
) -> Result<i32> {
    match ledger::capture(input, command, exit_code, actor, phase, task_id, out, evidence_dir) {
        Ok(outcome) => {
            println!("{}", format!("OK: captured {}.", outcome.run_id).green().bold());
            Ok(0)
        }
        Err(e) => {
            eprintln!("{} {e}", "ERROR:".red().bold());
            Ok(2)
        }
    }
}

async fn cmd_run_and_capture(
    command: &str,
    actor: &str,
    phase: &str,
    task_id: &str,
    out: &std::path::Path,
    evidence_dir: &std::path::Path,
) -> Result<i32> {
    let outcome = runner::run_and_capture(command, actor, phase, task_id, out, evidence_dir).await;
    if outcome.exit_code == runner::CAPTURE_FAILURE_EXIT_CODE && outcome.capture.is_none() {
        eprintln!("{}", "ERROR: capture_test_output failed; evidence may be incomplete.".red().bold());
    }
    Ok(outcome.exit_code)
}

fn cmd_no_mocks(root: &std::path::Path, dirs: &[String]) -> Result<i32> {
    let dirs_ref: Vec<&str> = if dirs.is_empty() {
        guards::DEFAULT_TEST_DIRS.to_vec()
    } else {
        dirs.iter().map(String::as_str).collect()
    };
    let report = guards::no_mocks(root, &dirs_ref);
    print_guard_report(&report, "no forbidden mock patterns found")
}

fn cmd_no_placeholders(root: &std::path::Path, dirs: &[String]) -> Result<i32> {
    let dirs_ref: Vec<&str> = if dirs.is_empty() {
        guards::DEFAULT_CODE_DIRS.to_vec()
    } else {
        dirs.iter().map(String::as_str).collect()
    };
    let report = guards::no_placeholders(root, &dirs_ref);
    print_guard_report(&report, "no placeholder markers found")
}

fn print_guard_report(report: &guards::GuardReport, ok_message: &str) -> Result<i32> {
    for f in &report.findings {
        eprintln!("- {}: {}:{}: {}", f.rule, f.path, f.line_no, f.line);
    }
    if report.ok {
        println!("{}", format!("OK: {ok_message}.").green().bold());
    }
    Ok(if report.ok { 0 } else { 1 })
}

fn cmd_state_diff_guard(repo_root: &std::path::Path, base: &str, head: &str, state_path: &str, as_json: bool) -> Result<i32> {
    let report = diff_guard::check(repo_root, base, head, state_path).map_err(anyhow::Error::from)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for e in &report.errors {
            println!("{} {e}", "ERROR:".red().bold());
        }
        if report.ok {
            println!("{}", "OK: state transition is valid.".green().bold());
        }
    }
    Ok(if report.ok { 0 } else { 1 })
}

#[allow(clippy::too_many_arguments)]
async fn cmd_ci_gate(
    repo_root: &std::path::Path,
    base: Option<&str>,
    pr: Option<u64>,
    poll_seconds: Option<u64>,
    timeout_seconds: Option<u64>,
    approve: bool,
    merge: Option<String>,
) -> Result<i32> {
    let (owner, repo) = ci_gate::resolve_repo(repo_root).map_err(anyhow::Error::from)?;
    let client = ci_gate::GitHubClient::new(owner.clone(), repo.clone()).map_err(anyhow::Error::from)?;
    let plan = ci_gate::GatePlan {
        owner,
        repo,
        base: ci_gate::resolve_base_branch(base),
        pr_number: pr,
        poll_seconds: poll_seconds.unwrap_or(ci_gate::DEFAULT_POLL_SECONDS),
        timeout_seconds: timeout_seconds.unwrap_or(ci_gate::DEFAULT_TIMEOUT_SECONDS),
        approve,
        merge,
    };
    match ci_gate::wait_for_gate(&client, &plan).await {
        Ok(result) => {
            println!("{} {}", if result.ok { "OK:".green().bold() } else { "FAIL:".red().bold() }, result.message);
            Ok(if result.ok { 0 } else { 1 })
        }
        Err(e) => {
            eprintln!("{} {e}", "ERROR:".red().bold());
            Ok(2)
        }
    }
}

fn cmd_set_execution_lane(state_path: &std::path::Path, lane: &str, reason: Option<&str>, force: bool, dry_run: bool) -> Result<i32> {
    let lane: Lane = registry::normalize_lane(Some(lane)).map_err(anyhow::Error::from)?;
    match lane::set_execution_lane(state_path, lane, reason, force, dry_run) {
        Ok(outcome) if outcome.no_op => {
            println!("{}", "OK: lane unchanged.".green().bold());
            Ok(0)
        }
        Ok(outcome) => {
            if dry_run {
                println!("{}", outcome.rendered);
            }
            println!("{}", "OK: execution lane switched.".green().bold());
            Ok(0)
        }
        Err(e) => {
            eprintln!("{} {e}", "ERROR:".red().bold());
            Ok(exit_code_for(&e))
        }
    }
}

fn cmd_migrate_state(state_path: &std::path::Path, out: Option<&std::path::Path>, enforcement_level: &str) -> Result<i32> {
    let legacy = state::load_readonly(state_path).context("loading legacy state")?;
    let migrated = migrate::migrate(&legacy, enforcement_level).map_err(anyhow::Error::from)?;
    let rendered = canonical_json::to_pretty_string(&migrated).map_err(anyhow::Error::from)?;
    let dest = out.unwrap_or(state_path);
    std::fs::write(dest, rendered).context("writing migrated state")?;
    println!("{}", format!("OK: migrated state written to {}.", dest.display()).green().bold());
    Ok(0)
}

#[allow(clippy::too_many_arguments)]
fn cmd_create_feedback(
    state_path: &std::path::Path,
    task_id: Option<&str>,
    phase: Option<&str>,
    run_id: Option<&str>,
    evidence: Option<&std::path::Path>,
    summary: Option<&str>,
    output: &std::path::Path,
    overwrite: bool,
) -> Result<i32> {
    let state_value = state::load_readonly(state_path).context("loading state")?;
    let req = feedback::FeedbackRequest { state: &state_value, task_id, phase, run_id, evidence_path: evidence, summary };
    match feedback::create_feedback(&req, output, overwrite) {
        Ok(path) => {
            println!("{}", format!("OK: feedback artifact written to {}.", path.display()).green().bold());
            Ok(0)
        }
        Err(e) => {
            eprintln!("{} {e}", "ERROR:".red().bold());
            Ok(1)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_orchestrate(
    state_path: &std::path::Path,
    repo_root: &std::path::Path,
    role: &str,
    to: &str,
    command: &str,
    note: &str,
    actor: &str,
    allow_codeowners_edit: bool,
    ci_logs: &std::path::Path,
    evidence_dir: &std::path::Path,
) -> Result<i32> {
    let role = registry::normalize_role(role).map_err(anyhow::Error::from)?;
    let req = orchestrator::OrchestrateRequest {
        state_path,
        repo_root,
        role,
        to,
        command,
        note,
        actor,
        ledger_path: ci_logs,
        evidence_dir,
        allow_codeowners_edit,
    };
    let outcome = orchestrator::orchestrate(&req).await.map_err(anyhow::Error::from)?;
    if outcome.exit_code == 0 {
        println!("{}", "OK: orchestration succeeded.".green().bold());
    }
    Ok(outcome.exit_code)
}

fn exit_code_for(e: &SwarmError) -> i32 {
    match e {
        SwarmError::Io(_) | SwarmError::Capture(_) => 2,
        _ => 1,
    }
}
