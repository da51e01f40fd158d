//! Policy Engine: maps (actor, role, mode, changed paths) to allow/deny,
//! enforcing separation of concerns and protecting the state document,
//! the evidence ledger, and CODEOWNERS.

use std::path::Path;
use std::process::Command;

use glob::Pattern;
use serde::Serialize;

use crate::error::{SwarmError, SwarmResult};
use crate::registry::Role;

pub const CODEOWNERS_PATH: &str = ".github/CODEOWNERS";
pub const CODEOWNERS_ENV_OVERRIDE: &str = "CMAS_ALLOW_CODEOWNERS_EDIT";

const GLOBAL_DENY_GLOBS: &[&str] = &["swarm_state.json", "tasks/logs/**", "tasks/evidence/**"];

fn role_allow_globs(role: Role) -> &'static [&'static str] {
    match role {
        Role::Architect => &[
            "SWARM_CONSTITUTION.md",
            "SWARM_ARCHITECTURE.md",
            "TASKS_CONTEXT.md",
            "docs/**",
            "config/personas/**",
            ".github/**",
            "swarm/**",
            "tasks/queue/**",
        ],
        Role::Qa => &["tests/**", "vitest.config.ts", "playwright.config.ts", "package.json", "package-lock.json", "TASKS_CONTEXT.md"],
        Role::Backend => &["app/**", "components/**", "data/**", "lib/**", "src/**", "package.json", "package-lock.json", "tsconfig.json"],
        Role::Frontend => &["app/**", "components/**", "data/**", "public/**", "package.json", "package-lock.json", "tsconfig.json"],
        Role::Analyst => &["tasks/feedback/**", "tasks/reports/**", "tasks/completed/**", "docs/**"],
        Role::Orchestrator => &[
            "swarm_state.json",
            "tasks/logs/**",
            "tasks/evidence/**",
            "tasks/reports/**",
            "tasks/queue/**",
            "tasks/completed/**",
        ],
    }
}

fn role_deny_globs(role: Role) -> &'static [&'static str] {
    match role {
        Role::Backend | Role::Frontend => &["tests/**"],
        _ => &[],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Agent,
    Orchestrator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    WorkingTree,
    Diff,
}

#[derive(Debug, Serialize)]
pub struct Violation {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct PolicyReport {
    pub ok: bool,
    pub violations: Vec<Violation>,
}

pub struct PolicyFlags {
    pub allow_codeowners_edit: bool,
    pub allow_state_edit: bool,
    pub state_path: String,
}

impl PolicyFlags {
    pub fn resolve(allow_codeowners_edit: bool, allow_state_edit: Option<bool>, mode: Mode, state_path: &str) -> Self {
        let env_override = std::env::var(CODEOWNERS_ENV_OVERRIDE).map(|v| v == "1").unwrap_or(false);
        let default_allow_state_edit = matches!(mode, Mode::Diff);
        Self {
            allow_codeowners_edit: allow_codeowners_edit || env_override,
            allow_state_edit: allow_state_edit.unwrap_or(default_allow_state_edit),
            state_path: state_path.to_string(),
        }
    }
}

/// Evaluates every path in `changed_paths` against the role's allow/deny
/// globs and the global protections. Returns every violation found; it
/// never stops at the first one.
pub fn evaluate(role: Role, actor: Actor, changed_paths: &[String], flags: &PolicyFlags) -> PolicyReport {
    let mut violations = Vec::new();

    for path in changed_paths {
        if let Some(reason) = check_one(role, actor, path, flags) {
            violations.push(Violation { path: path.clone(), reason });
        }
    }

    PolicyReport { ok: violations.is_empty(), violations }
}

fn check_one(role: Role, actor: Actor, path: &str, flags: &PolicyFlags) -> Option<String> {
    let normalized = path.replace('\\', "/");

    if normalized == flags.state_path.replace('\\', "/") && actor != Actor::Orchestrator && !flags.allow_state_edit {
        return Some("state file is orchestrator-only".to_string());
    }
    if normalized == CODEOWNERS_PATH && !flags.allow_codeowners_edit {
        return Some("CODEOWNERS is protected".to_string());
    }
    if actor != Actor::Orchestrator && matches_any(GLOBAL_DENY_GLOBS, &normalized) {
        return Some("path is orchestrator-only".to_string());
    }

    let allow = role_allow_globs(role);
    if allow.is_empty() {
        return Some("no allowlist configured for role".to_string());
    }
    if !matches_any(allow, &normalized) {
        return Some("path not in allowlist for role".to_string());
    }
    if matches_any(role_deny_globs(role), &normalized) {
        return Some("path denied for role".to_string());
    }
    None
}

fn matches_any(globs: &[&str], path: &str) -> bool {
    globs.iter().any(|pattern| Pattern::new(pattern).map(|p| p.matches(path)).unwrap_or(false))
}

/// Changed-path collection for `Mode::WorkingTree`: `git status
/// --porcelain=v1`, with rename destinations winning over sources.
pub fn changed_files_working_tree(repo_root: &Path) -> SwarmResult<Vec<String>> {
    let output = run_git(repo_root, &["status", "--porcelain=v1"])?;
    let mut files = Vec::new();
    for line in output.lines() {
        if line.len() < 4 {
            continue;
        }
        let rest = &line[3..];
        if let Some((_, dest)) = rest.split_once(" -> ") {
            files.push(dest.trim().to_string());
        } else {
            files.push(rest.trim().to_string());
        }
    }
    Ok(files)
}

/// Changed-path collection for `Mode::Diff`: `git diff --name-only
/// base...head`.
pub fn changed_files_diff(repo_root: &Path, base: &str, head: &str) -> SwarmResult<Vec<String>> {
    let output = run_git(repo_root, &["diff", "--name-only", &format!("{base}...{head}")])?;
    Ok(output.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
}

fn run_git(repo_root: &Path, args: &[&str]) -> SwarmResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| SwarmError::Io(format!("failed to run git {args:?}: {e}")))?;
    if !output.status.success() {
        return Err(SwarmError::Io(format!(
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(mode: Mode) -> PolicyFlags {
        PolicyFlags::resolve(false, None, mode, "swarm_state.json")
    }

    #[test]
    fn backend_can_edit_src() {
        let report = evaluate(Role::Backend, Actor::Agent, &["src/lib.rs".to_string()], &flags(Mode::WorkingTree));
        assert!(report.ok);
    }

    #[test]
    fn backend_cannot_edit_tests() {
        let report = evaluate(Role::Backend, Actor::Agent, &["tests/foo.rs".to_string()], &flags(Mode::WorkingTree));
        assert!(!report.ok);
    }

    #[test]
    fn agent_cannot_edit_state_file() {
        let report = evaluate(Role::Architect, Actor::Agent, &["swarm_state.json".to_string()], &flags(Mode::WorkingTree));
        assert!(!report.ok);
    }

    #[test]
    fn orchestrator_can_edit_state_file() {
        let report = evaluate(Role::Orchestrator, Actor::Orchestrator, &["swarm_state.json".to_string()], &flags(Mode::WorkingTree));
        assert!(report.ok);
    }

    #[test]
    fn codeowners_protected_unless_allowed() {
        let report = evaluate(Role::Architect, Actor::Agent, &[".github/CODEOWNERS".to_string()], &flags(Mode::WorkingTree));
        assert!(!report.ok);
        let allowed_flags = PolicyFlags::resolve(true, None, Mode::WorkingTree, "swarm_state.json");
        let report2 = evaluate(Role::Architect, Actor::Agent, &[".github/CODEOWNERS".to_string()], &allowed_flags);
        assert!(report2.ok);
    }

    #[test]
    fn architect_can_edit_github_workflows() {
        let report = evaluate(Role::Architect, Actor::Agent, &[".github/workflows/ci.yml".to_string()], &flags(Mode::WorkingTree));
        assert!(report.ok);
    }
}
