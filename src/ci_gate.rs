//! CI-Gate Waiter: polls a GitHub-shaped CI provider for required
//! check-run completion on a pull request.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{SwarmError, SwarmResult};

pub const DEFAULT_REQUIRED_CHECKS: &[&str] = &["build", "test", "lint"];
pub const DEFAULT_POLL_SECONDS: u64 = 15;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 1800;
pub const GITHUB_BRANCH_ENV: &str = "GITHUB_BRANCH";
pub const DEFAULT_BASE_BRANCH: &str = "main";

/// Resolves the gate's base branch: an explicit `--base` flag wins, then
/// `GITHUB_BRANCH`, then the hardcoded default.
pub fn resolve_base_branch(flag: Option<&str>) -> String {
    flag.map(str::to_string)
        .or_else(|| std::env::var(GITHUB_BRANCH_ENV).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Missing,
    Pending,
    Passed,
    Failed,
}

pub struct GatePlan {
    pub owner: String,
    pub repo: String,
    pub base: String,
    pub pr_number: Option<u64>,
    pub poll_seconds: u64,
    pub timeout_seconds: u64,
    pub approve: bool,
    pub merge: Option<String>,
}

pub struct GateResult {
    pub ok: bool,
    pub pr_number: u64,
    pub head_sha: String,
    pub checks: HashMap<String, CheckStatus>,
    pub message: String,
}

/// Resolves `owner/repo` from `GITHUB_REPO`, else by parsing the `origin`
/// remote URL.
pub fn resolve_repo(repo_root: &std::path::Path) -> SwarmResult<(String, String)> {
    if let Ok(explicit) = std::env::var("GITHUB_REPO") {
        return split_owner_repo(&explicit);
    }
    let output = std::process::Command::new("git")
        .args(["remote", "get-url", "origin"])
        .current_dir(repo_root)
        .output()
        .map_err(|e| SwarmError::Ci(format!("cannot read git remote: {e}")))?;
    if !output.status.success() {
        return Err(SwarmError::Ci("no GITHUB_REPO set and no 'origin' remote found".into()));
    }
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    parse_remote_url(&url)
}

fn parse_remote_url(url: &str) -> SwarmResult<(String, String)> {
    let re_ssh = Regex::new(r"^git@github\.com:([^/]+)/(.+?)(\.git)?$").unwrap();
    let re_https = Regex::new(r"^https://github\.com/([^/]+)/(.+?)(\.git)?$").unwrap();
    if let Some(c) = re_ssh.captures(url).or_else(|| re_https.captures(url)) {
        return Ok((c[1].to_string(), c[2].to_string()));
    }
    Err(SwarmError::Ci(format!("cannot parse GitHub owner/repo from remote url: {url:?}")))
}

fn split_owner_repo(s: &str) -> SwarmResult<(String, String)> {
    match s.split_once('/') {
        Some((o, r)) => Ok((o.to_string(), r.to_string())),
        None => Err(SwarmError::Ci(format!("GITHUB_REPO must be owner/name, got {s:?}"))),
    }
}

fn resolve_token() -> SwarmResult<String> {
    std::env::var("GITHUB_TOKEN")
        .or_else(|_| std::env::var("GH_TOKEN"))
        .map_err(|_| SwarmError::Ci("neither GITHUB_TOKEN nor GH_TOKEN is set".into()))
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(owner: String, repo: String) -> SwarmResult<Self> {
        let token = resolve_token()?;
        let api_base = std::env::var("GITHUB_API").unwrap_or_else(|_| "https://api.github.com".to_string());
        let http = reqwest::Client::builder()
            .user_agent("swarmctl-ci-gate")
            .build()
            .map_err(|e| SwarmError::Ci(e.to_string()))?;
        Ok(Self { http, api_base, token, owner, repo })
    }

    async fn get(&self, path: &str) -> SwarmResult<Value> {
        let url = format!("{}{}", self.api_base, path);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| SwarmError::Ci(format!("GET {path} failed: {e}")))?;
        self.read_json(resp, "GET", path).await
    }

    async fn post(&self, path: &str, body: &Value) -> SwarmResult<Value> {
        let url = format!("{}{}", self.api_base, path);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(body)
            .send()
            .await
            .map_err(|e| SwarmError::Ci(format!("POST {path} failed: {e}")))?;
        self.read_json(resp, "POST", path).await
    }

    async fn put(&self, path: &str, body: &Value) -> SwarmResult<Value> {
        let url = format!("{}{}", self.api_base, path);
        let resp = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(body)
            .send()
            .await
            .map_err(|e| SwarmError::Ci(format!("PUT {path} failed: {e}")))?;
        self.read_json(resp, "PUT", path).await
    }

    async fn read_json(&self, resp: reqwest::Response, method: &str, path: &str) -> SwarmResult<Value> {
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| SwarmError::Ci(e.to_string()))?;
        if !status.is_success() {
            let truncated: String = String::from_utf8_lossy(&bytes).chars().take(500).collect();
            return Err(SwarmError::Ci(format!("{method} {path} -> {status}: {truncated}")));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| SwarmError::Ci(format!("{method} {path}: non-JSON response: {e}")))
    }

    pub async fn list_open_prs(&self, base: &str) -> SwarmResult<Vec<Value>> {
        let path = format!("/repos/{}/{}/pulls?state=open&base={}", self.owner, self.repo, base);
        let v = self.get(&path).await?;
        Ok(v.as_array().cloned().unwrap_or_default())
    }

    pub async fn get_pr(&self, number: u64) -> SwarmResult<Value> {
        self.get(&format!("/repos/{}/{}/pulls/{number}", self.owner, self.repo)).await
    }

    pub async fn get_branch_protection_checks(&self, branch: &str) -> SwarmResult<Vec<String>> {
        let path = format!("/repos/{}/{}/branches/{branch}/protection/required_status_checks", self.owner, self.repo);
        let v = self.get(&path).await?;
        let contexts = v
            .get("contexts")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|c| c.as_str().map(str::to_string)).collect());
        contexts.ok_or_else(|| SwarmError::Ci("branch protection response missing contexts".into()))
    }

    pub async fn list_check_runs(&self, sha: &str) -> SwarmResult<Vec<Value>> {
        let path = format!("/repos/{}/{}/commits/{sha}/check-runs", self.owner, self.repo);
        let v = self.get(&path).await?;
        Ok(v.get("check_runs").and_then(Value::as_array).cloned().unwrap_or_default())
    }

    pub async fn get_self_user(&self) -> SwarmResult<String> {
        let v = self.get("/user").await?;
        v.get("login")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SwarmError::Ci("GET /user missing login".into()))
    }

    pub async fn list_pr_reviews(&self, number: u64) -> SwarmResult<Vec<Value>> {
        let path = format!("/repos/{}/{}/pulls/{number}/reviews", self.owner, self.repo);
        let v = self.get(&path).await?;
        Ok(v.as_array().cloned().unwrap_or_default())
    }

    pub async fn post_review(&self, number: u64, event: &str, body: &str) -> SwarmResult<()> {
        let path = format!("/repos/{}/{}/pulls/{number}/reviews", self.owner, self.repo);
        self.post(&path, &serde_json::json!({"event": event, "body": body})).await?;
        Ok(())
    }

    pub async fn merge_pr(&self, number: u64, method: &str) -> SwarmResult<()> {
        let path = format!("/repos/{}/{}/pulls/{number}/merge", self.owner, self.repo);
        self.put(&path, &serde_json::json!({"merge_method": method})).await?;
        Ok(())
    }
}

fn classify(name: &str, runs_by_name: &HashMap<String, Value>) -> CheckStatus {
    let Some(run) = runs_by_name.get(name) else { return CheckStatus::Missing };
    let status = run.get("status").and_then(Value::as_str).unwrap_or("");
    if status != "completed" {
        return CheckStatus::Pending;
    }
    match run.get("conclusion").and_then(Value::as_str) {
        Some("success") => CheckStatus::Passed,
        _ => CheckStatus::Failed,
    }
}

pub async fn wait_for_gate(client: &GitHubClient, plan: &GatePlan) -> SwarmResult<GateResult> {
    let pr_number = match plan.pr_number {
        Some(n) => n,
        None => {
            let prs = client.list_open_prs(&plan.base).await?;
            let first = prs.first().ok_or_else(|| SwarmError::Ci(format!("no open PRs against {}", plan.base)))?;
            first.get("number").and_then(Value::as_u64).ok_or_else(|| SwarmError::Ci("PR missing number".into()))?
        }
    };

    let required: Vec<String> = match client.get_branch_protection_checks(&plan.base).await {
        Ok(checks) if !checks.is_empty() => checks,
        _ => DEFAULT_REQUIRED_CHECKS.iter().map(|s| s.to_string()).collect(),
    };

    let deadline_span = Duration::from_secs(plan.timeout_seconds);
    let poll_interval = Duration::from_secs(plan.poll_seconds);
    let mut last_sha: Option<String> = None;
    let mut deadline = Instant::now() + deadline_span;

    loop {
        let pr = client.get_pr(pr_number).await?;
        if pr.get("state").and_then(Value::as_str) != Some("open") {
            return Err(SwarmError::Ci(format!("PR #{pr_number} is no longer open")));
        }
        let head_sha = pr
            .get("head")
            .and_then(|h| h.get("sha"))
            .and_then(Value::as_str)
            .ok_or_else(|| SwarmError::Ci("PR response missing head.sha".into()))?
            .to_string();

        if last_sha.as_deref() != Some(head_sha.as_str()) {
            info!("head sha is {head_sha}; resetting poll deadline");
            deadline = Instant::now() + deadline_span;
            last_sha = Some(head_sha.clone());
        }

        let runs = client.list_check_runs(&head_sha).await?;
        let runs_by_name: HashMap<String, Value> = runs
            .into_iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str).map(|n| (n.to_string(), r.clone())))
            .collect();

        let statuses: HashMap<String, CheckStatus> =
            required.iter().map(|name| (name.clone(), classify(name, &runs_by_name))).collect();

        if let Some((failed_name, _)) = statuses.iter().find(|(_, s)| **s == CheckStatus::Failed) {
            return Ok(GateResult {
                ok: false,
                pr_number,
                head_sha,
                checks: statuses,
                message: format!("required check failed: {failed_name}"),
            });
        }

        if statuses.values().all(|s| *s == CheckStatus::Passed) {
            if plan.approve {
                approve_if_needed(client, pr_number).await?;
            }
            if let Some(method) = &plan.merge {
                client.merge_pr(pr_number, method).await?;
            }
            return Ok(GateResult { ok: true, pr_number, head_sha, checks: statuses, message: "all required checks passed".into() });
        }

        if Instant::now() >= deadline {
            return Err(SwarmError::Ci(format!("timed out after {}s waiting for required checks on PR #{pr_number}", plan.timeout_seconds)));
        }
        warn!("required checks not yet green for PR #{pr_number}; sleeping {}s", plan.poll_seconds);
        tokio::time::sleep(poll_interval).await;
    }
}

async fn approve_if_needed(client: &GitHubClient, pr_number: u64) -> SwarmResult<()> {
    let me = client.get_self_user().await?;
    let reviews = client.list_pr_reviews(pr_number).await?;
    let latest_by_me = reviews
        .iter()
        .filter(|r| r.get("user").and_then(|u| u.get("login")).and_then(Value::as_str) == Some(me.as_str()))
        .last();
    let already_approved = latest_by_me
        .and_then(|r| r.get("state").and_then(Value::as_str))
        .map(|s| s == "APPROVED")
        .unwrap_or(false);
    if !already_approved {
        client.post_review(pr_number, "APPROVE", "Automated approval: required checks are green.").await?;
    }
    Ok(())
}
