//! Process-wide configuration, built once from the environment.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub state_path: PathBuf,
    pub ledger_path: PathBuf,
    pub evidence_dir: PathBuf,
    pub state_hmac_key: Option<String>,
    pub log_hmac_key: Option<String>,
    pub allow_codeowners_edit: bool,
    pub default_poll_seconds: u64,
    pub default_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("swarm_state.json"),
            ledger_path: PathBuf::from("tasks/logs/CI_LOGS.md"),
            evidence_dir: PathBuf::from("tasks/evidence/test-runs"),
            state_hmac_key: None,
            log_hmac_key: None,
            allow_codeowners_edit: false,
            default_poll_seconds: crate::ci_gate::DEFAULT_POLL_SECONDS,
            default_timeout_seconds: crate::ci_gate::DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

/// Builds the process-wide `Config`, overlaying environment variables on
/// top of the defaults. There is no on-disk config file for this
/// system — every tunable here is environment-driven, matching the
/// original implementation's `os.environ` reads.
pub fn build_config() -> Config {
    let mut cfg = Config::default();
    cfg.state_hmac_key = std::env::var(crate::state::STATE_HMAC_KEY_ENV).ok().filter(|v| !v.is_empty());
    cfg.log_hmac_key = std::env::var(crate::ledger::LOG_HMAC_KEY_ENV).ok().filter(|v| !v.is_empty());
    cfg.allow_codeowners_edit = std::env::var(crate::policy::CODEOWNERS_ENV_OVERRIDE)
        .map(|v| v == "1")
        .unwrap_or(false);
    cfg
}
