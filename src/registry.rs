//! Phase & Role Registry: canonical enums, alias collapsing, and the
//! lane-scoped required-sequence / allowed-transition tables.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SwarmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Phase {
    Init,
    Architect,
    QaContract,
    Backend,
    AnalystCiGate,
    Frontend,
    QaE2e,
    AnalystFinal,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::Architect => "ARCHITECT",
            Phase::QaContract => "QA_CONTRACT",
            Phase::Backend => "BACKEND",
            Phase::AnalystCiGate => "ANALYST_CI_GATE",
            Phase::Frontend => "FRONTEND",
            Phase::QaE2e => "QA_E2E",
            Phase::AnalystFinal => "ANALYST_FINAL",
            Phase::Complete => "COMPLETE",
        }
    }

    pub fn all() -> &'static [Phase] {
        &[
            Phase::Init,
            Phase::Architect,
            Phase::QaContract,
            Phase::Backend,
            Phase::AnalystCiGate,
            Phase::Frontend,
            Phase::QaE2e,
            Phase::AnalystFinal,
            Phase::Complete,
        ]
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Phase> for String {
    fn from(p: Phase) -> String {
        p.as_str().to_string()
    }
}

impl TryFrom<String> for Phase {
    type Error = SwarmError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        canonicalize_phase(&value)
    }
}

impl FromStr for Phase {
    type Err = SwarmError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        canonicalize_phase(s)
    }
}

/// Collapses legacy/alias phase spellings to the canonical set.
///
/// Exact alias matches win first; otherwise a fixed prefix/substring
/// collapsing applies; ambiguous bare `QA*` inputs are rejected rather
/// than guessed.
pub fn canonicalize_phase(raw: &str) -> Result<Phase, SwarmError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SwarmError::Semantic("phase must not be empty".into()));
    }
    let upper = trimmed.to_uppercase();

    if let Some(p) = exact_phase(&upper) {
        return Ok(p);
    }
    if let Some(p) = exact_alias(&upper) {
        return Ok(p);
    }

    if upper.starts_with("ARCHITECT") {
        return Ok(Phase::Architect);
    }
    if upper.starts_with("BACKEND") {
        return Ok(Phase::Backend);
    }
    if upper.starts_with("FRONTEND") {
        return Ok(Phase::Frontend);
    }
    if upper.contains("ANALYST") && upper.contains("FINAL") {
        return Ok(Phase::AnalystFinal);
    }
    if upper.starts_with("ANALYST") {
        return Ok(Phase::AnalystCiGate);
    }
    if upper.starts_with("QA") {
        if upper.contains("CONTRACT") {
            return Ok(Phase::QaContract);
        }
        if upper.contains("E2E") || upper.contains("VALIDATION") {
            return Ok(Phase::QaE2e);
        }
        return Err(SwarmError::Semantic(format!(
            "ambiguous QA phase: {raw:?} (expected a CONTRACT or E2E/VALIDATION variant)"
        )));
    }

    Err(SwarmError::Semantic(format!("unknown phase: {raw:?}")))
}

fn exact_phase(upper: &str) -> Option<Phase> {
    Phase::all().iter().copied().find(|p| p.as_str() == upper)
}

fn exact_alias(upper: &str) -> Option<Phase> {
    match upper {
        "ARCHITECT_DESIGN" | "ARCHITECT_PORT_FIX" => Some(Phase::Architect),
        "QA_CONTRACT_TESTS" => Some(Phase::QaContract),
        "BACKEND_IMPLEMENTATION" | "BACKEND_HARDENING_COMPLETE" => Some(Phase::Backend),
        "ANALYST_AUDIT" => Some(Phase::AnalystCiGate),
        "FRONTEND_IMPLEMENTATION" => Some(Phase::Frontend),
        "QA_E2E_VALIDATION" | "QA_VALIDATION_COMPLETE" | "QA_VALIDATION" => Some(Phase::QaE2e),
        "ANALYST_FINAL_SIGNOFF" => Some(Phase::AnalystFinal),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    Architect,
    Qa,
    Backend,
    Frontend,
    Analyst,
    Orchestrator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Architect => "architect",
            Role::Qa => "qa",
            Role::Backend => "backend",
            Role::Frontend => "frontend",
            Role::Analyst => "analyst",
            Role::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Role> for String {
    fn from(r: Role) -> String {
        r.as_str().to_string()
    }
}

impl TryFrom<String> for Role {
    type Error = SwarmError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        normalize_role(&value)
    }
}

pub fn normalize_role(raw: &str) -> Result<Role, SwarmError> {
    let lower = raw.trim().to_lowercase();
    match lower.as_str() {
        "architect" | "arch" => Ok(Role::Architect),
        "qa" => Ok(Role::Qa),
        "backend" | "dev" | "developer" => Ok(Role::Backend),
        "frontend" => Ok(Role::Frontend),
        "analyst" => Ok(Role::Analyst),
        "orchestrator" | "ci" => Ok(Role::Orchestrator),
        other => Err(SwarmError::Semantic(format!("unknown role: {other:?}"))),
    }
}

/// Total map from phase to its sole authorized acting role.
pub fn role_for_phase(phase: Phase) -> Role {
    match phase {
        Phase::Init => Role::Orchestrator,
        Phase::Architect => Role::Architect,
        Phase::QaContract => Role::Qa,
        Phase::Backend => Role::Backend,
        Phase::AnalystCiGate => Role::Analyst,
        Phase::Frontend => Role::Frontend,
        Phase::QaE2e => Role::Qa,
        Phase::AnalystFinal => Role::Analyst,
        Phase::Complete => Role::Orchestrator,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Lane {
    Full,
    FastUi,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Full => "FULL",
            Lane::FastUi => "FAST_UI",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Lane> for String {
    fn from(l: Lane) -> String {
        l.as_str().to_string()
    }
}

impl TryFrom<String> for Lane {
    type Error = SwarmError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        normalize_lane(Some(&value))
    }
}

pub fn normalize_lane(raw: Option<&str>) -> Result<Lane, SwarmError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Lane::Full),
        Some(s) => match s.to_uppercase().as_str() {
            "FULL" => Ok(Lane::Full),
            "FAST_UI" => Ok(Lane::FastUi),
            other => Err(SwarmError::Semantic(format!("unknown execution lane: {other:?}"))),
        },
    }
}

pub fn required_sequence(lane: Lane) -> &'static [Phase] {
    match lane {
        Lane::Full => &[
            Phase::Architect,
            Phase::QaContract,
            Phase::Backend,
            Phase::AnalystCiGate,
            Phase::Frontend,
            Phase::QaE2e,
            Phase::AnalystFinal,
        ],
        Lane::FastUi => &[Phase::Architect, Phase::Frontend, Phase::QaE2e, Phase::AnalystFinal],
    }
}

/// Phases FAST_UI forbids as either `current_phase` or `next_phase`.
pub fn fast_ui_forbidden() -> &'static [Phase] {
    &[Phase::QaContract, Phase::Backend, Phase::AnalystCiGate]
}

pub fn allowed_transitions(lane: Lane) -> HashSet<(Phase, Phase)> {
    use Phase::*;
    match lane {
        Lane::Full => [
            (Init, Architect),
            (Architect, QaContract),
            (QaContract, Backend),
            (Backend, AnalystCiGate),
            (AnalystCiGate, Backend),
            (AnalystCiGate, Frontend),
            (AnalystCiGate, Architect),
            (Frontend, QaE2e),
            (Frontend, AnalystCiGate),
            (QaE2e, AnalystFinal),
            (QaE2e, AnalystCiGate),
            (AnalystFinal, Complete),
            (AnalystFinal, Frontend),
            (AnalystFinal, Backend),
            (AnalystFinal, Architect),
        ]
        .into_iter()
        .collect(),
        Lane::FastUi => [
            (Init, Architect),
            (Architect, Frontend),
            (Frontend, QaE2e),
            (Frontend, Architect),
            (QaE2e, AnalystFinal),
            (QaE2e, Frontend),
            (AnalystFinal, Complete),
            (AnalystFinal, Frontend),
            (AnalystFinal, Architect),
        ]
        .into_iter()
        .collect(),
    }
}

/// Union of both lanes' transition sets, used by the state-diff guard
/// which does not have a single lane context to evaluate against.
pub fn allowed_transitions_any_lane() -> HashSet<(Phase, Phase)> {
    let mut all = allowed_transitions(Lane::Full);
    all.extend(allowed_transitions(Lane::FastUi));
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_round_trip() {
        for p in Phase::all() {
            assert_eq!(canonicalize_phase(p.as_str()).unwrap(), *p);
        }
    }

    #[test]
    fn aliases_collapse() {
        assert_eq!(canonicalize_phase("architect_design").unwrap(), Phase::Architect);
        assert_eq!(canonicalize_phase("qa_e2e_validation").unwrap(), Phase::QaE2e);
        assert_eq!(canonicalize_phase("analyst_audit").unwrap(), Phase::AnalystCiGate);
        assert_eq!(canonicalize_phase("ANALYST_FINAL_SIGNOFF").unwrap(), Phase::AnalystFinal);
    }

    #[test]
    fn prefix_collapsing() {
        assert_eq!(canonicalize_phase("BACKEND_WEIRD_SUFFIX").unwrap(), Phase::Backend);
        assert_eq!(canonicalize_phase("qa_contract_extra").unwrap(), Phase::QaContract);
    }

    #[test]
    fn ambiguous_qa_rejected() {
        assert!(canonicalize_phase("QA_REVIEW").is_err());
    }

    #[test]
    fn unknown_phase_rejected() {
        assert!(canonicalize_phase("NOT_A_PHASE").is_err());
        assert!(canonicalize_phase("").is_err());
    }

    #[test]
    fn role_for_phase_is_total() {
        for p in Phase::all() {
            let _ = role_for_phase(*p);
        }
    }

    #[test]
    fn role_aliases() {
        assert_eq!(normalize_role("dev").unwrap(), Role::Backend);
        assert_eq!(normalize_role("ci").unwrap(), Role::Orchestrator);
        assert_eq!(normalize_role("ARCH").unwrap(), Role::Architect);
    }

    #[test]
    fn fast_ui_has_no_init_target() {
        let t = allowed_transitions(Lane::FastUi);
        assert!(!t.iter().any(|(_, to)| *to == Phase::Init));
    }
}
