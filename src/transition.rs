//! Transition Engine: the sole authorized writer of the state document.

use std::path::Path;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::{SwarmError, SwarmResult};
use crate::registry::{self, Lane, Phase, Role};
use crate::state::{self, StateHandle};
use crate::validator::iter_history_phases;

pub struct TransitionOutcome {
    pub rendered: String,
    pub applied: bool,
}

#[allow(clippy::too_many_arguments)]
pub fn transition(
    state_path: &Path,
    role: Role,
    to: &str,
    evidence_path: Option<&Path>,
    note: &str,
    dry_run: bool,
) -> SwarmResult<TransitionOutcome> {
    let mut handle = state::open_for_write(state_path)?;
    let to_phase = registry::canonicalize_phase(to)?;
    apply(&mut handle.value, role, to_phase, evidence_path, note)?;

    if dry_run {
        let rendered = crate::canonical_json::to_pretty_string(&handle.value)?;
        return Ok(TransitionOutcome { rendered, applied: false });
    }

    let rendered = crate::canonical_json::to_pretty_string(&handle.value)?;
    state::commit(handle)?;
    Ok(TransitionOutcome { rendered, applied: true })
}

fn apply(value: &mut Value, role: Role, to: Phase, evidence_path: Option<&Path>, note: &str) -> SwarmResult<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| SwarmError::Schema("state document must be a JSON object".into()))?;

    if obj.get("is_locked").and_then(Value::as_bool).unwrap_or(false) {
        return Err(SwarmError::Semantic("state is locked: no transitions are permitted".into()));
    }

    let lane = registry::normalize_lane(obj.get("execution_lane").and_then(Value::as_str))?;
    let next_phase_raw = obj
        .get("next_phase")
        .and_then(Value::as_str)
        .ok_or_else(|| SwarmError::Schema("missing next_phase".into()))?;
    let executing_phase = registry::canonicalize_phase(next_phase_raw)?;

    let expected_role = registry::role_for_phase(executing_phase);
    if role != expected_role {
        return Err(SwarmError::Semantic(format!(
            "role {role} is not authorized to execute phase {executing_phase} (owned by {expected_role})"
        )));
    }

    let allowed = registry::allowed_transitions(lane);
    if !allowed.contains(&(executing_phase, to)) {
        let legal: Vec<&str> = allowed
            .iter()
            .filter(|(from, _)| *from == executing_phase)
            .map(|(_, next)| next.as_str())
            .collect();
        return Err(SwarmError::Semantic(format!(
            "transition {executing_phase} -> {to} is not permitted in the {lane} lane (legal next phases: {})",
            legal.join(", ")
        )));
    }

    let allow_custom = obj.get("allow_custom_sequence").and_then(Value::as_bool).unwrap_or(false);
    let required_sequence: Vec<Phase> = match obj.get("required_phase_sequence") {
        Some(Value::Array(items)) if !items.is_empty() => {
            let actual: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            let default_strs: Vec<&str> = registry::required_sequence(lane).iter().map(Phase::as_str).collect();
            if actual != default_strs && !allow_custom {
                return Err(SwarmError::Semantic(
                    "required_phase_sequence does not match the lane default (set allow_custom_sequence to override)"
                        .into(),
                ));
            }
            actual
                .iter()
                .map(|s| registry::canonicalize_phase(s))
                .collect::<Result<_, _>>()?
        }
        _ => registry::required_sequence(lane).to_vec(),
    };

    if required_sequence.contains(&to) {
        let prior: Vec<Phase> = required_sequence.iter().take_while(|p| **p != to).copied().collect();
        let mut completed: std::collections::HashSet<Phase> =
            iter_history_phases(obj).into_iter().collect();
        completed.insert(executing_phase);
        let missing: Vec<&str> = prior.iter().filter(|p| !completed.contains(*p)).map(Phase::as_str).collect();
        if !missing.is_empty() {
            return Err(SwarmError::Semantic(format!(
                "skip detected: {to} requires {} to have completed first",
                missing.join(", ")
            )));
        }
    }

    let evidence = match evidence_path {
        None => Value::Null,
        Some(p) => {
            let bytes = std::fs::read(p).map_err(|e| SwarmError::Io(format!("cannot read evidence {}: {e}", p.display())))?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let digest = format!("{:x}", hasher.finalize());
            json!({ "path": p.display().to_string(), "sha256": digest })
        }
    };

    let entry = json!({
        "phase": executing_phase.as_str(),
        "at": state::now_utc_iso_z(),
        "by_role": role.as_str(),
        "lane": lane.as_str(),
        "note": note,
        "legacy_phase": Value::Null,
        "evidence": evidence,
    });

    let obj_mut = value.as_object_mut().expect("checked above");
    obj_mut.entry("history").or_insert_with(|| json!([]));
    if let Some(Value::Array(hist)) = obj_mut.get_mut("history") {
        hist.push(entry);
    }
    let stamped_seq: Vec<Value> = required_sequence.iter().map(|p| json!(p.as_str())).collect();
    obj_mut.insert("required_phase_sequence".to_string(), json!(stamped_seq));
    obj_mut.insert("current_phase".to_string(), json!(executing_phase.as_str()));
    obj_mut.insert("next_phase".to_string(), json!(to.as_str()));
    obj_mut.insert("last_updated".to_string(), json!(state::now_utc_iso_z()));

    state::stamp_hmac_if_configured(value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_state() -> Value {
        json!({
            "schema_version": "1.0",
            "enforcement_level": "L1",
            "task_id": "T1",
            "execution_lane": "FULL",
            "required_phase_sequence": ["ARCHITECT","QA_CONTRACT","BACKEND","ANALYST_CI_GATE","FRONTEND","QA_E2E","ANALYST_FINAL"],
            "current_phase": "INIT",
            "next_phase": "ARCHITECT",
            "is_locked": false,
            "history": [],
        })
    }

    #[test]
    fn init_to_architect_succeeds() {
        let mut s = full_state();
        apply(&mut s, Role::Orchestrator, Phase::Architect, None, "go").unwrap();
        assert_eq!(s["current_phase"], json!("ARCHITECT"));
        assert_eq!(s["next_phase"], json!("ARCHITECT"));
        assert_eq!(s["history"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn wrong_role_is_rejected() {
        let mut s = full_state();
        let err = apply(&mut s, Role::Backend, Phase::Architect, None, "go").unwrap_err();
        assert!(matches!(err, SwarmError::Semantic(_)));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut s = full_state();
        s["next_phase"] = json!("ARCHITECT");
        let err = apply(&mut s, Role::Architect, Phase::Complete, None, "go").unwrap_err();
        assert!(matches!(err, SwarmError::Semantic(_)));
    }

    #[test]
    fn locked_state_rejects_transition() {
        let mut s = full_state();
        s["is_locked"] = json!(true);
        let err = apply(&mut s, Role::Orchestrator, Phase::Architect, None, "go").unwrap_err();
        assert!(matches!(err, SwarmError::Semantic(_)));
    }

    #[test]
    fn skip_is_detected() {
        let mut s = full_state();
        s["current_phase"] = json!("ARCHITECT");
        s["next_phase"] = json!("BACKEND");
        s["history"] = json!([{"phase": "ARCHITECT"}]);
        let err = apply(&mut s, Role::Backend, Phase::AnalystCiGate, None, "go").unwrap_err();
        assert!(matches!(err, SwarmError::Semantic(_)));
    }

    #[test]
    fn fix_loop_backward_edge_is_allowed() {
        let mut s = full_state();
        s["current_phase"] = json!("BACKEND");
        s["next_phase"] = json!("ANALYST_CI_GATE");
        s["history"] = json!([{"phase": "ARCHITECT"}, {"phase": "QA_CONTRACT"}, {"phase": "BACKEND"}]);
        apply(&mut s, Role::Analyst, Phase::Backend, None, "fix it").unwrap();
        assert_eq!(s["next_phase"], json!("BACKEND"));
    }
}
