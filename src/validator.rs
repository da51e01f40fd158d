//! Validator: read-only, aggregate (non-fail-fast) check of a state
//! document against every invariant in the data model.

use serde_json::Value;

use crate::registry::{self, Lane, Phase};
use crate::state::STATE_HMAC_KEY_ENV;

#[derive(Debug, Default, serde::Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn validate(state: &Value, acting_role: Option<&str>, require_hmac: bool) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let obj = match state.as_object() {
        Some(o) => o,
        None => {
            errors.push("state document must be a JSON object".to_string());
            return ValidationReport { ok: false, errors, warnings };
        }
    };

    if let Some(locked) = obj.get("is_locked") {
        match locked.as_bool() {
            None => errors.push("is_locked must be a boolean".to_string()),
            Some(true) => errors.push("state is locked: no transitions are permitted".to_string()),
            Some(false) => {}
        }
    }

    let lane = match registry::normalize_lane(obj.get("execution_lane").and_then(Value::as_str)) {
        Ok(l) => Some(l),
        Err(e) => {
            errors.push(e.to_string());
            None
        }
    };

    let current_phase = parse_phase_field(obj, "current_phase", &mut errors);
    let next_phase = parse_phase_field(obj, "next_phase", &mut errors);

    if let Some(lane) = lane {
        check_required_sequence(obj, lane, &mut errors, &mut warnings);
        check_history_order(obj, lane, current_phase, &mut errors);
        check_fast_ui_boundary(lane, current_phase, next_phase, &mut errors);
    }

    if let (Some(role_raw), Some(next_phase)) = (acting_role, next_phase) {
        match registry::normalize_role(role_raw) {
            Ok(role) => {
                let expected = registry::role_for_phase(next_phase);
                if role != expected {
                    errors.push(format!(
                        "role mismatch: next_phase {next_phase} is owned by {expected}, not {role}"
                    ));
                }
            }
            Err(e) => errors.push(e.to_string()),
        }
    }

    check_hmac(state, obj, require_hmac, &mut errors, &mut warnings);

    let ok = errors.is_empty();
    ValidationReport { ok, errors, warnings }
}

fn parse_phase_field(
    obj: &serde_json::Map<String, Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<Phase> {
    match obj.get(field).and_then(Value::as_str) {
        None => {
            errors.push(format!("missing or non-string field: {field}"));
            None
        }
        Some(raw) => match registry::canonicalize_phase(raw) {
            Ok(p) => Some(p),
            Err(e) => {
                errors.push(format!("{field}: {e}"));
                None
            }
        },
    }
}

fn check_required_sequence(
    obj: &serde_json::Map<String, Value>,
    lane: Lane,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let default_seq: Vec<&str> = registry::required_sequence(lane).iter().map(Phase::as_str).collect();
    match obj.get("required_phase_sequence") {
        None => warnings.push("required_phase_sequence missing; lane default assumed".to_string()),
        Some(Value::Array(items)) => {
            let allow_custom = obj.get("allow_custom_sequence").and_then(Value::as_bool).unwrap_or(false);
            if !allow_custom {
                let actual: Vec<String> = items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
                if actual != default_seq {
                    errors.push(format!(
                        "required_phase_sequence does not match the {lane} lane default (set allow_custom_sequence to override)"
                    ));
                }
            }
        }
        Some(_) => errors.push("required_phase_sequence must be an array".to_string()),
    }
}

fn check_history_order(
    obj: &serde_json::Map<String, Value>,
    lane: Lane,
    current_phase: Option<Phase>,
    errors: &mut Vec<String>,
) {
    let mut timeline: Vec<Phase> = iter_history_phases(obj);
    if let Some(cp) = current_phase {
        if timeline.last().copied() != Some(cp) {
            timeline.push(cp);
        }
    }
    let required = registry::required_sequence(lane);
    let completed: std::collections::HashSet<Phase> = timeline.iter().copied().collect();
    let mut missing_prefix = Vec::new();
    for phase in required {
        if !completed.contains(phase) {
            missing_prefix.push(*phase);
        } else if !missing_prefix.is_empty() {
            errors.push(format!(
                "required phase order violated: {} completed before {}",
                phase,
                missing_prefix.iter().map(Phase::as_str).collect::<Vec<_>>().join(", ")
            ));
        }
    }
}

fn check_fast_ui_boundary(
    lane: Lane,
    current_phase: Option<Phase>,
    next_phase: Option<Phase>,
    errors: &mut Vec<String>,
) {
    if lane != Lane::FastUi {
        return;
    }
    let forbidden = registry::fast_ui_forbidden();
    for (label, phase) in [("current_phase", current_phase), ("next_phase", next_phase)] {
        if let Some(p) = phase {
            if forbidden.contains(&p) {
                errors.push(format!("{label} {p} is not permitted in the FAST_UI lane"));
            }
        }
    }
}

fn check_hmac(
    state: &Value,
    obj: &serde_json::Map<String, Value>,
    require_hmac: bool,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let key = std::env::var(STATE_HMAC_KEY_ENV).ok().filter(|k| !k.is_empty());
    let nested = obj.get("integrity").and_then(Value::as_object).and_then(|i| i.get("hmac")).and_then(Value::as_str);
    let stamped = nested.or_else(|| obj.get("state_hmac").and_then(Value::as_str));
    match (key, stamped) {
        (Some(key), Some(stamped)) => {
            match crate::canonical_json::compute_hmac(key.as_bytes(), state, &["state_hmac", "integrity"]) {
                Ok(expected) if expected == stamped => {}
                Ok(_) => errors.push("state_hmac does not match recomputed HMAC".to_string()),
                Err(e) => errors.push(e.to_string()),
            }
        }
        (Some(_), None) => {
            let msg = "SWARM_STATE_HMAC_KEY is set but state is unsigned".to_string();
            if require_hmac {
                errors.push(msg);
            } else {
                warnings.push(msg);
            }
        }
        (None, _) => {}
    }
}

pub fn iter_history_phases(obj: &serde_json::Map<String, Value>) -> Vec<Phase> {
    let Some(Value::Array(items)) = obj.get("history") else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|entry| {
            let phase_raw = match entry {
                Value::Object(m) => m.get("phase").and_then(Value::as_str),
                Value::String(s) => Some(s.as_str()),
                _ => None,
            }?;
            registry::canonicalize_phase(phase_raw).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_state() -> Value {
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
    fn clean_state_validates() {
        let report = validate(&base_state(), None, false);
        assert!(report.ok, "{:?}", report.errors);
    }

    #[test]
    fn locked_state_is_an_error() {
        let mut s = base_state();
        s["is_locked"] = json!(true);
        let report = validate(&s, None, false);
        assert!(!report.ok);
    }

    #[test]
    fn skip_detected_in_history() {
        let mut s = base_state();
        s["current_phase"] = json!("BACKEND");
        s["next_phase"] = json!("ANALYST_CI_GATE");
        s["history"] = json!([{"phase": "ARCHITECT"}, {"phase": "BACKEND"}]);
        let report = validate(&s, None, false);
        assert!(!report.ok);
    }

    #[test]
    fn fast_ui_forbids_backend() {
        let mut s = base_state();
        s["execution_lane"] = json!("FAST_UI");
        s["required_phase_sequence"] = json!(["ARCHITECT", "FRONTEND", "QA_E2E", "ANALYST_FINAL"]);
        s["current_phase"] = json!("BACKEND");
        let report = validate(&s, None, false);
        assert!(!report.ok);
    }
}
