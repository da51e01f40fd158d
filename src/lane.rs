//! Lane Switcher: atomically swaps `execution_lane` and
//! `required_phase_sequence` together, with an architecture-boundary
//! check outside of `--force`.

use std::path::Path;

use serde_json::{json, Value};

use crate::error::{SwarmError, SwarmResult};
use crate::registry::{self, Lane, Phase};
use crate::state::{self, now_utc_iso_z};

const SAFE_CURRENT: &[Phase] = &[Phase::Init, Phase::Architect, Phase::Complete];
const SAFE_NEXT: &[Phase] = &[Phase::Architect, Phase::Frontend, Phase::QaContract];

pub struct LaneSwitchOutcome {
    pub rendered: String,
    pub applied: bool,
    pub no_op: bool,
}

pub fn set_execution_lane(
    state_path: &Path,
    lane: Lane,
    reason: Option<&str>,
    force: bool,
    dry_run: bool,
) -> SwarmResult<LaneSwitchOutcome> {
    let mut handle = state::open_for_write(state_path)?;
    let obj = handle
        .value
        .as_object()
        .ok_or_else(|| SwarmError::Schema("state document must be a JSON object".into()))?;

    let current_lane = registry::normalize_lane(obj.get("execution_lane").and_then(Value::as_str))?;
    if current_lane == lane {
        let rendered = crate::canonical_json::to_pretty_string(&handle.value)?;
        return Ok(LaneSwitchOutcome { rendered, applied: false, no_op: true });
    }

    let current_phase = obj
        .get("current_phase")
        .and_then(Value::as_str)
        .ok_or_else(|| SwarmError::Schema("missing current_phase".into()))
        .and_then(|s| registry::canonicalize_phase(s))?;
    let next_phase = obj
        .get("next_phase")
        .and_then(Value::as_str)
        .ok_or_else(|| SwarmError::Schema("missing next_phase".into()))
        .and_then(|s| registry::canonicalize_phase(s))?;

    if !force && (!SAFE_CURRENT.contains(&current_phase) || !SAFE_NEXT.contains(&next_phase)) {
        return Err(SwarmError::Semantic(format!(
            "lane switch outside the architecture boundary (current_phase={current_phase}, next_phase={next_phase}); use --force to override"
        )));
    }

    let new_seq: Vec<Value> = registry::required_sequence(lane).iter().map(|p| json!(p.as_str())).collect();
    let value_obj = handle.value.as_object_mut().expect("checked above");
    value_obj.insert("execution_lane".to_string(), json!(lane.as_str()));
    value_obj.insert("required_phase_sequence".to_string(), json!(new_seq));
    if let Some(reason) = reason {
        value_obj.insert("lane_reason".to_string(), json!(reason));
    }
    value_obj.insert("last_updated".to_string(), json!(now_utc_iso_z()));
    state::stamp_hmac_if_configured(&mut handle.value)?;

    let rendered = crate::canonical_json::to_pretty_string(&handle.value)?;
    if dry_run {
        return Ok(LaneSwitchOutcome { rendered, applied: false, no_op: false });
    }
    state::commit(handle)?;
    Ok(LaneSwitchOutcome { rendered, applied: true, no_op: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_state(dir: &Path, value: &Value) -> std::path::PathBuf {
        let path = dir.join("swarm_state.json");
        fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn no_op_when_lane_unchanged() {
        let dir = std::env::temp_dir().join(format!("swarm_lane_test_noop_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = write_state(
            &dir,
            &json!({"execution_lane": "FULL", "current_phase": "INIT", "next_phase": "ARCHITECT", "history": []}),
        );
        let outcome = set_execution_lane(&path, Lane::Full, None, false, false).unwrap();
        assert!(outcome.no_op);
        assert!(!outcome.applied);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_switch_outside_boundary_without_force() {
        let dir = std::env::temp_dir().join(format!("swarm_lane_test_boundary_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = write_state(
            &dir,
            &json!({"execution_lane": "FULL", "current_phase": "BACKEND", "next_phase": "ANALYST_CI_GATE", "history": []}),
        );
        let err = set_execution_lane(&path, Lane::FastUi, None, false, false).unwrap_err();
        assert!(matches!(err, SwarmError::Semantic(_)));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn switch_at_architect_boundary_succeeds() {
        let dir = std::env::temp_dir().join(format!("swarm_lane_test_ok_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = write_state(
            &dir,
            &json!({"execution_lane": "FULL", "current_phase": "INIT", "next_phase": "ARCHITECT", "history": []}),
        );
        let outcome = set_execution_lane(&path, Lane::FastUi, Some("ui-only ticket"), false, false).unwrap();
        assert!(outcome.applied);
        let saved: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["execution_lane"], json!("FAST_UI"));
        let _ = fs::remove_dir_all(&dir);
    }
}
