//! Migrator: one-shot upgrade of a legacy state document (string-only
//! history) into the current schema.

use serde_json::{json, Value};

use crate::error::{SwarmError, SwarmResult};
use crate::registry::{self, Lane, Phase};
use crate::state::now_utc_iso_z;

pub fn migrate(legacy: &Value, enforcement_level: &str) -> SwarmResult<Value> {
    let obj = legacy.as_object().ok_or_else(|| SwarmError::Schema("legacy state must be a JSON object".into()))?;

    let raw_current = obj
        .get("current_phase")
        .and_then(Value::as_str)
        .ok_or_else(|| SwarmError::Schema("legacy state must contain a string current_phase".into()))?;
    let raw_next = obj
        .get("next_phase")
        .and_then(Value::as_str)
        .ok_or_else(|| SwarmError::Schema("legacy state must contain a string next_phase".into()))?;
    let current_phase = registry::canonicalize_phase(raw_current)?;
    let next_phase = registry::canonicalize_phase(raw_next)?;

    let mut timeline = to_history_objects(obj.get("history"))?;
    insert_missing_required_phases(&mut timeline, Lane::Full);

    let result = json!({
        "schema_version": "1.0",
        "enforcement_level": enforcement_level,
        "task_id": obj.get("task_id").and_then(Value::as_str).unwrap_or(""),
        "task_path": obj.get("task_path").and_then(Value::as_str).unwrap_or(""),
        "current_phase": current_phase.as_str(),
        "next_phase": next_phase.as_str(),
        "is_locked": obj.get("is_locked").and_then(Value::as_bool).unwrap_or(false),
        "required_phase_sequence": registry::required_sequence(Lane::Full).iter().map(Phase::as_str).collect::<Vec<_>>(),
        "history": timeline,
        "migrated_at": now_utc_iso_z(),
        "legacy_snapshot": { "raw": legacy },
    });

    Ok(result)
}

fn to_history_objects(history: Option<&Value>) -> SwarmResult<Vec<Value>> {
    let Some(Value::Array(items)) = history else { return Ok(Vec::new()) };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(legacy_phase) => {
                let canon = registry::canonicalize_phase(legacy_phase)?;
                out.push(json!({
                    "phase": canon.as_str(),
                    "at": Value::Null,
                    "by_role": Value::Null,
                    "note": format!("migrated from legacy phase {legacy_phase:?}"),
                    "legacy_phase": legacy_phase,
                    "evidence": Value::Null,
                }));
            }
            Value::Object(_) => out.push(item.clone()),
            other => return Err(SwarmError::Schema(format!("unsupported legacy history entry: {other}"))),
        }
    }
    Ok(out)
}

/// Conservatively inserts a synthetic entry for each required phase
/// missing from `timeline`, but only immediately before a *later*
/// required phase that already exists. A required phase with no later
/// anchor present is left out rather than appended proactively.
fn insert_missing_required_phases(timeline: &mut Vec<Value>, lane: Lane) {
    let required = registry::required_sequence(lane);
    for (i, phase) in required.iter().enumerate() {
        if timeline_contains(timeline, *phase) {
            continue;
        }
        let anchor = required[i + 1..].iter().find_map(|later| timeline_index_of(timeline, *later));
        if let Some(anchor_idx) = anchor {
            let synthetic = json!({
                "phase": phase.as_str(),
                "at": Value::Null,
                "by_role": Value::Null,
                "note": "Inserted by migration to satisfy required phase order (legacy run).",
                "legacy_phase": Value::Null,
                "evidence": Value::Null,
            });
            timeline.insert(anchor_idx, synthetic);
        }
        // else: no later required phase has run yet; do not insert proactively.
    }
}

fn timeline_contains(timeline: &[Value], phase: Phase) -> bool {
    timeline_index_of(timeline, phase).is_some()
}

fn timeline_index_of(timeline: &[Value], phase: Phase) -> Option<usize> {
    timeline.iter().position(|entry| {
        entry
            .get("phase")
            .and_then(Value::as_str)
            .and_then(|s| registry::canonicalize_phase(s).ok())
            == Some(phase)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_strings_wrap_into_objects() {
        let legacy = json!({"task_id": "T1", "current_phase": "ARCHITECT", "next_phase": "QA_CONTRACT", "history": ["ARCHITECT"]});
        let migrated = migrate(&legacy, "L1").unwrap();
        let hist = migrated["history"].as_array().unwrap();
        assert_eq!(hist.len(), 1);
        assert_eq!(hist[0]["phase"], json!("ARCHITECT"));
        assert_eq!(hist[0]["legacy_phase"], json!("ARCHITECT"));
    }

    #[test]
    fn missing_phase_inserted_only_before_a_later_present_phase() {
        let legacy = json!({"task_id": "T1", "current_phase": "BACKEND", "next_phase": "ANALYST_CI_GATE", "history": ["ARCHITECT", "BACKEND"]});
        let migrated = migrate(&legacy, "L1").unwrap();
        let phases: Vec<String> = migrated["history"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["phase"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(phases, vec!["ARCHITECT", "QA_CONTRACT", "BACKEND"]);
    }

    #[test]
    fn trailing_missing_phase_not_inserted_proactively() {
        let legacy = json!({"task_id": "T1", "current_phase": "ARCHITECT", "next_phase": "QA_CONTRACT", "history": ["ARCHITECT"]});
        let migrated = migrate(&legacy, "L1").unwrap();
        let phases: Vec<String> = migrated["history"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["phase"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(phases, vec!["ARCHITECT"]);
    }

    #[test]
    fn legacy_snapshot_is_preserved() {
        let legacy = json!({"task_id": "T1", "current_phase": "ARCHITECT", "next_phase": "QA_CONTRACT", "history": []});
        let migrated = migrate(&legacy, "L1").unwrap();
        assert_eq!(migrated["legacy_snapshot"]["raw"]["task_id"], json!("T1"));
    }
}
