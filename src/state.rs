//! State Store: locked read/modify/write of the state document.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fd_lock::RwLock as FileLock;
use serde_json::Value;
use tracing::warn;

use crate::canonical_json::{compute_hmac, to_pretty_string};
use crate::error::{SwarmError, SwarmResult};

pub const STATE_HMAC_KEY_ENV: &str = "SWARM_STATE_HMAC_KEY";
const STRIP_FIELDS: &[&str] = &["state_hmac"];

/// Handle to the on-disk state document, held across a read/modify/write
/// cycle under an exclusive advisory file lock. Dropping it releases the
/// lock.
pub struct StateHandle {
    path: PathBuf,
    _lock: FileLock<File>,
    pub value: Value,
}

pub fn now_utc_iso_z() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn now_utc_compact() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// Opens `path` for exclusive read/modify/write. The advisory lock is
/// best-effort: platforms without `flock`/`LockFileEx` support silently
/// proceed without mutual exclusion, matching the original tool's
/// POSIX-only locking with a no-op fallback elsewhere.
pub fn open_for_write(path: &Path) -> SwarmResult<StateHandle> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| SwarmError::Io(format!("cannot open state file {}: {e}", path.display())))?;
    let mut lock = FileLock::new(file);
    let mut guard = lock
        .write()
        .map_err(|e| SwarmError::Io(format!("cannot lock state file {}: {e}", path.display())))?;
    let mut text = String::new();
    guard
        .read_to_string(&mut text)
        .map_err(|e| SwarmError::Io(format!("cannot read state file {}: {e}", path.display())))?;
    drop(guard);
    let value = parse_state(&text)?;
    Ok(StateHandle { path: path.to_path_buf(), _lock: lock, value })
}

pub fn load_readonly(path: &Path) -> SwarmResult<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SwarmError::Io(format!("cannot read state file {}: {e}", path.display())))?;
    parse_state(&text)
}

fn parse_state(text: &str) -> SwarmResult<Value> {
    let value: Value = serde_json::from_str(text).map_err(|e| SwarmError::Schema(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(SwarmError::Schema("state document must be a JSON object".into()));
    }
    Ok(value)
}

/// Recomputes and stamps `state_hmac` on `value` if `SWARM_STATE_HMAC_KEY`
/// is set in the environment; otherwise leaves `value` untouched.
pub fn stamp_hmac_if_configured(value: &mut Value) -> SwarmResult<()> {
    if let Ok(key) = std::env::var(STATE_HMAC_KEY_ENV) {
        if !key.is_empty() {
            let sig = compute_hmac(key.as_bytes(), value, STRIP_FIELDS)?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert("state_hmac".to_string(), Value::String(sig));
            }
        }
    }
    Ok(())
}

/// Writes the handle's current `value` atomically: a best-effort `.bak`
/// sidecar of the pre-write bytes, then an in-place replace under the
/// held lock, then a best-effort `fsync`. Both the backup and the fsync
/// are logged, non-fatal failures — only the replace itself is fatal.
pub fn commit(handle: StateHandle) -> SwarmResult<()> {
    let rendered = to_pretty_string(&handle.value)?;

    if let Ok(previous) = std::fs::read(&handle.path) {
        let bak = backup_path(&handle.path);
        if let Err(e) = std::fs::write(&bak, previous) {
            warn!("failed to write state backup {}: {e}", bak.display());
        }
    }

    let tmp = handle.path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)
            .map_err(|e| SwarmError::Io(format!("cannot create temp state file {}: {e}", tmp.display())))?;
        f.write_all(rendered.as_bytes())
            .map_err(|e| SwarmError::Io(format!("cannot write temp state file {}: {e}", tmp.display())))?;
        if let Err(e) = f.sync_all() {
            warn!("fsync of {} failed (non-fatal): {e}", tmp.display());
        }
    }
    std::fs::rename(&tmp, &handle.path)
        .map_err(|e| SwarmError::Io(format!("cannot replace state file {}: {e}", handle.path.display())))?;
    Ok(())
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().and_then(|n| n.to_str()).unwrap_or("state").to_string();
    name.push_str(".bak");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_rejects_non_object() {
        assert!(parse_state("[1,2,3]").is_err());
    }

    #[test]
    fn parse_rejects_invalid_json() {
        assert!(parse_state("{not json").is_err());
    }

    #[test]
    fn parse_accepts_object() {
        let v = parse_state(r#"{"a":1}"#).unwrap();
        assert_eq!(v, json!({"a": 1}));
    }
}
