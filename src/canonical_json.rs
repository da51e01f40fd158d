//! Canonical JSON serialization and the HMAC helpers built on top of it.
//!
//! "Canonical" here means: object keys sorted, no insignificant
//! whitespace, and all non-ASCII characters escaped as `\uXXXX` — the
//! same shape produced by `json.dumps(sort_keys=True,
//! separators=(",", ":"), ensure_ascii=True)`. This is not RFC 8785/JCS;
//! it only needs to be self-consistent within this binary, since it is
//! never compared byte-for-byte against another implementation.

use hmac::{Hmac, Mac};
use serde_json::ser::{CharEscape, Formatter};
use serde_json::Value;
use sha2::Sha256;
use std::io;

use crate::error::SwarmError;

type HmacSha256 = Hmac<Sha256>;

/// A `serde_json::ser::Formatter` that escapes every non-ASCII scalar
/// value as `\uXXXX` (with surrogate pairs above the BMP), matching
/// Python's `ensure_ascii=True`. Key/value separators are left at
/// serde_json's compact default, which already matches `(",", ":")`.
#[derive(Default)]
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        for ch in fragment.chars() {
            if ch.is_ascii() {
                write!(writer, "{ch}")?;
            } else {
                let mut buf = [0u16; 2];
                for unit in ch.encode_utf16(&mut buf) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }

    fn write_char_escape<W: ?Sized + io::Write>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()> {
        use std::io::Write as _;
        let s: &[u8] = match char_escape {
            CharEscape::Quote => b"\\\"",
            CharEscape::ReverseSolidus => b"\\\\",
            CharEscape::Solidus => b"\\/",
            CharEscape::Backspace => b"\\b",
            CharEscape::FormFeed => b"\\f",
            CharEscape::LineFeed => b"\\n",
            CharEscape::CarriageReturn => b"\\r",
            CharEscape::Tab => b"\\t",
            CharEscape::AsciiControl(byte) => {
                let hex = format!("\\u{:04x}", byte);
                return writer.write_all(hex.as_bytes());
            }
        };
        writer.write_all(s)
    }
}

/// Renders `value` as canonical JSON bytes: sorted keys (inherited from
/// `serde_json::Map`'s default `BTreeMap` backing), compact separators,
/// ASCII-only output.
pub fn to_canonical_bytes(value: &Value) -> Result<Vec<u8>, SwarmError> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, AsciiFormatter);
    use serde::Serialize;
    value.serialize(&mut ser).map_err(|e| SwarmError::Schema(e.to_string()))?;
    Ok(buf)
}

pub fn to_canonical_string(value: &Value) -> Result<String, SwarmError> {
    let bytes = to_canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|e| SwarmError::Schema(e.to_string()))
}

/// Renders `value` the way a state document is written to disk: same
/// canonical key order and ASCII escaping as [`to_canonical_bytes`], but
/// pretty-printed with 2-space indentation and a trailing newline for
/// human readability.
pub fn to_pretty_string(value: &Value) -> Result<String, SwarmError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, AsciiEscapingPretty(formatter));
    use serde::Serialize;
    value.serialize(&mut ser).map_err(|e| SwarmError::Schema(e.to_string()))?;
    let mut s = String::from_utf8(buf).map_err(|e| SwarmError::Schema(e.to_string()))?;
    s.push('\n');
    Ok(s)
}

/// Wraps `PrettyFormatter` to additionally apply ASCII escaping, since
/// `Formatter` only exposes string/escape hooks, not the whitespace ones,
/// so we can delegate everything else.
struct AsciiEscapingPretty(serde_json::ser::PrettyFormatter<'static>);

impl Formatter for AsciiEscapingPretty {
    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        AsciiFormatter.write_string_fragment(writer, fragment)
    }

    fn write_char_escape<W: ?Sized + io::Write>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()> {
        AsciiFormatter.write_char_escape(writer, char_escape)
    }

    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_array(writer)
    }
    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_array(writer)
    }
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.0.begin_array_value(writer, first)
    }
    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_array_value(writer)
    }
    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_object(writer)
    }
    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_object(writer)
    }
    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        self.0.begin_object_key(writer, first)
    }
    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.begin_object_value(writer)
    }
    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.0.end_object_value(writer)
    }
}

/// Computes `HMAC-SHA256(key, canonical(value))` with `strip_fields`
/// removed from `value` first (typically `state_hmac` / `integrity`).
pub fn compute_hmac(key: &[u8], value: &Value, strip_fields: &[&str]) -> Result<String, SwarmError> {
    let mut stripped = value.clone();
    if let Some(obj) = stripped.as_object_mut() {
        for field in strip_fields {
            obj.remove(*field);
        }
    }
    let canonical = to_canonical_bytes(&stripped)?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| SwarmError::Integrity(e.to_string()))?;
    mac.update(&canonical);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn hmac_chain_link(key: &[u8], prev_hmac: &str, block: &str) -> Result<String, SwarmError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| SwarmError::Integrity(e.to_string()))?;
    mac.update(prev_hmac.as_bytes());
    mac.update(b"\n");
    mac.update(block.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Minimal local hex encoder so we do not need to pull in the `hex` crate
/// solely for this one call site.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{:02x}", b).unwrap();
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_and_compact() {
        let v = json!({"b": 1, "a": 2});
        assert_eq!(to_canonical_string(&v).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn non_ascii_is_escaped() {
        let v = json!({"name": "caf\u{e9}"});
        assert_eq!(to_canonical_string(&v).unwrap(), "{\"name\":\"caf\\u00e9\"}");
    }

    #[test]
    fn hmac_strips_given_fields_before_hashing() {
        let v1 = json!({"a": 1, "state_hmac": "deadbeef"});
        let v2 = json!({"a": 1, "state_hmac": "other"});
        let h1 = compute_hmac(b"key", &v1, &["state_hmac"]).unwrap();
        let h2 = compute_hmac(b"key", &v2, &["state_hmac"]).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn chain_link_is_deterministic() {
        let a = hmac_chain_link(b"k", "", "block-1").unwrap();
        let b = hmac_chain_link(b"k", "", "block-1").unwrap();
        assert_eq!(a, b);
        let c = hmac_chain_link(b"k", &a, "block-2").unwrap();
        assert_ne!(a, c);
    }
}
