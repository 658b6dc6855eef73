// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic ASCII-escaped JSON output.
//!
//! Manifest and UIR files are written sorted-key (serde_json maps are
//! BTreeMaps), 2-space indented, with all non-ASCII characters escaped, so
//! rewriting the same document is byte-identical and the files are safe for
//! tooling that assumes ASCII.

use serde_json::Value;

/// Render a JSON value as 2-space-indented, ASCII-only text.
#[must_use]
pub fn ascii_json_pretty(value: &Value) -> String {
    // Pretty-printing first is safe: non-ASCII characters can only occur
    // inside string literals, never in JSON structure.
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string());
    escape_non_ascii(&pretty)
}

fn escape_non_ascii(s: &str) -> String {
    if s.is_ascii() {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                use std::fmt::Write as _;
                let _ = write!(out, "\\u{unit:04x}");
            }
        }
    }
    out
}
