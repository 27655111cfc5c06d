//! Secret payload repair and parsing.
//!
//! Hand-edited secrets commonly carry Windows line endings, a byte-order mark
//! or a trailing comma before a closing brace. A payload that does not parse
//! as a flat JSON object gets those repaired and is parsed again.

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Matches either a whole quoted string or a trailing comma (capture 1 holds
/// what follows the comma). Quoted strings are matched so they can be skipped.
fn trailing_comma() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(?:[^"\\]|\\.)*"|,(\s*[}\]])"#).expect("static regex"))
}

/// Applies the formatting repairs. String values are never touched.
pub fn repair(raw: &str) -> String {
    let normalized = raw
        .trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n");
    trailing_comma()
        .replace_all(&normalized, |caps: &Captures| match caps.get(1) {
            Some(tail) => tail.as_str().to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Parses `raw` into a flat field map, repairing it only when it does not
/// parse as-is.
///
/// Strings are kept as-is, other scalars are stringified and nested values
/// become compact JSON text. `null` fields are dropped. The error message
/// never includes payload content.
pub fn parse_fields(raw: &str) -> Result<HashMap<String, String>, String> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => serde_json::from_str(&repair(raw)).map_err(|e| {
            format!(
                "payload is not valid JSON (line {}, column {})",
                e.line(),
                e.column()
            )
        })?,
    };

    let object = match value {
        Value::Object(map) => map,
        _ => return Err("payload is not a JSON object".to_string()),
    };

    Ok(object
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                nested => nested.to_string(),
            };
            Some((key, text))
        })
        .collect())
}
