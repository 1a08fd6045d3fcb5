//! Response normaliser: raw model text → list of JSON records.
//!
//! Models are told to return bare JSON but often wrap it in Markdown fences
//! anyway. The steps run in a fixed order:
//!
//! 1. trim surrounding whitespace
//! 2. strip a language-tagged opening fence (```` ```json ````), otherwise a
//!    bare opening fence
//! 3. strip a closing fence
//! 4. trim again
//! 5. parse as JSON
//! 6. wrap a lone non-array value in a one-element array
//!
//! The tagged form is checked first so the tag never leaks into the payload.

use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

const FENCE: &str = "```";

static RE_TAGGED_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z][\w+-]*").expect("valid regex"));

/// Strip one layer of Markdown code fencing, if present.
pub fn strip_fences(raw: &str) -> &str {
    let s = raw.trim();
    let s = match RE_TAGGED_FENCE.find(s) {
        Some(m) => &s[m.end()..],
        None => s.strip_prefix(FENCE).unwrap_or(s),
    };
    let s = s.strip_suffix(FENCE).unwrap_or(s);
    s.trim()
}

/// Normalise the model's raw text into a list of records.
///
/// Elements are returned as parsed; non-object elements are kept.
///
/// # Errors
/// [`ExtractError::MalformedResponse`] when the stripped text is not JSON.
/// The error carries `raw` unmodified.
pub fn normalize_response(raw: &str) -> Result<Vec<Value>, ExtractError> {
    let payload = strip_fences(raw);
    let value: Value =
        serde_json::from_str(payload).map_err(|e| ExtractError::MalformedResponse {
            raw: raw.to_string(),
            detail: e.to_string(),
        })?;

    let records = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    debug!("Normalised response into {} record(s)", records.len());
    Ok(records)
}
