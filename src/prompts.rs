//! Instructions sent to the vision model.
//!
//! Centralising prompt text here keeps the request builder free of wording
//! and lets tests inspect the prompts without a model. Callers can override
//! both instructions via [`crate::config::ExtractionConfig::system_prompt`]
//! and [`crate::config::ExtractionConfig::user_prompt`].

use crate::config::FieldSpec;

/// Default user-level instruction.
pub const DEFAULT_USER_PROMPT: &str =
    "Extract the specified fields from the following multi-page scanned document.";

/// Build the default system instruction for `fields`.
///
/// The field list is rendered as a JSON array so names containing commas or
/// punctuation (`"Invoice No."`, `"E-Mail"`) stay unambiguous.
pub fn system_prompt(fields: &FieldSpec) -> String {
    let field_list = serde_json::to_string(fields.names()).unwrap_or_default();
    format!(
        "You are a structured-extraction engine for scanned shipping documents.\n\
Output ONLY a JSON array of objects, one object per page/record, containing only \
the requested field keys and no other content.\n\
Requested field keys: {field_list}\n\
Rules:\n\
- Use each requested key exactly as written.\n\
- Use null when a field does not appear in the document.\n\
- Copy values as printed; do not translate or reformat them.\n\
- Return compact JSON: no Markdown fences, no commentary, no extra keys."
    )
}
