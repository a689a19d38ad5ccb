//! Instruction template and structured-output schema for variable identification.

use serde_json::{Value, json};

/// Default number of leading characters sent to the oracle.
pub const DEFAULT_MAX_CHARS: usize = 10_000;

/// Instruction preceding the document text.
const INSTRUCTION: &str = "Analyze the following legal document text and identify all the variable \
fields that need to be filled in by the user.\n\
Ignore standard boilerplate text. Look for placeholders like [Name], {Date}, or contextually \
missing information.";

/// The first `max_chars` characters of `text` (never splits a UTF-8 sequence).
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Build the full prompt for `text`, truncated to `max_chars`.
pub fn build_prompt(text: &str, max_chars: usize) -> String {
    let excerpt = truncate_chars(text, max_chars);
    format!("{INSTRUCTION}\n\nDocument Text:\n{excerpt}")
}

/// Response schema for `{ variables: [{ name, description }] }`.
pub fn variable_list_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "variables": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING" },
                        "description": { "type": "STRING" }
                    },
                    "required": ["name", "description"]
                }
            }
        },
        "required": ["variables"]
    })
}
