//! Turning collaborator text into typed reports.
//!
//! Two strategies, in order:
//! 1. Strict: strip an enclosing Markdown fence (```json or bare ```) and
//!    parse the remainder as the expected schema.
//! 2. Fallback: scan the text for the first balanced `{...}` object
//!    (ignoring braces inside string literals) and parse that.
//!
//! If both fail the response is `MalformedResponse`.

use mender_common::Stage;
use serde::de::DeserializeOwned;

use crate::errors::StageError;

pub fn parse_response<T: DeserializeOwned>(stage: Stage, response: &str) -> Result<T, StageError> {
    let strict_err = match serde_json::from_str::<T>(strip_fences(response)) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let Some(candidate) = first_json_object(response) else {
        return Err(StageError::malformed(
            stage,
            format!("no JSON object in response ({})", strict_err),
        ));
    };
    serde_json::from_str::<T>(candidate).map_err(|fallback_err| {
        StageError::malformed(
            stage,
            format!(
                "response did not match schema: strict parse: {}; fallback parse: {}",
                strict_err, fallback_err
            ),
        )
    })
}

/// The body of a fenced block if the whole response is one, else the trimmed text.
fn strip_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Skip a language identifier on the opening line.
    match body.find('\n') {
        Some(newline) if !body[..newline].contains('{') => body[newline + 1..].trim(),
        _ => body.trim(),
    }
}

fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
