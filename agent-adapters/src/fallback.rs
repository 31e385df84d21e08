//! Textual function calling for models without a native protocol.
//!
//! Functions are described in the system message and the model is asked to
//! answer with lines of the form
//! `FUNCTION_CALL: name(param="value", other=2)`. Parsing is best effort:
//! lines that do not match are skipped with a warning.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::traits::{FunctionCall, FunctionSpec, MessageRole, PromptMessage};

/// Prefix identifying a call line in model output.
pub const FUNCTION_CALL_MARKER: &str = "FUNCTION_CALL:";

static CALL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\((.*)\)").expect("static pattern is valid"));

/// Renders the instructions describing `functions`.
#[must_use]
pub fn describe_functions(functions: &[FunctionSpec]) -> String {
    let mut prompt = String::from("Available functions:\n");
    for function in functions {
        let _ = writeln!(prompt, "- {}: {}", function.name, function.description);
        let params = function
            .parameters
            .get("properties")
            .and_then(Value::as_object)
            .filter(|properties| !properties.is_empty());
        if let Some(properties) = params {
            let rendered: Vec<String> = properties
                .iter()
                .map(|(name, info)| {
                    let kind = info.get("type").and_then(Value::as_str).unwrap_or("any");
                    let description = info.get("description").and_then(Value::as_str).unwrap_or("");
                    format!("{name} ({kind}): {description}")
                })
                .collect();
            let _ = writeln!(prompt, "  Parameters: {}", rendered.join(", "));
        }
    }
    prompt.push_str(
        "\nTo use a function, respond with:\n\
         FUNCTION_CALL: function_name(param1=\"value1\", param2=\"value2\")\n\n\
         You can call multiple functions by using multiple FUNCTION_CALL lines.\n\
         After function calls, provide a natural response based on the results.",
    );
    prompt
}

/// Returns `messages` with the function instructions appended to the leading
/// system message, or prepended as a new one.
#[must_use]
pub fn inject_functions(
    messages: &[PromptMessage],
    functions: &[FunctionSpec],
) -> Vec<PromptMessage> {
    let instructions = describe_functions(functions);
    let mut enhanced = messages.to_vec();
    match enhanced.first_mut() {
        Some(first) if first.role() == MessageRole::System => {
            first.append_content(&format!("\n\n{instructions}"));
        }
        _ => enhanced.insert(0, PromptMessage::system(instructions)),
    }
    enhanced
}

/// Extracts every well-formed call line from `content`.
#[must_use]
pub fn parse_function_calls(content: &str) -> Vec<FunctionCall> {
    if !content.contains(FUNCTION_CALL_MARKER) {
        return Vec::new();
    }
    content
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(FUNCTION_CALL_MARKER))
        .filter_map(|call| {
            let call = call.trim();
            let Some(captures) = CALL_PATTERN.captures(call) else {
                warn!(call, "failed to parse function call");
                return None;
            };
            let name = captures.get(1).map_or("", |m| m.as_str());
            let params = captures.get(2).map_or("", |m| m.as_str());
            Some(FunctionCall::new(name, parse_arguments(params)))
        })
        .collect()
}

/// Renders executed call results as a user-visible message body.
#[must_use]
pub fn format_results(results: &[(String, String)]) -> String {
    let mut body = String::from("Function results:");
    for (name, result) in results {
        let _ = write!(body, "\n- {name}: {result}");
    }
    body
}

fn parse_arguments(params: &str) -> Map<String, Value> {
    let mut arguments = Map::new();
    for pair in split_top_level(params) {
        let Some((key, value)) = pair.split_once('=') else {
            if !pair.trim().is_empty() {
                debug!(pair, "ignoring argument without `=`");
            }
            continue;
        };
        let key = key.trim().trim_matches('"').trim_matches('\'');
        if key.is_empty() {
            continue;
        }
        arguments.insert(key.to_owned(), parse_value(value.trim()));
    }
    arguments
}

fn parse_value(raw: &str) -> Value {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            let inner = &raw[1..raw.len() - 1];
            return Value::String(inner.replace(&format!("\\{quote}"), &quote.to_string()));
        }
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => value,
        _ => Value::String(raw.to_owned()),
    }
}

/// Splits on commas outside quotes.
fn split_top_level(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (index, c) in params.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (c, quote) {
            ('\\', Some(_)) => escaped = true,
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(open)) if c == open => quote = None,
            (',', None) => {
                parts.push(&params[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts
}
