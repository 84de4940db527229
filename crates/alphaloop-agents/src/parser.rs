use crate::error::AgentError;

/// Extract the first JSON object from a string that may contain surrounding text.
///
/// Handles the response shapes models actually produce:
/// - Clean JSON: `{"key": "value"}`
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prefix text: `Here is the decision:\n{"key": "value"}`
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    // Try parsing the whole thing as JSON first
    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    // Try extracting from markdown code block
    if let Some(body) = fenced_block(trimmed) {
        if serde_json::from_str::<serde_json::Value>(body).is_ok() {
            return Ok(body.to_string());
        }
    }

    // Try finding the first { ... } pair using brace matching
    if let Some(candidate) = balanced_object(trimmed) {
        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
            return Ok(candidate.to_string());
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

/// Same extraction, decoded into a value.
pub fn extract_value(text: &str) -> Result<serde_json::Value, AgentError> {
    let json_str = extract_json(text)?;
    Ok(serde_json::from_str(&json_str)?)
}

/// Body of the first fenced code block, ignoring the info string
/// (```json, ``` etc.) on the opening line.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let rest = &text[open + 3..];
    let body = &rest[rest.find('\n')? + 1..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// First balanced `{ ... }` span, skipping braces inside string literals.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut iter = text.char_indices();

    while let Some((i, ch)) = iter.next() {
        match ch {
            // Consume the escaped character wholesale so \" stays literal.
            '\\' if in_string => {
                iter.next();
            }
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start?..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_clean_json() {
        let input = r#"{"reasoning": "momentum", "trade_decisions": []}"#;
        let result = extract_json(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn extract_from_markdown() {
        let input = "Here is my decision:\n```json\n{\"reasoning\": \"r\"}\n```\nDone.";
        let result = extract_json(input).unwrap();
        assert_eq!(result, r#"{"reasoning": "r"}"#);
    }

    #[test]
    fn extract_from_markdown_no_lang() {
        let input = "Result:\n```\n{\"reasoning\": \"r\"}\n```";
        let result = extract_json(input).unwrap();
        assert_eq!(result, r#"{"reasoning": "r"}"#);
    }

    #[test]
    fn extract_with_prefix_text() {
        let input = "Based on the indicators, here is the result:\n{\"reasoning\": \"bullish\", \"trade_decisions\": []}";
        let result = extract_json(input).unwrap();
        assert!(result.contains("bullish"));
    }

    #[test]
    fn extract_nested_json() {
        let input = r#"{"outer": {"inner": "value"}, "list": [1, 2, 3]}"#;
        let result = extract_json(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn extract_with_braces_in_strings() {
        let input = r#"{"rationale": "price went from {low} to {high}", "asset": "BTC"}"#;
        let result = extract_json(input).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["asset"], "BTC");
    }

    #[test]
    fn extract_skips_braces_in_prefix_quotes() {
        let input = r#"The model said "use {allocation}" earlier. {"asset": "BTC"}"#;
        let result = extract_json(input).unwrap();
        assert_eq!(result, r#"{"asset": "BTC"}"#);
    }

    #[test]
    fn extract_no_json() {
        let input = "This is just plain text with no JSON at all.";
        assert!(extract_json(input).is_err());
    }

    #[test]
    fn extract_value_decodes() {
        let input = "prefix ```json\n{\"a\": 1}\n```";
        let value = extract_value(input).unwrap();
        assert_eq!(value["a"], 1);
    }
}
