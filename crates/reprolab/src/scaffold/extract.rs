use serde_json::Value;

use super::schema::BundleError;

/// Extracts the first JSON object from model output, handling extra text
/// around it. Uses a stateful scanner that tracks string boundaries, escape
/// sequences and open brackets; output that ends before the object closes
/// gets its open string and brackets closed.
pub fn extract_json_object(response: &str) -> Option<String> {
    let start = response.find('{')?;

    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in response[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => open.push(c),
            '}' | ']' if !in_string => {
                open.pop();
                if open.is_empty() {
                    let end = start + i + c.len_utf8();
                    return Some(response[start..end].to_string());
                }
            }
            _ => {}
        }
    }

    let mut text = response[start..].to_string();
    if in_string {
        if escape_next {
            text.pop();
        }
        text.push('"');
    } else {
        let kept = text.trim_end().trim_end_matches(',').len();
        text.truncate(kept);
        if text.ends_with(':') {
            text.push_str("null");
        }
    }
    while let Some(bracket) = open.pop() {
        text.push(if bracket == '{' { '}' } else { ']' });
    }
    Some(text)
}

/// Escapes raw control characters that appear inside string literals.
/// Models regularly emit literal newlines in file contents.
pub fn escape_control_chars(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escape_next = false;

    for c in json.chars() {
        if escape_next {
            escape_next = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' if in_string => {
                escape_next = true;
                out.push(c);
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            c if in_string && (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            _ => out.push(c),
        }
    }
    out
}

/// Extract, normalize and parse one model response.
pub fn parse_candidate(response: &str) -> Result<Value, BundleError> {
    let object = extract_json_object(response).ok_or(BundleError::NoJson)?;
    serde_json::from_str(&escape_control_chars(&object))
        .map_err(|e| BundleError::InvalidJson(e.to_string()))
}
