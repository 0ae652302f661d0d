//! Tool-call arguments are model output and may carry text crafted to mislead
//! whoever reviews them: bidirectional overrides that reorder what is
//! displayed, zero-width characters, control bytes. Every such character is
//! replaced by a visible ASCII escape (`\u{202e}`), so sanitizing twice is a
//! no-op.

use std::borrow::Cow;

use serde_json::Value;

/// Returns true for characters that must not be echoed verbatim.
pub fn is_suspicious_char(c: char) -> bool {
    match c {
        '\t' | '\n' | '\r' => false,
        c if c.is_control() => true,
        // bidirectional marks, embeddings, overrides and isolates
        '\u{061C}' | '\u{200E}' | '\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' => {
            true
        }
        // zero-width and invisible formatting
        '\u{00AD}' | '\u{180E}' | '\u{200B}'..='\u{200D}' | '\u{2060}'..='\u{2064}' | '\u{FEFF}' => {
            true
        }
        // tag characters
        '\u{E0000}'..='\u{E007F}' => true,
        _ => false,
    }
}

/// Replaces suspicious characters with `\u{xxxx}` escapes.
pub fn sanitize_text(input: &str) -> Cow<'_, str> {
    if !input.chars().any(is_suspicious_char) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        if is_suspicious_char(c) {
            out.push_str(&format!("\\u{{{:04x}}}", c as u32));
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Sanitizes every string (keys included) inside a JSON value.
pub fn sanitize_json(value: Value) -> Value {
    match value {
        Value::String(text) if text.chars().any(is_suspicious_char) => {
            Value::String(sanitize_text(&text).into_owned())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_json).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (sanitize_text(&key).into_owned(), sanitize_json(value)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_is_borrowed_untouched() {
        let text = "ls -la /tmp\n\tdone";
        assert!(matches!(sanitize_text(text), Cow::Borrowed(t) if t == text));
    }

    #[test]
    fn bidi_override_becomes_escape_without_further_suspicious_chars() {
        let text = "rm -rf \u{202E}txt.exe";
        let clean = sanitize_text(text).into_owned();
        assert_eq!(clean, "rm -rf \\u{202e}txt.exe");
        assert!(!clean.chars().any(is_suspicious_char));
    }

    #[test]
    fn sanitizing_is_idempotent() {
        let text = "a\u{200B}b\u{0007}c\u{E0041}";
        let once = sanitize_text(text).into_owned();
        let twice = sanitize_text(&once).into_owned();
        assert_eq!(once, twice);
    }

    #[test]
    fn json_keys_and_nested_strings_are_sanitized() {
        let value = serde_json::json!({
            "pa\u{2066}th": ["ok", "x\u{FEFF}y"],
            "n": 3
        });
        let clean = sanitize_json(value);
        assert_eq!(
            clean,
            serde_json::json!({
                "pa\\u{2066}th": ["ok", "x\\u{feff}y"],
                "n": 3
            })
        );
        assert_eq!(sanitize_json(clean.clone()), clean);
    }
}
