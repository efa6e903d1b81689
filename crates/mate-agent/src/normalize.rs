//! Tool argument normalization
//!
//! Models hand back arguments as objects, as lists of pairs, or as text that
//! may be fenced or wrapped in prose. Everything becomes a flat JSON object.

use serde_json::{Map, Value};

/// Turn a model-supplied argument blob into a key/value mapping.
///
/// Never fails; an unusable blob yields an empty map. String values are
/// HTML-unescaped one level deep.
pub fn normalize_arguments(raw: &Value) -> Map<String, Value> {
    let mut args = match raw {
        Value::Object(map) => map.clone(),
        Value::Array(items) => from_pairs(items),
        Value::String(text) => parse_text(text),
        _ => Map::new(),
    };

    for value in args.values_mut() {
        if let Value::String(s) = value {
            let decoded = html_escape::decode_html_entities(s.as_str()).into_owned();
            *s = decoded;
        }
    }
    args
}

fn from_pairs(items: &[Value]) -> Map<String, Value> {
    items
        .iter()
        .filter_map(|item| match item.as_array().map(Vec::as_slice) {
            Some([Value::String(key), value]) => Some((key.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

fn parse_text(raw: &str) -> Map<String, Value> {
    let cleaned = strip_fence(raw.trim());

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => return map,
        Ok(Value::Array(items)) => return from_pairs(&items),
        _ => {}
    }

    // Recover whatever top-level objects are embedded in the raw text.
    let mut merged = Map::new();
    let mut depth = 0usize;
    let mut start = None;
    for (i, ch) in raw.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Ok(Value::Object(obj)) = serde_json::from_str(&raw[s..=i]) {
                            merged.extend(obj);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    merged
}

/// Drop a leading and trailing code fence line, if present
fn strip_fence(text: &str) -> String {
    if !text.starts_with("```") {
        return text.to_string();
    }
    let mut lines: Vec<&str> = text.lines().collect();
    if lines.len() < 2 {
        return text.to_string();
    }
    if lines.first().is_some_and(|l| l.starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.starts_with("```")) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_object_passthrough() {
        let raw = json!({"latitude": 46.85, "longitude": -121.76});
        assert_eq!(normalize_arguments(&raw), obj(raw.clone()));
    }

    #[test]
    fn test_fenced_json_is_parsed_and_unescaped() {
        let raw = json!("```json\n{\"where\": \"length_km &gt; 5 AND loop = ?\", \"sql_params\": [1]}\n```");
        assert_eq!(
            normalize_arguments(&raw),
            obj(json!({"where": "length_km > 5 AND loop = ?", "sql_params": [1]}))
        );
    }

    #[test]
    fn test_prose_with_one_valid_and_one_broken_span() {
        let raw = json!(
            "Sure! Here are the args: {\"location\": \"Mount Olympus\"} and also {\"broken\": } thanks"
        );
        assert_eq!(
            normalize_arguments(&raw),
            obj(json!({"location": "Mount Olympus"}))
        );
    }

    #[test]
    fn test_multiple_spans_merge() {
        let raw = json!("{\"a\": 1} then {\"b\": {\"nested\": true}}");
        assert_eq!(
            normalize_arguments(&raw),
            obj(json!({"a": 1, "b": {"nested": true}}))
        );
    }

    #[test]
    fn test_pairs_become_mapping() {
        let raw = json!([["agent_name", "WebAgent"], ["instruction", "permits for Enchantments"]]);
        assert_eq!(
            normalize_arguments(&raw),
            obj(json!({"agent_name": "WebAgent", "instruction": "permits for Enchantments"}))
        );
    }

    #[test]
    fn test_unescape_is_one_level_deep() {
        let raw = json!({"q": "a &amp; b", "inner": {"q": "c &amp; d"}});
        let args = normalize_arguments(&raw);
        assert_eq!(args["q"], "a & b");
        assert_eq!(args["inner"]["q"], "c &amp; d");
    }

    #[test]
    fn test_total_failure_is_empty() {
        assert!(normalize_arguments(&json!("no json here")).is_empty());
        assert!(normalize_arguments(&json!(42)).is_empty());
        assert!(normalize_arguments(&json!("} stray {")).is_empty());
    }
}
