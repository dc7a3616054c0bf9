use serde_json::{Map, Value};

/// JSON-schema keys the Gemini sink accepts. Everything else is stripped
/// before the declaration goes upstream.
const GEMINI_SCHEMA_KEYS: [&str; 7] = [
    "type",
    "description",
    "properties",
    "required",
    "enum",
    "items",
    "nullable",
];

/// Recursively strip schema properties the Gemini sink rejects.
pub fn sanitize_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                if !GEMINI_SCHEMA_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let cleaned = match key.as_str() {
                    "properties" => match value {
                        Value::Object(props) => Value::Object(
                            props
                                .iter()
                                .map(|(name, prop)| (name.clone(), sanitize_gemini_schema(prop)))
                                .collect(),
                        ),
                        other => other.clone(),
                    },
                    "items" => sanitize_gemini_schema(value),
                    _ => value.clone(),
                };
                out.insert(key.clone(), cleaned);
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Tools whose Gemini function calls sometimes come back with alternative
/// argument names. The canonical schema uses `pattern` and `path`.
const PATTERN_PATH_TOOLS: [&str; 5] = ["Grep", "Search", "Glob", "Read", "LS"];

/// Rewrite known alternative argument spellings back to the canonical
/// ones: `query`/`description` -> `pattern`, `paths`/`paths[0]` -> `path`.
pub fn correct_function_args(tool_name: &str, args: &mut Value) {
    if !PATTERN_PATH_TOOLS.contains(&tool_name) {
        return;
    }
    let Value::Object(map) = args else {
        return;
    };

    if !map.contains_key("pattern") {
        for alias in ["query", "description"] {
            if let Some(value) = map.remove(alias) {
                map.insert("pattern".to_string(), value);
                break;
            }
        }
    }

    if !map.contains_key("path")
        && let Some(paths) = map.remove("paths")
    {
        match paths {
            Value::Array(items) => {
                if let Some(first) = items.into_iter().next() {
                    map.insert("path".to_string(), first);
                }
            }
            other => {
                map.insert("path".to_string(), other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_unsupported_keys_recursively() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "$schema": "http://json-schema.org/draft-07/schema#",
            "properties": {
                "pattern": {"type": "string", "minLength": 1, "description": "regex"},
                "flags": {"type": "array", "items": {"type": "string", "format": "ere"}}
            },
            "required": ["pattern"]
        });
        let cleaned = sanitize_gemini_schema(&schema);
        assert_eq!(
            cleaned,
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "regex"},
                    "flags": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["pattern"]
            })
        );
    }

    #[test]
    fn corrects_query_to_pattern() {
        let mut args = json!({"query": "fn main", "paths": ["src", "tests"]});
        correct_function_args("Grep", &mut args);
        assert_eq!(args, json!({"pattern": "fn main", "path": "src"}));
    }

    #[test]
    fn leaves_canonical_args_alone() {
        let mut args = json!({"pattern": "x", "path": "src"});
        correct_function_args("Glob", &mut args);
        assert_eq!(args, json!({"pattern": "x", "path": "src"}));
    }

    #[test]
    fn ignores_unlisted_tools() {
        let mut args = json!({"query": "x"});
        correct_function_args("WebSearch", &mut args);
        assert_eq!(args, json!({"query": "x"}));
    }
}
