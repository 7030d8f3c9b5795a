use serde_json::Value;

use crate::error::McpError;

/// Characters rejected anywhere in a string argument to an external tool.
const FORBIDDEN: &[(char, &str)] = &[
    ('`', "backtick"),
    ('$', "dollar sign"),
    (';', "semicolon"),
    ('|', "pipe"),
    ('&', "ampersand"),
    ('\0', "NUL byte"),
];

/// Reject arguments whose strings carry shell metacharacters.
///
/// Walks nested objects and arrays; the error names the offending field
/// as a dotted path, e.g. `arguments.files[1]`.
pub fn validate_arguments(args: &Value) -> Result<(), McpError> {
    walk(args, "arguments")
}

fn walk(value: &Value, path: &str) -> Result<(), McpError> {
    match value {
        Value::String(s) => {
            if let Some((_, what)) = FORBIDDEN.iter().find(|(c, _)| s.contains(*c)) {
                return Err(McpError::InvalidArgument {
                    field: path.to_string(),
                    reason: format!("contains forbidden character ({what})"),
                });
            }
            Ok(())
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, v)| walk(v, &format!("{path}[{i}]"))),
        Value::Object(map) => map
            .iter()
            .try_for_each(|(k, v)| walk(v, &format!("{path}.{k}"))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn plain_arguments_pass() {
        validate_arguments(&json!({
            "path": "src/main.rs",
            "limit": 10,
            "flags": ["a", "b"],
            "nested": { "ok": true, "text": "hello, world (x > y)" }
        }))
        .unwrap();
    }

    #[test]
    fn nested_metacharacters_are_rejected_with_path() {
        let err = validate_arguments(&json!({ "files": ["a.txt", "b.txt; rm -rf /"] })).unwrap_err();
        match err {
            McpError::InvalidArgument { field, reason } => {
                assert_eq!(field, "arguments.files[1]");
                assert!(reason.contains("semicolon"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn each_forbidden_character_is_caught() {
        for s in ["`id`", "$(id)", "a|b", "a&b", "a\0b"] {
            assert!(validate_arguments(&json!({ "q": s })).is_err(), "{s:?}");
        }
    }
}
