/// Prover output interpretation
///
/// The prover answers with one JSON value on stdout. When that value is an
/// object carrying a `messages` array, the proof succeeds iff no message has
/// severity `"error"`. Output without a message list is treated as success;
/// an empty but well-formed answer is indistinguishable from "no errors".
use serde_json::Value;

/// Severity marking a failed proof
pub const ERROR_SEVERITY: &str = "error";

/// Interpreted prover output
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    /// Well-formed output; `success` is false on any error-severity message
    Parsed { payload: Value, success: bool },
    /// Output was not JSON
    ParseFailed { raw_output: String, error: String },
}

/// Parses raw prover output into a verdict
pub struct ResultInterpreter;

impl ResultInterpreter {
    pub fn interpret(raw_output: &[u8]) -> Interpretation {
        match serde_json::from_slice::<Value>(raw_output) {
            Ok(payload) => {
                let success = !Self::has_error_message(&payload);
                Interpretation::Parsed { payload, success }
            }
            Err(e) => Interpretation::ParseFailed {
                raw_output: String::from_utf8_lossy(raw_output).into_owned(),
                error: e.to_string(),
            },
        }
    }

    /// True when the `messages` list contains an error-severity entry.
    /// Entries that are not objects, or lack a string severity, are
    /// non-fatal.
    pub fn has_error_message(payload: &Value) -> bool {
        payload
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| {
                messages.iter().any(|msg| {
                    msg.get("severity").and_then(Value::as_str) == Some(ERROR_SEVERITY)
                })
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn succeeds(raw: &[u8]) -> bool {
        matches!(
            ResultInterpreter::interpret(raw),
            Interpretation::Parsed { success: true, .. }
        )
    }

    #[test]
    fn test_error_message_fails_and_is_preserved() {
        let raw = br#"{"messages":[{"severity":"error","text":"x"}]}"#;
        match ResultInterpreter::interpret(raw) {
            Interpretation::Parsed { payload, success } => {
                assert!(!success);
                assert_eq!(payload["messages"][0]["text"], "x");
                assert_eq!(payload["messages"].as_array().unwrap().len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_warning_only_succeeds() {
        assert!(succeeds(br#"{"messages":[{"severity":"warning"}]}"#));
    }

    #[test]
    fn test_missing_messages_defaults_to_success() {
        assert!(succeeds(br#"{"env": 0}"#));
        assert!(succeeds(b"[1, 2]"));
        assert!(succeeds(b"\"done\"\n\n"));
    }

    #[test]
    fn test_mixed_messages_keep_all_entries() {
        let raw = json!({
            "messages": [
                {"severity": "info", "data": "a"},
                "not an object",
                {"severity": "error", "data": "b"},
                {"severity": "warning", "data": "c"}
            ]
        });
        let bytes = serde_json::to_vec(&raw).unwrap();
        match ResultInterpreter::interpret(&bytes) {
            Interpretation::Parsed { payload, success } => {
                assert!(!success);
                assert_eq!(payload, raw);
                assert!(ResultInterpreter::has_error_message(&payload));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_output() {
        match ResultInterpreter::interpret(b"lake: unknown target 'repl'") {
            Interpretation::ParseFailed { raw_output, error } => {
                assert_eq!(raw_output, "lake: unknown target 'repl'");
                assert!(!error.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!succeeds(b""));
    }
}
