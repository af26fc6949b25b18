//! Command validation.
//!
//! Rejects malformed frames before anything reaches process I/O. JSON frames
//! are checked against a compiled JSON Schema, then against payload limits
//! the schema cannot express (content length depends on configuration).
//! Plain-text frames (`send hello`, `ctrl-c`) are accepted for hand-typed
//! sessions and go through the same payload checks.

use std::sync::LazyLock;

use serde_json::Value;

use crate::bridge::protocol::{Command, CommandKind};

/// Default upper bound on `content`, in bytes.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10 * 1024;

static COMMAND_SCHEMA: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    let kinds: Vec<&str> = CommandKind::ALL.iter().map(|k| k.as_str()).collect();
    let schema = serde_json::json!({
        "type": "object",
        "required": ["type"],
        "additionalProperties": false,
        "properties": {
            // "ctrl-c" is accepted as an alias on the wire
            "type": { "type": "string", "enum": kinds.iter().copied().chain(["ctrl-c"]).collect::<Vec<_>>() },
            "content": { "type": "string" },
            "instanceId": { "type": "string" },
            "timestamp": { "type": "string" },
            "sequenceId": { "type": ["string", "integer"] }
        }
    });
    jsonschema::validator_for(&schema).expect("built-in command schema must compile")
});

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub msg: String,
}

impl FieldError {
    fn new(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            msg: msg.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.msg)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    /// The frame is not parseable at all.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame parsed but violates the command schema or payload limits.
    #[error("invalid command: {}", join_fields(.0))]
    Invalid(Vec<FieldError>),
}

impl ValidationError {
    pub fn fields(&self) -> &[FieldError] {
        match self {
            ValidationError::Malformed(_) => &[],
            ValidationError::Invalid(fields) => fields,
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validates commands against the protocol schema and payload limits.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    max_content_length: usize,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTENT_LENGTH)
    }
}

impl CommandValidator {
    pub fn new(max_content_length: usize) -> Self {
        Self { max_content_length }
    }

    pub fn max_content_length(&self) -> usize {
        self.max_content_length
    }

    /// Parse and validate one frame, JSON or plain text.
    pub fn parse_frame(&self, frame: &str) -> Result<Command, ValidationError> {
        let frame = frame.trim_end_matches(['\r', '\n']);
        if frame.trim_start().starts_with('{') {
            let value: Value = serde_json::from_str(frame)
                .map_err(|e| ValidationError::Malformed(e.to_string()))?;
            self.validate_value(&value)
        } else {
            self.parse_text(frame)
        }
    }

    /// Validate an already-parsed JSON value and convert it to a Command.
    pub fn validate_value(&self, value: &Value) -> Result<Command, ValidationError> {
        if COMMAND_SCHEMA.validate(value).is_err() {
            let errors: Vec<FieldError> = COMMAND_SCHEMA
                .iter_errors(value)
                .map(|e| FieldError::new(schema_field(value, &e.to_string()), e.to_string()))
                .collect();
            return Err(ValidationError::Invalid(errors));
        }

        let command: Command = serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::Invalid(vec![FieldError::new("command", e.to_string())]))?;
        self.validate(&command)?;
        Ok(command)
    }

    /// Payload checks on a typed command.
    pub fn validate(&self, command: &Command) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        match command.content.as_deref() {
            Some(content) if content.len() > self.max_content_length => {
                errors.push(FieldError::new(
                    "content",
                    format!(
                        "length {} exceeds maximum of {} bytes",
                        content.len(),
                        self.max_content_length
                    ),
                ));
            }
            Some("") | None if command.kind.requires_content() => {
                errors.push(FieldError::new(
                    "content",
                    format!("required for '{}' commands", command.kind),
                ));
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Invalid(errors))
        }
    }

    fn parse_text(&self, frame: &str) -> Result<Command, ValidationError> {
        let (verb, rest) = match frame.split_once(' ') {
            Some((verb, rest)) => (verb, Some(rest)),
            None => (frame, None),
        };

        let kind = CommandKind::from_verb(verb.trim()).ok_or_else(|| {
            ValidationError::Invalid(vec![FieldError::new(
                "type",
                format!("unknown command '{}'", verb.trim()),
            )])
        })?;

        let mut command = Command::new(kind);
        if kind.requires_content()
            && let Some(rest) = rest
        {
            command.content = Some(rest.to_string());
        }
        self.validate(&command)?;
        Ok(command)
    }
}

/// Best-effort attribution of a schema error to a top-level property.
fn schema_field(value: &Value, msg: &str) -> String {
    if let Some(obj) = value.as_object() {
        for key in obj.keys() {
            if msg.contains(&format!("\"{key}\"")) || msg.contains(&format!("'{key}'")) {
                return key.clone();
            }
        }
        if !obj.contains_key("type") {
            return "type".to_string();
        }
        if let Some(t) = obj.get("type")
            && msg.contains(&t.to_string())
        {
            return "type".to_string();
        }
    }
    "command".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::SequenceId;

    #[test]
    fn accepts_minimal_json_command() {
        let v = CommandValidator::default();
        let cmd = v.parse_frame(r#"{"type":"enter"}"#).unwrap();
        assert_eq!(cmd.kind, CommandKind::Enter);
    }

    #[test]
    fn accepts_full_json_command() {
        let v = CommandValidator::default();
        let cmd = v
            .parse_frame(
                r#"{"type":"send","content":"ls","instanceId":"i-1","timestamp":"2024-01-01T00:00:00Z","sequenceId":"s-9"}"#,
            )
            .unwrap();
        assert_eq!(cmd.content.as_deref(), Some("ls"));
        assert_eq!(cmd.sequence_id, Some(SequenceId::Text("s-9".to_string())));
        assert!(cmd.timestamp.is_some());
    }

    #[test]
    fn rejects_unknown_type() {
        let v = CommandValidator::default();
        let err = v.parse_frame(r#"{"type":"format-disk"}"#).unwrap_err();
        assert!(matches!(err, ValidationError::Invalid(_)));
    }

    #[test]
    fn rejects_missing_type() {
        let v = CommandValidator::default();
        let err = v.parse_frame(r#"{"content":"hi"}"#).unwrap_err();
        assert!(err.fields().iter().any(|f| f.field == "type"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let v = CommandValidator::default();
        assert!(v.parse_frame(r#"{"type":"ping","extra":1}"#).is_err());
    }

    #[test]
    fn rejects_non_string_content() {
        let v = CommandValidator::default();
        assert!(v.parse_frame(r#"{"type":"send","content":42}"#).is_err());
    }

    #[test]
    fn rejects_garbage() {
        let v = CommandValidator::default();
        let err = v.parse_frame("{not json").unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }

    #[test]
    fn rejects_oversized_content() {
        let v = CommandValidator::new(8);
        let err = v.parse_frame(r#"{"type":"send","content":"123456789"}"#).unwrap_err();
        assert_eq!(err.fields()[0].field, "content");

        // exactly at the limit is fine
        assert!(v.parse_frame(r#"{"type":"send","content":"12345678"}"#).is_ok());
    }

    #[test]
    fn send_requires_content() {
        let v = CommandValidator::default();
        assert!(v.parse_frame(r#"{"type":"send"}"#).is_err());
        assert!(v.parse_frame(r#"{"type":"raw","content":""}"#).is_err());
        assert!(v.validate(&Command::new(CommandKind::Ping)).is_ok());
    }

    #[test]
    fn parses_text_frames() {
        let v = CommandValidator::default();

        let cmd = v.parse_frame("send hello world").unwrap();
        assert_eq!(cmd.kind, CommandKind::Send);
        assert_eq!(cmd.content.as_deref(), Some("hello world"));

        assert_eq!(v.parse_frame("ctrl-c").unwrap().kind, CommandKind::Interrupt);
        assert_eq!(v.parse_frame("up\r\n").unwrap().kind, CommandKind::Up);
        assert_eq!(v.parse_frame("status").unwrap().kind, CommandKind::Status);
    }

    #[test]
    fn text_frames_share_payload_limits() {
        let v = CommandValidator::new(4);
        assert!(v.parse_frame("send hello").is_err());
        assert!(v.parse_frame("send").is_err());
        assert!(v.parse_frame("dance").is_err());
    }

    #[test]
    fn error_message_lists_fields() {
        let v = CommandValidator::new(2);
        let err = v.parse_frame("send abc").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid command: content: length 3 exceeds maximum of 2 bytes"
        );
    }
}
