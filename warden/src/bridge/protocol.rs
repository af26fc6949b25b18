//! Wire protocol types for command frames.
//!
//! One JSON object per line in each direction:
//! - **Command**: client → server (or orchestrator → bridge in-process)
//! - **Response**: server → client, one per command, in arrival order

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Byte sequences written to the child for keystroke commands.
pub mod keys {
    pub const ENTER: &[u8] = b"\n";
    pub const ARROW_UP: &[u8] = b"\x1b[A";
    pub const ARROW_DOWN: &[u8] = b"\x1b[B";
    pub const INTERRUPT: &[u8] = b"\x03";
    pub const TAB: &[u8] = b"\t";
}

/// Command type, serialized as the `type` field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    /// Write `content` verbatim (no trailing newline).
    Send,
    Enter,
    Up,
    Down,
    /// Ctrl-C.
    #[serde(alias = "ctrl-c")]
    Interrupt,
    Tab,
    /// Write `content` verbatim, for escape sequences the table does not cover.
    Raw,
    Ping,
    Status,
}

impl CommandKind {
    pub const ALL: [CommandKind; 9] = [
        CommandKind::Send,
        CommandKind::Enter,
        CommandKind::Up,
        CommandKind::Down,
        CommandKind::Interrupt,
        CommandKind::Tab,
        CommandKind::Raw,
        CommandKind::Ping,
        CommandKind::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Send => "send",
            CommandKind::Enter => "enter",
            CommandKind::Up => "up",
            CommandKind::Down => "down",
            CommandKind::Interrupt => "interrupt",
            CommandKind::Tab => "tab",
            CommandKind::Raw => "raw",
            CommandKind::Ping => "ping",
            CommandKind::Status => "status",
        }
    }

    /// Parse a verb from a plain-text frame (`send hello`, `ctrl-c`, ...).
    pub fn from_verb(verb: &str) -> Option<Self> {
        let kind = match verb.to_ascii_lowercase().as_str() {
            "send" => CommandKind::Send,
            "enter" => CommandKind::Enter,
            "up" => CommandKind::Up,
            "down" => CommandKind::Down,
            "interrupt" | "ctrl-c" => CommandKind::Interrupt,
            "tab" => CommandKind::Tab,
            "raw" => CommandKind::Raw,
            "ping" => CommandKind::Ping,
            "status" => CommandKind::Status,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether the command is meaningless without a `content` payload.
    pub fn requires_content(&self) -> bool {
        matches!(self, CommandKind::Send | CommandKind::Raw)
    }

    /// Bytes to write to the child's stdin, or None for queries that never write.
    pub fn input_bytes(&self, content: Option<&str>) -> Option<Vec<u8>> {
        match self {
            CommandKind::Send | CommandKind::Raw => {
                Some(content.unwrap_or_default().as_bytes().to_vec())
            }
            CommandKind::Enter => Some(keys::ENTER.to_vec()),
            CommandKind::Up => Some(keys::ARROW_UP.to_vec()),
            CommandKind::Down => Some(keys::ARROW_DOWN.to_vec()),
            CommandKind::Interrupt => Some(keys::INTERRUPT.to_vec()),
            CommandKind::Tab => Some(keys::TAB.to_vec()),
            CommandKind::Ping | CommandKind::Status => None,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied correlation id, echoed back on the response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SequenceId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceId::Number(n) => write!(f, "{n}"),
            SequenceId::Text(s) => f.write_str(s),
        }
    }
}

/// A single directive for a child process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<SequenceId>,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            content: None,
            instance_id: None,
            timestamp: Some(Utc::now()),
            sequence_id: None,
        }
    }

    pub fn send(text: impl Into<String>) -> Self {
        Self::new(CommandKind::Send).with_content(text)
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_sequence_id(mut self, sequence_id: SequenceId) -> Self {
        self.sequence_id = Some(sequence_id);
        self
    }
}

/// Failure category carried on unsuccessful responses.
///
/// Lets a caller tell "fix your payload" apart from "back off and retry".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    RateLimited,
    Capacity,
    Timeout,
    Execution,
    NotFound,
}

impl ErrorKind {
    /// Whether retrying the same payload later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited | ErrorKind::Capacity | ErrorKind::Timeout
        )
    }
}

/// Result of executing a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<SequenceId>,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
            timestamp: Utc::now(),
            sequence_id: None,
        }
    }

    pub fn with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
            sequence_id: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            error: Some(kind),
            timestamp: Utc::now(),
            sequence_id: None,
        }
    }

    /// Echo the caller's correlation id unless the executor already set one.
    pub fn correlate(mut self, sequence_id: Option<SequenceId>) -> Self {
        if self.sequence_id.is_none() {
            self.sequence_id = sequence_id;
        }
        self
    }
}

/// Payload of a `status` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub process_alive: bool,
    pub client_count: usize,
    pub is_listening: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_kinds_serialize_kebab_case() {
        insta::assert_json_snapshot!(CommandKind::ALL, @r#"
        [
          "send",
          "enter",
          "up",
          "down",
          "interrupt",
          "tab",
          "raw",
          "ping",
          "status"
        ]
        "#);
    }

    #[test]
    fn ctrl_c_is_an_alias_for_interrupt() {
        let kind: CommandKind = serde_json::from_str("\"ctrl-c\"").unwrap();
        assert_eq!(kind, CommandKind::Interrupt);
        assert_eq!(CommandKind::from_verb("CTRL-C"), Some(CommandKind::Interrupt));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(serde_json::from_str::<CommandKind>("\"explode\"").is_err());
        assert_eq!(CommandKind::from_verb("explode"), None);
    }

    #[test]
    fn key_table() {
        assert_eq!(CommandKind::Enter.input_bytes(None), Some(b"\n".to_vec()));
        assert_eq!(CommandKind::Up.input_bytes(None), Some(b"\x1b[A".to_vec()));
        assert_eq!(CommandKind::Down.input_bytes(None), Some(b"\x1b[B".to_vec()));
        assert_eq!(CommandKind::Interrupt.input_bytes(None), Some(vec![0x03]));
        assert_eq!(CommandKind::Tab.input_bytes(None), Some(b"\t".to_vec()));
        assert_eq!(
            CommandKind::Send.input_bytes(Some("ls")),
            Some(b"ls".to_vec())
        );
        assert_eq!(
            CommandKind::Raw.input_bytes(Some("\x1b[2~")),
            Some(b"\x1b[2~".to_vec())
        );
        assert_eq!(CommandKind::Ping.input_bytes(Some("ignored")), None);
        assert_eq!(CommandKind::Status.input_bytes(None), None);
    }

    #[test]
    fn command_deserializes_camel_case_fields() {
        let cmd: Command = serde_json::from_str(
            r#"{"type":"send","content":"ls","instanceId":"abc","sequenceId":7}"#,
        )
        .unwrap();
        assert_eq!(cmd.kind, CommandKind::Send);
        assert_eq!(cmd.content.as_deref(), Some("ls"));
        assert_eq!(cmd.instance_id.as_deref(), Some("abc"));
        assert_eq!(cmd.sequence_id, Some(SequenceId::Number(7)));
        assert!(cmd.timestamp.is_none());
    }

    #[test]
    fn sequence_id_accepts_strings() {
        let cmd: Command = serde_json::from_str(r#"{"type":"ping","sequenceId":"req-1"}"#).unwrap();
        assert_eq!(cmd.sequence_id, Some(SequenceId::Text("req-1".to_string())));
    }

    #[test]
    fn failure_response_omits_empty_fields() {
        let resp = Response::failure(ErrorKind::RateLimited, "slow down")
            .correlate(Some(SequenceId::Number(3)));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "rate_limited");
        assert_eq!(value["sequenceId"], 3);
        assert!(value.get("data").is_none());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn correlate_keeps_existing_id() {
        let mut resp = Response::ok("pong");
        resp.sequence_id = Some(SequenceId::Number(1));
        let resp = resp.correlate(Some(SequenceId::Number(2)));
        assert_eq!(resp.sequence_id, Some(SequenceId::Number(1)));
    }

    #[test]
    fn status_report_wire_shape() {
        let report = StatusReport {
            process_alive: true,
            client_count: 0,
            is_listening: true,
        };
        insta::assert_json_snapshot!(report, @r#"
        {
          "processAlive": true,
          "clientCount": 0,
          "isListening": true
        }
        "#);
    }

    #[test]
    fn retryable_error_kinds() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
    }
}
