//! Typed launcher notifications.

use serde::Serialize;

use crate::bridge::process::OutputStream;
use crate::bridge::protocol::CommandKind;
use crate::instance::{InstanceId, InstanceStatus};

/// Published on the orchestrator's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LauncherEvent {
    StatusChanged {
        instance_id: InstanceId,
        old: InstanceStatus,
        new: InstanceStatus,
    },
    InstanceFailed {
        instance_id: InstanceId,
        operation: &'static str,
        reason: String,
    },
    InstanceRestarted {
        instance_id: InstanceId,
        attempt: u32,
    },
    /// Auto-restart gave up; the instance stays in `error`.
    RestartsExhausted {
        instance_id: InstanceId,
        attempts: u32,
    },
    CommandExecuted {
        instance_id: InstanceId,
        kind: CommandKind,
        success: bool,
    },
    Output {
        instance_id: InstanceId,
        stream: OutputStream,
        data: String,
    },
}

impl LauncherEvent {
    pub fn instance_id(&self) -> InstanceId {
        match self {
            LauncherEvent::StatusChanged { instance_id, .. }
            | LauncherEvent::InstanceFailed { instance_id, .. }
            | LauncherEvent::InstanceRestarted { instance_id, .. }
            | LauncherEvent::RestartsExhausted { instance_id, .. }
            | LauncherEvent::CommandExecuted { instance_id, .. }
            | LauncherEvent::Output { instance_id, .. } => *instance_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_change_wire_shape() {
        let id = InstanceId::parse("6f1c1b7e-3a43-4d57-9b0e-2f6a9f0f7c11").unwrap();
        let event = LauncherEvent::StatusChanged {
            instance_id: id,
            old: InstanceStatus::Running,
            new: InstanceStatus::Error,
        };
        assert_eq!(event.instance_id(), id);
        insta::assert_json_snapshot!(event, @r#"
        {
          "event": "status_changed",
          "instance_id": "6f1c1b7e-3a43-4d57-9b0e-2f6a9f0f7c11",
          "old": "running",
          "new": "error"
        }
        "#);
    }

    #[test]
    fn command_event_uses_wire_kind() {
        let event = LauncherEvent::CommandExecuted {
            instance_id: InstanceId::new(),
            kind: CommandKind::Interrupt,
            success: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "interrupt");
        assert_eq!(value["event"], "command_executed");
    }
}
