//! warden: process bridge and launcher for supervised interactive CLI sessions.

pub mod bridge;
pub mod config;
pub mod events;
pub mod instance;
pub mod orchestrator;
pub mod port;
pub mod restart;
pub mod transport;
pub mod validation;

pub use orchestrator::{HealthReport, Orchestrator, OrchestratorError};

pub use bridge::process::{BridgeConfig, BridgeError, BridgeEvent, ProcessBridge, ProcessSpawner};
pub use bridge::protocol::{Command, CommandKind, ErrorKind, Response, SequenceId};
pub use config::LauncherConfig;
pub use events::LauncherEvent;
pub use instance::{InstanceConfig, InstanceId, InstanceInfo, InstanceStatus};
pub use restart::RestartPolicy;
pub use transport::tcp::{ClientConfig, CommandClient, CommandServer, ServerConfig};
