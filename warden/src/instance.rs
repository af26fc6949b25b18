//! Instance records: configuration, lifecycle status, and snapshots.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a supervised instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(uuid::Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an instance.
///
/// `starting → running → stopping → stopped`, with `running → error` on
/// failure and `error → starting` when auto-restart kicks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
        }
    }

    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Error)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Error)
                | (Error, Starting)
                | (Error, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Stopped)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("project path is empty")]
    EmptyProjectPath,
    #[error("project path does not exist: {0}")]
    MissingProjectPath(PathBuf),
    #[error("project path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("port must be between 1 and 65535")]
    InvalidPort,
    #[error("invalid environment variable name: {0:?}")]
    InvalidEnvKey(String),
    #[error("program is empty")]
    EmptyProgram,
}

/// Caller-supplied configuration for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    /// Working directory for the child process.
    pub project_path: PathBuf,
    /// Preferred port; the next free port is used if taken.
    #[serde(default, rename = "tcpPort", alias = "port")]
    pub port: Option<u16>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Extra arguments appended after the launcher's default arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Overrides the launcher's default program.
    #[serde(default)]
    pub program: Option<String>,
}

impl InstanceConfig {
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            port: None,
            name: None,
            auto_restart: false,
            env: HashMap::new(),
            args: Vec::new(),
            program: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyProjectPath);
        }
        if !self.project_path.exists() {
            return Err(ConfigError::MissingProjectPath(self.project_path.clone()));
        }
        if !self.project_path.is_dir() {
            return Err(ConfigError::NotADirectory(self.project_path.clone()));
        }
        if self.port == Some(0) {
            return Err(ConfigError::InvalidPort);
        }
        if let Some(key) = self
            .env
            .keys()
            .find(|k| k.is_empty() || k.contains('=') || k.contains('\0'))
        {
            return Err(ConfigError::InvalidEnvKey(key.clone()));
        }
        if let Some(program) = &self.program
            && program.trim().is_empty()
        {
            return Err(ConfigError::EmptyProgram);
        }
        Ok(())
    }

    /// Display name, falling back to the project directory name.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.project_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.project_path.display().to_string())
    }
}

/// Snapshot of an instance for API consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub name: String,
    pub config: InstanceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Advisory; owned by whoever tracks the assistant's sessions.
    pub session_ids: Vec<String>,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl InstanceInfo {
    pub fn new(id: InstanceId, config: InstanceConfig) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: config.display_name(),
            config,
            port: None,
            pid: None,
            status: InstanceStatus::Starting,
            created_at: now,
            last_activity: now,
            session_ids: Vec::new(),
            restart_count: 0,
            last_error: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        insta::assert_json_snapshot!(
            [
                InstanceStatus::Starting,
                InstanceStatus::Running,
                InstanceStatus::Stopping,
                InstanceStatus::Stopped,
                InstanceStatus::Error,
            ],
            @r#"
        [
          "starting",
          "running",
          "stopping",
          "stopped",
          "error"
        ]
        "#
        );
    }

    #[test]
    fn happy_path_transitions() {
        use InstanceStatus::*;
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn restart_transitions() {
        use InstanceStatus::*;
        assert!(Running.can_transition_to(Error));
        assert!(Error.can_transition_to(Starting));
        assert!(Error.can_transition_to(Stopping));
    }

    #[test]
    fn no_going_back() {
        use InstanceStatus::*;
        assert!(!Stopped.can_transition_to(Starting));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Error.can_transition_to(Running));
        assert!(Stopped.is_terminal());
    }

    #[test]
    fn config_deserializes_dashboard_shape() {
        let config: InstanceConfig =
            serde_json::from_str(r#"{"projectPath":"/tmp/p","tcpPort":9999,"autoRestart":true}"#)
                .unwrap();
        assert_eq!(config.project_path, PathBuf::from("/tmp/p"));
        assert_eq!(config.port, Some(9999));
        assert!(config.auto_restart);
        assert!(config.env.is_empty());
    }

    #[test]
    fn validate_requires_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InstanceConfig::new(dir.path()).validate().is_ok());

        let missing = dir.path().join("nope");
        assert_eq!(
            InstanceConfig::new(&missing).validate(),
            Err(ConfigError::MissingProjectPath(missing))
        );
        assert_eq!(
            InstanceConfig::new("").validate(),
            Err(ConfigError::EmptyProjectPath)
        );

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            InstanceConfig::new(&file).validate(),
            Err(ConfigError::NotADirectory(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_env_and_port() {
        let dir = tempfile::tempdir().unwrap();
        let config = InstanceConfig::new(dir.path()).with_env("A=B", "c");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEnvKey(_))
        ));

        let config = InstanceConfig::new(dir.path()).with_port(0);
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));
    }

    #[test]
    fn display_name_falls_back_to_directory() {
        let config = InstanceConfig::new("/work/my-project");
        assert_eq!(config.display_name(), "my-project");
        assert_eq!(config.with_name("custom").display_name(), "custom");
    }
}
