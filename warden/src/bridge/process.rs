//! Process bridge: owns one interactive child process and turns commands
//! into bytes on its stdin.
//!
//! Flow:
//! 1. Spawn the child (working dir, args, env, assigned port)
//! 2. Pump stdout/stderr into `BridgeEvent::Output`
//! 3. Reaper task owns the `Child`, publishes the exit status
//! 4. `send_command` validates, maps to bytes, writes with a timeout
//! 5. `stop` cancels in-flight writes, sends SIGTERM, closes stdin, and
//!    escalates to SIGKILL after the grace period
//!
//! The bridge has no socket of its own. The command server that fronts it
//! shares its `ListenerStats` so status queries can report on the listener.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command as ProcessCommand};
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::{Command, CommandKind, ErrorKind, Response, StatusReport};
use crate::instance::InstanceId;
use crate::transport::tcp::{CommandExecutor, ListenerStats};
use crate::validation::{CommandValidator, DEFAULT_MAX_CONTENT_LENGTH, ValidationError};

/// Environment variable carrying the instance's command port to the child.
pub const PORT_ENV: &str = "WARDEN_PORT";
/// Environment variable carrying the instance id to the child.
pub const INSTANCE_ENV: &str = "WARDEN_INSTANCE_ID";

const EVENT_CAPACITY: usize = 256;
/// How long to wait for the reaper after SIGKILL before giving up.
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub instance_id: InstanceId,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub port: u16,
    pub command_timeout: Duration,
    pub grace_period: Duration,
    pub max_content_length: usize,
}

impl BridgeConfig {
    pub fn new(instance_id: InstanceId, program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            instance_id,
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
            port: 0,
            command_timeout: Duration::from_secs(5),
            grace_period: Duration::from_secs(5),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_max_content_length(mut self, max: usize) -> Self {
        self.max_content_length = max;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("spawn failed: {0}")]
    Other(String),
}

/// Extension point for different spawn strategies (plain pipes, pty wrappers, test doubles).
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, config: &BridgeConfig) -> Result<Child, SpawnError>;
}

/// Spawns `config.program` directly with piped stdio.
pub struct CommandSpawner;

impl ProcessSpawner for CommandSpawner {
    fn spawn(&self, config: &BridgeConfig) -> Result<Child, SpawnError> {
        let child = ProcessCommand::new(&config.program)
            .args(&config.args)
            .current_dir(&config.working_dir)
            .envs(&config.env)
            .env(PORT_ENV, config.port.to_string())
            .env(INSTANCE_ENV, config.instance_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge is already running")]
    AlreadyStarted,
    #[error("bridge is not running")]
    NotStarted,
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("process stdin is closed")]
    StdinClosed,
    #[error("bridge is stopping")]
    Stopped,
    #[error("process has exited")]
    ProcessExited,
    #[error("write to process failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Validation(_) => ErrorKind::Validation,
            BridgeError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Execution,
        }
    }

    pub fn to_response(&self) -> Response {
        Response::failure(self.kind(), self.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// How the child exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// True when the exit was requested via `stop()`.
    pub expected: bool,
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BridgeEvent {
    Output { stream: OutputStream, data: String },
    Exited(ExitInfo),
}

/// Snapshot of bridge state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub instance_id: InstanceId,
    pub port: u16,
    pub pid: Option<u32>,
    pub process_alive: bool,
    pub is_listening: bool,
    pub client_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub write_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitInfo>,
}

struct RunningProcess {
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl RunningProcess {
    fn exit(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }
}

/// Owns exactly one child process.
pub struct ProcessBridge {
    config: BridgeConfig,
    spawner: Arc<dyn ProcessSpawner>,
    validator: CommandValidator,
    stdin: Mutex<Option<ChildStdin>>,
    /// Cancelled by `stop()`; pending writes give up the stdin lock.
    halt: StdMutex<CancellationToken>,
    process: StdMutex<Option<RunningProcess>>,
    listener: StdMutex<Option<Arc<ListenerStats>>>,
    events: broadcast::Sender<BridgeEvent>,
    stopping: Arc<AtomicBool>,
    write_count: AtomicU64,
    error_count: AtomicU64,
    last_activity: StdMutex<Option<DateTime<Utc>>>,
}

impl ProcessBridge {
    pub fn new(config: BridgeConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            validator: CommandValidator::new(config.max_content_length),
            config,
            spawner,
            stdin: Mutex::new(None),
            halt: StdMutex::new(CancellationToken::new()),
            process: StdMutex::new(None),
            listener: StdMutex::new(None),
            events,
            stopping: Arc::new(AtomicBool::new(false)),
            write_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_activity: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Subscribe before `start()` to observe early output and exits.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Share the fronting server's listener state with status queries.
    pub fn attach_listener(&self, stats: Arc<ListenerStats>) {
        *lock(&self.listener) = Some(stats);
    }

    fn listener(&self) -> Option<Arc<ListenerStats>> {
        lock(&self.listener).clone()
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.process).as_ref().and_then(|p| p.pid)
    }

    pub fn is_process_alive(&self) -> bool {
        lock(&self.process)
            .as_ref()
            .is_some_and(|p| p.exit().is_none())
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Spawn the child and start pumping its output.
    ///
    /// On failure nothing is left behind: the child (if any) is killed and
    /// the bridge stays idle.
    pub async fn start(&self) -> Result<BridgeStatus, BridgeError> {
        if self.is_process_alive() {
            return Err(BridgeError::AlreadyStarted);
        }

        let instance_id = self.config.instance_id;
        tracing::info!(
            %instance_id,
            program = %self.config.program,
            cwd = %self.config.working_dir.display(),
            port = self.config.port,
            "Spawning child process"
        );

        let mut child = self.spawner.spawn(&self.config)?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(SpawnError::Other("child stdio not captured".to_string()).into());
        };

        let pid = child.id();
        self.stopping.store(false, Ordering::SeqCst);
        *lock(&self.halt) = CancellationToken::new();

        self.spawn_pump(OutputStream::Stdout, FramedRead::new(stdout, BytesCodec::new()));
        self.spawn_pump(OutputStream::Stderr, FramedRead::new(stderr, BytesCodec::new()));

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(reap(
            instance_id,
            child,
            kill_rx,
            exit_tx,
            self.events.clone(),
            Arc::clone(&self.stopping),
        ));

        *self.stdin.lock().await = Some(stdin);
        *lock(&self.process) = Some(RunningProcess {
            pid,
            started_at: Utc::now(),
            exit_rx,
            kill_tx: Some(kill_tx),
        });

        tracing::info!(%instance_id, pid = ?pid, "Child process started");
        Ok(self.status())
    }

    fn spawn_pump<R>(&self, stream: OutputStream, mut reader: FramedRead<R, BytesCodec>)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let events = self.events.clone();
        let instance_id = self.config.instance_id;
        tokio::spawn(async move {
            while let Some(chunk) = reader.next().await {
                match chunk {
                    Ok(bytes) => {
                        let data = String::from_utf8_lossy(&bytes).into_owned();
                        tracing::trace!(%instance_id, ?stream, bytes = bytes.len(), "Child output");
                        // no subscribers is fine
                        let _ = events.send(BridgeEvent::Output { stream, data });
                    }
                    Err(e) => {
                        tracing::debug!(%instance_id, ?stream, error = %e, "Output stream error");
                        break;
                    }
                }
            }
            tracing::debug!(%instance_id, ?stream, "Output pump exiting");
        });
    }

    /// Validate and execute one command against the child.
    ///
    /// Resolves once the write is accepted, not once the child reacts.
    pub async fn send_command(&self, command: Command) -> Result<Response, BridgeError> {
        if let Err(e) = self.validator.validate(&command) {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }

        let timeout = self.config.command_timeout;
        let sequence_id = command.sequence_id.clone();
        let result = match tokio::time::timeout(timeout, self.execute_inner(&command)).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(timeout)),
        };

        match result {
            Ok(response) => {
                *lock(&self.last_activity) = Some(Utc::now());
                Ok(response.correlate(sequence_id))
            }
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    instance_id = %self.config.instance_id,
                    kind = %command.kind,
                    error = %e,
                    "Command failed"
                );
                Err(e)
            }
        }
    }

    async fn execute_inner(&self, command: &Command) -> Result<Response, BridgeError> {
        match command.kind {
            CommandKind::Ping => {
                self.ensure_alive()?;
                Ok(Response::ok("pong"))
            }
            CommandKind::Status => {
                let report = self.status_report();
                Ok(Response::with_data(serde_json::json!({
                    "processAlive": report.process_alive,
                    "clientCount": report.client_count,
                    "isListening": report.is_listening,
                })))
            }
            kind => {
                let bytes = kind
                    .input_bytes(command.content.as_deref())
                    .unwrap_or_default();
                self.write_input(&bytes).await?;
                Ok(Response::ok(format!("{kind} sent")))
            }
        }
    }

    fn ensure_alive(&self) -> Result<(), BridgeError> {
        match lock(&self.process).as_ref() {
            None => Err(BridgeError::NotStarted),
            Some(p) if p.exit().is_some() => Err(BridgeError::ProcessExited),
            Some(_) => Ok(()),
        }
    }

    async fn write_input(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        self.ensure_alive()?;
        let halt = lock(&self.halt).clone();
        tokio::select! {
            biased;
            _ = halt.cancelled() => Err(BridgeError::Stopped),
            result = self.write_stdin(bytes) => result,
        }
    }

    async fn write_stdin(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(BridgeError::StdinClosed)?;
        stdin.write_all(bytes).await.map_err(BridgeError::Write)?;
        stdin.flush().await.map_err(BridgeError::Write)?;
        self.write_count.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(instance_id = %self.config.instance_id, bytes = bytes.len(), "Wrote to child stdin");
        Ok(())
    }

    fn status_report(&self) -> StatusReport {
        let listener = self.listener();
        StatusReport {
            process_alive: self.is_process_alive(),
            client_count: listener.as_ref().map_or(0, |l| l.client_count()),
            is_listening: listener.as_ref().is_some_and(|l| l.is_listening()),
        }
    }

    /// Cheap liveness probe: listener up (when attached), child alive, ping answered.
    pub async fn health_check(&self) -> bool {
        if let Some(listener) = self.listener()
            && !listener.is_listening()
        {
            return false;
        }
        matches!(
            self.send_command(Command::new(CommandKind::Ping)).await,
            Ok(response) if response.success
        )
    }

    /// Two-phase termination: SIGTERM, wait up to the grace period, then SIGKILL.
    ///
    /// Idempotent; stopping a bridge that never started is a no-op.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        let Some(mut process) = lock(&self.process).take() else {
            tracing::debug!(instance_id = %self.config.instance_id, "Stop requested on idle bridge");
            return Ok(());
        };

        let instance_id = self.config.instance_id;
        self.stopping.store(true, Ordering::SeqCst);
        // a write blocked on a full pipe must not hold up the signal
        lock(&self.halt).cancel();

        if process.exit().is_some() {
            tracing::debug!(%instance_id, "Child already exited");
            drop(self.stdin.lock().await.take());
            return Ok(());
        }

        tracing::info!(%instance_id, pid = ?process.pid, "Stopping child process");
        terminate(process.pid);
        drop(self.stdin.lock().await.take());

        let grace = self.config.grace_period;
        if wait_for_exit(&mut process.exit_rx, grace).await {
            tracing::info!(%instance_id, "Child exited gracefully");
            return Ok(());
        }

        tracing::warn!(%instance_id, grace_ms = grace.as_millis() as u64, "Child ignored SIGTERM, killing");
        if let Some(kill_tx) = process.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if !wait_for_exit(&mut process.exit_rx, KILL_WAIT).await {
            tracing::error!(%instance_id, "Child did not exit after SIGKILL");
        }
        Ok(())
    }

    pub fn status(&self) -> BridgeStatus {
        let (pid, started_at, exit) = match lock(&self.process).as_ref() {
            Some(p) => (p.pid, Some(p.started_at), p.exit()),
            None => (None, None, None),
        };
        let report = self.status_report();
        BridgeStatus {
            instance_id: self.config.instance_id,
            port: self.config.port,
            pid,
            process_alive: report.process_alive,
            is_listening: report.is_listening,
            client_count: report.client_count,
            started_at,
            error_count: self.error_count.load(Ordering::Relaxed),
            write_count: self.write_count.load(Ordering::Relaxed),
            last_activity: *lock(&self.last_activity),
            exit,
        }
    }
}

#[async_trait]
impl CommandExecutor for ProcessBridge {
    async fn execute(&self, command: Command) -> Response {
        let sequence_id = command.sequence_id.clone();
        match self.send_command(command).await {
            Ok(response) => response,
            Err(e) => e.to_response().correlate(sequence_id),
        }
    }
}

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::error!("Bridge mutex poisoned - recovering");
        poisoned.into_inner()
    })
}

async fn reap(
    instance_id: InstanceId,
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    events: broadcast::Sender<BridgeEvent>,
    stopping: Arc<AtomicBool>,
) {
    // A dropped kill sender (bridge dropped) also kills the child.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(%instance_id, error = %e, "Failed to kill child");
            }
            child.wait().await
        }
    };

    let expected = stopping.load(Ordering::SeqCst);
    let exit = match status {
        Ok(status) => ExitInfo {
            code: status.code(),
            signal: exit_signal(&status),
            expected,
        },
        Err(e) => {
            tracing::error!(%instance_id, error = %e, "Failed to wait for child");
            ExitInfo {
                code: None,
                signal: None,
                expected,
            }
        }
    };

    if expected {
        tracing::info!(%instance_id, %exit, "Child exited");
    } else {
        tracing::warn!(%instance_id, %exit, "Child exited unexpectedly");
    }

    let _ = exit_tx.send(Some(exit));
    let _ = events.send(BridgeEvent::Exited(exit));
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn terminate(pid: Option<u32>) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::debug!(pid, error = %e, "SIGTERM failed");
    }
}

// No graceful signal off unix; the grace period simply elapses before the kill.
#[cfg(not(unix))]
fn terminate(_pid: Option<u32>) {}

async fn wait_for_exit(exit_rx: &mut watch::Receiver<Option<ExitInfo>>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, exit_rx.wait_for(Option::is_some)).await {
        Ok(Ok(_)) => true,
        // reaper gone means the child is gone
        Ok(Err(_)) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct ShellSpawner {
        script: &'static str,
    }

    impl ProcessSpawner for ShellSpawner {
        fn spawn(&self, config: &BridgeConfig) -> Result<Child, SpawnError> {
            let child = ProcessCommand::new("sh")
                .args(["-c", self.script])
                .current_dir(&config.working_dir)
                .env(PORT_ENV, config.port.to_string())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;
            Ok(child)
        }
    }

    struct FailingSpawner;

    impl ProcessSpawner for FailingSpawner {
        fn spawn(&self, _config: &BridgeConfig) -> Result<Child, SpawnError> {
            Err(SpawnError::Other("no such program".to_string()))
        }
    }

    fn bridge_with(script: &'static str) -> ProcessBridge {
        let config = BridgeConfig::new(InstanceId::new(), "sh", std::env::temp_dir())
            .with_port(4242)
            .with_grace_period(Duration::from_millis(500));
        ProcessBridge::new(config, Arc::new(ShellSpawner { script }))
    }

    async fn next_output(rx: &mut broadcast::Receiver<BridgeEvent>) -> String {
        let mut collected = String::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while collected.is_empty() {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(BridgeEvent::Output { data, .. })) => collected.push_str(&data),
                Ok(Ok(BridgeEvent::Exited(_))) => break,
                Ok(Err(_)) | Err(_) => break,
            }
        }
        collected
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let bridge = bridge_with("cat");
        bridge.stop().await.unwrap();
        bridge.stop().await.unwrap();
        assert!(!bridge.is_process_alive());
    }

    #[tokio::test]
    async fn spawn_failure_leaves_bridge_idle() {
        let config = BridgeConfig::new(InstanceId::new(), "missing", std::env::temp_dir());
        let bridge = ProcessBridge::new(config, Arc::new(FailingSpawner));

        let err = bridge.start().await.unwrap_err();
        assert!(matches!(err, BridgeError::Spawn(_)));
        assert!(!bridge.is_process_alive());
        assert!(bridge.pid().is_none());
        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn ping_does_not_write() {
        let bridge = bridge_with("cat");
        bridge.start().await.unwrap();

        let before = bridge.write_count();
        let response = bridge.send_command(Command::new(CommandKind::Ping)).await.unwrap();
        assert!(response.success);
        assert_eq!(response.message.as_deref(), Some("pong"));
        assert_eq!(bridge.write_count(), before);

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn send_writes_content_verbatim() {
        let bridge = bridge_with("cat");
        let mut rx = bridge.subscribe();
        bridge.start().await.unwrap();

        let response = bridge.send_command(Command::send("ls")).await.unwrap();
        assert!(response.success);
        assert_eq!(bridge.write_count(), 1);

        // cat echoes whatever it reads; "ls" alone has no newline, so follow with enter
        bridge.send_command(Command::new(CommandKind::Enter)).await.unwrap();
        let mut echoed = String::new();
        while !echoed.contains('\n') {
            let chunk = next_output(&mut rx).await;
            assert!(!chunk.is_empty(), "no output from child");
            echoed.push_str(&chunk);
        }
        assert_eq!(echoed, "ls\n");

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn enter_writes_single_newline() {
        // od dumps the first byte it reads, then the script exits
        let bridge = bridge_with("head -c 1 | od -An -c");
        let mut rx = bridge.subscribe();
        bridge.start().await.unwrap();

        bridge.send_command(Command::new(CommandKind::Enter)).await.unwrap();
        assert_eq!(bridge.write_count(), 1);

        let dump = next_output(&mut rx).await;
        assert_eq!(dump.split_whitespace().collect::<Vec<_>>(), vec!["\\n"]);

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_content_never_reaches_the_child() {
        let config = BridgeConfig::new(InstanceId::new(), "sh", std::env::temp_dir())
            .with_max_content_length(4);
        let bridge = ProcessBridge::new(config, Arc::new(ShellSpawner { script: "cat" }));
        bridge.start().await.unwrap();

        let err = bridge.send_command(Command::send("too long")).await.unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
        assert_eq!(bridge.write_count(), 0);
        assert_eq!(bridge.status().error_count, 1);

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn status_reports_listener_state() {
        let bridge = bridge_with("cat");
        let stats = Arc::new(ListenerStats::default());
        stats.set_listening(true);
        bridge.attach_listener(Arc::clone(&stats));
        bridge.start().await.unwrap();

        let response = bridge.send_command(Command::new(CommandKind::Status)).await.unwrap();
        assert_eq!(
            response.data,
            Some(serde_json::json!({"processAlive": true, "clientCount": 0, "isListening": true}))
        );
        assert!(bridge.health_check().await);

        stats.set_listening(false);
        assert!(!bridge.health_check().await);

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_exit_is_an_event() {
        let bridge = bridge_with("exit 3");
        let mut rx = bridge.subscribe();
        bridge.start().await.unwrap();

        let exit = loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Ok(BridgeEvent::Exited(exit))) => break exit,
                Ok(Ok(_)) => continue,
                other => panic!("no exit event: {other:?}"),
            }
        };
        assert_eq!(exit.code, Some(3));
        assert!(!exit.expected);
        assert!(!bridge.is_process_alive());
        assert!(!bridge.health_check().await);

        let err = bridge.send_command(Command::send("x")).await.unwrap_err();
        assert!(matches!(err, BridgeError::ProcessExited));
    }

    #[tokio::test]
    async fn stop_marks_exit_expected() {
        let bridge = bridge_with("cat");
        let mut rx = bridge.subscribe();
        bridge.start().await.unwrap();
        bridge.stop().await.unwrap();

        let exit = loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Ok(BridgeEvent::Exited(exit))) => break exit,
                Ok(Ok(_)) => continue,
                other => panic!("no exit event: {other:?}"),
            }
        };
        assert!(exit.expected);
    }

    #[tokio::test]
    async fn stop_escalates_to_kill() {
        // ignores SIGTERM and stdin EOF
        let bridge = bridge_with("trap '' TERM; while true; do sleep 0.05; done");
        bridge.start().await.unwrap();
        assert!(bridge.is_process_alive());

        let started = Instant::now();
        bridge.stop().await.unwrap();
        let elapsed = started.elapsed();

        assert!(!bridge.is_process_alive());
        assert!(elapsed >= Duration::from_millis(500), "stopped too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500) + KILL_WAIT, "stop took {elapsed:?}");
    }

    #[tokio::test]
    async fn send_after_stop_fails_cleanly() {
        let bridge = bridge_with("cat");
        bridge.start().await.unwrap();
        bridge.stop().await.unwrap();

        let err = bridge.send_command(Command::send("late")).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotStarted));
    }

    /// Child that never reads stdin; sends keep going until the pipe is full.
    fn stalled_bridge() -> (Arc<ProcessBridge>, Duration) {
        let grace = Duration::from_millis(300);
        let config = BridgeConfig::new(InstanceId::new(), "sh", std::env::temp_dir())
            .with_grace_period(grace)
            .with_command_timeout(Duration::from_secs(5));
        let bridge = ProcessBridge::new(config, Arc::new(ShellSpawner { script: "sleep 100" }));
        (Arc::new(bridge), grace)
    }

    fn flood_stdin(bridge: &Arc<ProcessBridge>) -> tokio::task::JoinHandle<Result<usize, BridgeError>> {
        let bridge = Arc::clone(bridge);
        tokio::spawn(async move {
            let chunk = "x".repeat(DEFAULT_MAX_CONTENT_LENGTH);
            for _ in 0..20 {
                bridge.send_command(Command::send(chunk.clone())).await?;
            }
            Ok(20)
        })
    }

    #[tokio::test]
    async fn stop_is_bounded_while_a_write_is_blocked() {
        let (bridge, grace) = stalled_bridge();
        bridge.start().await.unwrap();
        let flood = flood_stdin(&bridge);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!flood.is_finished(), "pipe never filled");

        let started = Instant::now();
        bridge.stop().await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed < grace + KILL_WAIT, "stop took {elapsed:?}");
        assert!(!bridge.is_process_alive());
        flood.abort();
    }

    #[tokio::test]
    async fn in_flight_send_fails_cleanly_on_stop() {
        let (bridge, _) = stalled_bridge();
        bridge.start().await.unwrap();
        let flood = flood_stdin(&bridge);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (stopped, sent) = tokio::join!(bridge.stop(), async {
            tokio::time::timeout(Duration::from_secs(2), flood).await
        });
        stopped.unwrap();

        let err = sent.expect("send outlived stop").unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Stopped), "{err}");
        assert_eq!(err.kind(), ErrorKind::Execution);

        let late = bridge.send_command(Command::send("late")).await.unwrap_err();
        assert!(matches!(late, BridgeError::NotStarted));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let bridge = bridge_with("cat");
        bridge.start().await.unwrap();
        assert!(matches!(bridge.start().await, Err(BridgeError::AlreadyStarted)));
        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn executor_converts_errors_to_responses() {
        let bridge = bridge_with("cat");
        let response = bridge
            .execute(Command::send("x").with_sequence_id(crate::bridge::protocol::SequenceId::Number(5)))
            .await;
        assert!(!response.success);
        assert_eq!(response.error, Some(ErrorKind::Execution));
        assert_eq!(
            response.sequence_id,
            Some(crate::bridge::protocol::SequenceId::Number(5))
        );
    }
}
