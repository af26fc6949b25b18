//! Orchestrator - supervises instances: one child process plus its command server each.
//!
//! Flow per instance:
//! 1. Validate config, allocate a port (probe, then retry on bind races)
//! 2. Start the process bridge, then the command server fronting it
//! 3. Watch bridge events: forward output, route unexpected exits to recovery
//! 4. Health monitor pings every running instance on an interval
//! 5. Recovery: `running → error`, tear down, then (auto-restart only)
//!    `error → starting → running` with bounded backoff

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::process::{
    BridgeConfig, BridgeError, BridgeEvent, CommandSpawner, ProcessBridge, ProcessSpawner,
};
use crate::bridge::protocol::{Command, ErrorKind, Response};
use crate::config::LauncherConfig;
use crate::events::LauncherEvent;
use crate::instance::{ConfigError, InstanceConfig, InstanceId, InstanceInfo, InstanceStatus};
use crate::port::{PortAllocator, PortError};
use crate::restart::RestartTracker;
use crate::transport::tcp::{CommandExecutor, CommandServer, ServerError};

const EVENT_CAPACITY: usize = 1024;
const MIN_HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{operation}: invalid instance config: {source}")]
    InvalidConfig {
        operation: &'static str,
        #[source]
        source: ConfigError,
    },
    #[error("{operation} [{instance_id}]: {source}")]
    NoAvailablePort {
        operation: &'static str,
        instance_id: InstanceId,
        #[source]
        source: PortError,
    },
    #[error("{operation} [{instance_id}]: instance not found")]
    NotFound {
        operation: &'static str,
        instance_id: InstanceId,
    },
    #[error("{operation} [{instance_id}]: instance is {status}")]
    NotRunning {
        operation: &'static str,
        instance_id: InstanceId,
        status: InstanceStatus,
    },
    #[error("{operation} [{instance_id}]: {source}")]
    Bridge {
        operation: &'static str,
        instance_id: InstanceId,
        #[source]
        source: BridgeError,
    },
    #[error("{operation} [{instance_id}]: {source}")]
    Server {
        operation: &'static str,
        instance_id: InstanceId,
        #[source]
        source: ServerError,
    },
}

impl OrchestratorError {
    /// Category for API consumers: payload problem, missing instance, or execution failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::InvalidConfig { .. } => ErrorKind::Validation,
            OrchestratorError::NotFound { .. } => ErrorKind::NotFound,
            OrchestratorError::NoAvailablePort { .. } => ErrorKind::Capacity,
            OrchestratorError::Bridge { source, .. } => source.kind(),
            OrchestratorError::NotRunning { .. } | OrchestratorError::Server { .. } => {
                ErrorKind::Execution
            }
        }
    }
}

/// Outcome of one instance's health check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub instance_id: InstanceId,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    fn healthy(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            healthy: true,
            error: None,
        }
    }

    fn unhealthy(instance_id: InstanceId, error: impl Into<String>) -> Self {
        Self {
            instance_id,
            healthy: false,
            error: Some(error.into()),
        }
    }
}

/// Bridge and server owned by one instance while it is up.
struct Runtime {
    bridge: Arc<ProcessBridge>,
    server: CommandServer,
}

struct ManagedInstance {
    id: InstanceId,
    info: StdMutex<InstanceInfo>,
    /// Serializes start, stop, and recovery.
    lifecycle: Mutex<Option<Runtime>>,
    /// Bridge of the current generation, for sends and health checks.
    active: StdMutex<Option<(Arc<ProcessBridge>, u64)>>,
    generation: AtomicU64,
    restarts: StdMutex<RestartTracker>,
}

impl ManagedInstance {
    fn new(info: InstanceInfo) -> Self {
        Self {
            id: info.id,
            info: StdMutex::new(info),
            lifecycle: Mutex::new(None),
            active: StdMutex::new(None),
            generation: AtomicU64::new(0),
            restarts: StdMutex::new(RestartTracker::default()),
        }
    }

    fn status(&self) -> InstanceStatus {
        lock(&self.info).status
    }

    fn config(&self) -> InstanceConfig {
        lock(&self.info).config.clone()
    }

    fn snapshot(&self) -> InstanceInfo {
        lock(&self.info).clone()
    }

    fn active_bridge(&self) -> Option<(Arc<ProcessBridge>, u64)> {
        lock(&self.active).clone()
    }

    /// Apply a transition if the state machine allows it; returns the old status.
    fn transition(&self, next: InstanceStatus) -> Option<InstanceStatus> {
        let mut info = lock(&self.info);
        let old = info.status;
        if !old.can_transition_to(next) {
            return None;
        }
        info.status = next;
        info.touch();
        Some(old)
    }
}

/// A failed instance generation, queued for recovery.
struct Failure {
    managed: Arc<ManagedInstance>,
    generation: u64,
    operation: &'static str,
    reason: String,
}

struct Inner {
    config: LauncherConfig,
    spawner: Arc<dyn ProcessSpawner>,
    ports: PortAllocator,
    instances: DashMap<InstanceId, Arc<ManagedInstance>>,
    events: broadcast::Sender<LauncherEvent>,
    failures: mpsc::UnboundedSender<Failure>,
    shutdown: CancellationToken,
    monitor: StdMutex<Option<JoinHandle<()>>>,
}

/// Supervisor for many instances. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: LauncherConfig) -> Self {
        Self::with_spawner(config, Arc::new(CommandSpawner))
    }

    /// Must be called within a Tokio runtime; spawns the recovery loop.
    pub fn with_spawner(config: LauncherConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (failures, failure_rx) = mpsc::unbounded_channel();
        let ports = PortAllocator::new(config.host.clone(), config.port_range);
        let shutdown = CancellationToken::new();
        let inner = Arc::new(Inner {
            config,
            spawner,
            ports,
            instances: DashMap::new(),
            events,
            failures,
            shutdown: shutdown.clone(),
            monitor: StdMutex::new(None),
        });
        tokio::spawn(run_recovery_loop(Arc::downgrade(&inner), failure_rx, shutdown));
        Self { inner }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.inner.config
    }

    /// Status changes, failures, restarts, command results, and child output.
    pub fn subscribe(&self) -> broadcast::Receiver<LauncherEvent> {
        self.inner.events.subscribe()
    }

    pub async fn create_instance(&self, config: InstanceConfig) -> Result<InstanceInfo, OrchestratorError> {
        self.inner.create_instance(config).await
    }

    pub async fn stop_instance(&self, id: InstanceId) -> Result<(), OrchestratorError> {
        self.inner.stop_instance(id).await
    }

    pub async fn send_command(&self, id: InstanceId, command: Command) -> Result<Response, OrchestratorError> {
        self.inner.send_command(id, command).await
    }

    pub fn get_instance_info(&self, id: InstanceId) -> Option<InstanceInfo> {
        self.inner.instances.get(&id).map(|m| m.snapshot())
    }

    /// Every tracked instance, oldest first.
    pub fn get_all_instances(&self) -> Vec<InstanceInfo> {
        let mut all: Vec<_> = self.inner.instances.iter().map(|m| m.snapshot()).collect();
        all.sort_by_key(|info| info.created_at);
        all
    }

    /// Attach an advisory session id to an instance.
    pub fn register_session(&self, id: InstanceId, session_id: impl Into<String>) -> Result<(), OrchestratorError> {
        let managed = self.inner.get(id, "register_session")?;
        let session_id = session_id.into();
        let mut info = lock(&managed.info);
        if !info.session_ids.contains(&session_id) {
            info.session_ids.push(session_id);
        }
        Ok(())
    }

    pub async fn check_instances_health(&self) -> Vec<HealthReport> {
        self.inner.check_instances_health().await
    }

    /// Start the periodic health loop. No-op if it is already running.
    pub fn start_health_monitor(&self) {
        let mut monitor = lock(&self.inner.monitor);
        if monitor.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        // tokio intervals must be non-zero
        let interval = self.inner.config.health_check_interval.max(MIN_HEALTH_CHECK_INTERVAL);
        let shutdown = self.inner.shutdown.child_token();
        let inner = Arc::downgrade(&self.inner);
        tracing::info!(interval_ms = interval.as_millis() as u64, "Starting health monitor");

        *monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        inner.check_instances_health().await;
                    }
                }
            }
            tracing::debug!("Health monitor exiting");
        }));
    }

    /// Stop the health loop and pending restarts, then every instance concurrently.
    ///
    /// Individual stop failures are logged and returned, never fatal.
    pub async fn shutdown(&self) -> Vec<OrchestratorError> {
        tracing::info!(instances = self.inner.instances.len(), "Orchestrator shutting down");
        self.inner.shutdown.cancel();

        let monitor = lock(&self.inner.monitor).take();
        if let Some(task) = monitor
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Health monitor ended abnormally");
        }

        let ids: Vec<InstanceId> = self.inner.instances.iter().map(|m| *m.key()).collect();
        let results = futures::future::join_all(ids.into_iter().map(|id| self.inner.stop_instance(id))).await;

        let errors: Vec<_> = results.into_iter().filter_map(Result::err).collect();
        for e in &errors {
            tracing::warn!(error = %e, "Instance failed to stop cleanly");
        }
        tracing::info!(failures = errors.len(), "Orchestrator shutdown complete");
        errors
    }
}

impl Inner {
    fn get(&self, id: InstanceId, operation: &'static str) -> Result<Arc<ManagedInstance>, OrchestratorError> {
        self.instances
            .get(&id)
            .map(|m| Arc::clone(m.value()))
            .ok_or(OrchestratorError::NotFound {
                operation,
                instance_id: id,
            })
    }

    fn emit(&self, event: LauncherEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_status(&self, managed: &ManagedInstance, next: InstanceStatus) -> bool {
        match managed.transition(next) {
            Some(old) => {
                tracing::info!(instance_id = %managed.id, %old, new = %next, "Instance status changed");
                self.emit(LauncherEvent::StatusChanged {
                    instance_id: managed.id,
                    old,
                    new: next,
                });
                true
            }
            None => {
                tracing::debug!(
                    instance_id = %managed.id,
                    current = %managed.status(),
                    requested = %next,
                    "Ignoring status transition"
                );
                false
            }
        }
    }

    fn fail(&self, managed: &ManagedInstance, operation: &'static str, reason: String) {
        tracing::warn!(instance_id = %managed.id, operation, %reason, "Instance failure");
        lock(&managed.info).last_error = Some(reason.clone());
        self.emit(LauncherEvent::InstanceFailed {
            instance_id: managed.id,
            operation,
            reason,
        });
    }

    /// Ports held by other live instances.
    fn reserved_ports(&self, except: InstanceId) -> HashSet<u16> {
        self.instances
            .iter()
            .filter(|m| *m.key() != except)
            .filter_map(|m| lock(&m.info).port)
            .collect()
    }

    fn bridge_config(&self, id: InstanceId, config: &InstanceConfig, port: u16) -> BridgeConfig {
        let program = config
            .program
            .clone()
            .unwrap_or_else(|| self.config.program.clone());
        BridgeConfig::new(id, program, &config.project_path)
            .with_args(self.config.default_args.iter().chain(&config.args).cloned())
            .with_env(config.env.clone())
            .with_port(port)
            .with_command_timeout(self.config.server.command_timeout)
            .with_grace_period(self.config.grace_period)
            .with_max_content_length(self.config.server.max_content_length)
    }

    async fn create_instance(
        &self,
        config: InstanceConfig,
    ) -> Result<InstanceInfo, OrchestratorError> {
        config
            .validate()
            .map_err(|source| OrchestratorError::InvalidConfig {
                operation: "create_instance",
                source,
            })?;

        let id = InstanceId::new();
        let managed = Arc::new(ManagedInstance::new(InstanceInfo::new(id, config)));
        self.instances.insert(id, Arc::clone(&managed));
        tracing::info!(instance_id = %id, name = %managed.snapshot().name, "Creating instance");

        let mut lifecycle = managed.lifecycle.lock().await;
        if let Err(e) = self.launch(&managed, &mut lifecycle, "create_instance").await {
            self.set_status(&managed, InstanceStatus::Error);
            self.fail(&managed, "create_instance", e.to_string());
            drop(lifecycle);
            self.instances.remove(&id);
            return Err(e);
        }

        self.set_status(&managed, InstanceStatus::Running);
        lock(&managed.restarts).record_running(tokio::time::Instant::now());
        Ok(managed.snapshot())
    }

    /// Bring up bridge then server. On error nothing is left running.
    async fn launch(
        &self,
        managed: &Arc<ManagedInstance>,
        lifecycle: &mut Option<Runtime>,
        operation: &'static str,
    ) -> Result<(), OrchestratorError> {
        let id = managed.id;
        let config = managed.config();
        let mut start_port = config.port.unwrap_or(self.config.base_port);
        let mut bind_attempts = 0;

        loop {
            let port = self
                .ports
                .allocate(start_port, &self.reserved_ports(id))
                .await
                .map_err(|source| OrchestratorError::NoAvailablePort {
                    operation,
                    instance_id: id,
                    source,
                })?;

            let bridge = Arc::new(ProcessBridge::new(
                self.bridge_config(id, &config, port),
                Arc::clone(&self.spawner),
            ));
            let bridge_events = bridge.subscribe();
            bridge
                .start()
                .await
                .map_err(|source| OrchestratorError::Bridge {
                    operation,
                    instance_id: id,
                    source,
                })?;

            let server_config = self
                .config
                .server
                .clone()
                .with_host(self.config.host.clone())
                .with_port(port);
            let server = CommandServer::new(server_config).with_instance_id(id.to_string());
            let executor: Arc<dyn CommandExecutor> = Arc::clone(&bridge) as Arc<dyn CommandExecutor>;

            match server.start(executor).await {
                Ok(_) => {}
                Err(e) if e.is_addr_in_use() && bind_attempts < self.config.bind_retries => {
                    bind_attempts += 1;
                    tracing::warn!(instance_id = %id, port, attempt = bind_attempts, "Port taken before bind, reallocating");
                    stop_bridge(&bridge).await;
                    let Some(next) = port.checked_add(1) else {
                        return Err(OrchestratorError::Server {
                            operation,
                            instance_id: id,
                            source: e,
                        });
                    };
                    start_port = next;
                    continue;
                }
                Err(source) => {
                    stop_bridge(&bridge).await;
                    return Err(OrchestratorError::Server {
                        operation,
                        instance_id: id,
                        source,
                    });
                }
            }
            bridge.attach_listener(server.stats());

            let generation = managed.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *lock(&managed.active) = Some((Arc::clone(&bridge), generation));
            {
                let mut info = lock(&managed.info);
                info.port = Some(port);
                info.pid = bridge.pid();
                info.last_error = None;
            }
            tokio::spawn(watch_bridge(
                self.events.clone(),
                self.failures.clone(),
                Arc::downgrade(managed),
                generation,
                bridge_events,
            ));

            tracing::info!(instance_id = %id, port, pid = ?bridge.pid(), "Instance launched");
            *lifecycle = Some(Runtime { bridge, server });
            return Ok(());
        }
    }

    /// Stop server then bridge. Caller holds the lifecycle lock.
    async fn teardown(&self, managed: &ManagedInstance, runtime: Runtime) {
        *lock(&managed.active) = None;
        runtime.server.stop().await;
        if let Err(e) = runtime.bridge.stop().await {
            self.fail(managed, "stop", e.to_string());
        }
        lock(&managed.info).pid = None;
    }

    async fn stop_instance(&self, id: InstanceId) -> Result<(), OrchestratorError> {
        let managed = self.get(id, "stop_instance")?;
        let mut lifecycle = managed.lifecycle.lock().await;

        if !self.set_status(&managed, InstanceStatus::Stopping) {
            return Err(OrchestratorError::NotRunning {
                operation: "stop_instance",
                instance_id: id,
                status: managed.status(),
            });
        }
        if let Some(runtime) = lifecycle.take() {
            self.teardown(&managed, runtime).await;
        }
        self.set_status(&managed, InstanceStatus::Stopped);
        drop(lifecycle);

        self.instances.remove(&id);
        tracing::info!(instance_id = %id, "Instance stopped");
        Ok(())
    }

    async fn send_command(&self, id: InstanceId, mut command: Command) -> Result<Response, OrchestratorError> {
        let managed = self.get(id, "send_command")?;
        let status = managed.status();
        let bridge = match (status, managed.active_bridge()) {
            (InstanceStatus::Running, Some((bridge, _))) => bridge,
            _ => {
                return Err(OrchestratorError::NotRunning {
                    operation: "send_command",
                    instance_id: id,
                    status,
                });
            }
        };

        if command.instance_id.is_none() {
            command.instance_id = Some(id.to_string());
        }
        let kind = command.kind;
        let result = bridge.send_command(command).await;
        self.emit(LauncherEvent::CommandExecuted {
            instance_id: id,
            kind,
            success: result.as_ref().is_ok_and(|r| r.success),
        });

        match result {
            Ok(response) => {
                lock(&managed.info).touch();
                Ok(response)
            }
            Err(source) => Err(OrchestratorError::Bridge {
                operation: "send_command",
                instance_id: id,
                source,
            }),
        }
    }

    async fn check_instances_health(&self) -> Vec<HealthReport> {
        let targets: Vec<_> = self
            .instances
            .iter()
            .filter(|m| m.status() == InstanceStatus::Running)
            .filter_map(|m| {
                let (bridge, generation) = m.active_bridge()?;
                Some((Arc::clone(m.value()), bridge, generation))
            })
            .collect();

        let timeout = self.config.health_check_timeout;
        let checks = targets.into_iter().map(|(managed, bridge, generation)| async move {
            let report = match tokio::time::timeout(timeout, bridge.health_check()).await {
                Ok(true) => HealthReport::healthy(managed.id),
                Ok(false) => HealthReport::unhealthy(managed.id, "health check failed"),
                Err(_) => HealthReport::unhealthy(
                    managed.id,
                    format!("health check timed out after {}ms", timeout.as_millis()),
                ),
            };
            (managed, generation, report)
        });

        let mut reports = Vec::new();
        for (managed, generation, report) in futures::future::join_all(checks).await {
            if let Some(reason) = &report.error {
                tracing::warn!(instance_id = %managed.id, %reason, "Instance unhealthy");
                let _ = self.failures.send(Failure {
                    managed,
                    generation,
                    operation: "health_check",
                    reason: reason.clone(),
                });
            }
            reports.push(report);
        }
        tracing::debug!(checked = reports.len(), "Health check pass complete");
        reports
    }

    /// Failure path for a running instance: mark it failed, clean up, and
    /// restart with backoff while the policy allows.
    async fn recover(self: Arc<Self>, failure: Failure) {
        let Failure {
            managed,
            generation,
            operation,
            reason,
        } = failure;
        {
            let mut lifecycle = managed.lifecycle.lock().await;
            // a newer generation or a manual stop supersedes this report
            if managed.generation.load(Ordering::SeqCst) != generation
                || managed.status() != InstanceStatus::Running
            {
                return;
            }
            self.set_status(&managed, InstanceStatus::Error);
            self.fail(&managed, operation, reason);
            if let Some(runtime) = lifecycle.take() {
                self.teardown(&managed, runtime).await;
            }
        }

        let id = managed.id;
        loop {
            if !managed.config().auto_restart {
                tracing::warn!(instance_id = %id, "Auto-restart disabled, instance left in error");
                return;
            }

            let next = lock(&managed.restarts).next_attempt(&self.config.restart, tokio::time::Instant::now());
            let Some((attempt, delay)) = next else {
                let attempts = lock(&managed.restarts).attempts();
                tracing::error!(instance_id = %id, attempts, "Restart budget exhausted, instance left in error");
                self.emit(LauncherEvent::RestartsExhausted {
                    instance_id: id,
                    attempts,
                });
                return;
            };

            tracing::info!(instance_id = %id, attempt, delay_ms = delay.as_millis() as u64, "Scheduling restart");
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut lifecycle = managed.lifecycle.lock().await;
            if !self.instances.contains_key(&id) || !self.set_status(&managed, InstanceStatus::Starting) {
                tracing::debug!(instance_id = %id, "Instance changed while waiting to restart");
                return;
            }

            match self.launch(&managed, &mut lifecycle, "restart").await {
                Ok(()) => {
                    lock(&managed.info).restart_count += 1;
                    lock(&managed.restarts).record_running(tokio::time::Instant::now());
                    self.set_status(&managed, InstanceStatus::Running);
                    self.emit(LauncherEvent::InstanceRestarted {
                        instance_id: id,
                        attempt,
                    });
                    return;
                }
                Err(e) => {
                    self.set_status(&managed, InstanceStatus::Error);
                    self.fail(&managed, "restart", e.to_string());
                }
            }
        }
    }
}

async fn run_recovery_loop(
    inner: Weak<Inner>,
    mut failures: mpsc::UnboundedReceiver<Failure>,
    shutdown: CancellationToken,
) {
    loop {
        let failure = tokio::select! {
            _ = shutdown.cancelled() => break,
            failure = failures.recv() => match failure {
                Some(failure) => failure,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else { break };
        tokio::spawn(inner.recover(failure));
    }
    tracing::debug!("Recovery loop exiting");
}

/// Forward child output and queue unexpected exits for recovery.
async fn watch_bridge(
    events: broadcast::Sender<LauncherEvent>,
    failures: mpsc::UnboundedSender<Failure>,
    managed: Weak<ManagedInstance>,
    generation: u64,
    mut bridge_events: broadcast::Receiver<BridgeEvent>,
) {
    loop {
        let event = match bridge_events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Bridge event watcher lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(managed) = managed.upgrade() else { break };

        match event {
            BridgeEvent::Output { stream, data } => {
                let _ = events.send(LauncherEvent::Output {
                    instance_id: managed.id,
                    stream,
                    data,
                });
            }
            BridgeEvent::Exited(exit) => {
                if !exit.expected {
                    let _ = failures.send(Failure {
                        managed,
                        generation,
                        operation: "process_exit",
                        reason: format!("process exited unexpectedly ({exit})"),
                    });
                }
                break;
            }
        }
    }
}

async fn stop_bridge(bridge: &ProcessBridge) {
    if let Err(e) = bridge.stop().await {
        tracing::warn!(instance_id = %bridge.config().instance_id, error = %e, "Failed to stop bridge during rollback");
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::error!("Orchestrator mutex poisoned - recovering");
        poisoned.into_inner()
    })
}
