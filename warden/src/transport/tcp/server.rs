//! TCP command server.
//!
//! Accepts concurrent clients, frames newline-delimited commands, and for
//! each frame: validate → rate limit → execute (with timeout) → respond.
//! Failures at any stage become a failure response on that connection only.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::codec::{DEFAULT_MAX_FRAME_LENGTH, JsonLinesCodec};
use crate::bridge::protocol::{Command, ErrorKind, Response, SequenceId};
use crate::validation::{CommandValidator, DEFAULT_MAX_CONTENT_LENGTH};

use super::rate_limit::{RateLimit, SlidingWindow};

/// How long `stop()` waits for connection tasks before aborting them.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Executes validated commands on behalf of the server.
///
/// Implementations report failures as unsuccessful responses; the server
/// only adds timeouts and correlation ids.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: Command) -> Response;
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Idle connections are closed after this long without a frame.
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
    pub rate_limit: RateLimit,
    pub max_frame_length: usize,
    pub max_content_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9999,
            max_connections: 10,
            connection_timeout: Duration::from_millis(300_000),
            command_timeout: Duration::from_millis(5_000),
            rate_limit: RateLimit::default(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }
}

impl ServerConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_max_content_length(mut self, max: usize) -> Self {
        self.max_content_length = max;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyStarted,
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl ServerError {
    /// Another process grabbed the port between probe and bind.
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, ServerError::Bind { source, .. } if source.kind() == std::io::ErrorKind::AddrInUse)
    }
}

/// Listener counters shared with the bridge behind this server.
#[derive(Debug, Default)]
pub struct ListenerStats {
    listening: AtomicBool,
    clients: AtomicUsize,
    errors: AtomicU64,
    started_at: StdMutex<Option<DateTime<Utc>>>,
    last_activity: StdMutex<Option<DateTime<Utc>>>,
}

impl ListenerStats {
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    pub fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::Release);
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_started(&self) {
        *self.started_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
        self.set_listening(true);
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Unique identifier for an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub request_count: u64,
    pub last_request: Option<DateTime<Utc>>,
}

/// Snapshot of server state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub is_listening: bool,
    pub client_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub connections: Vec<ConnectionInfo>,
}

struct RunningServer {
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Everything a connection task needs, shared across connections.
struct ConnectionContext {
    config: ServerConfig,
    instance_id: Option<String>,
    validator: CommandValidator,
    executor: Arc<dyn CommandExecutor>,
    stats: Arc<ListenerStats>,
    connections: Arc<DashMap<ConnectionId, ConnectionInfo>>,
}

pub struct CommandServer {
    config: ServerConfig,
    instance_id: Option<String>,
    stats: Arc<ListenerStats>,
    connections: Arc<DashMap<ConnectionId, ConnectionInfo>>,
    running: Mutex<Option<RunningServer>>,
}

impl CommandServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            instance_id: None,
            stats: Arc::new(ListenerStats::default()),
            connections: Arc::new(DashMap::new()),
            running: Mutex::new(None),
        }
    }

    /// Tag commands that arrive without an `instanceId`.
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Bind the listener and start accepting clients.
    pub async fn start(&self, executor: Arc<dyn CommandExecutor>) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let ctx = Arc::new(ConnectionContext {
            config: self.config.clone(),
            instance_id: self.instance_id.clone(),
            validator: CommandValidator::new(self.config.max_content_length),
            executor,
            stats: Arc::clone(&self.stats),
            connections: Arc::clone(&self.connections),
        });

        self.stats.mark_started();
        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, ctx, shutdown.clone()));

        *running = Some(RunningServer {
            shutdown,
            accept_task,
            local_addr,
        });

        info!(
            %local_addr,
            instance_id = ?self.instance_id,
            max_connections = self.config.max_connections,
            "Command server listening"
        );
        Ok(local_addr)
    }

    /// Close every connection, then the listener. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.shutdown.cancel();
        let mut accept_task = running.accept_task;
        tokio::select! {
            result = &mut accept_task => {
                if let Err(e) = result {
                    warn!(error = %e, "Accept loop ended abnormally");
                }
            }
            _ = tokio::time::sleep(STOP_TIMEOUT * 2) => {
                warn!("Accept loop did not stop in time, aborting");
                accept_task.abort();
            }
        }

        self.stats.set_listening(false);
        self.connections.clear();
        info!(local_addr = %running.local_addr, "Command server stopped");
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            port: self.config.port,
            instance_id: self.instance_id.clone(),
            is_listening: self.stats.is_listening(),
            client_count: self.stats.client_count(),
            started_at: self.stats.started_at(),
            error_count: self.stats.error_count(),
            last_activity: self.stats.last_activity(),
            connections: self.connections.iter().map(|e| e.value().clone()).collect(),
        }
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ConnectionContext>, shutdown: CancellationToken) {
    let permits = Arc::new(Semaphore::new(ctx.config.max_connections));
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        warn!(%peer, max_connections = ctx.config.max_connections, "Connection limit reached, rejecting");
                        ctx.stats.record_error();
                        reject(stream, ctx.config.max_connections);
                        continue;
                    };
                    let ctx = Arc::clone(&ctx);
                    let token = shutdown.child_token();
                    tasks.spawn(async move {
                        handle_connection(stream, peer, &ctx, token).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    ctx.stats.record_error();
                    // e.g. EMFILE; don't spin
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    let drained = tokio::time::timeout(STOP_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Connections did not close in time, aborting");
        tasks.shutdown().await;
    }

    drop(listener);
    ctx.stats.set_listening(false);
    debug!("Accept loop exiting");
}

/// Best-effort capacity notice, then close.
fn reject(stream: TcpStream, max_connections: usize) {
    let response = Response::failure(
        ErrorKind::Capacity,
        format!("connection limit of {max_connections} reached"),
    );
    if let Ok(mut frame) = serde_json::to_vec(&response) {
        frame.push(b'\n');
        let _ = stream.try_write(&frame);
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &ConnectionContext,
    shutdown: CancellationToken,
) {
    let id = ConnectionId::new();
    ctx.connections.insert(
        id,
        ConnectionInfo {
            id,
            peer,
            connected_at: Utc::now(),
            request_count: 0,
            last_request: None,
        },
    );
    ctx.stats.clients.fetch_add(1, Ordering::AcqRel);
    let _registered = Registered { ctx, id, peer };
    debug!(connection_id = %id, %peer, "Client connected");

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(ctx.config.max_frame_length),
    );
    let mut writer = FramedWrite::new(write_half, JsonLinesCodec::<Response>::new());
    let mut limiter = SlidingWindow::new(ctx.config.rate_limit);

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = tokio::time::timeout(ctx.config.connection_timeout, reader.next()) => match next {
                Err(_) => {
                    info!(connection_id = %id, %peer, "Closing idle connection");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    ctx.stats.record_error();
                    let response = Response::failure(
                        ErrorKind::Validation,
                        format!("frame exceeds {} bytes", ctx.config.max_frame_length),
                    );
                    // the framed reader is finished after a decode error
                    let _ = writer.send(response).await;
                    break;
                }
                Ok(Some(Err(LinesCodecError::Io(e)))) => {
                    debug!(connection_id = %id, error = %e, "Read failed");
                    break;
                }
            },
        };

        if frame.trim().is_empty() {
            continue;
        }

        let response = process_frame(ctx, id, &frame, &mut limiter).await;
        if let Err(e) = writer.send(response).await {
            debug!(connection_id = %id, error = %e, "Write failed");
            break;
        }
    }

}

/// Unregisters a connection when its task ends, including by abort on stop.
struct Registered<'a> {
    ctx: &'a ConnectionContext,
    id: ConnectionId,
    peer: SocketAddr,
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        self.ctx.connections.remove(&self.id);
        self.ctx.stats.clients.fetch_sub(1, Ordering::AcqRel);
        debug!(connection_id = %self.id, peer = %self.peer, "Client disconnected");
    }
}

async fn process_frame(
    ctx: &ConnectionContext,
    id: ConnectionId,
    frame: &str,
    limiter: &mut SlidingWindow,
) -> Response {
    ctx.stats.touch();

    let mut command = match ctx.validator.parse_frame(frame) {
        Ok(command) => command,
        Err(e) => {
            ctx.stats.record_error();
            debug!(connection_id = %id, error = %e, "Rejected frame");
            return Response::failure(ErrorKind::Validation, e.to_string())
                .correlate(sequence_hint(frame));
        }
    };
    let sequence_id = command.sequence_id.clone();

    if !limiter.try_acquire(tokio::time::Instant::now()) {
        let limit = limiter.limit();
        warn!(connection_id = %id, max_requests = limit.max_requests, "Rate limit exceeded");
        return Response::failure(
            ErrorKind::RateLimited,
            format!(
                "rate limit of {} requests per {}ms exceeded",
                limit.max_requests,
                limit.window.as_millis()
            ),
        )
        .correlate(sequence_id);
    }

    if let Some(mut info) = ctx.connections.get_mut(&id) {
        info.request_count += 1;
        info.last_request = Some(Utc::now());
    }

    if command.instance_id.is_none() {
        command.instance_id = ctx.instance_id.clone();
    }

    let kind = command.kind;
    let timeout = ctx.config.command_timeout;
    match tokio::time::timeout(timeout, ctx.executor.execute(command)).await {
        Ok(response) => {
            if !response.success {
                ctx.stats.record_error();
            }
            response.correlate(sequence_id)
        }
        Err(_) => {
            ctx.stats.record_error();
            warn!(connection_id = %id, %kind, timeout_ms = timeout.as_millis() as u64, "Command timed out");
            Response::failure(
                ErrorKind::Timeout,
                format!("command timed out after {}ms", timeout.as_millis()),
            )
            .correlate(sequence_id)
        }
    }
}

/// Pull `sequenceId` out of a frame that failed validation, if it is JSON at all.
fn sequence_hint(frame: &str) -> Option<SequenceId> {
    let value: serde_json::Value = serde_json::from_str(frame).ok()?;
    serde_json::from_value(value.get("sequenceId")?.clone()).ok()
}
