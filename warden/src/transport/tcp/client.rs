//! Client for a command server.
//!
//! Holds one connection open, assigns sequence ids, and reconnects with
//! exponential backoff when the connection cannot be established or the
//! frame cannot be written. Once a frame is on the wire it is never resent.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::bridge::codec::JsonLinesCodec;
use crate::bridge::protocol::{Command, Response, SequenceId};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9999,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(3),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out connecting to {addr}")]
    ConnectTimeout { addr: String },
    #[error("failed to write command: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to read response: {0}")]
    Read(#[source] std::io::Error),
    #[error("no response within {}ms", .0.as_millis())]
    ResponseTimeout(Duration),
    #[error("server closed the connection")]
    Closed,
}

impl ClientError {
    /// The command never reached the server.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. } | ClientError::ConnectTimeout { .. } | ClientError::Write(_)
        )
    }
}

struct Connection {
    reader: FramedRead<OwnedReadHalf, JsonLinesCodec<Response>>,
    writer: FramedWrite<OwnedWriteHalf, JsonLinesCodec<Command>>,
}

pub struct CommandClient {
    config: ClientConfig,
    connection: Option<Connection>,
    next_sequence: u64,
}

impl CommandClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connection: None,
            next_sequence: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Open the connection now instead of on first send.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.connection.is_none() {
            self.connection = Some(open(&self.config).await?);
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            debug!(addr = %self.config.addr(), "Disconnected");
        }
    }

    /// Send a command and wait for its response.
    ///
    /// Commands without a sequence id get the next one from this client.
    pub async fn send(&mut self, mut command: Command) -> Result<Response, ClientError> {
        if command.sequence_id.is_none() {
            self.next_sequence += 1;
            command.sequence_id = Some(SequenceId::Number(self.next_sequence));
        }

        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0;
        loop {
            match self.send_once(&command).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Command send failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.mul_f64(self.config.backoff_factor);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&mut self, command: &Command) -> Result<Response, ClientError> {
        let mut conn = match self.connection.take() {
            Some(conn) => conn,
            None => open(&self.config).await?,
        };

        let result = exchange(&mut conn, command, self.config.response_timeout).await;
        // a late response would desync the stream
        if result.is_ok() {
            self.connection = Some(conn);
        }
        result
    }
}

async fn open(config: &ClientConfig) -> Result<Connection, ClientError> {
    let addr = config.addr();
    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(ClientError::Connect { addr, source }),
        Err(_) => return Err(ClientError::ConnectTimeout { addr }),
    };
    let _ = stream.set_nodelay(true);
    debug!(%addr, "Connected");

    let (read_half, write_half) = stream.into_split();
    Ok(Connection {
        reader: FramedRead::new(read_half, JsonLinesCodec::new()),
        writer: FramedWrite::new(write_half, JsonLinesCodec::new()),
    })
}

async fn exchange(
    conn: &mut Connection,
    command: &Command,
    response_timeout: Duration,
) -> Result<Response, ClientError> {
    conn.writer
        .send(command.clone())
        .await
        .map_err(ClientError::Write)?;

    let deadline = tokio::time::Instant::now() + response_timeout;
    loop {
        let response = match tokio::time::timeout_at(deadline, conn.reader.next()).await {
            Err(_) => return Err(ClientError::ResponseTimeout(response_timeout)),
            Ok(None) => return Err(ClientError::Closed),
            Ok(Some(Err(e))) => return Err(ClientError::Read(e)),
            Ok(Some(Ok(response))) => response,
        };

        // uncorrelated failures are frame-level errors for this command
        if response.sequence_id == command.sequence_id || response.sequence_id.is_none() {
            return Ok(response);
        }
        debug!(sequence_id = ?response.sequence_id, "Discarding stale response");
    }
}
