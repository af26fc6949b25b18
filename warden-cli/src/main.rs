//! warden: launch and drive supervised interactive CLI sessions.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use warden::bridge::process::OutputStream;
use warden::validation::CommandValidator;
use warden::{
    ClientConfig, Command, CommandClient, CommandKind, InstanceConfig, InstanceId, InstanceStatus,
    LauncherConfig, LauncherEvent, Orchestrator,
};

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Supervise interactive CLI sessions")]
struct Cli {
    #[command(subcommand)]
    command: WardenCommand,
}

#[derive(Debug, Subcommand)]
enum WardenCommand {
    /// Launch one supervised instance and stream its output until interrupted.
    Run(RunArgs),
    /// Send a single command to a running instance's command port.
    Send(SendArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Project directory the child process runs in.
    #[arg(value_name = "DIR", default_value = ".")]
    project: PathBuf,
    /// Preferred command port (the next free port is used if taken).
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,
    /// Display name for the instance.
    #[arg(long, value_name = "NAME")]
    name: Option<String>,
    /// Restart the child when it exits unexpectedly or fails a health check.
    #[arg(long)]
    auto_restart: bool,
    /// Program to launch (defaults to WARDEN_PROGRAM, then `claude`).
    #[arg(long, value_name = "PROGRAM")]
    program: Option<String>,
    /// Extra environment for the child.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,
    /// Forward lines typed on stdin to the child as `send` + `enter`.
    #[arg(long)]
    interactive: bool,
    /// Arguments passed through to the program.
    #[arg(last = true, value_name = "ARGS")]
    args: Vec<String>,
}

#[derive(Debug, Args)]
struct SendArgs {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = warden::config::DEFAULT_BASE_PORT)]
    port: u16,
    /// Command in text form, e.g. `send hello`, `enter`, `ctrl-c`, `status`.
    #[arg(required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

/// Initialize tracing with WARDEN_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("WARDEN_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("warden={base_level},warden_cli={base_level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    // stdout carries child output, so logs go to stderr
    if use_json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        WardenCommand::Run(args) => run(args).await,
        WardenCommand::Send(args) => send(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "warden failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let project = args
        .project
        .canonicalize()
        .with_context(|| format!("project directory {}", args.project.display()))?;

    let mut instance = InstanceConfig::new(project)
        .with_auto_restart(args.auto_restart)
        .with_args(args.args);
    if let Some(port) = args.port {
        instance = instance.with_port(port);
    }
    if let Some(name) = args.name {
        instance = instance.with_name(name);
    }
    if let Some(program) = args.program {
        instance = instance.with_program(program);
    }
    for (key, value) in args.env {
        instance = instance.with_env(key, value);
    }

    let orchestrator = Orchestrator::new(LauncherConfig::from_env());
    let mut events = orchestrator.subscribe();
    let info = orchestrator.create_instance(instance).await?;
    info!(
        instance_id = %info.id,
        name = %info.name,
        port = ?info.port,
        pid = ?info.pid,
        "Instance running"
    );
    orchestrator.start_health_monitor();

    if args.interactive {
        tokio::spawn(forward_stdin(orchestrator.clone(), info.id));
    }

    let code = tokio::select! {
        code = pump_events(&mut events, args.auto_restart) => code,
        _ = shutdown_signal() => ExitCode::SUCCESS,
    };

    let failures = orchestrator.shutdown().await;
    if !failures.is_empty() {
        warn!(failures = failures.len(), "Some instances did not stop cleanly");
    }
    Ok(code)
}

/// Print child output; returns when the instance can no longer recover.
async fn pump_events(
    events: &mut tokio::sync::broadcast::Receiver<LauncherEvent>,
    auto_restart: bool,
) -> ExitCode {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Dropped launcher events");
                continue;
            }
            Err(RecvError::Closed) => return ExitCode::SUCCESS,
        };

        match event {
            LauncherEvent::Output { stream, data, .. } => {
                let written = match stream {
                    OutputStream::Stdout => write_flush(&mut stdout, &data).await,
                    OutputStream::Stderr => write_flush(&mut stderr, &data).await,
                };
                if let Err(e) = written {
                    debug!(error = %e, "Failed to echo child output");
                }
            }
            LauncherEvent::StatusChanged {
                new: InstanceStatus::Error,
                ..
            } if !auto_restart => {
                error!("Instance failed and auto-restart is disabled");
                return ExitCode::FAILURE;
            }
            LauncherEvent::RestartsExhausted { attempts, .. } => {
                error!(attempts, "Instance keeps failing, giving up");
                return ExitCode::FAILURE;
            }
            other => debug!(event = ?other, "Launcher event"),
        }
    }
}

async fn write_flush<W>(out: &mut W, data: &str) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    out.write_all(data.as_bytes()).await?;
    out.flush().await
}

async fn forward_stdin(orchestrator: Orchestrator, id: InstanceId) {
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        };

        let mut commands = Vec::with_capacity(2);
        if !line.is_empty() {
            commands.push(Command::send(line));
        }
        commands.push(Command::new(CommandKind::Enter));

        for command in commands {
            if let Err(e) = orchestrator.send_command(id, command).await {
                warn!(error = %e, "Failed to forward input");
            }
        }
    }
    debug!("Stdin closed");
}

async fn send(args: SendArgs) -> Result<ExitCode> {
    let text = args.command.join(" ");
    let command = match CommandValidator::default().parse_frame(&text) {
        Ok(command) => command,
        Err(e) => bail!("{e}"),
    };

    let mut client = CommandClient::new(ClientConfig::new(args.host, args.port));
    let response = client.send(command).await?;
    client.disconnect();

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
