//! Launcher configuration.
//!
//! Defaults come from `LauncherConfig::default()`; `from_env` layers
//! `WARDEN_*` overrides on top. Unparseable overrides are logged and ignored.

use std::time::Duration;

use crate::restart::RestartPolicy;
use crate::transport::tcp::ServerConfig;

pub const DEFAULT_BASE_PORT: u16 = 9999;
pub const DEFAULT_PROGRAM: &str = "claude";

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub host: String,
    pub base_port: u16,
    /// Number of consecutive ports probed per allocation.
    pub port_range: u16,
    /// Re-allocations after the probed port is lost to another process.
    pub bind_retries: u32,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
    pub program: String,
    pub default_args: Vec<String>,
    pub grace_period: Duration,
    /// Template for every instance's command server; `port` is assigned per instance.
    pub server: ServerConfig,
    pub restart: RestartPolicy,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: DEFAULT_BASE_PORT,
            port_range: 100,
            bind_retries: 3,
            health_check_interval: Duration::from_millis(30_000),
            health_check_timeout: Duration::from_millis(5_000),
            program: DEFAULT_PROGRAM.to_string(),
            default_args: Vec::new(),
            grace_period: Duration::from_millis(5_000),
            server: ServerConfig::default(),
            restart: RestartPolicy::default(),
        }
    }
}

impl LauncherConfig {
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    pub fn with_port_range(mut self, range: u16) -> Self {
        self.port_range = range;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_default_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    /// Defaults plus `WARDEN_*` environment overrides.
    pub fn from_env() -> Self {
        Self::default().apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keeping the current value for anything
    /// missing or unparseable.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = parse_var::<u16>(&lookup, "WARDEN_BASE_PORT") {
            if port == 0 {
                tracing::warn!(var = "WARDEN_BASE_PORT", "Port must be between 1 and 65535, ignoring");
            } else {
                self.base_port = port;
            }
        }
        if let Some(range) = parse_var::<u16>(&lookup, "WARDEN_PORT_RANGE") {
            self.port_range = range.max(1);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "WARDEN_HEALTH_CHECK_INTERVAL_MS") {
            if ms == 0 {
                tracing::warn!(var = "WARDEN_HEALTH_CHECK_INTERVAL_MS", "Interval must be positive, ignoring");
            } else {
                self.health_check_interval = Duration::from_millis(ms);
            }
        }
        if let Some(max) = parse_var::<usize>(&lookup, "WARDEN_MAX_CONNECTIONS") {
            self.server.max_connections = max;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "WARDEN_CONNECTION_TIMEOUT_MS") {
            self.server.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "WARDEN_COMMAND_TIMEOUT_MS") {
            self.server.command_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "WARDEN_GRACE_PERIOD_MS") {
            self.grace_period = Duration::from_millis(ms);
        }
        if let Some(program) = lookup("WARDEN_PROGRAM").filter(|p| !p.trim().is_empty()) {
            self.program = program;
        }
        self
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(var = key, value = %raw, error = %e, "Invalid environment override, ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> LauncherConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LauncherConfig::default().apply_overrides(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = LauncherConfig::default();
        assert_eq!(config.base_port, 9999);
        assert_eq!(config.health_check_interval, Duration::from_secs(30));
        assert_eq!(config.server.max_connections, 10);
        assert_eq!(config.server.connection_timeout, Duration::from_secs(300));
        assert_eq!(config.server.command_timeout, Duration::from_secs(5));
        assert_eq!(config.server.rate_limit.max_requests, 100);
        assert_eq!(config.grace_period, Duration::from_secs(5));
    }

    #[test]
    fn applies_valid_overrides() {
        let config = overrides(&[
            ("WARDEN_BASE_PORT", "12000"),
            ("WARDEN_HEALTH_CHECK_INTERVAL_MS", "1500"),
            ("WARDEN_MAX_CONNECTIONS", "2"),
            ("WARDEN_COMMAND_TIMEOUT_MS", " 250 "),
            ("WARDEN_PROGRAM", "cat"),
        ]);
        assert_eq!(config.base_port, 12000);
        assert_eq!(config.health_check_interval, Duration::from_millis(1500));
        assert_eq!(config.server.max_connections, 2);
        assert_eq!(config.server.command_timeout, Duration::from_millis(250));
        assert_eq!(config.program, "cat");
    }

    #[test]
    fn ignores_invalid_overrides() {
        let config = overrides(&[
            ("WARDEN_BASE_PORT", "70000"),
            ("WARDEN_PORT_RANGE", "lots"),
            ("WARDEN_GRACE_PERIOD_MS", "-5"),
            ("WARDEN_PROGRAM", "  "),
        ]);
        let defaults = LauncherConfig::default();
        assert_eq!(config.base_port, defaults.base_port);
        assert_eq!(config.port_range, defaults.port_range);
        assert_eq!(config.grace_period, defaults.grace_period);
        assert_eq!(config.program, defaults.program);

        assert_eq!(overrides(&[("WARDEN_BASE_PORT", "0")]).base_port, 9999);
        assert_eq!(
            overrides(&[("WARDEN_HEALTH_CHECK_INTERVAL_MS", "0")]).health_check_interval,
            defaults.health_check_interval
        );
    }
}
