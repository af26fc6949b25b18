//! Transport layer for command frames.
//!
//! Currently supports:
//! - TCP: newline-delimited JSON command server and client

pub mod tcp;

pub use tcp::{
    ClientConfig, CommandClient, CommandExecutor, CommandServer, ListenerStats, RateLimit,
    ServerConfig, ServerStatus,
};
