//! TCP command transport.

pub mod client;
pub mod rate_limit;
pub mod server;

pub use client::{ClientConfig, ClientError, CommandClient};
pub use rate_limit::{RateLimit, SlidingWindow};
pub use server::{
    CommandExecutor, CommandServer, ConnectionId, ConnectionInfo, ListenerStats, ServerConfig,
    ServerError, ServerStatus,
};
