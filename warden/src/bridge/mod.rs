//! Bridge between command frames and one child process.
//!
//! # Architecture
//!
//! - **protocol**: Command/Response types and the key table
//! - **codec**: newline-delimited JSON framing for AsyncRead/AsyncWrite
//! - **process**: `ProcessBridge`, which owns the child and executes commands

pub mod codec;
pub mod process;
pub mod protocol;
