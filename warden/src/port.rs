//! Port allocation by bind-probe.
//!
//! Probing is advisory: a port found free here can be taken by someone else
//! before the server binds it, so callers must retry on `AddrInUse`.

use std::collections::HashSet;

use tokio::net::TcpListener;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PortError {
    #[error("no available port in {start}..={end}")]
    Exhausted { start: u16, end: u16 },
}

#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: String,
    range: u16,
}

impl PortAllocator {
    /// Probe up to `range` consecutive ports on `host`.
    pub fn new(host: impl Into<String>, range: u16) -> Self {
        Self {
            host: host.into(),
            range: range.max(1),
        }
    }

    pub fn range(&self) -> u16 {
        self.range
    }

    /// First free port in `[start, start + range)` that is not in `reserved`.
    pub async fn allocate(&self, start: u16, reserved: &HashSet<u16>) -> Result<u16, PortError> {
        let start = start.max(1);
        let end = start.saturating_add(self.range - 1);
        for port in start..=end {
            if reserved.contains(&port) {
                continue;
            }
            if self.is_free(port).await {
                tracing::debug!(port, "Allocated port");
                return Ok(port);
            }
            tracing::trace!(port, "Port busy");
        }
        Err(PortError::Exhausted { start, end })
    }

    /// Bind-test-then-release.
    pub async fn is_free(&self, port: u16) -> bool {
        TcpListener::bind((self.host.as_str(), port)).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound() -> (std::net::TcpListener, u16) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn single_port_range_fully_bound_is_exhausted() {
        let (_held, port) = bound();
        let allocator = PortAllocator::new("127.0.0.1", 1);

        let err = allocator.allocate(port, &HashSet::new()).await.unwrap_err();
        assert_eq!(err, PortError::Exhausted { start: port, end: port });
    }

    #[tokio::test]
    async fn skips_busy_and_reserved_ports() {
        let (_held, port) = bound();
        let allocator = PortAllocator::new("127.0.0.1", 50);

        let first = allocator.allocate(port, &HashSet::new()).await.unwrap();
        assert!(first > port);

        let reserved = HashSet::from([first]);
        let second = allocator.allocate(port, &reserved).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn probe_releases_the_port() {
        let (held, port) = bound();
        drop(held);
        let allocator = PortAllocator::new("127.0.0.1", 1);

        assert_eq!(allocator.allocate(port, &HashSet::new()).await, Ok(port));
        // still free afterwards
        assert!(allocator.is_free(port).await);
    }

    #[tokio::test]
    async fn range_stops_at_max_port() {
        let allocator = PortAllocator::new("127.0.0.1", 100);
        let reserved: HashSet<u16> = (65500..=u16::MAX).collect();
        let err = allocator.allocate(65500, &reserved).await.unwrap_err();
        assert_eq!(err, PortError::Exhausted { start: 65500, end: u16::MAX });
    }
}
