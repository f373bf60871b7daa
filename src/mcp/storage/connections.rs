//! DashMap-based registry of forwarded tunnel connections.
//!
//! Every accepted local socket that got a forwarding channel is tracked here
//! until either side closes. Each entry owns a child [`CancellationToken`] of
//! the tunnel's root token, so cancelling one entry stops exactly one relay and
//! cancelling the root stops them all.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Bookkeeping for one local socket paired with its forwarding channel.
#[derive(Debug, Clone)]
pub struct ForwardedConnection {
    pub peer: SocketAddr,
    pub opened_at: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl ForwardedConnection {
    /// A connection is alive until its relay has been told to stop.
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Concurrent set of live forwarded connections.
///
/// Inserts and removals come from independent relay tasks, so the map is
/// lock-free per shard and ids are allocated from an atomic counter.
pub struct ConnectionRegistry {
    connections: DashMap<u64, ForwardedConnection>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Track a new connection and return its id.
    pub fn register(&self, peer: SocketAddr, cancel: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            id,
            ForwardedConnection {
                peer,
                opened_at: Utc::now(),
                cancel,
            },
        );
        id
    }

    /// Stop tracking a connection. Returns the entry if it was still tracked.
    pub fn remove(&self, id: u64) -> Option<ForwardedConnection> {
        self.connections.remove(&id).map(|(_, conn)| conn)
    }

    pub fn get(&self, id: u64) -> Option<ForwardedConnection> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Cancel every tracked relay and clear the set.
    ///
    /// Returns the number of connections that were force-closed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<u64> = self.connections.iter().map(|e| *e.key()).collect();
        let mut closed = 0;
        for id in ids {
            if let Some((_, conn)) = self.connections.remove(&id) {
                conn.cancel.cancel();
                closed += 1;
            }
        }
        closed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(peer(50001), CancellationToken::new());
        let b = registry.register(peer(50002), CancellationToken::new());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_returns_entry_once() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(peer(50001), CancellationToken::new());
        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.peer, peer(50001));
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_all_cancels_and_clears() {
        let registry = ConnectionRegistry::new();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        registry.register(peer(50001), first.clone());
        let id = registry.register(peer(50002), second.clone());
        assert!(registry.get(id).unwrap().is_alive());

        assert_eq!(registry.close_all(), 2);
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_all_on_empty_registry() {
        assert_eq!(ConnectionRegistry::new().close_all(), 0);
    }

    #[test]
    fn test_concurrent_register_and_remove() {
        let registry = std::sync::Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8u16)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..100u16 {
                        let id = registry.register(peer(i * 1000 + j), CancellationToken::new());
                        registry.remove(id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
