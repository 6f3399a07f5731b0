//! Registry of live connections.
//!
//! Connections are indexed by [`ConnectionId`]. Readers never iterate the
//! live map: [`ConnectionRegistry::snapshot`] copies the current members out
//! so fan-out can await sends while other tasks register and deregister.

use crate::connection::{ConnectionId, MessageSink};
use crate::error::{HubError, HubResult};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// The set of currently registered connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, Arc<dyn MessageSink>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Fails if a connection with the same id is already
    /// registered.
    pub fn register(&self, connection: Arc<dyn MessageSink>) -> HubResult<()> {
        let id = connection.id();
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if connections.contains_key(&id) {
            return Err(HubError::DuplicateRegistration(id));
        }
        connections.insert(id, connection);
        debug!(conn = %id, clients = connections.len(), "connection registered");
        Ok(())
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = connections.remove(&id).is_some();
        if removed {
            debug!(conn = %id, clients = connections.len(), "connection deregistered");
        }
        removed
    }

    /// Point-in-time copy of all registered connections, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn MessageSink>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Ids of all registered connections, in registration order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory;

    #[test]
    fn register_and_deregister() {
        let registry = ConnectionRegistry::new();
        let (a, _a_src, _a_peer) = memory::connection("a");
        let (b, _b_src, _b_peer) = memory::connection("b");

        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a.id()));

        assert!(registry.deregister(a.id()));
        assert_eq!(registry.ids(), vec![b.id()]);

        assert!(registry.deregister(b.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = ConnectionRegistry::new();
        let (a, _src, _peer) = memory::connection("a");

        registry.register(a.clone()).unwrap();
        let err = registry.register(a.clone()).unwrap_err();
        assert!(matches!(err, HubError::DuplicateRegistration(id) if id == a.id()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deregister_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        let (a, _a_src, _a_peer) = memory::connection("a");
        let (b, _b_src, _b_peer) = memory::connection("b");
        registry.register(a.clone()).unwrap();

        assert!(!registry.deregister(b.id()));
        assert_eq!(registry.ids(), vec![a.id()]);

        // Second removal of the same id is also a no-op.
        assert!(registry.deregister(a.id()));
        assert!(!registry.deregister(a.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_ordered_and_detached() {
        let registry = ConnectionRegistry::new();
        let (a, _a_src, _a_peer) = memory::connection("a");
        let (b, _b_src, _b_peer) = memory::connection("b");
        let (c, _c_src, _c_peer) = memory::connection("c");
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();
        registry.register(c.clone()).unwrap();

        let snapshot = registry.snapshot();
        registry.deregister(b.id());

        let ids: Vec<_> = snapshot.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id(), c.id()]);
        assert_eq!(registry.ids(), vec![a.id(), c.id()]);
    }

    #[test]
    fn membership_matches_connect_disconnect_sequence() {
        let registry = ConnectionRegistry::new();
        let conns: Vec<_> = (0..6)
            .map(|i| memory::connection(&format!("peer-{i}")))
            .collect();

        for (sink, _, _) in &conns {
            registry.register(sink.clone()).unwrap();
        }
        for (i, (sink, _, _)) in conns.iter().enumerate() {
            if i % 2 == 0 {
                registry.deregister(sink.id());
            }
        }

        let expected: Vec<_> = conns
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == 1)
            .map(|(_, (sink, _, _))| sink.id())
            .collect();
        assert_eq!(registry.ids(), expected);
    }
}
