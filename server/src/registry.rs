use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::cancel::CancelFlag;

#[derive(Debug, Clone)]
struct PeerEntry {
    peer_gone: CancelFlag,
    connected_at: DateTime<Utc>,
}

/// Connected peers.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    peers: RwLock<HashMap<Uuid, PeerEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. It stays registered until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, peer_gone: CancelFlag) -> Registration {
        let id = Uuid::new_v4();
        let total = match self.peers.write() {
            Ok(mut peers) => {
                peers.insert(
                    id,
                    PeerEntry {
                        peer_gone,
                        connected_at: Utc::now(),
                    },
                );
                peers.len()
            }
            Err(_) => 0,
        };
        info!(peer = %id, total, "peer connected");
        Registration {
            id,
            registry: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal every peer's session to stop, as if its connection had dropped.
    pub fn disconnect_all(&self) -> usize {
        let Ok(peers) = self.peers.read() else {
            return 0;
        };
        for entry in peers.values() {
            entry.peer_gone.cancel();
        }
        peers.len()
    }

    fn remove(&self, id: &Uuid) {
        let (entry, total) = match self.peers.write() {
            Ok(mut peers) => (peers.remove(id), peers.len()),
            Err(_) => (None, 0),
        };
        let connected_secs = entry
            .map(|e| (Utc::now() - e.connected_at).num_seconds())
            .unwrap_or_default();
        info!(peer = %id, total, connected_secs, "peer removed");
    }
}

/// Keeps a peer registered for as long as it lives.
#[derive(Debug)]
pub struct Registration {
    id: Uuid,
    registry: Arc<SessionRegistry>,
}

impl Registration {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_guard_tracks_presence() {
        let registry = Arc::new(SessionRegistry::new());
        let first = registry.register(CancelFlag::new());
        let second = registry.register(CancelFlag::new());
        assert_eq!(registry.len(), 2);
        assert_ne!(first.id(), second.id());

        drop(first);
        assert_eq!(registry.len(), 1);
        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn disconnect_all_signals_every_peer() {
        let registry = Arc::new(SessionRegistry::new());
        let flags = [CancelFlag::new(), CancelFlag::new()];
        let _guards: Vec<_> = flags.iter().map(|f| registry.register(f.clone())).collect();

        assert_eq!(registry.disconnect_all(), 2);
        assert!(flags.iter().all(CancelFlag::is_cancelled));
    }
}
