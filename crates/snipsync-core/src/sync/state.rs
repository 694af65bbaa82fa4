//! Per-peer sync state
//!
//! Tracks one Automerge sync state for every peer in the rendezvous. States
//! live only as long as the transport session; a new session starts over.

use std::collections::HashMap;

use automerge::sync::State as AutomergeSyncState;

use super::message::PeerId;

/// Automerge sync states keyed by peer
#[derive(Debug, Default)]
pub struct SyncState {
    /// Sync states for each peer
    peers: HashMap<PeerId, AutomergeSyncState>,
}

impl SyncState {
    /// Create an empty sync state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create sync state for a peer
    pub fn get_or_create(&mut self, peer_id: &str) -> &mut AutomergeSyncState {
        self.peers.entry(peer_id.to_string()).or_default()
    }

    /// Forget a peer that left
    pub fn remove(&mut self, peer_id: &str) -> bool {
        self.peers.remove(peer_id).is_some()
    }

    /// IDs of all known peers
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<_> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get number of peers we have state for
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_new() {
        let mut state = SyncState::new();
        let peer_state = state.get_or_create("peer-1");
        assert!(peer_state.their_heads.is_none());
    }

    #[test]
    fn test_get_or_create_reuses_state() {
        let mut state = SyncState::new();
        state.get_or_create("peer-1");
        state.get_or_create("peer-1");
        assert_eq!(state.peer_count(), 1);
        assert_eq!(state.peer_ids(), vec!["peer-1"]);
    }

    #[test]
    fn test_remove_and_peer_ids() {
        let mut state = SyncState::new();
        state.get_or_create("peer-b");
        state.get_or_create("peer-a");
        assert_eq!(state.peer_ids(), vec!["peer-a", "peer-b"]);

        assert!(state.remove("peer-a"));
        assert!(!state.remove("peer-a"));
        assert_eq!(state.peer_ids(), vec!["peer-b"]);
        assert_eq!(state.peer_count(), 1);
    }
}
