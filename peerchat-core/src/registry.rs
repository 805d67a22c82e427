//! Peers seen while browsing and not yet connected, in discovery order.

use crate::identity::PeerIdentity;

#[derive(Debug, Default, Clone)]
pub struct PeerRegistry {
    peers: Vec<PeerIdentity>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a found peer. Returns false if it was already listed.
    pub fn insert(&mut self, peer: PeerIdentity) -> bool {
        if self.peers.contains(&peer) {
            return false;
        }
        self.peers.push(peer);
        true
    }

    /// Drop a lost peer. Returns false if it was not listed.
    pub fn remove(&mut self, peer: &PeerIdentity) -> bool {
        match self.peers.iter().position(|p| p == peer) {
            Some(index) => {
                self.peers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn contains(&self, peer: &PeerIdentity) -> bool {
        self.peers.contains(peer)
    }

    pub fn peers(&self) -> &[PeerIdentity] {
        &self.peers
    }

    pub fn snapshot(&self) -> Vec<PeerIdentity> {
        self.peers.clone()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(registry: &PeerRegistry) -> Vec<&str> {
        registry.peers().iter().map(|p| p.display_name()).collect()
    }

    #[test]
    fn keeps_discovery_order_and_ignores_duplicates() {
        let mut registry = PeerRegistry::new();
        assert!(registry.insert("Charlie".into()));
        assert!(registry.insert("Alice".into()));
        assert!(!registry.insert("Charlie".into()));
        assert!(registry.insert("Bob".into()));
        assert_eq!(names(&registry), ["Charlie", "Alice", "Bob"]);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut registry = PeerRegistry::new();
        registry.insert("Alice".into());
        assert!(!registry.remove(&"Bob".into()));
        assert!(registry.remove(&"Alice".into()));
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_empties() {
        let mut registry = PeerRegistry::new();
        registry.insert("Alice".into());
        registry.insert("Bob".into());
        registry.clear();
        assert_eq!(registry.len(), 0);
    }

    #[derive(Debug, Clone)]
    enum Event {
        Found(u8),
        Lost(u8),
    }

    fn event() -> impl Strategy<Value = Event> {
        prop_oneof![
            (0u8..6).prop_map(Event::Found),
            (0u8..6).prop_map(Event::Lost),
        ]
    }

    proptest! {
        #[test]
        fn holds_exactly_found_and_not_lost(events in prop::collection::vec(event(), 0..64)) {
            let mut registry = PeerRegistry::new();
            let mut expected: Vec<PeerIdentity> = Vec::new();
            for e in &events {
                match e {
                    Event::Found(n) => {
                        let peer = PeerIdentity::new(format!("peer-{}", n));
                        registry.insert(peer.clone());
                        if !expected.contains(&peer) {
                            expected.push(peer);
                        }
                    }
                    Event::Lost(n) => {
                        let peer = PeerIdentity::new(format!("peer-{}", n));
                        registry.remove(&peer);
                        expected.retain(|p| *p != peer);
                    }
                }
            }
            prop_assert_eq!(registry.snapshot(), expected);
        }
    }
}
