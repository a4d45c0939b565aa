//! # Peer Membership Store
//!
//! Tracks the peers attached to the local broadcast tree, split into two
//! disjoint sets:
//!
//! | Set | Purpose | Traffic |
//! |-----|---------|---------|
//! | Eager | Active tree links | Full GOSSIP pushes |
//! | Lazy | Backup mesh links | IHAVE announcements only |
//!
//! The sets start out all-eager: every new peer is an active tree link until
//! a redundant delivery demotes it (PRUNE) or a repair promotes it back
//! (GRAFT). A peer is never in both sets at once.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// Opaque peer identity.
///
/// The engine only ever compares, hashes, clones and logs peers; anything
/// satisfying those bounds works as a peer (a 32-byte public key, a
/// connection id, a test integer).
pub trait Peer: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static> Peer for T {}

/// Repository of active peers associated with a broadcast tree.
///
/// All operations are total: inserting an existing peer or removing an
/// unknown one is a no-op, never an error. The accessors return independent
/// snapshots; mutating a returned `Vec` does not affect the store.
pub trait PeerRepository<P: Peer> {
    /// Insert a peer into the eager set (idempotent).
    fn add_eager(&mut self, peer: P);

    /// Remove a peer from both sets.
    fn remove_peer(&mut self, peer: &P);

    /// Relocate a peer into the lazy set, removing it from eager.
    fn move_to_lazy(&mut self, peer: &P);

    /// Relocate a peer into the eager set, removing it from lazy.
    fn move_to_eager(&mut self, peer: &P);

    /// Propose a peer freshly observed in inbound gossip.
    ///
    /// Adds to eager only if the peer is not already tracked as lazy: a
    /// prior demotion decision survives the peer showing up again as a
    /// gossip sender.
    fn consider_new_peer(&mut self, peer: P);

    /// Snapshot of every known peer (eager ∪ lazy, no duplicates).
    fn peers(&self) -> Vec<P>;

    /// Snapshot of the eager set.
    fn eager_push_peers(&self) -> Vec<P>;

    /// Snapshot of the lazy set.
    fn lazy_push_peers(&self) -> Vec<P>;
}

/// In-memory peer repository. No timers, no persistence; lives and dies
/// with the engine instance that owns it.
#[derive(Debug, Clone, Default)]
pub struct EphemeralPeerRepository<P: Peer> {
    eager: HashSet<P>,
    lazy: HashSet<P>,
}

impl<P: Peer> EphemeralPeerRepository<P> {
    pub fn new() -> Self {
        Self {
            eager: HashSet::new(),
            lazy: HashSet::new(),
        }
    }
}

impl<P: Peer> PeerRepository<P> for EphemeralPeerRepository<P> {
    fn add_eager(&mut self, peer: P) {
        self.lazy.remove(&peer);
        self.eager.insert(peer);
    }

    fn remove_peer(&mut self, peer: &P) {
        self.eager.remove(peer);
        self.lazy.remove(peer);
    }

    fn move_to_lazy(&mut self, peer: &P) {
        self.eager.remove(peer);
        self.lazy.insert(peer.clone());
    }

    fn move_to_eager(&mut self, peer: &P) {
        self.lazy.remove(peer);
        self.eager.insert(peer.clone());
    }

    fn consider_new_peer(&mut self, peer: P) {
        if !self.lazy.contains(&peer) {
            self.eager.insert(peer);
        }
    }

    fn peers(&self) -> Vec<P> {
        self.eager.iter().chain(self.lazy.iter()).cloned().collect()
    }

    fn eager_push_peers(&self) -> Vec<P> {
        self.eager.iter().cloned().collect()
    }

    fn lazy_push_peers(&self) -> Vec<P> {
        self.lazy.iter().cloned().collect()
    }
}
