//! Integration tests for Plumtree broadcast dissemination.
//!
//! These tests wire several engines together through an in-memory router
//! and validate end-to-end behavior of the overlay: full dissemination,
//! pruning of redundant links, and tree repair through the lazy mesh.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plumtree::{
    EphemeralPeerRepository, MessageHash, MessageSender, Plumtree, PlumtreeConfig, Verb,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

type NodeId = u8;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE_WAIT: Duration = Duration::from_millis(500);

/// Fast timers so repairs happen within the test timeout.
fn test_config() -> PlumtreeConfig {
    PlumtreeConfig {
        graft_delay: Duration::from_millis(100),
        lazy_queue_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

// =============================================================================
// In-memory router transport
// =============================================================================

/// Routes verbs between engines by node id. Links can be severed in one
/// direction to simulate a failing transport.
#[derive(Default)]
struct Router {
    nodes: Mutex<HashMap<NodeId, Plumtree<NodeId>>>,
    severed: Mutex<HashSet<(NodeId, NodeId)>>,
}

impl Router {
    fn register(&self, id: NodeId, handle: Plumtree<NodeId>) {
        self.nodes.lock().unwrap().insert(id, handle);
    }

    fn sever(&self, from: NodeId, to: NodeId) {
        self.severed.lock().unwrap().insert((from, to));
    }
}

/// Per-node dispatch port backed by the shared router.
struct Port {
    id: NodeId,
    router: Arc<Router>,
}

#[async_trait]
impl MessageSender<NodeId> for Port {
    async fn send(
        &self,
        verb: Verb,
        attributes: Option<&str>,
        peer: &NodeId,
        hash: MessageHash,
        payload: Option<&[u8]>,
    ) {
        if self.router.severed.lock().unwrap().contains(&(self.id, *peer)) {
            return;
        }
        let target = self.router.nodes.lock().unwrap().get(peer).cloned();
        let Some(target) = target else { return };

        let from = self.id;
        let attributes = attributes.map(str::to_string);
        let payload = payload.map(<[u8]>::to_vec);
        // Fire-and-forget: deliver asynchronously like a real transport,
        // never blocking the sending engine on the receiving one.
        tokio::spawn(async move {
            let _ = match verb {
                Verb::Gossip => match payload {
                    Some(payload) => target.receive_gossip(from, attributes, payload).await,
                    // A header-only gossip carries nothing to deliver.
                    None => Ok(()),
                },
                Verb::IHave => target.receive_ihave(from, hash).await,
                Verb::Graft => target.receive_graft(from, hash).await,
                Verb::Prune => target.receive_prune(from).await,
            };
        });
    }
}

fn spawn_node(
    id: NodeId,
    router: &Arc<Router>,
    config: PlumtreeConfig,
) -> (Plumtree<NodeId>, mpsc::Receiver<Vec<u8>>) {
    let port = Arc::new(Port {
        id,
        router: router.clone(),
    });
    let (handle, rx) = Plumtree::spawn(port, EphemeralPeerRepository::new(), config);
    router.register(id, handle.clone());
    (handle, rx)
}

// =============================================================================
// Test: line topology, full dissemination
// =============================================================================

/// A message published at one end of a line A - B - C reaches every node.
#[tokio::test]
async fn line_topology_broadcast_reaches_all() {
    let router = Arc::new(Router::default());
    let (node_a, _rx_a) = spawn_node(1, &router, test_config());
    let (node_b, mut rx_b) = spawn_node(2, &router, test_config());
    let (node_c, mut rx_c) = spawn_node(3, &router, test_config());

    node_a.add_peer(2).await.unwrap();
    node_b.add_peer(1).await.unwrap();
    node_b.add_peer(3).await.unwrap();
    node_c.add_peer(2).await.unwrap();

    let payload = b"hello overlay".to_vec();
    node_a.publish(None, payload.clone()).await.unwrap();

    let got_b = timeout(TEST_TIMEOUT, rx_b.recv())
        .await
        .expect("node_b receive timeout")
        .expect("node_b channel closed");
    assert_eq!(got_b, payload);

    let got_c = timeout(TEST_TIMEOUT, rx_c.recv())
        .await
        .expect("node_c receive timeout")
        .expect("node_c channel closed");
    assert_eq!(got_c, payload);
}

// =============================================================================
// Test: redundant mesh collapses through PRUNE
// =============================================================================

/// In a fully connected triangle the duplicate deliveries demote the
/// redundant links; every node still delivers the payload exactly once.
#[tokio::test]
async fn redundant_links_collapse_to_a_tree() {
    let router = Arc::new(Router::default());
    let (node_a, _rx_a) = spawn_node(1, &router, test_config());
    let (node_b, mut rx_b) = spawn_node(2, &router, test_config());
    let (node_c, mut rx_c) = spawn_node(3, &router, test_config());

    node_a.add_peer(2).await.unwrap();
    node_a.add_peer(3).await.unwrap();
    node_b.add_peer(1).await.unwrap();
    node_b.add_peer(3).await.unwrap();
    node_c.add_peer(1).await.unwrap();
    node_c.add_peer(2).await.unwrap();

    let payload = b"triangle".to_vec();
    node_a.publish(None, payload.clone()).await.unwrap();

    let got_b = timeout(TEST_TIMEOUT, rx_b.recv())
        .await
        .expect("node_b receive timeout")
        .expect("node_b channel closed");
    assert_eq!(got_b, payload);
    let got_c = timeout(TEST_TIMEOUT, rx_c.recv())
        .await
        .expect("node_c receive timeout")
        .expect("node_c channel closed");
    assert_eq!(got_c, payload);

    // Let the duplicate copies land and the prunes settle.
    tokio::time::sleep(SETTLE_WAIT).await;

    assert!(rx_b.try_recv().is_err(), "node_b delivered a duplicate");
    assert!(rx_c.try_recv().is_err(), "node_c delivered a duplicate");

    // B and C each saw a duplicate copy and demoted a redundant link;
    // membership itself stays intact.
    assert!(!node_b.lazy_push_peers().await.is_empty());
    assert!(!node_c.lazy_push_peers().await.is_empty());
    assert_eq!(node_b.peers().await.len(), 2);
    assert_eq!(node_c.peers().await.len(), 2);
}

// =============================================================================
// Test: severed eager link heals through IHAVE → GRAFT
// =============================================================================

/// When the direct eager link to a node is dead, the lazy mesh announces
/// the message, the node grafts the announcer, and the payload arrives
/// over the repaired link.
#[tokio::test]
async fn severed_link_heals_through_lazy_mesh() {
    let router = Arc::new(Router::default());
    let (node_a, _rx_a) = spawn_node(1, &router, test_config());
    let (node_b, mut rx_b) = spawn_node(2, &router, test_config());
    let (node_c, mut rx_c) = spawn_node(3, &router, test_config());

    // A pushes eagerly to B and C; B holds C as a lazy backup link.
    node_a.add_peer(2).await.unwrap();
    node_a.add_peer(3).await.unwrap();
    node_b.add_peer(1).await.unwrap();
    node_b.add_peer(3).await.unwrap();
    node_b.receive_prune(3).await.unwrap();
    node_c.add_peer(2).await.unwrap();

    // The direct A → C link goes dark.
    router.sever(1, 3);

    let payload = b"repair me".to_vec();
    node_a.publish(None, payload.clone()).await.unwrap();

    let got_b = timeout(TEST_TIMEOUT, rx_b.recv())
        .await
        .expect("node_b receive timeout")
        .expect("node_b channel closed");
    assert_eq!(got_b, payload);

    // C missed the push but recovers via B's IHAVE and its own GRAFT.
    let got_c = timeout(TEST_TIMEOUT, rx_c.recv())
        .await
        .expect("node_c receive timeout")
        .expect("node_c channel closed");
    assert_eq!(got_c, payload);

    // The graft promoted C back into B's eager set.
    tokio::time::sleep(SETTLE_WAIT).await;
    assert!(node_b.eager_push_peers().await.contains(&3));
}
