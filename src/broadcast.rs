//! # Plumtree Broadcast Engine
//!
//! The protocol engine disseminating messages over an epidemic broadcast
//! tree.
//!
//! ## Protocol Overview
//!
//! Every known peer is either an **eager** tree link (receives full GOSSIP
//! pushes) or a **lazy** backup link (receives batched IHAVE fingerprint
//! announcements). The eager links converge on a spanning tree:
//!
//! 1. **First delivery**: forwarded to all eager peers except the sender,
//!    announced lazily to the backup mesh, delivered to the application.
//! 2. **Duplicate delivery**: proves the link redundant; the sender is
//!    PRUNEd down to lazy.
//! 3. **Missed delivery**: an IHAVE for an unseen fingerprint starts a
//!    graft-retry cycle that GRAFTs announcers round-robin until the full
//!    message arrives.
//!
//! ## Structure
//!
//! [`Plumtree`] is a cheap-to-clone handle; a private actor owns all
//! mutable state (membership store, dedup cache, lazy announcement queue)
//! and processes commands sequentially, so protocol logic never runs in
//! parallel with itself. Two timer sources feed the same event loop: the
//! engine-wide lazy-queue flush tick and one repeating graft timer per
//! message still awaiting its full payload.
//!
//! ## References
//!
//! Leitão, J., Pereira, J., & Rodrigues, L. (2007). "Epidemic Broadcast
//! Trees"

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::messages::{
    default_message_hash, MessageHash, MessageHasher, MessageSender, MessageValidator, Verb,
};
use crate::peers::{Peer, PeerRepository};

// ============================================================================
// Configuration
// ============================================================================

/// Delay between successive GRAFT attempts in a retry cycle.
pub const DEFAULT_GRAFT_DELAY: Duration = Duration::from_millis(5000);

/// Interval between lazy announcement queue flushes.
pub const DEFAULT_LAZY_QUEUE_INTERVAL: Duration = Duration::from_millis(5000);

/// Capacity of the dedup cache, in message fingerprints.
pub const DEFAULT_DEDUP_CACHE_SIZE: usize = 1_000_000;

/// Capacity of the command channel between handle and actor.
const COMMAND_CHANNEL_CAPACITY: usize = 1000;

/// Capacity of the delivery channel carrying accepted payloads to the
/// application.
const DELIVERY_CHANNEL_CAPACITY: usize = 1000;

/// Capacity of the internal channel funneling graft-timer firings back
/// into the actor loop.
const GRAFT_FIRE_CHANNEL_CAPACITY: usize = 64;

/// Plumtree engine configuration.
#[derive(Clone, Debug)]
pub struct PlumtreeConfig {
    /// Delay between successive GRAFT attempts while a message is missing.
    pub graft_delay: Duration,
    /// Interval between automatic lazy-queue flushes. Honored both as the
    /// stored value and as the actual timer period.
    pub lazy_queue_interval: Duration,
    /// Maximum number of per-message handlers retained for deduplication;
    /// least-recently-used handlers are evicted beyond this.
    pub dedup_cache_size: usize,
    /// Answer GRAFT requests with the stored full payload when we have it.
    /// When disabled the engine keeps no payloads and answers GRAFTs with a
    /// header-only GOSSIP, matching the bandwidth profile of pure
    /// dissemination at the cost of tree repair.
    pub resend_full_on_graft: bool,
}

impl Default for PlumtreeConfig {
    fn default() -> Self {
        Self {
            graft_delay: DEFAULT_GRAFT_DELAY,
            lazy_queue_interval: DEFAULT_LAZY_QUEUE_INTERVAL,
            dedup_cache_size: DEFAULT_DEDUP_CACHE_SIZE,
            resend_full_on_graft: true,
        }
    }
}

// ============================================================================
// Message origin
// ============================================================================

/// Where a full message entered the engine.
///
/// Local origination skips validation and application delivery and pushes
/// to every eager peer; remote delivery excludes the sender from the push
/// and delivers to the application on first receipt.
enum Origin<P> {
    Local,
    FromPeer(P),
}

// ============================================================================
// Per-message handler (the protocol state machine)
// ============================================================================

/// Full message retained for answering GRAFT requests.
#[derive(Clone)]
struct StoredMessage {
    attributes: Option<String>,
    payload: Vec<u8>,
}

/// Per-fingerprint protocol state.
///
/// Created on the first reference to a fingerprint (inbound or local) and
/// retained in the dedup cache until evicted. `received_full` is the
/// terminal state; everything after it is duplicate suppression.
struct MessageHandler<P> {
    /// The full message has been seen; duplicates now trigger PRUNE.
    received_full: bool,
    /// A graft-retry cycle is currently running.
    awaiting_graft: bool,
    /// Peers that announced this fingerprint before the full message
    /// arrived, in announcement order. Duplicates are tolerated; the list
    /// only steers round-robin GRAFT targeting.
    lazy_announcers: Vec<P>,
    /// Round-robin cursor over `lazy_announcers`, wrapping on overflow.
    graft_cursor: usize,
    /// Repeating graft timer task, aborted by handle on full receipt or
    /// eviction.
    graft_task: Option<JoinHandle<()>>,
    /// Retained copy of the accepted message for GRAFT responses.
    full_message: Option<StoredMessage>,
}

impl<P> MessageHandler<P> {
    fn new() -> Self {
        Self {
            received_full: false,
            awaiting_graft: false,
            lazy_announcers: Vec::new(),
            graft_cursor: 0,
            graft_task: None,
            full_message: None,
        }
    }

    /// Stop the graft-retry cycle, if one is running.
    fn cancel_graft_cycle(&mut self) {
        if let Some(task) = self.graft_task.take() {
            task.abort();
        }
        self.awaiting_graft = false;
    }
}

impl<P> Drop for MessageHandler<P> {
    fn drop(&mut self) {
        // Eviction and engine shutdown drop handlers without an explicit
        // cancel; the timer must not outlive its handler.
        self.cancel_graft_cycle();
    }
}

// ============================================================================
// Lazy announcement queue
// ============================================================================

/// A pending IHAVE dispatch.
#[derive(Clone, PartialEq, Eq)]
struct PendingAnnouncement<P> {
    peer: P,
    hash: MessageHash,
}

/// Deferred IHAVE sends, flushed on a fixed period instead of dispatched
/// synchronously.
///
/// Set semantics over (peer, fingerprint): re-enqueueing a pair already
/// pending collapses into one send. Draining snapshots then clears, so
/// entries added mid-drain run in the next pass.
struct LazyQueue<P> {
    pending: Vec<PendingAnnouncement<P>>,
}

impl<P: Peer> LazyQueue<P> {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    fn enqueue(&mut self, peer: P, hash: MessageHash) {
        let entry = PendingAnnouncement { peer, hash };
        if !self.pending.contains(&entry) {
            self.pending.push(entry);
        }
    }

    /// Take every pending announcement, in enqueue order, leaving the
    /// queue empty.
    fn drain(&mut self) -> Vec<PendingAnnouncement<P>> {
        std::mem::take(&mut self.pending)
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// Commands sent from Handle to Actor
// ============================================================================

enum Command<P> {
    AddPeer(P, oneshot::Sender<()>),
    RemovePeer(P, oneshot::Sender<()>),
    Gossip {
        from: P,
        attributes: Option<String>,
        payload: Vec<u8>,
        reply: oneshot::Sender<()>,
    },
    IHave {
        from: P,
        hash: MessageHash,
        reply: oneshot::Sender<()>,
    },
    Prune {
        from: P,
        reply: oneshot::Sender<()>,
    },
    Graft {
        from: P,
        hash: MessageHash,
        reply: oneshot::Sender<()>,
    },
    Publish {
        attributes: Option<String>,
        payload: Vec<u8>,
        reply: oneshot::Sender<MessageHash>,
    },
    ProcessQueue(oneshot::Sender<()>),
    GetPeers(oneshot::Sender<Vec<P>>),
    GetEagerPeers(oneshot::Sender<Vec<P>>),
    GetLazyPeers(oneshot::Sender<Vec<P>>),
    Stop(oneshot::Sender<()>),
    Quit,
}

// ============================================================================
// Plumtree Handle (public API - cheap to clone)
// ============================================================================

/// Handle to a running Plumtree engine.
///
/// Clones share the same engine. All methods are non-blocking with respect
/// to network I/O; sending is fire-and-forget through the dispatch port.
#[derive(Clone)]
pub struct Plumtree<P: Peer> {
    cmd_tx: mpsc::Sender<Command<P>>,
}

impl<P: Peer> Plumtree<P> {
    /// Spawn an engine with the default blake3 hasher and an accept-all
    /// validator.
    ///
    /// Returns the handle and the delivery channel: each payload accepted
    /// from a remote sender is delivered there exactly once per distinct
    /// fingerprint. Locally published messages are never delivered back.
    pub fn spawn<S, R>(
        network: Arc<S>,
        peers: R,
        config: PlumtreeConfig,
    ) -> (Self, mpsc::Receiver<Vec<u8>>)
    where
        S: MessageSender<P> + 'static,
        R: PeerRepository<P> + Send + 'static,
    {
        Self::spawn_with(
            network,
            peers,
            config,
            Box::new(default_message_hash),
            Box::new(|_payload, _sender| true),
        )
    }

    /// Spawn an engine with a custom hashing function and message
    /// validator.
    ///
    /// The validator gates propagation and application delivery of remote
    /// messages; a rejected message is still marked seen (its fingerprint
    /// is registered) but silently absorbed.
    pub fn spawn_with<S, R>(
        network: Arc<S>,
        peers: R,
        config: PlumtreeConfig,
        hasher: MessageHasher,
        validator: MessageValidator<P>,
    ) -> (Self, mpsc::Receiver<Vec<u8>>)
    where
        S: MessageSender<P> + 'static,
        R: PeerRepository<P> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let (graft_fire_tx, graft_fire_rx) = mpsc::channel(GRAFT_FIRE_CHANNEL_CAPACITY);

        let actor = PlumtreeActor {
            network,
            peers,
            hasher,
            validator,
            handlers: LruCache::new(
                NonZeroUsize::new(config.dedup_cache_size.max(1)).expect("capacity is non-zero"),
            ),
            lazy_queue: LazyQueue::new(),
            delivery_tx,
            graft_fire_tx,
            stopped: false,
            config,
        };
        tokio::spawn(actor.run(cmd_rx, graft_fire_rx));

        (Self { cmd_tx }, delivery_rx)
    }

    /// Add a peer as an eager tree link.
    pub async fn add_peer(&self, peer: P) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::AddPeer(peer, tx))
            .await
            .map_err(|_| anyhow::anyhow!("plumtree actor closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("plumtree actor closed"))
    }

    /// Remove a peer from both membership sets.
    pub async fn remove_peer(&self, peer: P) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::RemovePeer(peer, tx))
            .await
            .map_err(|_| anyhow::anyhow!("plumtree actor closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("plumtree actor closed"))
    }

    /// Record a full message received from a peer.
    pub async fn receive_gossip(
        &self,
        from: P,
        attributes: Option<String>,
        payload: Vec<u8>,
    ) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Gossip {
                from,
                attributes,
                payload,
                reply: tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("plumtree actor closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("plumtree actor closed"))
    }

    /// Record a partial announcement (IHAVE) received from a peer.
    pub async fn receive_ihave(&self, from: P, hash: MessageHash) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::IHave {
                from,
                hash,
                reply: tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("plumtree actor closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("plumtree actor closed"))
    }

    /// Demote a peer to the lazy set at its request.
    pub async fn receive_prune(&self, from: P) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Prune { from, reply: tx })
            .await
            .map_err(|_| anyhow::anyhow!("plumtree actor closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("plumtree actor closed"))
    }

    /// Promote a peer to the eager set and answer its GRAFT with a GOSSIP
    /// for the requested fingerprint.
    pub async fn receive_graft(&self, from: P, hash: MessageHash) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Graft {
                from,
                hash,
                reply: tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("plumtree actor closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("plumtree actor closed"))
    }

    /// Originate a message locally, pushing it to all peers according to
    /// their status. Returns the message fingerprint.
    pub async fn publish(
        &self,
        attributes: Option<String>,
        payload: Vec<u8>,
    ) -> anyhow::Result<MessageHash> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Publish {
                attributes,
                payload,
                reply: tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("plumtree actor closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("plumtree actor closed"))
    }

    /// Drain the lazy announcement queue now, dispatching every pending
    /// IHAVE exactly once.
    pub async fn process_queue(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::ProcessQueue(tx))
            .await
            .map_err(|_| anyhow::anyhow!("plumtree actor closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("plumtree actor closed"))
    }

    /// Cancel the periodic lazy-queue flush tick.
    ///
    /// Per-message graft timers are not affected; they are cancelled
    /// individually when their message arrives in full, or by [`quit`].
    ///
    /// [`quit`]: Plumtree::quit
    pub async fn stop(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stop(tx))
            .await
            .map_err(|_| anyhow::anyhow!("plumtree actor closed"))?;
        rx.await.map_err(|_| anyhow::anyhow!("plumtree actor closed"))
    }

    /// Shut the engine down entirely, aborting outstanding graft timers.
    pub async fn quit(&self) {
        let _ = self.cmd_tx.send(Command::Quit).await;
    }

    /// Snapshot of every known peer.
    pub async fn peers(&self) -> Vec<P> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::GetPeers(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Snapshot of the eager set.
    pub async fn eager_push_peers(&self) -> Vec<P> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::GetEagerPeers(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Snapshot of the lazy set.
    pub async fn lazy_push_peers(&self) -> Vec<P> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::GetLazyPeers(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

// ============================================================================
// Plumtree Actor (owns state)
// ============================================================================

struct PlumtreeActor<P: Peer, S, R> {
    network: Arc<S>,
    peers: R,
    config: PlumtreeConfig,
    hasher: MessageHasher,
    validator: MessageValidator<P>,
    /// Dedup cache: fingerprint -> per-message handler, LRU-evicted at
    /// capacity. Eviction cancels the evicted handler's graft timer.
    handlers: LruCache<MessageHash, MessageHandler<P>>,
    lazy_queue: LazyQueue<P>,
    delivery_tx: mpsc::Sender<Vec<u8>>,
    /// Cloned into each graft timer task; firings come back through the
    /// paired receiver so they are serialized with protocol events.
    graft_fire_tx: mpsc::Sender<MessageHash>,
    /// Set by `stop()`: disables the periodic flush tick.
    stopped: bool,
}

impl<P, S, R> PlumtreeActor<P, S, R>
where
    P: Peer,
    S: MessageSender<P> + 'static,
    R: PeerRepository<P> + Send + 'static,
{
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command<P>>,
        mut graft_fire_rx: mpsc::Receiver<MessageHash>,
    ) {
        // First flush one full period in, not immediately.
        let mut flush_interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.lazy_queue_interval,
            self.config.lazy_queue_interval,
        );

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::AddPeer(peer, reply)) => {
                            self.peers.add_eager(peer);
                            let _ = reply.send(());
                        }
                        Some(Command::RemovePeer(peer, reply)) => {
                            self.peers.remove_peer(&peer);
                            let _ = reply.send(());
                        }
                        Some(Command::Gossip { from, attributes, payload, reply }) => {
                            self.on_gossip(from, attributes, payload).await;
                            let _ = reply.send(());
                        }
                        Some(Command::IHave { from, hash, reply }) => {
                            self.on_ihave(from, hash);
                            let _ = reply.send(());
                        }
                        Some(Command::Prune { from, reply }) => {
                            debug!(peer = ?from, "prune received, demoting peer to lazy");
                            self.peers.move_to_lazy(&from);
                            let _ = reply.send(());
                        }
                        Some(Command::Graft { from, hash, reply }) => {
                            self.on_graft(from, hash).await;
                            let _ = reply.send(());
                        }
                        Some(Command::Publish { attributes, payload, reply }) => {
                            let hash = (self.hasher)(&payload);
                            self.on_full_message(hash, Origin::Local, attributes, payload).await;
                            let _ = reply.send(hash);
                        }
                        Some(Command::ProcessQueue(reply)) => {
                            self.flush_lazy_queue().await;
                            let _ = reply.send(());
                        }
                        Some(Command::GetPeers(reply)) => {
                            let _ = reply.send(self.peers.peers());
                        }
                        Some(Command::GetEagerPeers(reply)) => {
                            let _ = reply.send(self.peers.eager_push_peers());
                        }
                        Some(Command::GetLazyPeers(reply)) => {
                            let _ = reply.send(self.peers.lazy_push_peers());
                        }
                        Some(Command::Stop(reply)) => {
                            debug!("periodic lazy-queue flush stopped");
                            self.stopped = true;
                            let _ = reply.send(());
                        }
                        Some(Command::Quit) => {
                            debug!("plumtree actor quitting");
                            break;
                        }
                        None => {
                            debug!("plumtree handle dropped, actor quitting");
                            break;
                        }
                    }
                }
                Some(hash) = graft_fire_rx.recv() => {
                    self.on_graft_timer(hash).await;
                }
                _ = flush_interval.tick(), if !self.stopped => {
                    self.flush_lazy_queue().await;
                }
            }
        }
        // Dropping the handler cache aborts every outstanding graft timer.
    }

    /// Inbound full message: admit the sender, then run the full-message
    /// path for its fingerprint.
    async fn on_gossip(&mut self, from: P, attributes: Option<String>, payload: Vec<u8>) {
        self.peers.consider_new_peer(from.clone());
        let hash = (self.hasher)(&payload);
        self.on_full_message(hash, Origin::FromPeer(from), attributes, payload)
            .await;
    }

    /// The full-message transition of the per-message state machine.
    async fn on_full_message(
        &mut self,
        hash: MessageHash,
        origin: Origin<P>,
        attributes: Option<String>,
        payload: Vec<u8>,
    ) {
        self.ensure_handler(hash);
        let handler = match self.handlers.get_mut(&hash) {
            Some(handler) => handler,
            None => return,
        };

        if handler.received_full {
            // Duplicate eager delivery proves the link redundant: demote
            // the sender. Local re-publishes of the same payload are
            // ignored.
            if let Origin::FromPeer(sender) = origin {
                debug!(?hash, peer = ?sender, "duplicate delivery, pruning sender");
                self.network.send(Verb::Prune, None, &sender, hash, None).await;
                self.peers.move_to_lazy(&sender);
            }
            return;
        }

        // The fingerprint is now known regardless of validation outcome;
        // a rejected message is absorbed, not re-processed.
        handler.received_full = true;
        handler.cancel_graft_cycle();

        let accepted = match &origin {
            Origin::Local => true,
            Origin::FromPeer(sender) => (self.validator)(&payload, sender),
        };
        if !accepted {
            warn!(?hash, "message rejected by validator, absorbing without propagation");
            return;
        }

        if self.config.resend_full_on_graft {
            handler.full_message = Some(StoredMessage {
                attributes: attributes.clone(),
                payload: payload.clone(),
            });
        }
        let already_announced = handler.lazy_announcers.clone();

        let exclude = match &origin {
            Origin::Local => None,
            Origin::FromPeer(sender) => Some(sender.clone()),
        };
        for peer in self.peers.eager_push_peers() {
            if exclude.as_ref() != Some(&peer) {
                self.network
                    .send(Verb::Gossip, attributes.as_deref(), &peer, hash, Some(&payload))
                    .await;
            }
        }
        for peer in self.peers.lazy_push_peers() {
            // Peers that already announced this fingerprint hold the
            // message; an IHAVE back would be noise.
            if !already_announced.contains(&peer) {
                trace!(?hash, ?peer, "queueing lazy announcement");
                self.lazy_queue.enqueue(peer, hash);
            }
        }

        if let Origin::FromPeer(_) = origin {
            let _ = self.delivery_tx.send(payload).await;
        }
    }

    /// The partial-message (IHAVE) transition.
    fn on_ihave(&mut self, from: P, hash: MessageHash) {
        self.ensure_handler(hash);
        let graft_delay = self.config.graft_delay;
        let fire_tx = self.graft_fire_tx.clone();
        let handler = match self.handlers.get_mut(&hash) {
            Some(handler) => handler,
            None => return,
        };

        if handler.received_full {
            trace!(?hash, peer = ?from, "stale announcement for known message");
            return;
        }

        handler.lazy_announcers.push(from);
        if !handler.awaiting_graft {
            handler.awaiting_graft = true;
            debug!(?hash, "starting graft-retry cycle");
            handler.graft_task = Some(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(graft_delay).await;
                    if fire_tx.send(hash).await.is_err() {
                        break;
                    }
                }
            }));
        }
    }

    /// One firing of a graft-retry timer: GRAFT the next announcer,
    /// round-robin.
    async fn on_graft_timer(&mut self, hash: MessageHash) {
        let handler = match self.handlers.get_mut(&hash) {
            Some(handler) => handler,
            // Evicted since the timer fired; the task is already aborted.
            None => return,
        };
        if handler.received_full || handler.lazy_announcers.is_empty() {
            return;
        }

        let target =
            handler.lazy_announcers[handler.graft_cursor % handler.lazy_announcers.len()].clone();
        handler.graft_cursor = handler.graft_cursor.wrapping_add(1);
        debug!(?hash, peer = ?target, "grafting announcer to recover missing message");
        self.network.send(Verb::Graft, None, &target, hash, None).await;
    }

    /// Grant a GRAFT request: promote the peer and push the message.
    async fn on_graft(&mut self, from: P, hash: MessageHash) {
        debug!(?hash, peer = ?from, "graft received, promoting peer to eager");
        self.peers.move_to_eager(&from);

        let stored = self.handlers.get(&hash).and_then(|h| h.full_message.clone());
        match stored {
            Some(message) => {
                self.network
                    .send(
                        Verb::Gossip,
                        message.attributes.as_deref(),
                        &from,
                        hash,
                        Some(&message.payload),
                    )
                    .await;
            }
            None => {
                // Payload not retained (or never seen): header-only GOSSIP.
                self.network.send(Verb::Gossip, None, &from, hash, None).await;
            }
        }
    }

    /// Dispatch every pending lazy announcement, in enqueue order, then
    /// clear the queue. Announcements added during the drain wait for the
    /// next pass.
    async fn flush_lazy_queue(&mut self) {
        if self.lazy_queue.is_empty() {
            return;
        }
        let pending = self.lazy_queue.drain();
        trace!(count = pending.len(), "flushing lazy announcement queue");
        for entry in pending {
            self.network
                .send(Verb::IHave, None, &entry.peer, entry.hash, None)
                .await;
        }
    }

    /// Resolve-or-create the handler for a fingerprint. A capacity
    /// eviction cancels the evicted handler's graft timer before
    /// discarding it.
    fn ensure_handler(&mut self, hash: MessageHash) {
        if self.handlers.get(&hash).is_some() {
            return;
        }
        if let Some((evicted_hash, mut evicted)) = self.handlers.push(hash, MessageHandler::new()) {
            debug!(hash = ?evicted_hash, "dedup cache at capacity, evicting handler");
            evicted.cancel_graft_cycle();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
