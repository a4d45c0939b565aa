//! # Plumtree - Epidemic Broadcast Trees
//!
//! A peer-to-peer broadcast primitive that disseminates a message to every
//! node in an overlay with tree-like efficiency, backed by a lazy mesh
//! that repairs the tree when eager links fail or arrive out of order.
//!
//! The crate is the dissemination layer of a larger peer-to-peer system:
//! hand it a message and it reaches all peers quickly, with at most one
//! meaningful delivery to the local application, while membership
//! self-heals: redundant eager links are pruned to lazy, and lazy links
//! revealing a gap are grafted back into the tree.
//!
//! ## Architecture
//!
//! The engine follows the **actor pattern**: [`Plumtree`] is a cheap-to-
//! clone handle, and a private actor owns all mutable state and processes
//! protocol events sequentially. Transport, wire encoding and peer
//! discovery stay outside; the engine talks to the network only through
//! the [`MessageSender`] dispatch port.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `broadcast` | Protocol engine: per-message state machine, dedup cache, lazy queue, graft timers |
//! | `peers` | Eager/lazy peer membership store |
//! | `messages` | Protocol verbs, message fingerprints, dispatch port |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use plumtree::{EphemeralPeerRepository, MessageSender, Plumtree, PlumtreeConfig};
//! # use plumtree::{MessageHash, Verb};
//! # struct MyTransport;
//! # #[async_trait::async_trait]
//! # impl MessageSender<u64> for MyTransport {
//! #     async fn send(&self, _: Verb, _: Option<&str>, _: &u64, _: MessageHash, _: Option<&[u8]>) {}
//! # }
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let transport = Arc::new(MyTransport);
//! let (tree, mut delivered) =
//!     Plumtree::spawn(transport, EphemeralPeerRepository::new(), PlumtreeConfig::default());
//!
//! tree.add_peer(42).await?;
//! tree.publish(None, b"hello overlay".to_vec()).await?;
//!
//! while let Some(payload) = delivered.recv().await {
//!     println!("received {} bytes", payload.len());
//! }
//! # Ok(())
//! # }
//! ```

mod broadcast;
mod messages;
mod peers;

pub use broadcast::{
    Plumtree, PlumtreeConfig, DEFAULT_DEDUP_CACHE_SIZE, DEFAULT_GRAFT_DELAY,
    DEFAULT_LAZY_QUEUE_INTERVAL,
};
pub use messages::{
    default_message_hash, MessageHash, MessageHasher, MessageSender, MessageValidator, Verb,
};
pub use peers::{EphemeralPeerRepository, Peer, PeerRepository};
