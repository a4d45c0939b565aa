//! # Protocol Verbs and Message Fingerprints
//!
//! The engine speaks four verbs to its peers:
//!
//! | Verb | Payload | Attributes | Meaning |
//! |------|---------|------------|---------|
//! | `Gossip` | yes | yes | full message push |
//! | `IHave` | no | no | "I have the message with this fingerprint" |
//! | `Graft` | no | no | "send me the message for this fingerprint" |
//! | `Prune` | no | no | "stop pushing to me eagerly" |
//!
//! Every verb carries a [`MessageHash`] fingerprint. Wire encoding is the
//! transport's concern; the engine hands verbs to a [`MessageSender`] and
//! never looks back.

use std::fmt;

use async_trait::async_trait;

use crate::peers::Peer;

/// The four Plumtree protocol verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Full message push along an eager tree link.
    Gossip,
    /// Lazy announcement of a message fingerprint.
    IHave,
    /// Request to promote a lazy link and obtain the full message.
    Graft,
    /// Request to demote a redundant eager link.
    Prune,
}

/// Content-derived fingerprint identifying a message.
///
/// Produced by the pluggable hashing function; keys the dedup cache and is
/// the identifier carried in IHAVE/GRAFT/PRUNE.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHash([u8; 32]);

impl MessageHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for MessageHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First four bytes are enough to tell fingerprints apart in logs.
        write!(
            f,
            "MessageHash({:02x}{:02x}{:02x}{:02x}…)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Default message hashing function: blake3 over the payload bytes.
pub fn default_message_hash(payload: &[u8]) -> MessageHash {
    MessageHash(*blake3::hash(payload).as_bytes())
}

/// Pluggable hashing function mapping payload bytes to a fingerprint.
/// Must be deterministic.
pub type MessageHasher = Box<dyn Fn(&[u8]) -> MessageHash + Send>;

/// Pluggable validator gating propagation and delivery of remote messages.
/// Returns `true` to accept `(payload, sender)`. The default accepts
/// everything.
pub type MessageValidator<P> = Box<dyn Fn(&[u8], &P) -> bool + Send>;

/// Outbound dispatch port: how the engine emits protocol verbs to a peer.
///
/// Fire-and-forget. Send failures are the transport's concern and are
/// invisible to the engine; the only protocol-level re-request is the
/// GRAFT retry cycle.
#[async_trait]
pub trait MessageSender<P: Peer>: Send + Sync {
    /// Send one protocol verb to `peer`.
    ///
    /// `attributes` and `payload` accompany GOSSIP dissemination and are
    /// absent for the other verbs.
    async fn send(
        &self,
        verb: Verb,
        attributes: Option<&str>,
        peer: &P,
        hash: MessageHash,
        payload: Option<&[u8]>,
    );
}
