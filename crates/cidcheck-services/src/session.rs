//! Session contract: the narrow seam to the content-exchange protocol.
//!
//! A session owns one open connection to the target peer. Outbound queries
//! go through `Session::send`; inbound replies and transport failures are
//! pushed into the `ReplyHandler` the session was opened with. Handler
//! calls may arrive on any task, concurrently with each other.

use futures::future::BoxFuture;

use cidcheck_core::{PeerIdentity, Query, Reply};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid peer address {input:?}: {reason}")]
    BadAddress { input: String, reason: String },
    #[error("failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },
    #[error("send failed: {0}")]
    Send(String),
    #[error("send timed out")]
    SendTimeout,
    #[error("connection closed by peer")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound half of a session to a single, fixed peer.
pub trait Session: Send + Sync {
    /// The peer every query goes to.
    fn target(&self) -> &PeerIdentity;

    /// Transmit one query. Errors only on transport-level failure; the
    /// caller bounds the call with its own deadline.
    fn send(&self, query: Query) -> BoxFuture<'_, Result<(), SessionError>>;

    /// Close the connection. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Inbound callbacks registered when a session is opened.
pub trait ReplyHandler: Send + Sync {
    /// One call per inbound reply, tagged with the transport-level sender.
    fn on_reply(&self, sender: PeerIdentity, reply: Reply) -> BoxFuture<'_, ()>;

    /// The transport itself failed; distinct from a negative reply.
    fn on_transport_error(&self, error: SessionError) -> BoxFuture<'_, ()>;
}
