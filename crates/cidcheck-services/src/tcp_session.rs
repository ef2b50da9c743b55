//! Line-framed TCP session.
//!
//! Dials the peer once, then splits the stream: queries are written as
//! single JSON lines behind a lock on the write half, and a reader task
//! decodes reply lines and hands each one to the `ReplyHandler`. The reader
//! exits on EOF, read failure, or cancellation.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use cidcheck_core::{Frame, PeerIdentity, Query};

use crate::session::{ReplyHandler, Session, SessionError};

/// `<peer-id>@<host:port>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub id: PeerIdentity,
    pub addr: String,
}

impl FromStr for PeerAddr {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |reason: &str| SessionError::BadAddress {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        let (id, addr) = s
            .rsplit_once('@')
            .ok_or_else(|| bad("expected <peer-id>@<host:port>"))?;
        if !addr.contains(':') {
            return Err(bad("missing port"));
        }
        Ok(Self {
            id: PeerIdentity::new(id).map_err(|_| bad("empty peer id"))?,
            addr: addr.to_string(),
        })
    }
}

pub struct TcpSession {
    target: PeerIdentity,
    writer: Mutex<Option<OwnedWriteHalf>>,
    cancel: CancellationToken,
    /// Set once the read side has ended; no reply can arrive after that.
    closed: CancellationToken,
}

impl TcpSession {
    /// Dial the peer and start delivering replies to `handler`.
    pub async fn connect(
        peer: &PeerAddr,
        handler: Arc<dyn ReplyHandler>,
        dial_timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, SessionError> {
        let dial_err = |reason: String| SessionError::Dial {
            addr: peer.addr.clone(),
            reason,
        };
        let stream = tokio::time::timeout(dial_timeout, TcpStream::connect(&peer.addr))
            .await
            .map_err(|_| dial_err("timed out".to_string()))?
            .map_err(|e| dial_err(e.to_string()))?;
        stream.set_nodelay(true).ok();
        tracing::info!(peer = %peer.id, addr = %peer.addr, "connected");

        let (read_half, write_half) = stream.into_split();
        let reader_cancel = cancel.child_token();
        // Not a child of the run token: a cancelled run is not a dead connection.
        let closed = CancellationToken::new();
        tokio::spawn(read_loop(
            read_half,
            handler,
            reader_cancel.clone(),
            closed.clone(),
        ));

        Ok(Self {
            target: peer.id.clone(),
            writer: Mutex::new(Some(write_half)),
            cancel: reader_cancel,
            closed,
        })
    }
}

async fn read_loop(
    read_half: tokio::net::tcp::OwnedReadHalf,
    handler: Arc<dyn ReplyHandler>,
    cancel: CancellationToken,
    closed: CancellationToken,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("session reader shutting down");
                return;
            }
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match Frame::decode(&line) {
                Ok(Frame::Reply { from, reply }) => handler.on_reply(from, reply).await,
                Ok(Frame::Query(_)) => {
                    tracing::debug!("peer sent a query, ignoring");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed frame");
                }
            },
            Ok(None) => {
                closed.cancel();
                handler.on_transport_error(SessionError::Closed).await;
                return;
            }
            Err(e) => {
                closed.cancel();
                handler
                    .on_transport_error(SessionError::Transport(e.to_string()))
                    .await;
                return;
            }
        }
    }
}

impl Session for TcpSession {
    fn target(&self) -> &PeerIdentity {
        &self.target
    }

    fn send(&self, query: Query) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(SessionError::Closed);
            }
            let bytes = Frame::Query(query)
                .encode()
                .map_err(|e| SessionError::Send(e.to_string()))?;
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(SessionError::Closed)?;
            writer
                .write_all(&bytes)
                .await
                .map_err(|e| SessionError::Send(e.to_string()))?;
            writer
                .flush()
                .await
                .map_err(|e| SessionError::Send(e.to_string()))
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cancel.cancel();
            self.closed.cancel();
            if let Some(mut writer) = self.writer.lock().await.take() {
                let _ = writer.shutdown().await;
                tracing::debug!(peer = %self.target, "session closed");
            }
        })
    }
}
