//! Text-frame transport seam underneath the wire adapter.
//!
//! The harness never talks to a concrete WebSocket stack; it talks to a
//! [`Transport`]. [`duplex`] builds the in-memory pair used by the echo
//! server and the tests; a production integration would implement the
//! trait over its own socket.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{HarnessError, Result};

/// Frame capacity of one direction of an in-memory duplex pair.
const DUPLEX_CAPACITY: usize = 256;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one text frame. Fails once the peer has hung up.
    async fn send(&self, frame: String) -> Result<()>;

    /// Receive the next text frame; `None` when the peer closed.
    async fn recv(&self) -> Option<String>;

    /// Hang up. Idempotent.
    fn close(&self);
}

/// One end of an in-memory duplex connection.
pub struct DuplexTransport {
    tx: mpsc::Sender<String>,
    /// Wrapped in a `Mutex` so `recv` can take `&self` (required by the
    /// trait) while mutating the receiver.
    rx: Mutex<Option<mpsc::Receiver<String>>>,
}

/// Create a connected pair of in-memory transports.
pub fn duplex() -> (DuplexTransport, DuplexTransport) {
    let (a_tx, a_rx) = mpsc::channel(DUPLEX_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(DUPLEX_CAPACITY);
    (
        DuplexTransport {
            tx: a_tx,
            rx: Mutex::new(Some(b_rx)),
        },
        DuplexTransport {
            tx: b_tx,
            rx: Mutex::new(Some(a_rx)),
        },
    )
}

#[async_trait]
impl Transport for DuplexTransport {
    async fn send(&self, frame: String) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| HarnessError::Connection("peer hung up".into()))
    }

    async fn recv(&self) -> Option<String> {
        // Take the receiver out so the lock is not held across the await.
        let mut rx = self.rx.lock().take()?;
        let frame = rx.recv().await;
        *self.rx.lock() = Some(rx);
        frame
    }

    fn close(&self) {
        self.rx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_the_pair_in_order() {
        let (client, server) = duplex();
        client.send("one".into()).await.expect("send one");
        client.send("two".into()).await.expect("send two");
        assert_eq!(server.recv().await.as_deref(), Some("one"));
        assert_eq!(server.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn recv_returns_none_after_close() {
        let (client, server) = duplex();
        server.close();
        assert!(server.recv().await.is_none());
        // The peer can no longer deliver anything.
        drop(client);
    }

    #[tokio::test]
    async fn send_fails_after_peer_drops() {
        let (client, server) = duplex();
        drop(server);
        let err = client.send("lost".into()).await.expect_err("peer is gone");
        assert!(matches!(err, HarnessError::Connection(_)));
    }
}
