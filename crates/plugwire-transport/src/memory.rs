use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Connection, ConnectionId, RawSender};

/// Create two linked in-memory endpoints.
///
/// Frames sent through `left.connection()` arrive in `right`'s inbox and the
/// other way round. `left_id` is the id the left side uses for its connection
/// to the right side; closing either endpoint closes the link for both.
pub fn link(left_id: ConnectionId, right_id: ConnectionId) -> (MemoryEndpoint, MemoryEndpoint) {
    let open = Arc::new(AtomicBool::new(true));
    let (to_right, right_inbox) = mpsc::unbounded_channel();
    let (to_left, left_inbox) = mpsc::unbounded_channel();

    let left = MemoryEndpoint {
        id: left_id,
        outbound: Arc::new(MemorySender {
            id: left_id,
            tx: to_right,
            open: open.clone(),
        }),
        inbox: left_inbox,
    };
    let right = MemoryEndpoint {
        id: right_id,
        outbound: Arc::new(MemorySender {
            id: right_id,
            tx: to_left,
            open,
        }),
        inbox: right_inbox,
    };

    debug!(%left_id, %right_id, "memory link created");
    (left, right)
}

/// One side of an in-memory link.
pub struct MemoryEndpoint {
    id: ConnectionId,
    outbound: Arc<MemorySender>,
    inbox: UnboundedReceiver<Bytes>,
}

struct MemorySender {
    id: ConnectionId,
    tx: UnboundedSender<Bytes>,
    open: Arc<AtomicBool>,
}

impl RawSender for MemorySender {
    fn send_raw(&self, frame: Bytes) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::Closed(self.id));
        }
        self.tx
            .send(frame)
            .map_err(|_| TransportError::Closed(self.id))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl MemoryEndpoint {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Connection handle whose sends land in the opposite inbox.
    pub fn connection(&self) -> Connection {
        Connection::new(self.id, self.outbound.clone())
    }

    /// Next frame received from the other side, if any.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        match self.inbox.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// All frames currently waiting, in arrival order.
    pub fn drain(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = self.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Close the link for both endpoints.
    pub fn close(&self) {
        if self.outbound.open.swap(false, Ordering::AcqRel) {
            debug!(id = %self.id, "memory link closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_open()
    }
}

impl std::fmt::Debug for MemoryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEndpoint")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_cross_the_link_in_order() {
        let (left, mut right) = link(ConnectionId::new(1), ConnectionId::new(2));
        let conn = left.connection();

        conn.send_raw(Bytes::from_static(b"first")).unwrap();
        conn.send_raw(Bytes::from_static(b"second")).unwrap();

        let frames = right.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), b"first");
        assert_eq!(frames[1].as_ref(), b"second");
        assert!(right.try_recv().is_none());
    }

    #[test]
    fn link_is_bidirectional() {
        let (mut left, right) = link(ConnectionId::new(1), ConnectionId::new(2));
        right
            .connection()
            .send_raw(Bytes::from_static(b"back"))
            .unwrap();

        assert_eq!(left.try_recv().unwrap().as_ref(), b"back");
    }

    #[test]
    fn close_rejects_sends_on_both_sides() {
        let (left, right) = link(ConnectionId::new(1), ConnectionId::new(2));
        right.close();

        assert!(!left.is_open());
        let err = left
            .connection()
            .send_raw(Bytes::from_static(b"late"))
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed(_)));
        assert!(right
            .connection()
            .send_raw(Bytes::from_static(b"late"))
            .is_err());
    }

    #[test]
    fn dropped_peer_endpoint_reports_closed() {
        let (left, right) = link(ConnectionId::new(1), ConnectionId::new(2));
        drop(right);

        let err = left
            .connection()
            .send_raw(Bytes::from_static(b"x"))
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed(id) if id == ConnectionId::new(1)));
    }
}
