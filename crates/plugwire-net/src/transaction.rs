use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use plugwire_channel::{AnyPacket, ChannelError, ChannelId, PacketCodec};
use plugwire_frame::{Opcode, Packet, TransactionId};
use plugwire_transport::ConnectionId;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{NetError, Result};

type Outcome = std::result::Result<AnyPacket, NetError>;

/// Observable state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Completed,
    Failed,
    TimedOut,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        self != TransactionState::Pending
    }
}

struct PendingEntry {
    channel: ChannelId,
    opcode: Opcode,
    response: PacketCodec,
    created_at: Instant,
    deadline: Instant,
    timeout: Duration,
    tx: oneshot::Sender<Outcome>,
}

impl PendingEntry {
    fn finish(self, outcome: Outcome) {
        // The requester may have dropped its handle.
        let _ = self.tx.send(outcome);
    }
}

struct ConnectionTransactions {
    next_id: TransactionId,
    pending: HashMap<TransactionId, PendingEntry>,
}

impl ConnectionTransactions {
    fn new() -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
        }
    }

    /// Next wrapping id not currently pending.
    fn allocate(&mut self) -> TransactionId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}

/// What a response frame is checked against.
#[derive(Debug, Clone, Copy)]
pub struct Expected<'a> {
    pub channel: &'a str,
    pub opcode: Opcode,
}

/// In-flight request/response exchanges, keyed by connection.
///
/// Every transaction ends exactly once: the entry is removed from the
/// pending table under the lock and its outcome is sent to the requester's
/// handle. Whoever removes the entry owns the outcome.
pub struct TransactionManager {
    connections: Mutex<HashMap<ConnectionId, ConnectionTransactions>>,
    max_pending: usize,
}

impl TransactionManager {
    pub fn new(max_pending: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            max_pending,
        }
    }

    /// Start tracking a connection.
    pub fn open(&self, connection: ConnectionId) {
        self.lock()
            .entry(connection)
            .or_insert_with(ConnectionTransactions::new);
    }

    /// Allocate an id and register the pending transaction.
    pub fn begin<R: Packet>(
        &self,
        connection: ConnectionId,
        channel: ChannelId,
        opcode: Opcode,
        response: PacketCodec,
        timeout: Duration,
        now: Instant,
    ) -> Result<PendingRequest<R>> {
        let deadline = now
            .checked_add(timeout)
            .ok_or(NetError::InvalidTimeout(timeout))?;
        let mut connections = self.lock();
        let state = connections
            .get_mut(&connection)
            .ok_or(NetError::UnknownConnection(connection))?;

        if state.pending.len() >= self.max_pending {
            return Err(NetError::TooManyPending {
                connection,
                max: self.max_pending,
            });
        }

        let id = state.allocate();
        let (tx, rx) = oneshot::channel();
        state.pending.insert(
            id,
            PendingEntry {
                channel,
                opcode,
                response,
                created_at: now,
                deadline,
                timeout,
                tx,
            },
        );

        Ok(PendingRequest {
            connection,
            transaction: id,
            rx,
            state: TransactionState::Pending,
            _response: PhantomData,
        })
    }

    /// Response codec for a transaction still pending at `arrived_at`, if the
    /// frame matches it.
    ///
    /// A response arriving at or after the deadline gets `None`; the entry is
    /// left for [`expire`](Self::expire) to time out.
    pub fn response_codec(
        &self,
        connection: ConnectionId,
        transaction: TransactionId,
        expected: Expected<'_>,
        arrived_at: Instant,
    ) -> Option<PacketCodec> {
        let connections = self.lock();
        let entry = connections.get(&connection)?.pending.get(&transaction)?;
        (matches(entry, expected) && arrived_at < entry.deadline).then_some(entry.response)
    }

    /// Complete a pending transaction. Returns `false` if it already ended.
    pub fn complete(
        &self,
        connection: ConnectionId,
        transaction: TransactionId,
        expected: Expected<'_>,
        packet: AnyPacket,
    ) -> bool {
        let mut connections = self.lock();
        let Some(state) = connections.get_mut(&connection) else {
            return false;
        };
        match state.pending.get(&transaction) {
            Some(entry) if matches(entry, expected) => {}
            _ => return false,
        }
        let Some(entry) = state.pending.remove(&transaction) else {
            return false;
        };

        debug!(
            conn = %connection,
            txn = transaction,
            channel = %entry.channel,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            "transaction completed"
        );
        entry.finish(Ok(packet));
        true
    }

    /// Fail the transaction with `Cancelled`. Returns `false` if it already ended.
    pub fn cancel(&self, connection: ConnectionId, transaction: TransactionId) -> bool {
        let entry = self
            .lock()
            .get_mut(&connection)
            .and_then(|state| state.pending.remove(&transaction));
        match entry {
            Some(entry) => {
                debug!(conn = %connection, txn = transaction, "transaction cancelled");
                entry.finish(Err(NetError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Drop a transaction whose request never left, without an outcome.
    pub fn discard(&self, connection: ConnectionId, transaction: TransactionId) {
        if let Some(state) = self.lock().get_mut(&connection) {
            state.pending.remove(&transaction);
        }
    }

    /// Stop tracking a connection and fail everything pending on it.
    pub fn close(&self, connection: ConnectionId) -> usize {
        let Some(state) = self.lock().remove(&connection) else {
            return 0;
        };

        let count = state.pending.len();
        for (_, entry) in state.pending {
            entry.finish(Err(NetError::ConnectionClosed(connection)));
        }
        if count > 0 {
            debug!(conn = %connection, count, "pending transactions failed on close");
        }
        count
    }

    /// Time out every transaction whose deadline is at or before `now`.
    pub fn expire(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        {
            let mut connections = self.lock();
            for (connection, state) in connections.iter_mut() {
                let overdue: Vec<TransactionId> = state
                    .pending
                    .iter()
                    .filter(|(_, entry)| entry.deadline <= now)
                    .map(|(id, _)| *id)
                    .collect();
                for id in overdue {
                    if let Some(entry) = state.pending.remove(&id) {
                        expired.push((*connection, id, entry));
                    }
                }
            }
        }

        let count = expired.len();
        for (connection, id, entry) in expired {
            warn!(
                conn = %connection,
                txn = id,
                channel = %entry.channel,
                timeout_ms = entry.timeout.as_millis() as u64,
                "request timed out"
            );
            let timeout = entry.timeout;
            entry.finish(Err(NetError::Timeout(timeout)));
        }
        count
    }

    pub fn is_pending(&self, connection: ConnectionId, transaction: TransactionId) -> bool {
        self.lock()
            .get(&connection)
            .is_some_and(|state| state.pending.contains_key(&transaction))
    }

    pub fn pending_count(&self, connection: ConnectionId) -> usize {
        self.lock()
            .get(&connection)
            .map_or(0, |state| state.pending.len())
    }

    pub fn total_pending(&self) -> usize {
        self.lock().values().map(|state| state.pending.len()).sum()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionTransactions>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn matches(entry: &PendingEntry, expected: Expected<'_>) -> bool {
    entry.channel.as_str() == expected.channel && entry.opcode == expected.opcode
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("pending", &self.total_pending())
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

/// Requester's handle for one transaction.
///
/// Poll it with [`try_outcome`](PendingRequest::try_outcome) from the game
/// loop, or `.await` it.
pub struct PendingRequest<R> {
    connection: ConnectionId,
    transaction: TransactionId,
    rx: oneshot::Receiver<Outcome>,
    state: TransactionState,
    _response: PhantomData<fn() -> R>,
}

impl<R: Packet> PendingRequest<R> {
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Outcome if the transaction has ended.
    ///
    /// Returns `None` while pending, and after the outcome was taken once.
    pub fn try_outcome(&mut self) -> Option<Result<R>> {
        if self.state.is_terminal() {
            return None;
        }
        let outcome = match self.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(NetError::ConnectionClosed(self.connection))
            }
        };
        Some(self.settle(outcome))
    }

    fn settle(&mut self, outcome: Outcome) -> Result<R> {
        self.state = match &outcome {
            Ok(_) => TransactionState::Completed,
            Err(NetError::Timeout(_)) => TransactionState::TimedOut,
            Err(_) => TransactionState::Failed,
        };
        let packet = outcome?;
        packet.downcast::<R>().map(|packet| *packet).map_err(|_| {
            NetError::Channel(ChannelError::PacketTypeMismatch {
                expected: std::any::type_name::<R>(),
                found: "another packet type",
            })
        })
    }
}

impl<R: Packet> Future for PendingRequest<R> {
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => Err(NetError::ConnectionClosed(this.connection)),
        };
        Poll::Ready(this.settle(outcome))
    }
}

impl<R> fmt::Debug for PendingRequest<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("connection", &self.connection)
            .field("transaction", &self.transaction)
            .field("state", &self.state)
            .finish()
    }
}
