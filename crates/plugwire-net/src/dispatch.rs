use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use plugwire_channel::{AnyPacket, ChannelBinding, ChannelId, ErasedResponder, PacketContext};
use plugwire_frame::{Opcode, TransactionId};
use plugwire_transport::ConnectionId;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error};

/// A decoded inbound packet waiting for the game-logic context.
pub struct Delivery {
    pub(crate) ctx: PacketContext,
    pub(crate) binding: Arc<ChannelBinding>,
    pub(crate) packet: AnyPacket,
    pub(crate) responder: Option<ErasedResponder>,
}

impl Delivery {
    pub fn context(&self) -> &PacketContext {
        &self.ctx
    }

    /// Run every handler bound to the opcode, in registration order.
    ///
    /// Handler errors and panics are isolated: each becomes a
    /// [`HandlerFailure`] and the remaining handlers still run.
    pub fn run(&self) -> Vec<HandlerFailure> {
        let Some(entry) = self.binding.entry(self.ctx.opcode()) else {
            return Vec::new();
        };
        if entry.handlers().is_empty() {
            debug!(
                channel = %self.ctx.channel(),
                opcode = self.ctx.opcode(),
                "no handlers bound"
            );
        }

        let mut failures = Vec::new();
        for handler in entry.handlers() {
            let result = catch_unwind(AssertUnwindSafe(|| {
                handler.invoke(&*self.packet, &self.ctx, self.responder.as_ref())
            }));
            let message = match result {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
            };
            error!(
                conn = %self.ctx.connection_id(),
                channel = %self.ctx.channel(),
                opcode = self.ctx.opcode(),
                packet = handler.packet_name(),
                error = %message,
                "packet handler failed"
            );
            failures.push(HandlerFailure {
                connection: self.ctx.connection_id(),
                channel: self.ctx.channel().clone(),
                opcode: self.ctx.opcode(),
                message,
            });
        }
        failures
    }
}

/// A decoded response waiting to complete its transaction on the game tick.
pub struct ResponseArrival {
    pub(crate) connection: ConnectionId,
    pub(crate) transaction: TransactionId,
    pub(crate) channel: ChannelId,
    pub(crate) opcode: Opcode,
    pub(crate) packet: AnyPacket,
}

impl fmt::Debug for ResponseArrival {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseArrival")
            .field("connection", &self.connection)
            .field("transaction", &self.transaction)
            .field("channel", &self.channel)
            .field("opcode", &self.opcode)
            .finish()
    }
}

/// One queued inbound event, in wire order.
#[derive(Debug)]
pub enum Inbound {
    /// A message or request for the channel's handlers.
    Packet(Delivery),
    /// A response for a pending transaction.
    Response(ResponseArrival),
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("ctx", &self.ctx)
            .field("request", &self.responder.is_some())
            .finish()
    }
}

/// An isolated handler error or panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub connection: ConnectionId,
    pub channel: ChannelId,
    pub opcode: Opcode,
    pub message: String,
}

/// Callback receiving every isolated handler failure.
pub type FailureHook = dyn Fn(&HandlerFailure) + Send + Sync;

/// Counters returned by one dispatch tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Deliveries run.
    pub delivered: usize,
    /// Transactions completed by queued responses.
    pub completed: usize,
    /// Handler failures isolated.
    pub failed: usize,
    /// Transactions timed out by this tick.
    pub timed_out: usize,
}

impl DispatchReport {
    pub fn is_idle(&self) -> bool {
        self.delivered == 0 && self.completed == 0 && self.timed_out == 0
    }
}

/// FIFO from the network-processing context to the game-logic context.
///
/// Any thread may push; the game loop drains it. Arrival order is kept, so
/// packets and responses from one connection are seen in wire order.
pub struct DispatchQueue {
    tx: UnboundedSender<Inbound>,
    rx: Mutex<UnboundedReceiver<Inbound>>,
    queued: AtomicUsize,
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            queued: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, item: Inbound) {
        self.queued.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(item).is_err() {
            // The receiver lives as long as the queue.
            self.queued.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Take everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<Inbound> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(item) => {
                    self.queued.fetch_sub(1, Ordering::AcqRel);
                    out.push(item);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("queued", &self.len())
            .finish()
    }
}
