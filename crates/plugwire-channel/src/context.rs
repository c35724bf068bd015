use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use plugwire_frame::{
    begin_frame, finish_frame, FrameConfig, FrameHeader, FrameKind, Opcode, Packet, TransactionId,
};
use plugwire_transport::{Connection, ConnectionId};
use tracing::debug;

use crate::codec::PacketCodec;
use crate::error::{ChannelError, Result};
use crate::id::ChannelId;

/// Where a packet came from, handed to every handler.
#[derive(Debug, Clone)]
pub struct PacketContext {
    connection: Connection,
    channel: ChannelId,
    opcode: Opcode,
    transaction: Option<TransactionId>,
}

impl PacketContext {
    pub fn new(
        connection: Connection,
        channel: ChannelId,
        opcode: Opcode,
        transaction: Option<TransactionId>,
    ) -> Self {
        Self {
            connection,
            channel,
            opcode,
            transaction,
        }
    }

    /// The connection the packet arrived on. Replies go through it.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Transaction id when the packet is a request.
    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }
}

/// Untyped responder for one inbound request.
///
/// Clones share the responded flag, so the request is answered at most once
/// no matter how many handlers hold a copy.
#[derive(Clone)]
pub struct ErasedResponder {
    connection: Connection,
    channel: ChannelId,
    opcode: Opcode,
    transaction: TransactionId,
    codec: PacketCodec,
    frame: FrameConfig,
    responded: Arc<AtomicBool>,
}

impl ErasedResponder {
    pub fn new(
        connection: Connection,
        channel: ChannelId,
        opcode: Opcode,
        transaction: TransactionId,
        codec: PacketCodec,
        frame: FrameConfig,
    ) -> Self {
        Self {
            connection,
            channel,
            opcode,
            transaction,
            codec,
            frame,
            responded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn has_responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    /// Encode and send the response frame.
    ///
    /// If the transport refuses the frame the request stays unanswered and
    /// `respond` may be called again.
    pub fn respond_any(&self, response: &dyn Any) -> Result<()> {
        if self.has_responded() {
            return Err(ChannelError::AlreadyResponded(self.transaction));
        }

        let header = FrameHeader::new(
            self.channel.as_str(),
            self.opcode,
            FrameKind::Response(self.transaction),
        );
        let mut buf = begin_frame(&header, &self.frame)?;
        self.codec.encode(response, &mut buf)?;
        let bytes = finish_frame(buf, &self.frame)?;

        // Only one caller gets past this point until a send fails.
        if self.responded.swap(true, Ordering::AcqRel) {
            return Err(ChannelError::AlreadyResponded(self.transaction));
        }

        debug!(
            conn = %self.connection.id(),
            channel = %self.channel,
            opcode = self.opcode,
            txn = self.transaction,
            size = bytes.len(),
            "sending response"
        );
        if let Err(err) = self.connection.send_raw(bytes) {
            // Nothing went out, so the request may still be answered.
            self.responded.store(false, Ordering::Release);
            return Err(err.into());
        }
        Ok(())
    }

    pub(crate) fn response_type(&self) -> std::any::TypeId {
        self.codec.type_id()
    }
}

impl fmt::Debug for ErasedResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedResponder")
            .field("connection", &self.connection.id())
            .field("channel", &self.channel)
            .field("opcode", &self.opcode)
            .field("transaction", &self.transaction)
            .field("responded", &self.has_responded())
            .finish()
    }
}

/// Typed handle a request handler uses to send its one response.
///
/// The handler owns it and may move it elsewhere to answer later.
pub struct Responder<R> {
    inner: ErasedResponder,
    _response: PhantomData<fn(&R)>,
}

impl<R: Packet> Responder<R> {
    pub(crate) fn new(inner: ErasedResponder) -> Self {
        Self {
            inner,
            _response: PhantomData,
        }
    }

    /// Send the response. A second call fails with `AlreadyResponded`.
    pub fn respond(&self, response: &R) -> Result<()> {
        self.inner.respond_any(response)
    }

    pub fn transaction(&self) -> TransactionId {
        self.inner.transaction()
    }

    pub fn has_responded(&self) -> bool {
        self.inner.has_responded()
    }
}

impl<R> Clone for Responder<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _response: PhantomData,
        }
    }
}

impl<R> fmt::Debug for Responder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}
