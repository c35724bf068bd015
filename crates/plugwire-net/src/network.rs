use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use plugwire_channel::{
    ChannelBinding, ChannelError, ChannelId, ChannelRegistry, ErasedResponder, PacketContext,
};
use plugwire_frame::{
    begin_frame, decode_frame, encode_frame, finish_frame, FrameHeader, FrameKind, Opcode, Packet,
    TransactionId, REGISTER_CHANNEL,
};
use plugwire_transport::{Connection, ConnectionId};
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::dispatch::{
    Delivery, DispatchQueue, DispatchReport, FailureHook, HandlerFailure, Inbound,
    ResponseArrival,
};
use crate::error::{NetError, Result};
use crate::handshake::{Advertisement, ADVERTISE_OPCODE};
use crate::transaction::{Expected, PendingRequest, TransactionManager};

struct ConnectionState {
    connection: Connection,
    advertised: HashSet<ChannelId>,
}

/// What [`ChannelNetwork::ingest`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// Queued for handlers on the next tick.
    Queued,
    /// Response queued to complete the transaction with this id on the next
    /// tick.
    Response(TransactionId),
    /// Response that arrived at or after its deadline, or for a transaction
    /// that already ended; dropped.
    Discarded(TransactionId),
    /// Replaced the remote's advertised channel set.
    Advertised(usize),
}

/// The channel layer bound to a host's connections.
///
/// Shared between the host's network threads, which call [`ingest`], and the
/// single game-logic thread, which calls [`tick`]. Creating the network seals
/// the registry.
///
/// [`ingest`]: ChannelNetwork::ingest
/// [`tick`]: ChannelNetwork::tick
pub struct ChannelNetwork {
    registry: Arc<ChannelRegistry>,
    config: NetworkConfig,
    connections: RwLock<HashMap<ConnectionId, ConnectionState>>,
    transactions: TransactionManager,
    queue: DispatchQueue,
    failure_hook: Mutex<Option<Arc<FailureHook>>>,
}

impl ChannelNetwork {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self::with_config(registry, NetworkConfig::default())
    }

    pub fn with_config(registry: Arc<ChannelRegistry>, config: NetworkConfig) -> Self {
        registry.seal();
        Self {
            transactions: TransactionManager::new(config.max_pending_per_connection),
            registry,
            config,
            connections: RwLock::new(HashMap::new()),
            queue: DispatchQueue::new(),
            failure_hook: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Install the callback that receives isolated handler failures.
    pub fn on_handler_failure<F>(&self, hook: F)
    where
        F: Fn(&HandlerFailure) + Send + Sync + 'static,
    {
        *self
            .failure_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    // Connection lifecycle

    /// Host notification: a connection is up.
    ///
    /// `advertised` is the remote's channel set when the host negotiated it
    /// out of band; pass nothing and call [`advertise`](Self::advertise) to
    /// use the in-band register channel instead.
    pub fn on_connected<I>(&self, connection: Connection, advertised: I)
    where
        I: IntoIterator<Item = ChannelId>,
    {
        let id = connection.id();
        let advertised: HashSet<ChannelId> = advertised.into_iter().collect();

        let replaced = self.write_connections().insert(
            id,
            ConnectionState {
                connection,
                advertised,
            },
        );
        if replaced.is_some() {
            warn!(conn = %id, "connection re-registered; failing its pending requests");
            self.transactions.close(id);
        }
        self.transactions.open(id);
        info!(conn = %id, "connection up");
    }

    /// Host notification: a connection is gone.
    ///
    /// Drops its state and fails every request still pending on it with
    /// `ConnectionClosed`. Returns the number of failed requests.
    pub fn on_disconnected(&self, id: ConnectionId) -> usize {
        let known = self.write_connections().remove(&id).is_some();
        let failed = self.transactions.close(id);
        if known {
            info!(conn = %id, failed, "connection down");
        }
        failed
    }

    /// Send the local channel listing on the register channel.
    pub fn advertise(&self, id: ConnectionId) -> Result<()> {
        let connection = self.connection(id)?;
        let channels = self.registry.channels();
        let payload =
            Advertisement::local(&self.config.handshake, &channels).encode(&self.config.handshake)?;
        let header = FrameHeader::new(REGISTER_CHANNEL, ADVERTISE_OPCODE, FrameKind::Message);
        let frame = encode_frame(&header, &payload, &self.config.frame)?;

        debug!(conn = %id, channels = channels.len(), "advertising channels");
        connection.send_raw(frame)?;
        Ok(())
    }

    /// Whether the remote advertised `channel`.
    pub fn remote_supports(&self, id: ConnectionId, channel: &str) -> bool {
        self.read_connections()
            .get(&id)
            .is_some_and(|state| state.advertised.contains(channel))
    }

    /// Channels the remote advertised, sorted.
    pub fn remote_channels(&self, id: ConnectionId) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self
            .read_connections()
            .get(&id)
            .map(|state| state.advertised.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    // Sending

    /// Send a fire-and-forget packet.
    pub fn send<P: Packet>(&self, id: ConnectionId, channel: &str, packet: &P) -> Result<()> {
        let binding = self.binding(channel)?;
        let opcode = self.message_opcode::<P>(&binding)?;
        let connection = self.supporting_connection(id, channel)?;

        let frame = self.encode_message(&binding, opcode, packet)?;
        debug!(conn = %id, channel, opcode, size = frame.len(), "sending packet");
        connection.send_raw(frame)?;
        Ok(())
    }

    /// Send a packet to every connection that advertised `channel`.
    ///
    /// Returns the number of connections the frame was handed to.
    pub fn broadcast<P: Packet>(&self, channel: &str, packet: &P) -> Result<usize> {
        let binding = self.binding(channel)?;
        let opcode = self.message_opcode::<P>(&binding)?;
        let frame = self.encode_message(&binding, opcode, packet)?;

        let targets: Vec<Connection> = self
            .read_connections()
            .values()
            .filter(|state| state.advertised.contains(channel))
            .map(|state| state.connection.clone())
            .collect();

        let mut sent = 0;
        for connection in targets {
            match connection.send_raw(frame.clone()) {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(conn = %connection.id(), channel, error = %err, "broadcast send failed")
                }
            }
        }
        debug!(channel, opcode, recipients = sent, "broadcast");
        Ok(sent)
    }

    /// Send a request and return the handle its outcome arrives on.
    ///
    /// `timeout` defaults to [`NetworkConfig::default_request_timeout`].
    /// Never blocks.
    pub fn send_request<Req: Packet, Resp: Packet>(
        &self,
        id: ConnectionId,
        channel: &str,
        request: &Req,
        timeout: Option<Duration>,
    ) -> Result<PendingRequest<Resp>> {
        let binding = self.binding(channel)?;
        let opcode = binding.opcode_of::<Req>()?;
        let entry = binding
            .entry(opcode)
            .ok_or_else(|| ChannelError::UnknownOpcode {
                channel: channel.to_string(),
                opcode,
            })?;
        let response = *entry.response_codec().ok_or(NetError::FrameKindMismatch {
            channel: channel.to_string(),
            opcode,
            expected: "message",
            found: "request",
        })?;
        if !response.accepts::<Resp>() {
            return Err(ChannelError::PacketTypeMismatch {
                expected: response.type_name(),
                found: std::any::type_name::<Resp>(),
            }
            .into());
        }
        let connection = self.supporting_connection(id, channel)?;

        let timeout = timeout.unwrap_or(self.config.default_request_timeout);
        let pending = self.transactions.begin::<Resp>(
            id,
            binding.id().clone(),
            opcode,
            response,
            timeout,
            Instant::now(),
        )?;
        let txn = pending.transaction();

        let sent = self
            .encode_frame_with(&binding, opcode, FrameKind::Request(txn), request)
            .and_then(|frame| {
                debug!(conn = %id, channel, opcode, txn, size = frame.len(), "sending request");
                connection.send_raw(frame).map_err(NetError::from)
            });
        if let Err(err) = sent {
            self.transactions.discard(id, txn);
            return Err(err);
        }
        Ok(pending)
    }

    /// Cancel a pending request. Returns `false` if it already ended.
    pub fn cancel<R: Packet>(&self, pending: &PendingRequest<R>) -> bool {
        self.transactions
            .cancel(pending.connection(), pending.transaction())
    }

    // Inbound

    /// Process one inbound frame. Called from the network-processing context.
    ///
    /// Every accepted frame is queued for [`tick`](Self::tick) in arrival
    /// order. Responses are checked against their deadline here, so one that
    /// arrives late is discarded even if no tick has expired it yet. Frames
    /// that fail to decode or route are logged and dropped; the error is
    /// returned for diagnostics only.
    pub fn ingest(&self, id: ConnectionId, bytes: &[u8]) -> Result<Ingested> {
        self.route(id, bytes).inspect_err(|err| {
            warn!(conn = %id, size = bytes.len(), error = %err, "inbound frame dropped");
        })
    }

    fn route(&self, id: ConnectionId, bytes: &[u8]) -> Result<Ingested> {
        let connection = self.connection(id)?;
        let mut frame = decode_frame(bytes, &self.config.frame)?;
        let header = frame.header;

        if header.channel == REGISTER_CHANNEL {
            let channels = Advertisement::decode(
                frame.payload.remaining_slice(),
                &self.config.handshake,
            )?;
            return Ok(Ingested::Advertised(self.set_advertised(id, channels)));
        }

        let binding = self
            .registry
            .lookup(&header.channel)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownChannel(header.channel.clone()))?;
        let entry = binding
            .entry(header.opcode)
            .ok_or_else(|| ChannelError::UnknownOpcode {
                channel: header.channel.clone(),
                opcode: header.opcode,
            })?;
        let expected_kind = if entry.is_request() {
            "request"
        } else {
            "message"
        };
        let kind_mismatch = || NetError::FrameKindMismatch {
            channel: header.channel.clone(),
            opcode: header.opcode,
            expected: expected_kind,
            found: header.kind.name(),
        };

        match header.kind {
            FrameKind::Response(txn) => {
                if !entry.is_request() {
                    return Err(kind_mismatch());
                }
                let expected = Expected {
                    channel: &header.channel,
                    opcode: header.opcode,
                };
                let codec = self.transactions.response_codec(id, txn, expected, Instant::now());
                let Some(codec) = codec else {
                    warn!(conn = %id, txn, channel = %header.channel, "late or unknown response discarded");
                    return Ok(Ingested::Discarded(txn));
                };
                let packet = codec.decode(&mut frame.payload)?;
                debug!(conn = %id, txn, channel = %header.channel, "response queued");
                self.queue.push(Inbound::Response(ResponseArrival {
                    connection: id,
                    transaction: txn,
                    channel: binding.id().clone(),
                    opcode: header.opcode,
                    packet,
                }));
                Ok(Ingested::Response(txn))
            }
            FrameKind::Request(txn) => {
                let Some(response) = entry.response_codec() else {
                    return Err(kind_mismatch());
                };
                let packet = entry.codec().decode(&mut frame.payload)?;
                let responder = ErasedResponder::new(
                    connection.clone(),
                    binding.id().clone(),
                    header.opcode,
                    txn,
                    *response,
                    self.config.frame.clone(),
                );
                self.enqueue(connection, binding, header.opcode, Some(txn), packet, Some(responder));
                Ok(Ingested::Queued)
            }
            FrameKind::Message => {
                if entry.is_request() {
                    return Err(kind_mismatch());
                }
                let packet = entry.codec().decode(&mut frame.payload)?;
                self.enqueue(connection, binding, header.opcode, None, packet, None);
                Ok(Ingested::Queued)
            }
        }
    }

    fn enqueue(
        &self,
        connection: Connection,
        binding: Arc<ChannelBinding>,
        opcode: Opcode,
        transaction: Option<TransactionId>,
        packet: plugwire_channel::AnyPacket,
        responder: Option<ErasedResponder>,
    ) {
        debug!(
            conn = %connection.id(),
            channel = %binding.id(),
            opcode,
            txn = ?transaction,
            "packet queued"
        );
        let ctx = PacketContext::new(connection, binding.id().clone(), opcode, transaction);
        self.queue.push(Inbound::Packet(Delivery {
            ctx,
            binding,
            packet,
            responder,
        }));
    }

    fn set_advertised(&self, id: ConnectionId, channels: Vec<ChannelId>) -> usize {
        let count = channels.len();
        if let Some(state) = self.write_connections().get_mut(&id) {
            state.advertised = channels.into_iter().collect();
        }
        debug!(conn = %id, channels = count, "remote advertised channels");
        count
    }

    // Game-logic context

    /// Run one dispatch pass at the current time.
    pub fn tick(&self) -> DispatchReport {
        self.tick_at(Instant::now())
    }

    /// Run every queued delivery and complete every queued response in
    /// arrival order, then expire requests overdue at `now`.
    pub fn tick_at(&self, now: Instant) -> DispatchReport {
        let mut report = DispatchReport::default();
        let inbound = self.queue.drain();
        let hook = if inbound.is_empty() {
            None
        } else {
            self.failure_hook
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        };

        for item in inbound {
            match item {
                Inbound::Packet(delivery) => {
                    report.delivered += 1;
                    for failure in delivery.run() {
                        report.failed += 1;
                        if let Some(hook) = &hook {
                            hook(&failure);
                        }
                    }
                }
                Inbound::Response(arrival) => {
                    let expected = Expected {
                        channel: arrival.channel.as_str(),
                        opcode: arrival.opcode,
                    };
                    let txn = arrival.transaction;
                    if self
                        .transactions
                        .complete(arrival.connection, txn, expected, arrival.packet)
                    {
                        report.completed += 1;
                    } else {
                        warn!(
                            conn = %arrival.connection,
                            txn,
                            channel = %arrival.channel,
                            "response for an ended transaction discarded"
                        );
                    }
                }
            }
        }

        report.timed_out = self.transactions.expire(now);
        report
    }

    // Diagnostics

    pub fn connection_count(&self) -> usize {
        self.read_connections().len()
    }

    pub fn pending_count(&self, id: ConnectionId) -> usize {
        self.transactions.pending_count(id)
    }

    /// Deliveries and responses waiting for the next tick.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    // Helpers

    fn binding(&self, channel: &str) -> Result<Arc<ChannelBinding>> {
        self.registry
            .lookup(channel)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownChannel(channel.to_string()).into())
    }

    fn message_opcode<P: Packet>(&self, binding: &ChannelBinding) -> Result<Opcode> {
        let opcode = binding.opcode_of::<P>()?;
        if binding.entry(opcode).is_some_and(|entry| entry.is_request()) {
            return Err(NetError::FrameKindMismatch {
                channel: binding.id().to_string(),
                opcode,
                expected: "request",
                found: "message",
            });
        }
        Ok(opcode)
    }

    fn connection(&self, id: ConnectionId) -> Result<Connection> {
        self.read_connections()
            .get(&id)
            .map(|state| state.connection.clone())
            .ok_or(NetError::UnknownConnection(id))
    }

    fn supporting_connection(&self, id: ConnectionId, channel: &str) -> Result<Connection> {
        let connections = self.read_connections();
        let state = connections
            .get(&id)
            .ok_or(NetError::UnknownConnection(id))?;
        if !state.advertised.contains(channel) {
            return Err(NetError::UnsupportedChannel {
                connection: id,
                channel: channel.to_string(),
            });
        }
        Ok(state.connection.clone())
    }

    fn encode_message<P: Packet>(
        &self,
        binding: &ChannelBinding,
        opcode: Opcode,
        packet: &P,
    ) -> Result<Bytes> {
        self.encode_frame_with(binding, opcode, FrameKind::Message, packet)
    }

    fn encode_frame_with<P: Packet>(
        &self,
        binding: &ChannelBinding,
        opcode: Opcode,
        kind: FrameKind,
        packet: &P,
    ) -> Result<Bytes> {
        let header = FrameHeader::new(binding.id().as_str(), opcode, kind);
        let mut buf = begin_frame(&header, &self.config.frame)?;
        packet.write(&mut buf)?;
        Ok(finish_frame(buf, &self.config.frame)?)
    }

    fn read_connections(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, ConnectionState>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_connections(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, ConnectionState>> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ChannelNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelNetwork")
            .field("connections", &self.connection_count())
            .field("transactions", &self.transactions)
            .field("queue", &self.queue)
            .finish()
    }
}
