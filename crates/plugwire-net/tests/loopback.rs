use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use plugwire_channel::{ChannelError, ChannelId, ChannelRegistry, Responder};
use plugwire_frame::{ChannelBuf, Packet};
use plugwire_net::{ChannelNetwork, Ingested, NetError, PendingRequest, TransactionState};
use plugwire_transport::{link, ConnectionId, MemoryEndpoint};

const CLIENT: ConnectionId = ConnectionId::new(1);
const SERVER: ConnectionId = ConnectionId::new(2);
const PING: &str = "myplugin:ping";
const SEQ: &str = "myplugin:seq";

#[derive(Debug, Clone, PartialEq)]
struct Ping {
    nonce: u64,
}

impl Packet for Ping {
    fn read(buf: &mut ChannelBuf) -> plugwire_frame::Result<Self> {
        Ok(Self {
            nonce: buf.read_u64()?,
        })
    }

    fn write(&self, buf: &mut ChannelBuf) -> plugwire_frame::Result<()> {
        buf.write_u64(self.nonce)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Seq(u32);

impl Packet for Seq {
    fn read(buf: &mut ChannelBuf) -> plugwire_frame::Result<Self> {
        Ok(Self(buf.read_u32()?))
    }

    fn write(&self, buf: &mut ChannelBuf) -> plugwire_frame::Result<()> {
        buf.write_u32(self.0)
    }
}

/// Client and server networks joined by an in-memory link.
struct Pair {
    client: ChannelNetwork,
    server: ChannelNetwork,
    client_end: MemoryEndpoint,
    server_end: MemoryEndpoint,
}

impl Pair {
    fn new(server_registry: ChannelRegistry) -> Self {
        let client_registry = ChannelRegistry::new();
        client_registry
            .register(PING)
            .unwrap()
            .bind_request_codec::<Ping, Ping>(0)
            .unwrap();
        client_registry
            .register(SEQ)
            .unwrap()
            .bind_codec::<Seq>(0)
            .unwrap();
        Self::with_registries(client_registry, server_registry, &[PING, SEQ])
    }

    fn with_registries(
        client_registry: ChannelRegistry,
        server_registry: ChannelRegistry,
        advertised: &[&str],
    ) -> Self {
        let client = ChannelNetwork::new(Arc::new(client_registry));
        let server = ChannelNetwork::new(Arc::new(server_registry));
        let (client_end, server_end) = link(CLIENT, SERVER);
        let ids = || advertised.iter().map(|id| ChannelId::parse(id).unwrap());
        client.on_connected(client_end.connection(), ids());
        server.on_connected(server_end.connection(), ids());
        Self {
            client,
            server,
            client_end,
            server_end,
        }
    }

    /// Feed frames waiting for the server into its network.
    fn pump_server(&mut self) -> Vec<Ingested> {
        self.server_end
            .drain()
            .iter()
            .map(|frame| self.server.ingest(SERVER, frame).unwrap())
            .collect()
    }

    /// Feed frames waiting for the client into its network.
    fn pump_client(&mut self) -> Vec<Ingested> {
        self.client_end
            .drain()
            .iter()
            .map(|frame| self.client.ingest(CLIENT, frame).unwrap())
            .collect()
    }
}

fn echo_server() -> ChannelRegistry {
    let registry = ChannelRegistry::new();
    registry
        .register(PING)
        .unwrap()
        .bind_request::<Ping, Ping, _>(0, |ping, responder, _| {
            responder.respond(&Ping { nonce: ping.nonce })?;
            Ok(())
        })
        .unwrap();
    registry
        .register(SEQ)
        .unwrap()
        .bind::<Seq, _>(0, |_, _| Ok(()))
        .unwrap();
    registry
}

fn silent_server() -> ChannelRegistry {
    let registry = ChannelRegistry::new();
    registry
        .register(PING)
        .unwrap()
        .bind_request_codec::<Ping, Ping>(0)
        .unwrap();
    registry
}

#[test]
fn ping_completes_before_timeout() {
    let mut pair = Pair::new(echo_server());
    let mut pending = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 42 }, Some(Duration::from_millis(2000)))
        .unwrap();
    let sent_at = Instant::now();

    assert_eq!(pair.pump_server(), vec![Ingested::Queued]);
    let report = pair.server.tick();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(
        pair.pump_client(),
        vec![Ingested::Response(pending.transaction())]
    );
    assert!(pending.try_outcome().is_none());
    let report = pair.client.tick_at(sent_at + Duration::from_millis(500));
    assert_eq!(report.completed, 1);
    assert_eq!(report.timed_out, 0);

    assert_eq!(pending.try_outcome().unwrap().unwrap(), Ping { nonce: 42 });
    assert_eq!(pending.state(), TransactionState::Completed);
    assert_eq!(pair.client.pending_count(CLIENT), 0);
}

#[test]
fn ping_times_out_and_late_response_is_discarded() {
    let mut pair = Pair::new(echo_server());
    let mut pending = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 42 }, Some(Duration::from_millis(2000)))
        .unwrap();

    let report = pair
        .client
        .tick_at(Instant::now() + Duration::from_millis(2001));
    assert_eq!(report.timed_out, 1);
    let err = pending.try_outcome().unwrap().unwrap_err();
    assert!(matches!(err, NetError::Timeout(d) if d == Duration::from_millis(2000)));
    assert_eq!(pending.state(), TransactionState::TimedOut);

    pair.pump_server();
    pair.server.tick();
    assert_eq!(
        pair.pump_client(),
        vec![Ingested::Discarded(pending.transaction())]
    );
    assert!(pending.try_outcome().is_none());
}

#[test]
fn response_arriving_after_deadline_is_discarded_before_any_tick() {
    let mut pair = Pair::new(echo_server());
    let mut pending = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 3 }, Some(Duration::from_millis(10)))
        .unwrap();

    pair.pump_server();
    assert_eq!(pair.server.tick().delivered, 1);
    thread::sleep(Duration::from_millis(30));

    assert_eq!(
        pair.pump_client(),
        vec![Ingested::Discarded(pending.transaction())]
    );
    assert!(pending.try_outcome().is_none());

    let report = pair.client.tick();
    assert_eq!(report.completed, 0);
    assert_eq!(report.timed_out, 1);
    assert!(matches!(pending.try_outcome(), Some(Err(NetError::Timeout(_)))));
    assert_eq!(pending.state(), TransactionState::TimedOut);
}

#[test]
fn unrepresentable_timeout_is_refused_without_sending() {
    let mut pair = Pair::new(echo_server());
    let err = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 1 }, Some(Duration::MAX))
        .unwrap_err();
    assert!(matches!(err, NetError::InvalidTimeout(d) if d == Duration::MAX));
    assert_eq!(pair.client.pending_count(CLIENT), 0);
    assert!(pair.pump_server().is_empty());
}

#[test]
fn no_response_leads_to_timeout() {
    let mut pair = Pair::new(silent_server());
    let mut pending = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 7 }, Some(Duration::from_millis(100)))
        .unwrap();

    pair.pump_server();
    assert_eq!(pair.server.tick().delivered, 1);
    assert!(pair.pump_client().is_empty());

    pair.client
        .tick_at(Instant::now() + Duration::from_millis(100));
    assert!(matches!(pending.try_outcome(), Some(Err(NetError::Timeout(_)))));
}

#[test]
fn disconnect_fails_all_pending_requests() {
    let mut pair = Pair::new(silent_server());
    let mut all: Vec<_> = (0..3)
        .map(|nonce| {
            pair.client
                .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce }, None)
                .unwrap()
        })
        .collect();
    assert_eq!(pair.client.pending_count(CLIENT), 3);

    assert_eq!(pair.client.on_disconnected(CLIENT), 3);
    assert_eq!(pair.client.pending_count(CLIENT), 0);
    for pending in &mut all {
        assert!(matches!(
            pending.try_outcome(),
            Some(Err(NetError::ConnectionClosed(id))) if id == CLIENT
        ));
        assert_eq!(pending.state(), TransactionState::Failed);
    }

    // Responses arriving after the close have no connection to land on.
    pair.pump_server();
    pair.server.tick();
    assert!(matches!(
        pair.client.ingest(CLIENT, &[0]),
        Err(NetError::UnknownConnection(_))
    ));
}

#[test]
fn frames_reach_handlers_in_wire_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = ChannelRegistry::new();
    let recorder = seen.clone();
    registry
        .register(SEQ)
        .unwrap()
        .bind::<Seq, _>(0, move |seq, _| {
            if seq.0 == 2 {
                thread::sleep(Duration::from_millis(20));
            }
            recorder.lock().unwrap().push(seq.0);
            Ok(())
        })
        .unwrap();
    registry
        .register(PING)
        .unwrap()
        .bind_request_codec::<Ping, Ping>(0)
        .unwrap();

    let mut pair = Pair::new(registry);
    for n in 1..=3 {
        pair.client.send(CLIENT, SEQ, &Seq(n)).unwrap();
    }
    assert_eq!(pair.pump_server().len(), 3);
    assert_eq!(pair.server.queued(), 3);
    assert_eq!(pair.server.tick().delivered, 3);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn second_respond_is_rejected() {
    let second = Arc::new(Mutex::new(None));
    let registry = ChannelRegistry::new();
    let slot = second.clone();
    registry
        .register(PING)
        .unwrap()
        .bind_request::<Ping, Ping, _>(0, move |ping, responder, _| {
            responder.respond(ping)?;
            *slot.lock().unwrap() = Some(responder.respond(ping));
            Ok(())
        })
        .unwrap();

    let mut pair = Pair::new(registry);
    let mut pending = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 5 }, None)
        .unwrap();
    pair.pump_server();
    pair.server.tick();

    let result = second.lock().unwrap().take().unwrap();
    assert!(matches!(result, Err(ChannelError::AlreadyResponded(_))));

    // Exactly one response crossed the link.
    assert_eq!(pair.pump_client().len(), 1);
    pair.client.tick();
    assert_eq!(pending.try_outcome().unwrap().unwrap(), Ping { nonce: 5 });
}

#[test]
fn responder_can_answer_on_a_later_tick() {
    let parked: Arc<Mutex<Option<(Responder<Ping>, Ping)>>> = Arc::new(Mutex::new(None));
    let registry = ChannelRegistry::new();
    let slot = parked.clone();
    registry
        .register(PING)
        .unwrap()
        .bind_request::<Ping, Ping, _>(0, move |ping, responder, _| {
            *slot.lock().unwrap() = Some((responder, ping.clone()));
            Ok(())
        })
        .unwrap();

    let mut pair = Pair::new(registry);
    let mut pending = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 9 }, None)
        .unwrap();
    pair.pump_server();
    pair.server.tick();
    assert!(pair.pump_client().is_empty());
    assert!(pending.try_outcome().is_none());

    let (responder, ping) = parked.lock().unwrap().take().unwrap();
    responder.respond(&Ping { nonce: ping.nonce + 1 }).unwrap();
    pair.pump_client();
    pair.client.tick();
    assert_eq!(pending.try_outcome().unwrap().unwrap(), Ping { nonce: 10 });
}

#[test]
fn message_ahead_of_response_is_handled_first() {
    let slot: Arc<Mutex<Option<PendingRequest<Ping>>>> = Arc::new(Mutex::new(None));
    let seen_pending = Arc::new(Mutex::new(Vec::new()));

    let client_registry = ChannelRegistry::new();
    client_registry
        .register(PING)
        .unwrap()
        .bind_request_codec::<Ping, Ping>(0)
        .unwrap();
    let (request, recorder) = (slot.clone(), seen_pending.clone());
    client_registry
        .register(SEQ)
        .unwrap()
        .bind::<Seq, _>(0, move |_, _| {
            let mut request = request.lock().unwrap();
            let pending = request.as_mut().ok_or("no request in flight")?;
            recorder.lock().unwrap().push(pending.try_outcome().is_none());
            Ok(())
        })
        .unwrap();

    let parked: Arc<Mutex<Option<Responder<Ping>>>> = Arc::new(Mutex::new(None));
    let server_registry = ChannelRegistry::new();
    let park = parked.clone();
    server_registry
        .register(PING)
        .unwrap()
        .bind_request::<Ping, Ping, _>(0, move |_, responder, _| {
            *park.lock().unwrap() = Some(responder);
            Ok(())
        })
        .unwrap();
    server_registry
        .register(SEQ)
        .unwrap()
        .bind_codec::<Seq>(0)
        .unwrap();

    let mut pair = Pair::with_registries(client_registry, server_registry, &[PING, SEQ]);
    let pending = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 8 }, None)
        .unwrap();
    let txn = pending.transaction();
    *slot.lock().unwrap() = Some(pending);
    pair.pump_server();
    pair.server.tick();

    pair.server.send(SERVER, SEQ, &Seq(1)).unwrap();
    let responder = parked.lock().unwrap().take().unwrap();
    responder.respond(&Ping { nonce: 8 }).unwrap();

    assert_eq!(
        pair.pump_client(),
        vec![Ingested::Queued, Ingested::Response(txn)]
    );
    let mut pending = slot.lock().unwrap().take().unwrap();
    assert!(pending.try_outcome().is_none());
    *slot.lock().unwrap() = Some(pending);

    let report = pair.client.tick();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(*seen_pending.lock().unwrap(), vec![true]);

    let mut pending = slot.lock().unwrap().take().unwrap();
    assert_eq!(pending.try_outcome().unwrap().unwrap(), Ping { nonce: 8 });
}

#[test]
fn handler_failures_are_isolated_and_reported() {
    let registry = ChannelRegistry::new();
    registry
        .register(SEQ)
        .unwrap()
        .bind::<Seq, _>(0, |seq, _| match seq.0 {
            1 => Err("bad sequence".into()),
            2 => panic!("handler bug"),
            _ => Ok(()),
        })
        .unwrap();
    registry
        .register(PING)
        .unwrap()
        .bind_request_codec::<Ping, Ping>(0)
        .unwrap();

    let mut pair = Pair::new(registry);
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let counter = hook_calls.clone();
    pair.server.on_handler_failure(move |failure| {
        assert_eq!(failure.channel.as_str(), SEQ);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for n in 1..=3 {
        pair.client.send(CLIENT, SEQ, &Seq(n)).unwrap();
    }
    pair.pump_server();
    let report = pair.server.tick();
    assert_eq!(report.delivered, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(hook_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn cancel_ends_the_transaction() {
    let mut pair = Pair::new(echo_server());
    let mut pending = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 1 }, None)
        .unwrap();

    assert!(pair.client.cancel(&pending));
    assert!(!pair.client.cancel(&pending));
    assert!(matches!(pending.try_outcome(), Some(Err(NetError::Cancelled))));

    pair.pump_server();
    pair.server.tick();
    assert_eq!(
        pair.pump_client(),
        vec![Ingested::Discarded(pending.transaction())]
    );
}

#[test]
fn unsupported_channel_fails_fast() {
    let client_registry = ChannelRegistry::new();
    client_registry
        .register(PING)
        .unwrap()
        .bind_request_codec::<Ping, Ping>(0)
        .unwrap();
    let pair = Pair::with_registries(client_registry, silent_server(), &[]);

    let err = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 1 }, None)
        .unwrap_err();
    assert!(matches!(err, NetError::UnsupportedChannel { connection, .. } if connection == CLIENT));
    assert_eq!(pair.client.pending_count(CLIENT), 0);
}

#[test]
fn in_band_advertisement_enables_sending() {
    let client_registry = ChannelRegistry::new();
    client_registry
        .register(SEQ)
        .unwrap()
        .bind_codec::<Seq>(0)
        .unwrap();
    let mut pair = Pair::with_registries(client_registry, echo_server(), &[]);

    assert!(matches!(
        pair.client.send(CLIENT, SEQ, &Seq(1)),
        Err(NetError::UnsupportedChannel { .. })
    ));

    pair.server.advertise(SERVER).unwrap();
    pair.client.advertise(CLIENT).unwrap();
    assert_eq!(pair.pump_client(), vec![Ingested::Advertised(2)]);
    assert_eq!(pair.pump_server(), vec![Ingested::Advertised(1)]);

    assert!(pair.client.remote_supports(CLIENT, SEQ));
    assert!(pair.server.remote_supports(SERVER, SEQ));
    assert!(!pair.server.remote_supports(SERVER, PING));
    pair.client.send(CLIENT, SEQ, &Seq(1)).unwrap();
    assert_eq!(pair.pump_server(), vec![Ingested::Queued]);
}

#[test]
fn broadcast_reaches_advertising_connections_only() {
    let registry = ChannelRegistry::new();
    registry
        .register(SEQ)
        .unwrap()
        .bind_codec::<Seq>(0)
        .unwrap();
    let server = ChannelNetwork::new(Arc::new(registry));

    let (a_local, mut a_remote) = link(ConnectionId::new(10), ConnectionId::new(20));
    let (b_local, mut b_remote) = link(ConnectionId::new(11), ConnectionId::new(21));
    server.on_connected(a_local.connection(), [ChannelId::parse(SEQ).unwrap()]);
    server.on_connected(b_local.connection(), []);

    assert_eq!(server.broadcast(SEQ, &Seq(3)).unwrap(), 1);
    assert_eq!(a_remote.drain().len(), 1);
    assert!(b_remote.drain().is_empty());
    assert_eq!(server.connection_count(), 2);
}

#[test]
fn request_codec_rejects_wrong_response_type() {
    let pair = Pair::new(echo_server());
    let err = pair
        .client
        .send_request::<Ping, Seq>(CLIENT, PING, &Ping { nonce: 1 }, None)
        .unwrap_err();
    assert!(matches!(
        err,
        NetError::Channel(ChannelError::PacketTypeMismatch { .. })
    ));
}

#[tokio::test]
async fn pending_request_can_be_awaited() {
    let mut pair = Pair::new(echo_server());
    let pending = pair
        .client
        .send_request::<Ping, Ping>(CLIENT, PING, &Ping { nonce: 77 }, None)
        .unwrap();

    pair.pump_server();
    pair.server.tick();
    pair.pump_client();
    pair.client.tick();

    let pong = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pong, Ping { nonce: 77 });
}
