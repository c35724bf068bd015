use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use plugwire_channel::{ChannelId, ChannelRegistry};
use plugwire_frame::{ChannelBuf, Packet};
use plugwire_net::{ChannelNetwork, NetError, NetworkConfig};
use plugwire_transport::{link, ConnectionId, MemoryEndpoint};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::{parse_duration, PingArgs};
use crate::exit::{channel_error, net_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_report, OutputFormat, Report};

const PING_CHANNEL: &str = "demo:ping";
const PING_OPCODE: u8 = 0;
const CLIENT: ConnectionId = ConnectionId::new(1);
const SERVER: ConnectionId = ConnectionId::new(2);
const POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

#[derive(Debug, Serialize)]
pub struct PingReport {
    pub channel: &'static str,
    pub nonce: u64,
    pub status: &'static str,
    pub transaction: u32,
    pub echoed: Option<u64>,
    pub elapsed_ms: f64,
}

impl Report for PingReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("channel", self.channel.to_string()),
            ("nonce", self.nonce.to_string()),
            ("status", self.status.to_string()),
            ("txn", self.transaction.to_string()),
            (
                "echoed",
                self.echoed.map_or_else(|| "-".to_string(), |n| n.to_string()),
            ),
            ("elapsed_ms", format!("{:.3}", self.elapsed_ms)),
        ]
    }
}

/// Two networks joined by an in-memory link.
struct Loopback {
    client: ChannelNetwork,
    server: ChannelNetwork,
    client_end: MemoryEndpoint,
    server_end: MemoryEndpoint,
}

impl Loopback {
    fn new(drop_requests: bool, config: NetworkConfig) -> CliResult<Self> {
        let setup = |err| channel_error("registering demo channel", err);

        let client_registry = ChannelRegistry::new();
        client_registry
            .register(PING_CHANNEL)
            .map_err(setup)?
            .bind_request_codec::<Ping, Ping>(PING_OPCODE)
            .map_err(setup)?;

        let server_registry = ChannelRegistry::new();
        let binder = server_registry.register(PING_CHANNEL).map_err(setup)?;
        if drop_requests {
            binder
                .bind_request_codec::<Ping, Ping>(PING_OPCODE)
                .map_err(setup)?;
        } else {
            binder
                .bind_request::<Ping, Ping, _>(PING_OPCODE, |ping, responder, ctx| {
                    debug!(conn = %ctx.connection_id(), nonce = ping.nonce, "answering ping");
                    responder.respond(ping)?;
                    Ok(())
                })
                .map_err(setup)?;
        }

        let client = ChannelNetwork::with_config(Arc::new(client_registry), config.clone());
        let server = ChannelNetwork::with_config(Arc::new(server_registry), config);
        let (client_end, server_end) = link(CLIENT, SERVER);

        client.on_connected(client_end.connection(), Vec::<ChannelId>::new());
        server.on_connected(server_end.connection(), Vec::<ChannelId>::new());
        // Exchange advertisements in band, the way a real host would.
        client
            .advertise(CLIENT)
            .map_err(|err| net_error("advertise failed", err))?;
        server
            .advertise(SERVER)
            .map_err(|err| net_error("advertise failed", err))?;

        let mut loopback = Self {
            client,
            server,
            client_end,
            server_end,
        };
        loopback.pump()?;
        Ok(loopback)
    }

    /// Move every frame in flight across the link, then run both game ticks.
    fn pump(&mut self) -> CliResult<()> {
        for frame in self.server_end.drain() {
            self.server
                .ingest(SERVER, &frame)
                .map_err(|err| net_error("server ingest failed", err))?;
        }
        for frame in self.client_end.drain() {
            self.client
                .ingest(CLIENT, &frame)
                .map_err(|err| net_error("client ingest failed", err))?;
        }
        self.server.tick();
        self.client.tick();
        Ok(())
    }
}

pub fn ping(nonce: u64, timeout: Duration, drop_requests: bool) -> CliResult<PingReport> {
    let config = NetworkConfig::default().with_request_timeout(timeout);
    let mut loopback = Loopback::new(drop_requests, config)?;

    let started = Instant::now();
    let mut pending = loopback
        .client
        .send_request::<Ping, Ping>(CLIENT, PING_CHANNEL, &Ping { nonce }, Some(timeout))
        .map_err(|err| net_error("ping failed", err))?;
    let transaction = pending.transaction();
    let give_up = timeout
        .checked_mul(2)
        .and_then(|wait| started.checked_add(wait + Duration::from_secs(1)));

    let outcome = loop {
        loopback.pump()?;
        if let Some(outcome) = pending.try_outcome() {
            break outcome;
        }
        if give_up.is_some_and(|at| Instant::now() > at) {
            return Err(CliError::new(INTERNAL, "ping outcome never resolved"));
        }
        thread::sleep(POLL_INTERVAL);
    };
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (status, echoed) = match outcome {
        Ok(pong) => ("ok", Some(pong.nonce)),
        Err(NetError::Timeout(after)) => {
            info!(transaction, ?after, "ping timed out");
            ("timeout", None)
        }
        Err(err) => return Err(net_error("ping failed", err)),
    };

    Ok(PingReport {
        channel: PING_CHANNEL,
        nonce,
        status,
        transaction,
        echoed,
        elapsed_ms,
    })
}

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let report = ping(args.nonce, timeout, args.drop)?;
    print_report(&report, format);
    Ok(if report.echoed.is_some() {
        SUCCESS
    } else {
        TIMEOUT
    })
}
