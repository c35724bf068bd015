//! Ping-pong example: a request/response round trip between two networks.
//!
//! Run with:
//!   cargo run --example ping-pong

use std::sync::Arc;

use plugwire::prelude::*;
use plugwire::transport::link;

#[derive(Debug)]
struct Ping {
    nonce: u64,
}

impl Packet for Ping {
    fn read(buf: &mut ChannelBuf) -> plugwire::frame::Result<Self> {
        Ok(Self {
            nonce: buf.read_u64()?,
        })
    }

    fn write(&self, buf: &mut ChannelBuf) -> plugwire::frame::Result<()> {
        buf.write_u64(self.nonce)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let channel = "example:ping";

    let server_registry = ChannelRegistry::new();
    server_registry.register(channel)?.bind_request::<Ping, Ping, _>(
        0,
        |ping, responder, ctx| {
            eprintln!("[server] ping {} from {}", ping.nonce, ctx.connection_id());
            responder.respond(&Ping { nonce: ping.nonce + 1 })?;
            Ok(())
        },
    )?;

    let client_registry = ChannelRegistry::new();
    client_registry
        .register(channel)?
        .bind_request_codec::<Ping, Ping>(0)?;

    let server = ChannelNetwork::new(Arc::new(server_registry));
    let client = ChannelNetwork::new(Arc::new(client_registry));

    let (mut client_end, mut server_end) = link(ConnectionId::new(1), ConnectionId::new(2));
    // Both sides already know the remote supports the channel.
    let id = ChannelId::parse(channel)?;
    client.on_connected(client_end.connection(), [id.clone()]);
    server.on_connected(server_end.connection(), [id]);

    let mut pending =
        client.send_request::<Ping, Ping>(client_end.id(), channel, &Ping { nonce: 1 }, None)?;

    // Request reaches the server; its game tick runs the handler.
    for frame in server_end.drain() {
        server.ingest(server_end.id(), &frame)?;
    }
    server.tick();

    // Response reaches the client; its tick completes the transaction.
    for frame in client_end.drain() {
        client.ingest(client_end.id(), &frame)?;
    }
    client.tick();

    match pending.try_outcome() {
        Some(Ok(pong)) => eprintln!("[client] pong {}", pong.nonce),
        Some(Err(err)) => eprintln!("[client] request failed: {err}"),
        None => eprintln!("[client] still pending"),
    }
    Ok(())
}
