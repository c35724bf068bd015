//! Broadcast example: one server, several clients, in-band advertisements.
//!
//! Only clients that advertised the chat channel receive the broadcast.
//!
//! Run with:
//!   cargo run --example chat-broadcast

use std::sync::Arc;

use plugwire::prelude::*;
use plugwire::transport::{link, MemoryEndpoint};

const CHAT: &str = "example:chat";

fn client_network(name: &'static str, wants_chat: bool) -> Result<ChannelNetwork, ChannelError> {
    let registry = ChannelRegistry::new();
    if wants_chat {
        registry.register(CHAT)?.bind::<String, _>(0, move |line, _| {
            eprintln!("[{name}] {line}");
            Ok(())
        })?;
    } else {
        registry.register("example:other")?.bind_codec::<()>(0)?;
    }
    Ok(ChannelNetwork::new(Arc::new(registry)))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_registry = ChannelRegistry::new();
    server_registry.register(CHAT)?.bind_codec::<String>(0)?;
    let server = ChannelNetwork::new(Arc::new(server_registry));

    let mut links: Vec<(ChannelNetwork, MemoryEndpoint, MemoryEndpoint)> = Vec::new();
    for (index, (name, wants_chat)) in [("alice", true), ("bob", false), ("carol", true)]
        .into_iter()
        .enumerate()
    {
        let client = client_network(name, wants_chat)?;
        let base = 10 * (index as u64 + 1);
        let (client_end, server_end) = link(ConnectionId::new(base), ConnectionId::new(base + 1));
        client.on_connected(client_end.connection(), Vec::<ChannelId>::new());
        server.on_connected(server_end.connection(), Vec::<ChannelId>::new());
        client.advertise(client_end.id())?;
        links.push((client, client_end, server_end));
    }

    for (_, _, server_end) in &mut links {
        for frame in server_end.drain() {
            server.ingest(server_end.id(), &frame)?;
        }
    }

    let recipients = server.broadcast(CHAT, &"hello, plugins".to_string())?;
    eprintln!("[server] broadcast reached {recipients} of {} clients", links.len());

    for (client, client_end, _) in &mut links {
        for frame in client_end.drain() {
            client.ingest(client_end.id(), &frame)?;
        }
        client.tick();
    }
    Ok(())
}
