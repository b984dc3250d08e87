//! End-to-end walkthrough: a server and a client on localhost exchanging
//! chat lines over the polling tunnel.
//!
//! Run with `cargo run --example echo`.

use std::sync::Arc;
use std::time::Duration;

use http_transport::config::{ClientConfig, LoggingConfig, ServerConfig};
use http_transport::core::{CodecRegistry, ObjectReader, ObjectWriter, Wire};
use http_transport::error::Result;
use http_transport::utils::logging::init_logging;
use http_transport::{ClientEvent, ServerEvent, TransportClient, TransportServer};

#[derive(Debug, Clone, PartialEq)]
struct ChatLine {
    author: String,
    body: String,
}

impl Wire for ChatLine {
    fn encode(&self, writer: &mut ObjectWriter<'_>) -> Result<()> {
        writer.put_str(&self.author);
        writer.put_str(&self.body);
        Ok(())
    }

    fn decode(reader: &mut ObjectReader<'_>) -> Result<Self> {
        Ok(Self {
            author: reader.take_str()?,
            body: reader.take_str()?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LoggingConfig::default())?;

    let registry = Arc::new(CodecRegistry::new());
    registry.register_with_code::<ChatLine>(0x4001)?;

    let mut server_config = ServerConfig::default();
    server_config.disconnect_delay = Duration::from_millis(500);

    let (server, mut server_events) = TransportServer::new(registry.clone(), server_config)?;
    let addr = server.start("127.0.0.1:0").await?;
    println!("server listening on {addr}");

    // Echo every chat line back to its peer.
    tokio::spawn(async move {
        while let Some(event) = server_events.recv().await {
            match event {
                ServerEvent::Connected(peer) => {
                    println!("server: peer {} connected from {}", peer.token(), peer.remote());
                }
                ServerEvent::Message { peer, message } => {
                    if let Some(line) = message.downcast_ref::<ChatLine>() {
                        println!("server: <{}> {}", line.author, line.body);
                        peer.send(Box::new(ChatLine {
                            author: "server".into(),
                            body: format!("echo: {}", line.body),
                        }));
                    }
                }
                ServerEvent::Disconnected { peer, reason } => {
                    println!("server: peer {} left ({reason})", peer.token());
                }
                _ => {}
            }
        }
    });

    let (client, mut client_events) = TransportClient::new(registry, ClientConfig::default())?;
    client.connect(&format!("http://{addr}")).await?;

    client.send(Box::new(ChatLine {
        author: "demo".into(),
        body: "hello over the tunnel".into(),
    }));

    // Wait for the echo to come back on a poll cycle.
    while let Some(event) = client_events.recv().await {
        match event {
            ClientEvent::Connected { token, poll_delay } => {
                println!("client: connected as {token}, polling every {poll_delay:?}");
            }
            ClientEvent::Message(message) => {
                if let Some(line) = message.downcast_ref::<ChatLine>() {
                    println!("client: <{}> {}", line.author, line.body);
                    break;
                }
            }
            other => println!("client: {other:?}"),
        }
    }

    client.disconnect().await;
    server.stop().await;
    Ok(())
}
