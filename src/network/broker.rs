//! Minimal TCP relay broker
//!
//! Each client connection gets its own task. Publishes from any client go
//! onto one broadcast channel; every connection task forwards the messages
//! whose topic the client subscribed to. No retention, no QoS.

use std::collections::HashSet;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::core::{Error, Result};
use crate::protocol::{Envelope, Frame, FrameCodec};

const RELAY_CAPACITY: usize = 1024;

/// Relay broker accepting [`super::TcpBus`] clients
pub struct Broker {
    listener: TcpListener,
    relay: broadcast::Sender<Envelope>,
}

impl Broker {
    /// Binds the listening socket
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::transport(format!("Failed to bind broker: {}", e)))?;
        let (relay, _) = broadcast::channel(RELAY_CAPACITY);
        Ok(Broker { listener, relay })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts clients until the task is dropped
    pub async fn run(self) -> Result<()> {
        info!("Broker listening on {}", self.local_addr()?);
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!("Client connected from {}", peer);
                    let relay = self.relay.clone();
                    tokio::spawn(async move {
                        match serve_client(stream, relay).await {
                            Ok(()) => info!("Client {} disconnected", peer),
                            Err(e) => warn!("Client {} dropped: {}", peer, e),
                        }
                    });
                }
                Err(e) => error!("Accept error: {}", e),
            }
        }
    }
}

async fn serve_client(stream: TcpStream, relay: broadcast::Sender<Envelope>) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, FrameCodec::new());
    let mut inbound = relay.subscribe();
    let mut topics: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(Frame::Subscribe { topic })) => {
                    debug!("Subscribe {}", topic);
                    topics.insert(topic);
                }
                Some(Ok(Frame::Publish { topic, payload })) => {
                    // no subscribers at all is fine
                    let _ = relay.send(Envelope::new(topic, payload));
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            },

            message = inbound.recv() => match message {
                Ok(envelope) => {
                    if topics.contains(&envelope.topic) {
                        framed.send(Frame::from(envelope)).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Client fell behind, {} messages dropped", skipped);
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
