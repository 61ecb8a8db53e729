use std::time::Duration;

use futures::{SinkExt, StreamExt};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use super::Bus;
use crate::core::{BusConfig, Error, Result};
use crate::protocol::{Envelope, Frame, FrameCodec};

/// Bus client talking to a [`super::Broker`] over TCP
pub struct TcpBus {
    /// Broker address as `host:port`
    addr: String,
    connect_timeout: Duration,
    keepalive: Duration,
    framed: Option<Framed<TcpStream, FrameCodec>>,
    /// Topics restored after a reconnect
    subscriptions: Vec<String>,
}

impl TcpBus {
    /// Creates an unconnected client for the configured broker
    pub fn new(config: &BusConfig) -> Self {
        TcpBus {
            addr: config.broker_addr.clone(),
            connect_timeout: config.connect_timeout,
            keepalive: config.keepalive,
            framed: None,
            subscriptions: Vec::new(),
        }
    }

    async fn open(&mut self) -> Result<()> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| Error::transport(format!("connect to {} timed out", self.addr)))?
            .map_err(|e| Error::transport(format!("connect to {} failed: {}", self.addr, e)))?;

        stream.set_nodelay(true)?;
        let keepalive = TcpKeepalive::new().with_time(self.keepalive);
        SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;

        info!("Connected to broker at {}", self.addr);
        self.framed = Some(Framed::new(stream, FrameCodec::new()));
        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        let limit = self.connect_timeout;
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| Error::transport("not connected"))?;

        let result = match timeout(limit, framed.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(Error::transport("send timed out")),
        };
        if let Err(e) = result {
            self.framed = None;
            return Err(as_transport(e));
        }
        Ok(())
    }
}

impl Bus for TcpBus {
    async fn connect(&mut self) -> Result<()> {
        self.open().await
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.send(Frame::Subscribe {
            topic: topic.to_string(),
        })
        .await?;
        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.send(Frame::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
        .await
    }

    async fn poll(&mut self, limit: Duration) -> Result<Option<Envelope>> {
        let framed = self
            .framed
            .as_mut()
            .ok_or_else(|| Error::transport("not connected"))?;

        match timeout(limit, framed.next()).await {
            Err(_) => Ok(None),
            Ok(Some(Ok(Frame::Publish { topic, payload }))) => {
                Ok(Some(Envelope::new(topic, payload)))
            }
            Ok(Some(Ok(Frame::Subscribe { topic }))) => {
                debug!("Ignoring subscribe frame for {} from broker", topic);
                Ok(None)
            }
            Ok(Some(Err(e))) => {
                self.framed = None;
                Err(as_transport(e))
            }
            Ok(None) => {
                self.framed = None;
                Err(Error::transport("broker closed the connection"))
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.framed = None;
        self.open().await?;
        let topics = self.subscriptions.clone();
        for topic in topics {
            self.send(Frame::Subscribe { topic }).await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.framed.is_some()
    }
}

fn as_transport(error: Error) -> Error {
    match error {
        Error::Io(e) => Error::transport(e.to_string()),
        other => other,
    }
}
