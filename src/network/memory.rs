//! In-process bus
//!
//! Every client of a [`MemoryBroker`] shares one broadcast channel and
//! filters by its own subscriptions, which mirrors what a real broker does
//! closely enough for tests and the simulation. The broker can be taken
//! down or severed to exercise reconnect handling.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::Bus;
use crate::core::{Error, Result};
use crate::protocol::Envelope;

const DEFAULT_CAPACITY: usize = 1024;

struct Shared {
    tx: broadcast::Sender<Envelope>,
    generation: AtomicU64,
    available: AtomicBool,
}

/// Shared in-process broker
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Broker whose clients may fall `capacity` messages behind
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        MemoryBroker {
            shared: Arc::new(Shared {
                tx,
                generation: AtomicU64::new(0),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// A new, unconnected client
    pub fn client(&self) -> MemoryBus {
        MemoryBus {
            shared: self.shared.clone(),
            rx: None,
            generation: 0,
            subscriptions: HashSet::new(),
        }
    }

    /// Drops every current connection; clients see a transport error
    pub fn sever(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether new connections are accepted
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }
}

/// One client of a [`MemoryBroker`]
pub struct MemoryBus {
    shared: Arc<Shared>,
    rx: Option<broadcast::Receiver<Envelope>>,
    generation: u64,
    subscriptions: HashSet<String>,
}

impl MemoryBus {
    fn check(&mut self) -> Result<()> {
        if self.rx.is_none() {
            return Err(Error::transport("not connected"));
        }
        if self.generation != self.shared.generation.load(Ordering::SeqCst) {
            self.rx = None;
            return Err(Error::transport("connection severed by broker"));
        }
        Ok(())
    }
}

impl Bus for MemoryBus {
    async fn connect(&mut self) -> Result<()> {
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(Error::transport("broker unavailable"));
        }
        self.generation = self.shared.generation.load(Ordering::SeqCst);
        self.rx = Some(self.shared.tx.subscribe());
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.check()?;
        self.subscriptions.insert(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.check()?;
        // nobody listening is not an error
        let _ = self
            .shared
            .tx
            .send(Envelope::new(topic, Bytes::copy_from_slice(payload)));
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Envelope>> {
        self.check()?;
        let deadline = tokio::time::Instant::now() + timeout;
        let Some(rx) = self.rx.as_mut() else {
            return Err(Error::transport("not connected"));
        };

        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(envelope)) => {
                    if self.subscriptions.contains(&envelope.topic) {
                        return Ok(Some(envelope));
                    }
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!("Memory bus client lagged, {} messages lost", skipped);
                }
                Ok(Err(RecvError::Closed)) => {
                    self.rx = None;
                    return Err(Error::transport("broker closed"));
                }
                Err(_) => return Ok(None),
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.rx = None;
        self.connect().await
    }

    fn is_connected(&self) -> bool {
        self.rx.is_some() && self.generation == self.shared.generation.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_subscription_filtering() {
        let broker = MemoryBroker::new();
        let mut a = broker.client();
        let mut b = broker.client();
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        b.subscribe("taggame/caught").await.unwrap();

        a.publish("taggame/save", b"r,b").await.unwrap();
        a.publish("taggame/caught", b"r").await.unwrap();

        let got = b.poll(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(got, Envelope::new("taggame/caught", "r"));
        assert_eq!(b.poll(Duration::ZERO).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let broker = MemoryBroker::new();
        let mut bus = broker.client();
        assert!(!bus.is_connected());
        assert!(bus.publish("t", b"x").await.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_sever_and_reconnect_keeps_subscriptions() {
        let broker = MemoryBroker::new();
        let mut bus = broker.client();
        let mut other = broker.client();
        bus.connect().await.unwrap();
        bus.subscribe("taggame/game").await.unwrap();

        broker.sever();
        assert!(!bus.is_connected());
        assert!(bus.poll(Duration::ZERO).await.is_err());

        broker.set_available(false);
        assert_err!(bus.reconnect().await);
        broker.set_available(true);
        assert_ok!(bus.reconnect().await);
        assert_ok!(other.connect().await);

        other.publish("taggame/game", b"start").await.unwrap();
        let got = bus.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(got.map(|e| e.payload), Some(Bytes::from_static(b"start")));
    }
}
