//! Bus transport and link management
//!
//! This module handles the publish/subscribe link between devices and the
//! coordinator: the [`Bus`] seam, an in-process broker, a TCP relay broker
//! and client, and the [`Link`] wrapper that keeps a bus connected.

mod backoff;
mod broker;
mod connection;
mod memory;

pub use self::backoff::Backoff;
pub use self::broker::Broker;
pub use self::connection::TcpBus;
pub use self::memory::{MemoryBroker, MemoryBus};

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::{BusConfig, Error, Result};
use crate::protocol::{Envelope, Topic};
use crate::time::{Deadline, Instant};

/// Publish/subscribe transport.
///
/// Delivery is fire-and-forget; implementations report a lost link as a
/// transport error and expect the caller to `reconnect`.
#[allow(async_fn_in_trait)]
pub trait Bus {
    /// Establishes the link
    async fn connect(&mut self) -> Result<()>;

    /// Starts receiving messages published on `topic`
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Waits at most `timeout` for one message
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Envelope>>;

    /// Drops the current link and connects again, restoring subscriptions
    async fn reconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Full topic paths for a set of game topics
pub fn topic_paths(prefix: &str, topics: &[Topic]) -> Vec<String> {
    topics.iter().map(|t| t.path(prefix)).collect()
}

/// A bus kept alive by the owning loop.
///
/// Failures mark the link down and schedule a retry with exponential
/// backoff; the loop calls [`Link::maintain`] every tick, which only
/// touches the bus once the retry deadline has passed.
pub struct Link<B> {
    bus: B,
    topics: Vec<String>,
    backoff: Backoff,
    up: bool,
    established: bool,
    retry_at: Option<Deadline>,
}

impl<B: Bus> Link<B> {
    /// Wraps a bus that will subscribe to `topics` whenever it connects
    pub fn new(bus: B, topics: Vec<String>, config: &BusConfig) -> Self {
        Link {
            bus,
            topics,
            backoff: Backoff::new(config.reconnect_initial, config.reconnect_max),
            up: false,
            established: false,
            retry_at: None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// When the next connection attempt is due, if the link is down
    pub fn retry_at(&self) -> Option<Instant> {
        if self.up {
            None
        } else {
            self.retry_at.map(|d| d.at())
        }
    }

    /// Connects if the link is down and a retry is due.
    ///
    /// Returns true when this call brought the link up.
    pub async fn maintain(&mut self, now: Instant) -> bool {
        if self.up {
            return false;
        }
        if let Some(deadline) = self.retry_at {
            if !deadline.is_expired(now) {
                return false;
            }
        }

        let result = if self.established {
            self.bus.reconnect().await
        } else {
            self.establish().await
        };

        match result {
            Ok(()) => {
                info!("Bus link up, {} topics", self.topics.len());
                self.up = true;
                self.established = true;
                self.retry_at = None;
                self.backoff.reset();
                true
            }
            Err(e) => {
                self.fail(e, now);
                false
            }
        }
    }

    /// Publishes one message; dropped while the link is down
    pub async fn publish(&mut self, envelope: &Envelope, now: Instant) {
        if !self.up {
            debug!("Bus link down, dropping {}", envelope.topic);
            return;
        }
        if let Err(e) = self.bus.publish(&envelope.topic, &envelope.payload).await {
            self.fail(e, now);
        }
    }

    /// Waits at most `timeout` for one message
    pub async fn poll(&mut self, timeout: Duration, now: Instant) -> Option<Envelope> {
        if !self.up {
            return None;
        }
        match self.bus.poll(timeout).await {
            Ok(envelope) => envelope,
            Err(e) => {
                self.fail(e, now);
                None
            }
        }
    }

    async fn establish(&mut self) -> Result<()> {
        self.bus.connect().await?;
        for topic in &self.topics {
            self.bus.subscribe(topic).await?;
        }
        Ok(())
    }

    fn fail(&mut self, error: Error, now: Instant) {
        let delay = self.backoff.next_delay();
        if error.is_transport() {
            warn!("Bus link down ({}), retrying in {:?}", error, delay);
        } else {
            warn!("Bus error ({}), reconnecting in {:?}", error, delay);
        }
        self.up = false;
        self.retry_at = Some(Deadline::after(now, delay));
    }
}
