use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::coordinator::Coordinator;
use crate::core::{Config, Result};
use crate::device::Input;
use crate::network::{topic_paths, Bus, Link};
use crate::protocol::{Message, Topic};
use crate::time::{self, Cadence, Instant};

/// Width of the operator touch screen in pixels; the left half starts, the right half ends
pub const SCREEN_WIDTH: u16 = 320;

/// How often the coordinator logs its status line
pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Operator loop around a [`Coordinator`]
pub struct SessionRunner<B, I> {
    link: Link<B>,
    input: I,
    coordinator: Coordinator,
    outbox: mpsc::UnboundedReceiver<Message>,
    prefix: String,
    poll_timeout: Duration,
    tick_interval: Duration,
    status: Cadence,
}

impl<B: Bus, I: Input> SessionRunner<B, I> {
    pub fn new(config: &Config, bus: B, input: I) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let prefix = config.game.topic_prefix.clone();
        SessionRunner {
            link: Link::new(bus, topic_paths(&prefix, &Topic::COORDINATOR), &config.bus),
            input,
            coordinator: Coordinator::new(config.rules.clone(), tx),
            outbox: rx,
            prefix,
            poll_timeout: config.bus.poll_timeout,
            tick_interval: config.tick_interval,
            status: Cadence::new(STATUS_INTERVAL),
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut Coordinator {
        &mut self.coordinator
    }

    pub fn link(&self) -> &Link<B> {
        &self.link
    }

    /// One loop iteration
    pub async fn tick(&mut self) -> Result<()> {
        let now = time::now();
        self.link.maintain(now).await;

        if let Some(envelope) = self.link.poll(self.poll_timeout, now).await {
            match Message::from_envelope(&self.prefix, &envelope) {
                Ok(Some(message)) => self.coordinator.handle_message(&message)?,
                Ok(None) => debug!("Ignoring message on {}", envelope.topic),
                Err(e) => debug!("Dropping malformed message on {}: {}", envelope.topic, e),
            }
        }

        let now = time::now();
        self.read_operator(now);
        self.coordinator.tick(now)?;
        self.flush(time::now()).await;

        let now = time::now();
        if self.status.ready(now) {
            info!("{}", self.coordinator.status(now));
        }
        Ok(())
    }

    /// Runs until an unrecoverable error
    pub async fn run(&mut self) -> Result<()> {
        info!("Coordinator running, rules {:?}", self.coordinator.rules());
        loop {
            self.tick().await?;
            tokio::time::sleep(self.tick_interval).await;
        }
    }

    fn read_operator(&mut self, now: Instant) {
        let mut result = Ok(());
        if self.input.read_button() {
            result = self.coordinator.toggle(now);
        } else if let Some((x, _)) = self.input.read_touch() {
            let left = x < SCREEN_WIDTH / 2;
            result = match (left, self.coordinator.is_active()) {
                (true, false) => self.coordinator.start(now),
                (false, true) => self.coordinator.end(),
                _ => Ok(()),
            };
        } else if let Some(field) = self.input.read_rule() {
            result = self.coordinator.cycle_rule(field);
        }
        if let Err(e) = result {
            warn!("Operator command failed: {}", e);
        }
    }

    async fn flush(&mut self, now: Instant) {
        while let Ok(message) = self.outbox.try_recv() {
            debug!("Publishing {}", message);
            self.link.publish(&message.to_envelope(&self.prefix), now).await;
        }
    }
}

impl<B, I> std::fmt::Debug for SessionRunner<B, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRunner")
            .field("prefix", &self.prefix)
            .field("active", &self.coordinator.is_active())
            .finish()
    }
}

/// Unused operator input, for headless coordinators driven by code
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl Input for NoInput {
    fn read_button(&mut self) -> bool {
        false
    }

    fn read_touch(&mut self) -> Option<(u16, u16)> {
        None
    }
}
