use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Color, Indicator, Output, Tone};
use crate::core::{Config, DeviceIdentity, Result, RoleKind};
use crate::network::{topic_paths, Bus, Link};
use crate::protocol::{Message, RoleMachine, Topic};
use crate::radio::proximity::blink_period;
use crate::radio::{Radio, RadioMode, Sighting};
use crate::time::{self, Instant};

/// How long a Beacon reading keeps steering the blink rate
const BEACON_MEMORY: Duration = Duration::from_millis(500);

/// What the output last reflected, to detect changes worth a tone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    active: bool,
    role: Option<RoleKind>,
    caught: bool,
}

/// Per-device game loop.
///
/// Each tick services at most one bus message, advances timers, performs a
/// single radio operation, publishes whatever the role machine queued and
/// refreshes the indicator.
pub struct DeviceRunner<B, R, O> {
    machine: RoleMachine,
    outbox: mpsc::UnboundedReceiver<Message>,
    link: Link<B>,
    radio: R,
    output: O,
    prefix: String,
    poll_timeout: Duration,
    tick_interval: Duration,
    scan_window: Duration,
    ticks: u64,
    applied: RadioMode,
    /// Strongest Beacon reading and when it was heard
    nearest_beacon: Option<(i16, Instant)>,
    last: Snapshot,
}

impl<B: Bus, R: Radio, O: Output> DeviceRunner<B, R, O> {
    pub fn new(identity: DeviceIdentity, config: &Config, bus: B, radio: R, output: O) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let prefix = config.game.topic_prefix.clone();
        DeviceRunner {
            machine: RoleMachine::new(identity, config.game.clone(), tx),
            outbox: rx,
            link: Link::new(bus, topic_paths(&prefix, &Topic::DEVICE), &config.bus),
            radio,
            output,
            prefix,
            poll_timeout: config.bus.poll_timeout,
            tick_interval: config.tick_interval,
            scan_window: config.scan_window,
            ticks: 0,
            applied: RadioMode::Off,
            nearest_beacon: None,
            last: Snapshot {
                active: false,
                role: None,
                caught: false,
            },
        }
    }

    pub fn machine(&self) -> &RoleMachine {
        &self.machine
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn link(&self) -> &Link<B> {
        &self.link
    }

    /// One loop iteration
    pub async fn tick(&mut self) -> Result<()> {
        let now = time::now();
        if self.link.maintain(now).await {
            // (re)joining: make sure the coordinator knows this device
            let hello = Message::Recognize {
                device: self.machine.identity().id.clone(),
            };
            self.link.publish(&hello.to_envelope(&self.prefix), now).await;
        }

        if let Some(envelope) = self.link.poll(self.poll_timeout, now).await {
            match Message::from_envelope(&self.prefix, &envelope) {
                Ok(Some(message)) => {
                    debug!("Received {}", message);
                    self.machine.handle_message(&message, time::now())?;
                }
                Ok(None) => debug!("Ignoring message on {}", envelope.topic),
                Err(e) => debug!("Dropping malformed message on {}: {}", envelope.topic, e),
            }
        }

        let now = time::now();
        self.machine.expire_timers(now);

        if let Err(e) = self.drive_radio(now) {
            warn!("Radio error: {}", e);
        }

        self.flush(time::now()).await;
        self.refresh_output();
        self.ticks = self.ticks.wrapping_add(1);
        Ok(())
    }

    /// Runs until an unrecoverable error
    pub async fn run(&mut self) -> Result<()> {
        info!("Device {} running", self.machine.identity());
        loop {
            self.tick().await?;
            tokio::time::sleep(self.tick_interval).await;
        }
    }

    fn drive_radio(&mut self, now: Instant) -> Result<()> {
        let mode = self.machine.radio_mode(self.ticks);

        match (&self.applied, &mode) {
            (RadioMode::Advertise(_), RadioMode::Scan | RadioMode::Off) => {
                self.radio.stop_advertise()?;
            }
            (RadioMode::Scan, RadioMode::Advertise(_) | RadioMode::Off) => {
                self.radio.stop_scan()?;
            }
            _ => {}
        }

        match &mode {
            RadioMode::Off => {}
            RadioMode::Advertise(payload) => {
                if self.applied != mode {
                    self.radio.advertise(payload)?;
                }
            }
            RadioMode::Scan => {
                let reports = self.radio.scan(self.scan_window)?;
                let mut nearest: Option<i16> = None;
                for report in &reports {
                    let sighting = Sighting::from_report(report);
                    if sighting.role() == Some(RoleKind::Beacon) {
                        nearest = Some(nearest.map_or(sighting.rssi, |n| n.max(sighting.rssi)));
                    }
                    self.machine.observe(&sighting, now)?;
                }
                // Beacons advertise every other tick, so keep a reading briefly
                if let Some(rssi) = nearest {
                    self.nearest_beacon = Some((rssi, now));
                }
            }
        }

        self.applied = mode;
        Ok(())
    }

    async fn flush(&mut self, now: Instant) {
        while let Ok(message) = self.outbox.try_recv() {
            debug!("Publishing {}", message);
            self.link.publish(&message.to_envelope(&self.prefix), now).await;
        }
    }

    fn refresh_output(&mut self) {
        let now = time::now();
        let state = self.machine.state();
        let current = Snapshot {
            active: state.active,
            role: state.kind(),
            caught: state.is_caught(),
        };

        let indicator = if current.active && current.role == Some(RoleKind::Runner) && current.caught {
            let beacon = self
                .nearest_beacon
                .filter(|(_, heard)| now.saturating_duration_since(*heard) <= BEACON_MEMORY)
                .map(|(rssi, _)| rssi);
            Indicator::Blink {
                color: Color::BLUE,
                period: blink_period(beacon),
            }
        } else {
            Indicator::Solid(self.machine.color())
        };
        self.output.set_indicator(indicator);

        let mut tones = Vec::new();
        if !self.last.active && current.active {
            tones.push(Tone::GAME_START);
        }
        if self.last.active && !current.active {
            tones.push(Tone::GAME_END);
        }
        if current.active && !self.last.caught && current.caught {
            tones.push(Tone::CAUGHT);
        }
        if current.active && self.last.caught && !current.caught && self.last.role == current.role {
            tones.push(Tone::SAVED);
        }
        for tone in tones {
            self.output.emit_tone(tone.frequency_hz, tone.duration);
        }
        self.last = current;
    }
}
