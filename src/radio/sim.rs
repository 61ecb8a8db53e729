//! Simulated radio medium
//!
//! A shared "air" that every [`SimulatedRadio`] handle advertises into and
//! scans from. Signal strength follows a log-distance path loss model with
//! optional Gaussian jitter, which is enough to walk devices in and out of
//! the safe and caught zones in tests and demos.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::{Radio, RawReport};
use crate::core::{Error, Result};

/// Received power at one meter (dBm)
pub const MEASURED_POWER: f64 = -45.0;

/// Free space path loss exponent
pub const PATH_LOSS_EXPONENT: f64 = 2.0;

/// Peers farther than this are not heard at all (m)
pub const MAX_RANGE: f64 = 15.0;

/// Expected RSSI at `distance` meters
pub fn rssi_at(distance: f64) -> f64 {
    MEASURED_POWER - 10.0 * PATH_LOSS_EXPONENT * distance.max(0.1).log10()
}

#[derive(Debug)]
struct Node {
    position: (f64, f64),
    advertising: Option<Bytes>,
    scanning: bool,
}

struct AirState {
    nodes: BTreeMap<usize, Node>,
    next_id: usize,
    jitter: Option<Normal<f64>>,
    rng: StdRng,
}

/// Shared radio medium
#[derive(Clone)]
pub struct SimulatedAir {
    inner: Arc<Mutex<AirState>>,
}

impl Default for SimulatedAir {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAir {
    /// A noiseless medium
    pub fn new() -> Self {
        SimulatedAir {
            inner: Arc::new(Mutex::new(AirState {
                nodes: BTreeMap::new(),
                next_id: 0,
                jitter: None,
                rng: StdRng::seed_from_u64(0x7a67),
            })),
        }
    }

    /// A medium adding zero-mean Gaussian noise with the given deviation (dB)
    pub fn with_jitter(std_dev: f64, seed: u64) -> Result<Self> {
        if !std_dev.is_finite() || std_dev < 0.0 {
            return Err(Error::config(format!(
                "jitter deviation must be a finite, non-negative number of dB, got {}",
                std_dev
            )));
        }
        let normal = Normal::new(0.0, std_dev)
            .map_err(|e| Error::config(format!("invalid jitter: {}", e)))?;
        let air = Self::new();
        {
            let mut state = air.lock()?;
            state.jitter = Some(normal);
            state.rng = StdRng::seed_from_u64(seed);
        }
        Ok(air)
    }

    /// Places a new radio at `position` (meters)
    pub fn radio(&self, position: (f64, f64)) -> Result<SimulatedRadio> {
        let mut state = self.lock()?;
        let id = state.next_id;
        state.next_id += 1;
        state.nodes.insert(
            id,
            Node {
                position,
                advertising: None,
                scanning: false,
            },
        );
        Ok(SimulatedRadio {
            id,
            air: self.clone(),
        })
    }

    /// Moves a radio
    pub fn place(&self, radio: &SimulatedRadio, position: (f64, f64)) -> Result<()> {
        let mut state = self.lock()?;
        let node = state
            .nodes
            .get_mut(&radio.id)
            .ok_or_else(|| Error::radio(format!("unknown radio {}", radio.id)))?;
        node.position = position;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, AirState>> {
        self.inner
            .lock()
            .map_err(|_| Error::radio("simulated air lock poisoned"))
    }
}

/// One device's handle onto the simulated medium
#[derive(Clone)]
pub struct SimulatedRadio {
    id: usize,
    air: SimulatedAir,
}

impl SimulatedRadio {
    /// Whether the radio is currently broadcasting
    pub fn is_advertising(&self) -> Result<bool> {
        let state = self.air.lock()?;
        Ok(state
            .nodes
            .get(&self.id)
            .map_or(false, |n| n.advertising.is_some()))
    }

    /// Whether the last radio operation was a scan
    pub fn is_scanning(&self) -> Result<bool> {
        let state = self.air.lock()?;
        Ok(state.nodes.get(&self.id).map_or(false, |n| n.scanning))
    }

    fn with_node<T>(&mut self, f: impl FnOnce(&mut Node) -> T) -> Result<T> {
        let mut state = self.air.lock()?;
        let node = state
            .nodes
            .get_mut(&self.id)
            .ok_or_else(|| Error::radio(format!("unknown radio {}", self.id)))?;
        Ok(f(node))
    }
}

impl Radio for SimulatedRadio {
    fn scan(&mut self, _window: Duration) -> Result<Vec<RawReport>> {
        let mut guard = self.air.lock()?;
        let state = &mut *guard;
        let here = state
            .nodes
            .get_mut(&self.id)
            .map(|n| {
                n.scanning = true;
                n.position
            })
            .ok_or_else(|| Error::radio(format!("unknown radio {}", self.id)))?;

        let mut reports = Vec::new();
        for (id, node) in &state.nodes {
            if *id == self.id {
                continue;
            }
            let Some(data) = &node.advertising else {
                continue;
            };
            let (dx, dy) = (node.position.0 - here.0, node.position.1 - here.1);
            let distance = (dx * dx + dy * dy).sqrt();
            if distance > MAX_RANGE {
                continue;
            }
            let noise = state
                .jitter
                .as_ref()
                .map_or(0.0, |n| n.sample(&mut state.rng));
            let rssi = (rssi_at(distance) + noise).round().clamp(-127.0, 0.0) as i16;
            reports.push(RawReport {
                rssi,
                data: data.clone(),
            });
        }
        Ok(reports)
    }

    fn advertise(&mut self, payload: &[u8]) -> Result<()> {
        let payload = Bytes::copy_from_slice(payload);
        self.with_node(|n| {
            n.advertising = Some(payload);
            n.scanning = false;
        })
    }

    fn stop_advertise(&mut self) -> Result<()> {
        self.with_node(|n| n.advertising = None)
    }

    fn stop_scan(&mut self) -> Result<()> {
        self.with_node(|n| n.scanning = false)
    }
}
