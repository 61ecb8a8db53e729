//! Signal strength to proximity
//!
//! `classify` turns a single RSSI sample into a gameplay zone. `intensity`
//! turns it into a pulse frequency for hot/cold feedback by interpolating an
//! RSSI to distance table measured on the devices.

use std::time::Duration;

/// Signal stronger than this is a catch (dBm)
pub const CAUGHT_DISTANCE: i16 = -40;

/// Signal stronger than this, but not a catch, is the safe zone (dBm)
pub const SAFE_DISTANCE: i16 = -50;

/// Slowest pulse, for the farthest peers
pub const MIN_FREQUENCY: f64 = 0.5;

/// Fastest pulse, for peers right next to us
pub const MAX_FREQUENCY: f64 = 5.0;

/// Blink period used when no peer was seen this tick
pub const FALLBACK_PERIOD: Duration = Duration::from_secs(1);

/// `(rssi dBm, distance m)` anchors, strongest signal first
pub const RSSI_DISTANCE: [(i16, f64); 5] = [
    (-35, 0.0),
    (-50, 1.0),
    (-60, 3.0),
    (-70, 6.0),
    (-80, 10.0),
];

/// Discrete proximity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Zone {
    None,
    Safe,
    Caught,
}

/// Zone thresholds, defaulting to [`CAUGHT_DISTANCE`] and [`SAFE_DISTANCE`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub caught: i16,
    pub safe: i16,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            caught: CAUGHT_DISTANCE,
            safe: SAFE_DISTANCE,
        }
    }
}

impl Thresholds {
    /// Classifies a reading against these thresholds
    pub fn classify(&self, rssi: i16) -> Zone {
        if rssi > self.caught {
            Zone::Caught
        } else if rssi > self.safe {
            Zone::Safe
        } else {
            Zone::None
        }
    }
}

/// Classifies a reading against the default thresholds
pub fn classify(rssi: i16) -> Zone {
    Thresholds::default().classify(rssi)
}

/// Estimated distance in meters, interpolated between the table anchors
pub fn distance(rssi: i16) -> f64 {
    let (strongest, nearest) = RSSI_DISTANCE[0];
    let (weakest, farthest) = RSSI_DISTANCE[RSSI_DISTANCE.len() - 1];
    if rssi >= strongest {
        return nearest;
    }
    if rssi <= weakest {
        return farthest;
    }

    for pair in RSSI_DISTANCE.windows(2) {
        let (r_near, d_near) = pair[0];
        let (r_far, d_far) = pair[1];
        if rssi <= r_near && rssi >= r_far {
            let ratio = f64::from(r_near - rssi) / f64::from(r_near - r_far);
            return d_near + ratio * (d_far - d_near);
        }
    }
    farthest
}

/// Pulse frequency in Hz for a reading: closer peers pulse faster
pub fn intensity(rssi: i16) -> f64 {
    let (strongest, _) = RSSI_DISTANCE[0];
    if rssi >= strongest {
        return MAX_FREQUENCY;
    }

    let range = RSSI_DISTANCE[RSSI_DISTANCE.len() - 1].1;
    let d = distance(rssi).min(range);
    let freq = MIN_FREQUENCY + (MAX_FREQUENCY - MIN_FREQUENCY) * (range - d) / range;
    freq.clamp(MIN_FREQUENCY, MAX_FREQUENCY)
}

/// Off time between blinks for a reading, or the fallback when nothing was seen
pub fn blink_period(rssi: Option<i16>) -> Duration {
    match rssi {
        Some(rssi) => Duration::from_secs_f64(1.0 / (2.0 * intensity(rssi))),
        None => FALLBACK_PERIOD,
    }
}
