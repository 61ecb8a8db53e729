//! Short-range radio seam
//!
//! The hardware driver lives outside this crate; the game only needs the
//! narrow [`Radio`] trait. Raw reports go through the advertisement codec to
//! become [`Sighting`]s, which the role state machine classifies by zone.

pub mod proximity;
pub mod sim;

use std::time::Duration;

use bytes::Bytes;

use crate::core::{Result, RoleKind};
use crate::protocol::advertisement::{decode_device, decode_name};

pub use self::proximity::{classify, intensity, Thresholds, Zone};
pub use self::sim::{SimulatedAir, SimulatedRadio};

/// One received advertisement as the radio reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReport {
    /// Signal strength in dBm
    pub rssi: i16,
    /// Undecoded advertisement payload
    pub data: Bytes,
}

/// A decoded peer observation, valid for the current tick only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub rssi: i16,
    /// Advertised name, if one could be decoded
    pub name: Option<String>,
    /// Device id carried by Beacon advertisements
    pub device: Option<String>,
}

impl Sighting {
    /// Decodes a raw report; malformed payloads simply carry no name
    pub fn from_report(report: &RawReport) -> Self {
        Sighting {
            rssi: report.rssi,
            name: decode_name(&report.data),
            device: decode_device(&report.data),
        }
    }

    /// Role the peer advertises, matched by substring like the firmware does
    pub fn role(&self) -> Option<RoleKind> {
        let name = self.name.as_deref()?;
        [RoleKind::Tagger, RoleKind::Beacon, RoleKind::Runner]
            .into_iter()
            .find(|role| name.contains(role.as_str()))
    }
}

/// What the radio does during one tick; scanning and advertising never overlap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioMode {
    Off,
    Scan,
    Advertise(Bytes),
}

/// Radio capability the device loop drives
pub trait Radio {
    /// Listens for `window` and returns what was heard; a zero window polls once
    fn scan(&mut self, window: Duration) -> Result<Vec<RawReport>>;

    /// Starts or replaces the broadcast payload
    fn advertise(&mut self, payload: &[u8]) -> Result<()>;

    fn stop_advertise(&mut self) -> Result<()>;

    fn stop_scan(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::advertisement::{encode_name, Advertisement, MANUFACTURER_TYPE};

    #[test]
    fn test_sighting_from_report() {
        let data = Advertisement::new()
            .with_name("Beacon")
            .with_structure(MANUFACTURER_TYPE, &b"abcd"[..])
            .encode()
            .unwrap();
        let sighting = Sighting::from_report(&RawReport { rssi: -45, data });

        assert_eq!(sighting.name.as_deref(), Some("Beacon"));
        assert_eq!(sighting.device.as_deref(), Some("abcd"));
        assert_eq!(sighting.role(), Some(RoleKind::Beacon));
    }

    #[test]
    fn test_sighting_role_by_substring() {
        let report = RawReport {
            rssi: -30,
            data: encode_name("xTaggerx"),
        };
        assert_eq!(Sighting::from_report(&report).role(), Some(RoleKind::Tagger));

        let junk = RawReport {
            rssi: -30,
            data: Bytes::from_static(&[9, 9, 9]),
        };
        let sighting = Sighting::from_report(&junk);
        assert_eq!(sighting.name, None);
        assert_eq!(sighting.role(), None);
    }
}
