//! proxtag: a physical proximity tag game
//!
//! Battery powered devices detect each other over short-range radio and
//! share game state through a publish/subscribe bus. This library holds the
//! radio advertisement codec, the signal strength classifier, the per-device
//! role state machine and the message protocol with its session coordinator.
//! Radio, bus and peripheral hardware stay behind small traits so the same
//! logic runs against simulations in tests.
pub mod core;

pub mod device;
pub mod network;
pub mod protocol;
pub mod radio;
pub mod session;
pub mod time;

// Re-export commonly used items
pub use core::{Config, DeviceIdentity, Error, Result, RoleKind, Rules};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
