//! Core types and configuration for the proximity tag game
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{
    BusConfig,
    Config,
    DeviceIdentity,
    GameConfig,
    RoleKind,
    RuleField,
    Rules,
};

use std::time::Duration;

/// Prefix every game topic lives under
pub const DEFAULT_TOPIC_PREFIX: &str = "taggame";

/// Default port for the bus broker
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Default game length in seconds
pub const DEFAULT_GAME_DURATION_SECS: u32 = 300;

/// Time a Beacon rests after granting a save
pub const BEACON_COOLDOWN: Duration = Duration::from_secs(5);

/// Saves a Beacon may grant per game
pub const BEACON_SAVE_LIMIT: u32 = 3;

/// Sleep between iterations of the device and coordinator loops
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);
