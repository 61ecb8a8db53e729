use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Stable identity of a device, created once at boot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Opaque identifier used on the bus
    pub id: String,
    /// Human readable name
    pub display_name: String,
}

impl DeviceIdentity {
    /// Creates an identity, rejecting ids that cannot travel in a comma separated payload
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.contains(',') || id.chars().any(char::is_whitespace) {
            return Err(Error::config(format!("invalid device id {:?}", id)));
        }
        Ok(DeviceIdentity {
            id,
            display_name: display_name.into(),
        })
    }

    /// Builds an identity for an id seen on the bus, deriving the display name
    pub fn from_id(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let display_name = default_display_name(&id);
        Self::new(id, display_name)
    }

    /// Generates a new random identity
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let bytes: [u8; 8] = rng.gen();
        let id: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        let display_name = default_display_name(&id);
        DeviceIdentity { id, display_name }
    }
}

fn default_display_name(id: &str) -> String {
    let short: String = id.chars().take(4).collect();
    format!("Player_{}", short)
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// Role a device can be assigned for a game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    Runner,
    Tagger,
    Beacon,
}

impl RoleKind {
    /// Name used on the bus and in advertisements
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Runner => "Runner",
            RoleKind::Tagger => "Tagger",
            RoleKind::Beacon => "Beacon",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Runner" => Ok(RoleKind::Runner),
            "Tagger" => Ok(RoleKind::Tagger),
            "Beacon" => Ok(RoleKind::Beacon),
            other => Err(Error::protocol(format!("unknown role {:?}", other))),
        }
    }
}

/// A single adjustable rule, in the order the setup screen walks them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    Runners,
    Taggers,
    Beacons,
    DurationMinutes,
}

/// Role counts and game length chosen by the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rules {
    pub runners: u32,
    pub taggers: u32,
    pub beacons: u32,
    pub duration_secs: u32,
}

impl Default for Rules {
    fn default() -> Self {
        Rules {
            runners: 1,
            taggers: 1,
            beacons: 0,
            duration_secs: super::DEFAULT_GAME_DURATION_SECS,
        }
    }
}

impl Rules {
    /// Checks the rules can describe a game
    pub fn validate(&self) -> Result<()> {
        if self.duration_secs == 0 {
            return Err(Error::config("game duration must be greater than zero"));
        }
        Ok(())
    }

    /// Game length
    pub fn duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.duration_secs))
    }

    /// Total number of roles to hand out
    pub fn role_count(&self) -> usize {
        (self.runners + self.taggers + self.beacons) as usize
    }

    /// Role multiset in assignment order: Runners, then Taggers, then Beacons
    pub fn roles(&self) -> Vec<RoleKind> {
        let mut roles = Vec::with_capacity(self.role_count());
        roles.extend(std::iter::repeat(RoleKind::Runner).take(self.runners as usize));
        roles.extend(std::iter::repeat(RoleKind::Tagger).take(self.taggers as usize));
        roles.extend(std::iter::repeat(RoleKind::Beacon).take(self.beacons as usize));
        roles
    }

    /// Steps one rule to its next value, wrapping like the setup screen
    pub fn cycle(&mut self, field: RuleField) {
        match field {
            RuleField::Runners => self.runners = self.runners % 8 + 1,
            RuleField::Taggers => self.taggers = self.taggers % 8 + 1,
            RuleField::Beacons => self.beacons = (self.beacons + 1) % 9,
            RuleField::DurationMinutes => {
                let minutes = self.duration_secs / 60;
                self.duration_secs = (minutes % 10 + 1) * 60;
            }
        }
    }
}

/// Gameplay tuning shared by every device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Prefix every topic lives under
    pub topic_prefix: String,
    /// Signal stronger than this means a catch (dBm)
    pub caught_threshold: i16,
    /// Signal stronger than this, but not a catch, is the safe zone (dBm)
    pub safe_threshold: i16,
    /// How long a Beacon rests after granting a save
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub cooldown: Duration,
    /// Saves a Beacon grants before it is depleted
    pub save_limit: u32,
    /// Minimum spacing between save requests from a caught Runner
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub save_retry: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            topic_prefix: super::DEFAULT_TOPIC_PREFIX.to_string(),
            caught_threshold: crate::radio::proximity::CAUGHT_DISTANCE,
            safe_threshold: crate::radio::proximity::SAFE_DISTANCE,
            cooldown: super::BEACON_COOLDOWN,
            save_limit: super::BEACON_SAVE_LIMIT,
            save_retry: super::BEACON_COOLDOWN,
        }
    }
}

/// Bus link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Broker address as `host:port`
    pub broker_addr: String,
    /// Upper bound on a single message check
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub poll_timeout: Duration,
    /// Upper bound on establishing the link
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub connect_timeout: Duration,
    /// TCP keepalive idle time
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub keepalive: Duration,
    /// First reconnect delay
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub reconnect_initial: Duration,
    /// Reconnect delay cap
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub reconnect_max: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            broker_addr: format!("127.0.0.1:{}", super::DEFAULT_BROKER_PORT),
            poll_timeout: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(2),
            keepalive: Duration::from_secs(60),
            reconnect_initial: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Configuration for a device or coordinator process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub game: GameConfig,
    pub bus: BusConfig,
    /// Rules the coordinator starts games with
    pub rules: Rules,
    /// Sleep between loop iterations
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub tick_interval: Duration,
    /// Scan window per tick; zero polls the radio once
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub scan_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            game: GameConfig::default(),
            bus: BusConfig::default(),
            rules: Rules::default(),
            tick_interval: super::TICK_INTERVAL,
            scan_window: Duration::ZERO,
        }
    }
}

impl Config {
    /// Loads a JSON configuration file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make the game unplayable
    pub fn validate(&self) -> Result<()> {
        self.rules.validate()?;

        let prefix = &self.game.topic_prefix;
        if prefix.is_empty() || prefix.ends_with('/') {
            return Err(Error::config(format!("invalid topic prefix {:?}", prefix)));
        }
        if self.game.caught_threshold <= self.game.safe_threshold {
            return Err(Error::config(
                "caught threshold must be a stronger signal than the safe threshold",
            ));
        }
        if self.game.save_limit == 0 {
            return Err(Error::config("save limit must be at least one"));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::config("tick interval must be greater than zero"));
        }
        if self.bus.reconnect_initial.is_zero() || self.bus.reconnect_max < self.bus.reconnect_initial {
            return Err(Error::config("reconnect delays must satisfy 0 < initial <= max"));
        }
        Ok(())
    }
}
