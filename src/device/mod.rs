//! Player device: peripherals and the per-device game loop
//!
//! Output and input hardware stay behind the [`Output`] and [`Input`]
//! traits; [`DeviceRunner`] ties the role state machine to the bus and the
//! radio.

mod runner;

use std::time::Duration;

use tracing::info;

use crate::core::RuleField;

pub use self::runner::DeviceRunner;

/// RGB colour of the status light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub const OFF: Color = Color(0, 0, 0);
    pub const GREEN: Color = Color(0, 255, 0);
    pub const BLUE: Color = Color(0, 0, 255);
    pub const RED: Color = Color(255, 0, 0);
    pub const YELLOW: Color = Color(255, 255, 0);
    pub const DIM_WHITE: Color = Color(32, 32, 32);
}

/// What the status light shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Solid(Color),
    /// Blinks with `period` between flashes
    Blink { color: Color, period: Duration },
}

/// Short tones played on game events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub frequency_hz: u32,
    pub duration: Duration,
}

impl Tone {
    pub const CAUGHT: Tone = Tone {
        frequency_hz: 220,
        duration: Duration::from_millis(400),
    };
    pub const SAVED: Tone = Tone {
        frequency_hz: 880,
        duration: Duration::from_millis(200),
    };
    pub const GAME_START: Tone = Tone {
        frequency_hz: 660,
        duration: Duration::from_millis(150),
    };
    pub const GAME_END: Tone = Tone {
        frequency_hz: 330,
        duration: Duration::from_millis(600),
    };
}

/// Light and sound hardware
pub trait Output {
    fn set_indicator(&mut self, indicator: Indicator);

    fn emit_tone(&mut self, frequency_hz: u32, duration: Duration);
}

/// Button and touch hardware
pub trait Input {
    /// True once per press
    fn read_button(&mut self) -> bool;

    /// Touch position in screen pixels, if the screen is being touched
    fn read_touch(&mut self) -> Option<(u16, u16)>;

    /// A rule the operator asked to step on the setup screen
    fn read_rule(&mut self) -> Option<RuleField> {
        None
    }
}

/// Output that only logs changes, for headless runs
#[derive(Debug, Default)]
pub struct LogOutput {
    label: String,
    last: Option<Indicator>,
}

impl LogOutput {
    pub fn new(label: impl Into<String>) -> Self {
        LogOutput {
            label: label.into(),
            last: None,
        }
    }

    /// Last indicator state set
    pub fn indicator(&self) -> Option<Indicator> {
        self.last
    }
}

impl Output for LogOutput {
    fn set_indicator(&mut self, indicator: Indicator) {
        if self.last != Some(indicator) {
            info!("[{}] indicator {:?}", self.label, indicator);
            self.last = Some(indicator);
        }
    }

    fn emit_tone(&mut self, frequency_hz: u32, duration: Duration) {
        info!("[{}] tone {} Hz for {:?}", self.label, frequency_hz, duration);
    }
}
