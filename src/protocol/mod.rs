//! Protocol implementation module
//!
//! This module defines the radio advertisement format, the game messages
//! carried on the bus, the broker framing and the per-device role state
//! machine.

pub mod advertisement;
pub mod codec;
pub mod message;
pub mod state;

pub use self::advertisement::{decode_device, decode_name, encode_name, Advertisement};
pub use self::codec::{Frame, FrameCodec};
pub use self::message::{Envelope, GameSignal, Message, Topic};
pub use self::state::{BeaconPhase, Role, RoleMachine, RoleState, RunnerPhase};

/// Maximum broker frame size in bytes
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
