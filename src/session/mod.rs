//! Session coordination
//!
//! The coordinator owns the roster and the game clock; the runner wraps it
//! in the operator loop that talks to the bus.

pub mod coordinator;
mod runner;

pub use self::coordinator::{pair_roles, ActiveGame, Coordinator, SessionState};
pub use self::runner::{NoInput, SessionRunner, SCREEN_WIDTH, STATUS_INTERVAL};
