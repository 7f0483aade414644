//! # Session
//!
//! Everything above the transport for one head-to-head match:
//!
//! - [`Session`]: the screen flow from role selection through the ready
//!   rendezvous to game over, driven by local actions and transport events
//! - [`Synchronizer`] / [`SyncTask`]: a full GAME_STATE every 33ms while
//!   playing, followed by any owed attack rows
//! - [`Mirror`]: the passive copy of the opponent's board
//! - [`Controller`]: owns an [`transport::Endpoint`] and executes what the
//!   session asks for
//!
//! The game itself is behind [`LocalEngine`]; [`ScriptedEngine`] is a small
//! headless stand-in used by the `duel` binary and the tests.

pub mod attack;
pub mod controller;
pub mod engine;
pub mod state;
pub mod sync;

#[cfg(test)]
mod testing;

pub use attack::{flush_attack_rows, AttackQueue};
pub use controller::Controller;
pub use engine::{LocalEngine, ScriptedEngine, BOARD_HEIGHT, BOARD_WIDTH, GARBAGE_COLOR};
pub use state::{Command, GameOverCause, Outcome, Screen, Session};
pub use sync::{Mirror, Outbound, SyncConfig, SyncTask, Synchronizer, TickReport};
