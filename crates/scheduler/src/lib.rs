//! Drone delivery scheduling client.
//!
//! [`runner::ProtocolLoop`] drives one websocket session through
//! [`state::SessionMachine`], asking a [`tasking::LaunchPolicy`] for the
//! launches of every turn.

pub mod communication;
pub mod config;
pub mod error;
pub mod metrics;
pub mod runner;
pub mod state;
pub mod tasking;

pub use communication::{Connection, WsConnection};
pub use error::{SessionError, TransportError};
pub use runner::ProtocolLoop;
pub use state::{Outcome, Phase, SessionMachine, SessionMode, Step};
pub use tasking::{validate_launches, LaunchPolicy, LaunchViolation, PolicyKind};
