//! Domain model and wire protocol for the drone delivery simulation server.
//!
//! - [`model`]: scenario, state and launch value types.
//! - [`message`]: server and client message sum types, decoded from the
//!   "one populated field" JSON envelope.
//! - [`codec`]: JSON text framing for websocket messages.

pub mod codec;
pub mod message;
pub mod model;

pub use codec::CodecError;
pub use message::{
    ClientMessage, Close, EndScenarioRun, EnvelopeError, GetMoves, Handshake, HandshakeResult,
    Moves, ServerMessage, StartScenarioRun,
};
pub use model::{
    Coord, DroneConfig, DroneId, DroneStatus, Ident, KeySpec, Launch, Order, OrderId, Priority,
    Scenario, State, Stats,
};
