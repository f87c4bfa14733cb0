// crates/api/src/message.rs
//
// Protocol messages exchanged with the simulation server.
//
// On the wire every message is a JSON object with one populated top-level key
// naming the message kind. The reference server also writes the remaining keys
// as `null`, so decoding goes through an envelope of optional fields and is
// then narrowed to exactly one variant. Nothing past this module inspects
// optional fields for presence.

use crate::model::{Launch, Scenario, State, Stats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Messages sent by the server to the scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ServerEnvelope")]
pub enum ServerMessage {
    /// Reply to `Handshake`.
    HandshakeResult(HandshakeResult),
    /// A scenario run is about to start.
    StartScenarioRun(StartScenarioRun),
    /// The scheduler must answer with exactly one `Moves`. Only sent when there
    /// is at least one pending order and one available drone.
    GetMoves(GetMoves),
    EndScenarioRun(EndScenarioRun),
    /// The server is about to drop the connection.
    Close(Close),
}

/// Messages sent by the scheduler to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClientEnvelope")]
pub enum ClientMessage {
    /// First message on every connection.
    Handshake(Handshake),
    /// Answer to one `GetMoves`.
    Moves(Moves),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::HandshakeResult(_) => "HandshakeResult",
            ServerMessage::StartScenarioRun(_) => "StartScenarioRun",
            ServerMessage::GetMoves(_) => "GetMoves",
            ServerMessage::EndScenarioRun(_) => "EndScenarioRun",
            ServerMessage::Close(_) => "Close",
        }
    }
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Handshake(_) => "Handshake",
            ClientMessage::Moves(_) => "Moves",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HandshakeResult {
    pub is_ok: bool,
    pub message: String,
    pub timeout_ms: u64,
    pub scenario_freq_secs: u64,
    /// RFC 3339.
    pub next_start_datetime: String,
}

impl HandshakeResult {
    /// Per-turn response budget advertised by the server.
    pub fn turn_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn next_start(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.next_start_datetime)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartScenarioRun {
    pub scenario: Scenario,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetMoves {
    pub state: State,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndScenarioRun {
    #[serde(default)]
    pub stats: Stats,
}

/// `is_ok == false` means the scheduler misbehaved; `message` says how.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Close {
    pub is_ok: bool,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Handshake {
    pub auth_token: String,
    pub entry_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Moves {
    #[serde(default, deserialize_with = "crate::model::null_as_default")]
    pub launches: Vec<Launch>,
}

/// Why an envelope could not be narrowed to a single message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("message has no populated field")]
    Empty,
    #[error("message has more than one populated field: {0:?}")]
    Ambiguous(Vec<&'static str>),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerEnvelope {
    handshake_result: Option<HandshakeResult>,
    start_scenario_run: Option<StartScenarioRun>,
    get_moves: Option<GetMoves>,
    end_scenario_run: Option<EndScenarioRun>,
    close: Option<Close>,
}

impl TryFrom<ServerEnvelope> for ServerMessage {
    type Error = EnvelopeError;

    fn try_from(env: ServerEnvelope) -> Result<Self, Self::Error> {
        let mut found = Vec::with_capacity(1);
        if let Some(m) = env.handshake_result {
            found.push(ServerMessage::HandshakeResult(m));
        }
        if let Some(m) = env.start_scenario_run {
            found.push(ServerMessage::StartScenarioRun(m));
        }
        if let Some(m) = env.get_moves {
            found.push(ServerMessage::GetMoves(m));
        }
        if let Some(m) = env.end_scenario_run {
            found.push(ServerMessage::EndScenarioRun(m));
        }
        if let Some(m) = env.close {
            found.push(ServerMessage::Close(m));
        }
        single(found, ServerMessage::kind)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ClientEnvelope {
    handshake: Option<Handshake>,
    moves: Option<Moves>,
}

impl TryFrom<ClientEnvelope> for ClientMessage {
    type Error = EnvelopeError;

    fn try_from(env: ClientEnvelope) -> Result<Self, Self::Error> {
        let mut found = Vec::with_capacity(1);
        if let Some(m) = env.handshake {
            found.push(ClientMessage::Handshake(m));
        }
        if let Some(m) = env.moves {
            found.push(ClientMessage::Moves(m));
        }
        single(found, ClientMessage::kind)
    }
}

fn single<T>(mut found: Vec<T>, kind: fn(&T) -> &'static str) -> Result<T, EnvelopeError> {
    match found.len() {
        0 => Err(EnvelopeError::Empty),
        1 => Ok(found.remove(0)),
        _ => Err(EnvelopeError::Ambiguous(found.iter().map(kind).collect())),
    }
}
