// crates/scheduler/src/state.rs
//
// Session state machine. Pure: no I/O, no clock. The protocol loop feeds it
// every server message and performs whatever `Step` it returns.
//
//   Connecting -> Handshaking -> AwaitingScenario <-> InScenario
//        any phase -> Closed (close message, rejection, violation)

use crate::error::SessionError;
use crate::tasking::{validate_launches, LaunchPolicy};
use api::{
    ClientMessage, Close, GetMoves, Handshake, HandshakeResult, Moves, Scenario, ServerMessage,
    Stats,
};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Handshaking,
    AwaitingScenario,
    InScenario,
    Closed,
}

/// Whether the session ends after the first scenario run or keeps waiting for
/// more until the server closes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    SingleScenario,
    MultiScenario,
}

impl SessionMode {
    /// Competition sessions run scenario after scenario; test sessions run one.
    pub fn from_comp_mode(comp_mode: bool) -> Self {
        if comp_mode {
            SessionMode::MultiScenario
        } else {
            SessionMode::SingleScenario
        }
    }
}

/// What the driver must do after a message has been handled.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Send this message, then receive again.
    Reply(ClientMessage),
    /// Receive again.
    Continue,
    /// The session is over and nothing more may be sent.
    Finished(Outcome),
}

/// Healthy session endings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The server sent `Close` with `IsOk = true`.
    ServerClosed { message: String },
    /// Single-scenario session finished its run.
    RunsCompleted { runs: u32 },
}

/// Per-run accumulators, reset at every scenario start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunTally {
    pub turns: u64,
    pub launches: u64,
    pub orders_assigned: u64,
}

enum Context {
    Connecting,
    Handshaking,
    AwaitingScenario,
    InScenario { scenario: Scenario, tally: RunTally },
    Closed,
}

impl Context {
    fn phase(&self) -> Phase {
        match self {
            Context::Connecting => Phase::Connecting,
            Context::Handshaking => Phase::Handshaking,
            Context::AwaitingScenario => Phase::AwaitingScenario,
            Context::InScenario { .. } => Phase::InScenario,
            Context::Closed => Phase::Closed,
        }
    }
}

pub struct SessionMachine {
    mode: SessionMode,
    context: Context,
    server_info: Option<HandshakeResult>,
    runs_completed: u32,
}

impl SessionMachine {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            context: Context::Connecting,
            server_info: None,
            runs_completed: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.context.phase()
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn runs_completed(&self) -> u32 {
        self.runs_completed
    }

    /// Scenario of the run in progress.
    pub fn scenario(&self) -> Option<&Scenario> {
        match &self.context {
            Context::InScenario { scenario, .. } => Some(scenario),
            _ => None,
        }
    }

    pub fn tally(&self) -> Option<RunTally> {
        match &self.context {
            Context::InScenario { tally, .. } => Some(*tally),
            _ => None,
        }
    }

    /// Per-turn response budget the server announced in its handshake result.
    pub fn turn_budget(&self) -> Option<Duration> {
        self.server_info.as_ref().and_then(HandshakeResult::turn_timeout)
    }

    /// The transport is up: returns the handshake to send before anything is
    /// read.
    pub fn connected(&mut self, handshake: Handshake) -> Result<ClientMessage, SessionError> {
        if !matches!(self.context, Context::Connecting) {
            return Err(SessionError::InvalidState {
                phase: self.phase(),
                operation: "send the handshake",
            });
        }
        tracing::info!(entry_name = %handshake.entry_name, "Sending handshake");
        self.context = Context::Handshaking;
        Ok(ClientMessage::Handshake(handshake))
    }

    /// Transport failure or shutdown. Terminal.
    pub fn abort(&mut self) {
        self.context = Context::Closed;
    }

    /// Advances the session by one server message.
    ///
    /// Errors always leave the machine `Closed`.
    pub fn handle(
        &mut self,
        msg: ServerMessage,
        policy: &dyn LaunchPolicy,
    ) -> Result<Step, SessionError> {
        let context = std::mem::replace(&mut self.context, Context::Closed);

        match (context, msg) {
            (Context::Closed, _) => Err(SessionError::InvalidState {
                phase: Phase::Closed,
                operation: "receive messages",
            }),
            (Context::Connecting, _) => Err(SessionError::InvalidState {
                phase: Phase::Connecting,
                operation: "receive messages before the handshake",
            }),

            (_, ServerMessage::Close(Close { is_ok, message })) => {
                if is_ok {
                    tracing::info!(message = %message, "Server closed the session");
                    Ok(Step::Finished(Outcome::ServerClosed { message }))
                } else {
                    tracing::error!(
                        message = %message,
                        "Server closed the session with an error; connection close is imminent"
                    );
                    Err(SessionError::ServerClosed { message })
                }
            }

            (Context::Handshaking, ServerMessage::HandshakeResult(result)) => {
                if !result.is_ok {
                    return Err(SessionError::HandshakeRejected {
                        message: result.message,
                    });
                }
                tracing::info!(
                    message = %result.message,
                    timeout_ms = result.timeout_ms,
                    scenario_freq_secs = result.scenario_freq_secs,
                    next_start = ?result.next_start(),
                    "Handshake accepted"
                );
                self.server_info = Some(result);
                self.context = Context::AwaitingScenario;
                Ok(Step::Continue)
            }

            (Context::AwaitingScenario, ServerMessage::StartScenarioRun(start)) => {
                let scenario = start.scenario;
                tracing::info!(
                    run = self.runs_completed + 1,
                    drones = scenario.drones.len(),
                    hospitals = scenario.hospitals.len(),
                    max_time = scenario.max_time,
                    "Scenario run started"
                );
                self.context = Context::InScenario {
                    scenario,
                    tally: RunTally::default(),
                };
                Ok(Step::Continue)
            }

            (
                Context::InScenario {
                    scenario,
                    mut tally,
                },
                ServerMessage::GetMoves(GetMoves { state }),
            ) => {
                let mut launches = policy.decide_launches(&scenario, &state);
                if let Err(violation) = validate_launches(&state, &launches) {
                    tracing::error!(
                        policy = policy.name(),
                        error = %violation,
                        "Policy produced invalid launches; sending none this turn"
                    );
                    launches.clear();
                }

                let orders_assigned: usize = launches.iter().map(|l| l.order_ids.len()).sum();
                tally.turns += 1;
                tally.launches += launches.len() as u64;
                tally.orders_assigned += orders_assigned as u64;

                tracing::info!(
                    time_of_day = state.time_of_day,
                    pending_orders = state.pending_orders.len(),
                    available_drones = state.available_drone_ids.len(),
                    launches = launches.len(),
                    orders_assigned,
                    "Answered turn"
                );

                self.context = Context::InScenario { scenario, tally };
                Ok(Step::Reply(ClientMessage::Moves(Moves { launches })))
            }

            (Context::InScenario { tally, .. }, ServerMessage::EndScenarioRun(end)) => {
                self.runs_completed += 1;
                tracing::info!(
                    run = self.runs_completed,
                    turns = tally.turns,
                    launches = tally.launches,
                    orders_assigned = tally.orders_assigned,
                    "Scenario run ended"
                );
                report_stats(&end.stats);

                match self.mode {
                    SessionMode::SingleScenario => Ok(Step::Finished(Outcome::RunsCompleted {
                        runs: self.runs_completed,
                    })),
                    SessionMode::MultiScenario => {
                        self.context = Context::AwaitingScenario;
                        Ok(Step::Continue)
                    }
                }
            }

            (context, msg) => Err(SessionError::ProtocolViolation {
                phase: context.phase(),
                detail: format!("unexpected {} message", msg.kind()),
            }),
        }
    }
}

/// Logs end-of-run stats, one event per key in key-spec order.
fn report_stats(stats: &Stats) {
    for (spec, value) in stats.ordered_values() {
        match value {
            Some(value) => tracing::info!(
                stat = %spec.full_name,
                display_name = %spec.display_name,
                should_display = spec.should_display,
                value = %value,
                "Scenario stat"
            ),
            None => tracing::warn!(stat = %spec.full_name, "Scenario stat has no value"),
        }
    }
}
