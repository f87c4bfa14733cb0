// crates/scheduler/src/runner.rs
//
// Drives one session over a connection: send the handshake, then strictly
// receive one message, hand it to the state machine, send at most one reply.

use crate::communication::Connection;
use crate::error::SessionError;
use crate::metrics::SchedulerMetrics;
use crate::state::{Outcome, SessionMachine, SessionMode, Step};
use crate::tasking::LaunchPolicy;
use api::{codec, ClientMessage, Handshake, ServerMessage};
use std::sync::Arc;
use std::time::Instant;

pub struct ProtocolLoop {
    mode: SessionMode,
    policy: Box<dyn LaunchPolicy>,
    metrics: Arc<SchedulerMetrics>,
}

impl ProtocolLoop {
    pub fn new(
        mode: SessionMode,
        policy: Box<dyn LaunchPolicy>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            mode,
            policy,
            metrics,
        }
    }

    /// Runs the session to its end. Nothing is sent after this returns.
    pub async fn run<C>(
        &self,
        conn: &mut C,
        credentials: Handshake,
    ) -> Result<Outcome, SessionError>
    where
        C: Connection + ?Sized,
    {
        let mut machine = SessionMachine::new(self.mode);
        tracing::info!(mode = ?self.mode, policy = self.policy.name(), "Session starting");

        let result = self.drive(&mut machine, conn, credentials).await;
        match &result {
            Ok(outcome) => tracing::info!(
                outcome = ?outcome,
                runs = machine.runs_completed(),
                "Session finished"
            ),
            Err(e) => {
                machine.abort();
                self.metrics.record_error(e.kind());
                tracing::error!(
                    error = %e,
                    kind = e.kind(),
                    runs = machine.runs_completed(),
                    "Session ended with an error"
                );
            }
        }
        result
    }

    async fn drive<C>(
        &self,
        machine: &mut SessionMachine,
        conn: &mut C,
        credentials: Handshake,
    ) -> Result<Outcome, SessionError>
    where
        C: Connection + ?Sized,
    {
        let hello = machine.connected(credentials)?;
        send(machine, conn, &hello).await?;

        loop {
            let text = conn.receive_text().await?;
            let msg = codec::decode(&text).map_err(|e| SessionError::ProtocolViolation {
                phase: machine.phase(),
                detail: e.to_string(),
            })?;
            tracing::debug!(kind = msg.kind(), phase = ?machine.phase(), "Received message");

            let turn = match &msg {
                ServerMessage::GetMoves(get) => Some((
                    get.state.time_of_day,
                    get.state.pending_orders.len(),
                    get.state.available_drone_ids.len(),
                )),
                _ => None,
            };
            let runs_before = machine.runs_completed();

            let started = Instant::now();
            let step = machine.handle(msg, self.policy.as_ref())?;
            let elapsed = started.elapsed();

            if let Some((time_of_day, pending, available)) = turn {
                self.metrics.record_turn(pending, available);
                self.metrics.decision_seconds.observe(elapsed.as_secs_f64());
                if let Some(budget) = machine.turn_budget() {
                    if elapsed > budget {
                        tracing::warn!(
                            time_of_day,
                            elapsed_ms = elapsed.as_millis() as u64,
                            budget_ms = budget.as_millis() as u64,
                            "Decision exceeded the server's turn budget"
                        );
                    }
                }
            }
            if machine.runs_completed() > runs_before {
                self.metrics.scenarios_completed_total.inc();
            }

            match step {
                Step::Reply(reply) => {
                    if let ClientMessage::Moves(moves) = &reply {
                        let orders: usize = moves.launches.iter().map(|l| l.order_ids.len()).sum();
                        self.metrics.record_launches(moves.launches.len(), orders);
                    }
                    send(machine, conn, &reply).await?;
                }
                Step::Continue => {}
                Step::Finished(outcome) => return Ok(outcome),
            }
        }
    }
}

async fn send<C>(
    machine: &SessionMachine,
    conn: &mut C,
    msg: &ClientMessage,
) -> Result<(), SessionError>
where
    C: Connection + ?Sized,
{
    let text = codec::encode(msg).map_err(|e| SessionError::ProtocolViolation {
        phase: machine.phase(),
        detail: e.to_string(),
    })?;
    tracing::debug!(kind = msg.kind(), bytes = text.len(), "Sending message");
    conn.send_text(text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::state::Phase;
    use crate::tasking::FirstAvailable;
    use api::{Close, DroneId, HandshakeResult, Launch, Moves, OrderId};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;

    /// In-memory server: replays scripted frames and records what was sent.
    /// Once the script runs out the peer is gone.
    #[derive(Default)]
    struct Scripted {
        incoming: VecDeque<String>,
        sent: Vec<String>,
    }

    impl Scripted {
        /// Frames written out in the raw wire shape.
        fn new(frames: impl IntoIterator<Item = Value>) -> Self {
            Self {
                incoming: frames.into_iter().map(|v| v.to_string()).collect(),
                sent: Vec::new(),
            }
        }

        fn from_messages(msgs: impl IntoIterator<Item = ServerMessage>) -> Self {
            Self {
                incoming: msgs
                    .into_iter()
                    .map(|m| codec::encode_server(&m).unwrap())
                    .collect(),
                sent: Vec::new(),
            }
        }

        fn sent_messages(&self) -> Vec<ClientMessage> {
            self.sent
                .iter()
                .map(|text| codec::decode_client(text).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl Connection for Scripted {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            self.sent.push(text);
            Ok(())
        }

        async fn receive_text(&mut self) -> Result<String, TransportError> {
            self.incoming.pop_front().ok_or(TransportError::Closed)
        }
    }

    fn credentials() -> Handshake {
        Handshake {
            auth_token: "tok".into(),
            entry_name: "team".into(),
        }
    }

    fn protocol(mode: SessionMode) -> (ProtocolLoop, Arc<SchedulerMetrics>) {
        let metrics = Arc::new(SchedulerMetrics::new().unwrap());
        let runner = ProtocolLoop::new(mode, Box::new(FirstAvailable), metrics.clone());
        (runner, metrics)
    }

    fn moves(launches: Vec<Launch>) -> ClientMessage {
        ClientMessage::Moves(Moves { launches })
    }

    fn accepted() -> Value {
        json!({ "HandshakeResult": {
            "IsOk": true, "Message": "ok", "TimeoutMs": 1000,
            "ScenarioFreqSecs": 0, "NextStartDatetime": ""
        }})
    }

    fn start() -> Value {
        json!({ "StartScenarioRun": { "Scenario": {
            "WarehousePosition": { "X": 0.0, "Y": 0.0 },
            "Hospitals": { "North": { "X": 0.0, "Y": 10.0 } },
            "Drones": [
                { "DroneId": 1, "MaxCapacity": 1, "MaxSpeed": 1.0, "MaxRange": 100.0 },
                { "DroneId": 2, "MaxCapacity": 1, "MaxSpeed": 1.0, "MaxRange": 100.0 }
            ],
            "MaxTime": 3600
        }}})
    }

    fn get_moves(time: i64, drones: &[i64], orders: &[i64]) -> Value {
        let orders: Vec<Value> = orders
            .iter()
            .map(|id| {
                json!({ "OrderId": id, "Time": 0, "Hospital": "North", "Priority": "Emergency" })
            })
            .collect();
        json!({ "GetMoves": { "State": {
            "TimeOfDay": time,
            "PendingOrders": orders,
            "AvailableDroneIds": drones,
            "BusyDrones": null
        }}})
    }

    fn end() -> Value {
        json!({ "EndScenarioRun": { "Stats": {
            "KeySpecs": [{
                "FullName": "delivered", "StatName": "delivered", "Priority": 1,
                "Type": "int", "ShouldDisplay": true, "DisplayName": "Delivered"
            }],
            "Values": { "delivered": 3 }
        }}})
    }

    fn close(is_ok: bool, message: &str) -> Value {
        json!({ "Close": { "IsOk": is_ok, "Message": message } })
    }

    #[tokio::test]
    async fn handshake_is_sent_before_anything_is_read() {
        let (runner, _) = protocol(SessionMode::SingleScenario);
        let mut conn = Scripted::default();

        let err = runner.run(&mut conn, credentials()).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Closed)));
        assert_eq!(
            conn.sent_messages(),
            vec![ClientMessage::Handshake(credentials())]
        );
        let wire: Value = serde_json::from_str(&conn.sent[0]).unwrap();
        assert_eq!(
            wire,
            json!({ "Handshake": { "AuthToken": "tok", "EntryName": "team" } })
        );
    }

    #[tokio::test]
    async fn rejected_handshake_sends_nothing_else() {
        let (runner, metrics) = protocol(SessionMode::MultiScenario);
        let mut conn = Scripted::from_messages([
            ServerMessage::HandshakeResult(HandshakeResult {
                is_ok: false,
                message: "unknown token".into(),
                ..Default::default()
            }),
            ServerMessage::Close(Close::default()),
        ]);

        let err = runner.run(&mut conn, credentials()).await.unwrap_err();
        assert!(matches!(
            &err,
            SessionError::HandshakeRejected { message } if message == "unknown token"
        ));
        assert_eq!(conn.sent.len(), 1);
        assert_eq!(
            metrics
                .session_errors_total
                .with_label_values(&["handshake_rejected"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn single_scenario_session_ends_after_first_run() {
        let (runner, metrics) = protocol(SessionMode::SingleScenario);
        let mut conn = Scripted::new([
            accepted(),
            start(),
            get_moves(1, &[1, 2], &[10, 11, 12]),
            get_moves(2, &[1], &[12]),
            end(),
            start(),
        ]);

        let outcome = runner.run(&mut conn, credentials()).await.unwrap();
        assert_eq!(outcome, Outcome::RunsCompleted { runs: 1 });

        let sent = conn.sent_messages();
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent[1],
            moves(vec![
                Launch::single(DroneId::from(1), OrderId::from(10)),
                Launch::single(DroneId::from(2), OrderId::from(11)),
            ])
        );
        assert_eq!(
            sent[2],
            moves(vec![Launch::single(DroneId::from(1), OrderId::from(12))])
        );
        // The trailing StartScenarioRun was never read.
        assert_eq!(conn.incoming.len(), 1);

        assert_eq!(metrics.turns_total.get(), 2);
        assert_eq!(metrics.launches_total.get(), 3);
        assert_eq!(metrics.orders_assigned_total.get(), 3);
        assert_eq!(metrics.scenarios_completed_total.get(), 1);
        assert_eq!(metrics.pending_orders.get(), 1);
    }

    #[tokio::test]
    async fn named_ids_are_sent_back_verbatim() {
        let (runner, _) = protocol(SessionMode::SingleScenario);
        let mut conn = Scripted::new([
            accepted(),
            json!({ "StartScenarioRun": { "Scenario": {
                "WarehousePosition": { "X": 0.0, "Y": 0.0 },
                "Hospitals": { "North": { "X": 0.0, "Y": 10.0 } },
                "Drones": [
                    { "DroneId": "drone-1", "MaxCapacity": 1, "MaxSpeed": 1.0, "MaxRange": 100.0 }
                ]
            }}}),
            json!({ "GetMoves": { "State": {
                "TimeOfDay": 4,
                "PendingOrders": {
                    "order-12": {
                        "OrderId": "order-12", "Time": 0, "Hospital": "North",
                        "Priority": "Resupply"
                    },
                    "order-13": { "Time": 1, "Hospital": "North", "Priority": "Resupply" }
                },
                "AvailableDroneIds": ["drone-1"],
                "BusyDrones": null
            }}}),
            end(),
        ]);

        runner.run(&mut conn, credentials()).await.unwrap();

        let wire: Value = serde_json::from_str(&conn.sent[1]).unwrap();
        assert_eq!(
            wire,
            json!({ "Moves": { "Launches": [{ "DroneId": "drone-1", "OrderIds": ["order-12"] }] } })
        );
    }

    #[tokio::test]
    async fn competition_session_runs_until_closed() {
        let (runner, metrics) = protocol(SessionMode::MultiScenario);
        let mut conn = Scripted::new([
            accepted(),
            start(),
            get_moves(1, &[1], &[5]),
            end(),
            start(),
            get_moves(1, &[2], &[6]),
            end(),
            close(true, "season over"),
        ]);

        let outcome = runner.run(&mut conn, credentials()).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::ServerClosed {
                message: "season over".into()
            }
        );

        // One handshake for the whole session, one Moves per GetMoves.
        assert_eq!(
            conn.sent_messages(),
            vec![
                ClientMessage::Handshake(credentials()),
                moves(vec![Launch::single(DroneId::from(1), OrderId::from(5))]),
                moves(vec![Launch::single(DroneId::from(2), OrderId::from(6))]),
            ]
        );
        assert_eq!(metrics.scenarios_completed_total.get(), 2);
    }

    #[tokio::test]
    async fn close_with_error_ends_the_session() {
        let (runner, metrics) = protocol(SessionMode::MultiScenario);
        let mut conn = Scripted::new([accepted(), start(), close(false, "invalid move")]);

        let err = runner.run(&mut conn, credentials()).await.unwrap_err();
        assert!(
            matches!(&err, SessionError::ServerClosed { message } if message == "invalid move")
        );
        assert_eq!(
            metrics
                .session_errors_total
                .with_label_values(&["server_closed"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn transport_drop_mid_scenario_is_a_transport_error() {
        let (runner, _) = protocol(SessionMode::MultiScenario);
        let mut conn = Scripted::new([accepted(), start(), get_moves(1, &[1], &[1])]);

        let err = runner.run(&mut conn, credentials()).await.unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert_eq!(conn.sent.len(), 2);
    }

    #[tokio::test]
    async fn undecodable_text_is_a_protocol_violation() {
        let (runner, _) = protocol(SessionMode::SingleScenario);
        let mut conn = Scripted::new([accepted()]);
        conn.incoming.push_back("not json".into());

        let err = runner.run(&mut conn, credentials()).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::ProtocolViolation {
                phase: Phase::AwaitingScenario,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn out_of_order_message_is_a_protocol_violation() {
        let (runner, _) = protocol(SessionMode::SingleScenario);
        let mut conn = Scripted::new([accepted(), get_moves(1, &[1], &[1])]);

        let err = runner.run(&mut conn, credentials()).await.unwrap_err();
        assert_eq!(err.kind(), "protocol_violation");
        assert_eq!(conn.sent.len(), 1);
    }
}
