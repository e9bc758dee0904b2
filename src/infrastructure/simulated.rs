use crate::domain::delivery::{CallbackSlot, DeliveryChannel, Snapshot};
use crate::domain::pending::Disposition;
use crate::domain::ports::{SnapshotSinkRef, TerminalBridge};
use crate::domain::result::RawPayload;
use crate::domain::transaction::TransactionRequest;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What the simulated terminal answers to every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptedOutcome {
    Approve,
    Decline,
    Cancel,
    Fail,
    /// Never answers.
    Silent,
}

#[derive(Debug, Clone)]
pub struct TerminalScript {
    pub outcome: ScriptedOutcome,
    /// Channels each answer is published on. Repeats are intentional.
    pub channels: Vec<DeliveryChannel>,
    pub latency: Duration,
    /// Settling time the firmware needs after a confirmation. Starting
    /// earlier is answered with a decline.
    pub settle_time: Duration,
    /// Boot with an unconfirmed transaction left over from a previous run.
    pub locked: bool,
    /// Whether approvals carry a confirmation id.
    pub include_confirmation_id: bool,
}

impl Default for TerminalScript {
    fn default() -> Self {
        Self {
            outcome: ScriptedOutcome::Approve,
            channels: vec![DeliveryChannel::Callback],
            latency: Duration::from_millis(200),
            settle_time: Duration::from_secs(5),
            locked: false,
            include_confirmation_id: true,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingRecord {
    confirmation_id: String,
    order_id: String,
}

#[derive(Debug)]
struct InFlight {
    order_id: String,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct TerminalState {
    sequence: u64,
    pending: Option<PendingRecord>,
    in_flight: Option<InFlight>,
    confirmed_at: Option<Instant>,
}

/// Where a simulated terminal publishes its answers.
#[derive(Clone)]
pub struct Publishers {
    pub callback: Arc<CallbackSlot>,
    pub events: broadcast::Sender<RawPayload>,
    pub snapshots: SnapshotSinkRef,
}

/// A scripted stand-in for the real terminal bridge.
///
/// It behaves like the firmware the orchestrator is written against: an
/// approval that is never confirmed locks the terminal, answers arrive late
/// and possibly more than once, and a start issued too soon after a
/// confirmation is declined.
pub struct SimulatedTerminal {
    script: TerminalScript,
    publishers: Publishers,
    state: Arc<Mutex<TerminalState>>,
}

impl SimulatedTerminal {
    pub fn new(script: TerminalScript, publishers: Publishers) -> Self {
        let mut state = TerminalState::default();
        if script.locked {
            state.pending = Some(PendingRecord {
                confirmation_id: "STALE-0".to_string(),
                order_id: "previous-run".to_string(),
            });
        }
        Self {
            script,
            publishers,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn is_locked(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    fn answer(
        outcome: ScriptedOutcome,
        request: &TransactionRequest,
        sequence: u64,
        include_confirmation_id: bool,
    ) -> Option<RawPayload> {
        let mut payload = match outcome {
            ScriptedOutcome::Approve => json!({
                "responseCode": 0,
                "message": "APROVADA",
                "nsu": format!("{sequence:06}"),
                "authorizationCode": format!("AUT{sequence:04}"),
                "cardBrand": "VISA",
                "amount": request.amount.minor_units(),
            }),
            ScriptedOutcome::Decline => json!({
                "responseCode": 51,
                "message": "SALDO INSUFICIENTE",
            }),
            ScriptedOutcome::Cancel => json!({
                "responseCode": -1,
                "message": "OPERACAO CANCELADA",
            }),
            ScriptedOutcome::Fail => json!({
                "responseCode": 500,
                "message": "ERRO DE COMUNICACAO",
            }),
            ScriptedOutcome::Silent => return None,
        };
        payload["orderId"] = json!(request.order_id);
        payload["timestamp"] = json!(Utc::now().to_rfc3339());
        if outcome == ScriptedOutcome::Approve && include_confirmation_id {
            payload["confirmationId"] = json!(format!("CONF-{sequence}"));
        }
        Some(payload)
    }
}

fn lock(state: &Mutex<TerminalState>) -> MutexGuard<'_, TerminalState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn publish(publishers: &Publishers, channels: &[DeliveryChannel], payload: RawPayload) {
    for channel in channels {
        match channel {
            DeliveryChannel::Callback => {
                if !publishers.callback.invoke(payload.clone()) {
                    debug!("no callback listener installed");
                }
            }
            DeliveryChannel::Event => {
                if publishers.events.send(payload.clone()).is_err() {
                    debug!("no event subscribers");
                }
            }
            DeliveryChannel::Snapshot => {
                if let Err(e) = publishers.snapshots.write(Snapshot::now(payload.clone())).await {
                    warn!(error = %e, "snapshot write failed");
                }
            }
        }
    }
}

#[async_trait]
impl TerminalBridge for SimulatedTerminal {
    async fn start_transaction(&self, request: &TransactionRequest) -> Result<bool> {
        let (sequence, outcome) = {
            let mut state = lock(&self.state);
            if state.pending.is_some() {
                warn!(order_id = %request.order_id, "terminal locked by unconfirmed transaction");
                return Ok(false);
            }
            if state.in_flight.is_some() {
                warn!(order_id = %request.order_id, "terminal already processing");
                return Ok(false);
            }
            let too_soon = state
                .confirmed_at
                .is_some_and(|at| at.elapsed() < self.script.settle_time);
            let outcome = if too_soon {
                warn!(order_id = %request.order_id, "started before settling; declining");
                ScriptedOutcome::Decline
            } else {
                self.script.outcome
            };
            state.sequence += 1;
            state.in_flight = Some(InFlight {
                order_id: request.order_id.clone(),
                cancelled: false,
            });
            (state.sequence, outcome)
        };

        info!(order_id = %request.order_id, sequence, ?outcome, "terminal started");
        let script = self.script.clone();
        let publishers = self.publishers.clone();
        let state = self.state.clone();
        let request = request.clone();
        tokio::spawn(async move {
            tokio::time::sleep(script.latency).await;
            let payload = {
                let mut state = lock(&state);
                let cancelled = match state.in_flight.as_ref() {
                    Some(flight) if flight.order_id == request.order_id => flight.cancelled,
                    _ => return,
                };
                let outcome = if cancelled {
                    ScriptedOutcome::Cancel
                } else {
                    outcome
                };
                let Some(payload) =
                    Self::answer(outcome, &request, sequence, script.include_confirmation_id)
                else {
                    return;
                };
                state.in_flight = None;
                if outcome == ScriptedOutcome::Approve {
                    state.pending = Some(PendingRecord {
                        confirmation_id: format!("CONF-{sequence}"),
                        order_id: request.order_id.clone(),
                    });
                }
                payload
            };
            publish(&publishers, &script.channels, payload).await;
        });
        Ok(true)
    }

    async fn cancel_transaction(&self) -> Result<bool> {
        let mut state = lock(&self.state);
        match state.in_flight.take() {
            Some(flight) if self.script.outcome == ScriptedOutcome::Silent => {
                info!(order_id = %flight.order_id, "silent transaction aborted");
                Ok(true)
            }
            Some(mut flight) => {
                flight.cancelled = true;
                state.in_flight = Some(flight);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn has_pending_transaction(&self) -> Result<bool> {
        Ok(lock(&self.state).pending.is_some())
    }

    async fn get_pending_info(&self) -> Result<Option<RawPayload>> {
        Ok(lock(&self.state).pending.as_ref().map(|pending| {
            json!({
                "confirmationId": pending.confirmation_id,
                "orderId": pending.order_id,
            })
        }))
    }

    async fn confirm(&self, handle: &str, disposition: Disposition) -> Result<bool> {
        let mut state = lock(&self.state);
        let matches = state.pending.as_ref().is_some_and(|pending| {
            !handle.is_empty() && (handle == pending.confirmation_id || handle == pending.order_id)
        });
        if !matches {
            return Ok(false);
        }
        state.pending = None;
        state.confirmed_at = Some(Instant::now());
        info!(handle, ?disposition, "terminal released");
        Ok(true)
    }

    async fn confirm_last_approved(&self) -> Result<bool> {
        let mut state = lock(&self.state);
        if state.pending.take().is_none() {
            return Ok(false);
        }
        state.confirmed_at = Some(Instant::now());
        info!("terminal released by last-approved confirmation");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::{Amount, PaymentMethod};
    use crate::infrastructure::in_memory::InMemorySnapshotStore;
    use tokio::sync::mpsc;

    fn terminal(script: TerminalScript) -> (SimulatedTerminal, Arc<CallbackSlot>) {
        let callback = Arc::new(CallbackSlot::new());
        let (events, _) = broadcast::channel(8);
        let publishers = Publishers {
            callback: callback.clone(),
            events,
            snapshots: Arc::new(InMemorySnapshotStore::new()),
        };
        (SimulatedTerminal::new(script, publishers), callback)
    }

    fn request(order_id: &str) -> TransactionRequest {
        TransactionRequest::single(order_id, Amount::new(2500).unwrap(), PaymentMethod::Debit)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_approval_locks_terminal() {
        let (terminal, callback) = terminal(TerminalScript::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        callback.install(tx);

        assert!(terminal.start_transaction(&request("A1")).await.unwrap());
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.payload["responseCode"], 0);
        assert_eq!(delivery.payload["orderId"], "A1");
        assert!(terminal.is_locked());

        assert!(!terminal.start_transaction(&request("A2")).await.unwrap());
        assert!(terminal.confirm("A1", Disposition::Confirm).await.unwrap());
        assert!(!terminal.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_inside_settle_time_is_declined() {
        let (terminal, callback) = terminal(TerminalScript::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        callback.install(tx);

        terminal.start_transaction(&request("A1")).await.unwrap();
        rx.recv().await.unwrap();
        terminal.confirm("CONF-1", Disposition::Confirm).await.unwrap();

        terminal.start_transaction(&request("A2")).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.payload["responseCode"], 51);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boots_locked() {
        let (terminal, _) = terminal(TerminalScript {
            locked: true,
            ..TerminalScript::default()
        });
        assert!(terminal.has_pending_transaction().await.unwrap());
        let info = terminal.get_pending_info().await.unwrap().unwrap();
        assert_eq!(info["confirmationId"], "STALE-0");
        assert!(!terminal.confirm("", Disposition::Confirm).await.unwrap());
        assert!(terminal.confirm_last_approved().await.unwrap());
        assert!(!terminal.has_pending_transaction().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_turns_answer_into_cancellation() {
        let (terminal, callback) = terminal(TerminalScript::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        callback.install(tx);

        terminal.start_transaction(&request("A1")).await.unwrap();
        assert!(terminal.cancel_transaction().await.unwrap());
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.payload["responseCode"], -1);
        assert!(!terminal.is_locked());
    }
}
