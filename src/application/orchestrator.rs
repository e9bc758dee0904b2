use super::idempotency::IdempotencyGuard;
use super::multiplexer::{Accepted, ArmedListener, DeliveryChannels, ResultMultiplexer};
use super::normalizer::ResultNormalizer;
use super::resolver::{PendingResolver, ResolveContext, ResolveOutcome};
use crate::config::OrchestratorConfig;
use crate::domain::ports::BridgeRef;
use crate::domain::result::{CanonicalResult, DedupKey, ResultStatus, SettlementWarning};
use crate::domain::session::{SessionPhase, SessionState};
use crate::domain::transaction::TransactionRequest;
use crate::error::{PaymentError, Result};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

struct ActiveSession {
    state: SessionState,
    cancel: Arc<watch::Sender<bool>>,
}

struct Inner {
    bridge: BridgeRef,
    resolver: PendingResolver,
    multiplexer: ResultMultiplexer,
    config: OrchestratorConfig,
    active: Mutex<Option<ActiveSession>>,
    last: Mutex<Option<SessionState>>,
    /// Keeps listening for a cancelled session's answer.
    late_watch: Mutex<Option<AbortHandle>>,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last(&self) -> MutexGuard<'_, Option<SessionState>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn late_watch(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.late_watch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Confirms an approval on the terminal. Failure is attached to `result`
    /// as a warning; the charge stands either way.
    async fn confirm_approval(&self, order_id: &str, result: &mut CanonicalResult) {
        let ctx = ResolveContext::PostApproval {
            order_id: order_id.to_string(),
            confirmation_id: result.confirmation_id.clone(),
            requires_confirmation: result.requires_confirmation,
        };
        match self.resolver.resolve_if_pending(&ctx).await {
            ResolveOutcome::None => {}
            ResolveOutcome::Resolved(lock) => info!(
                order_id = %order_id,
                strategy = ?lock.resolved_by,
                "approval confirmed"
            ),
            ResolveOutcome::Failed(lock) => {
                error!(
                    order_id = %order_id,
                    nsu = ?result.nsu,
                    "approved charge could not be confirmed, manual recovery needed"
                );
                result.warning = Some(SettlementWarning::ConfirmationFailed {
                    detail: format!(
                        "terminal refused every strategy (confirmation id {:?})",
                        lock.confirmation_id
                    ),
                });
            }
        }
    }

    /// Waits until `deadline` for the answer to a session that already
    /// settled as cancelled. A late approval is confirmed and replaces the
    /// recorded outcome in the last session.
    async fn watch_after_cancel(
        &self,
        mut listener: ArmedListener,
        order_id: String,
        deadline: Instant,
    ) {
        let late = match tokio::time::timeout_at(deadline, listener.next_result()).await {
            Ok(late) => late,
            Err(_) => {
                debug!(order_id = %order_id, "no late result after cancel");
                return;
            }
        };
        drop(listener);
        if !late.result.is_approved() {
            debug!(
                order_id = %order_id,
                status = %late.result.status,
                "late result after cancel"
            );
            return;
        }

        warn!(
            order_id = %order_id,
            nsu = ?late.result.nsu,
            "terminal approved after the session settled as cancelled"
        );
        let mut result = late.result;
        if result.warning.is_none() {
            result.warning = Some(SettlementWarning::CancelOverridden);
        }
        self.confirm_approval(&order_id, &mut result).await;

        let mut last = self.last();
        if let Some(state) = last.as_mut().filter(|state| state.request.order_id == order_id) {
            state.phase = SessionPhase::Settled(ResultStatus::Approved);
            state.dedup_key = Some(late.key);
            state.result = Some(result);
        }
    }
}

/// How the wait for a terminal answer ended.
enum Wait {
    Delivered(Accepted),
    TimedOut,
    Cancelled,
}

/// Drives payment attempts against a single terminal, one at a time.
///
/// `PaymentOrchestrator` is cheap to clone; every clone shares the same
/// single-flight guard, so all UI surfaces must go through one instance.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    inner: Arc<Inner>,
}

impl PaymentOrchestrator {
    pub fn new(bridge: BridgeRef, channels: DeliveryChannels, config: OrchestratorConfig) -> Self {
        let guard = Arc::new(IdempotencyGuard::new(config.dedup_window));
        let multiplexer = ResultMultiplexer::new(
            channels,
            ResultNormalizer::new(config.rules.clone()),
            guard,
            config.snapshot_poll_interval,
        );
        let resolver = PendingResolver::new(
            bridge.clone(),
            config.cooldown,
            config.preflight_disposition,
        );
        Self {
            inner: Arc::new(Inner {
                bridge,
                resolver,
                multiplexer,
                config,
                active: Mutex::new(None),
                last: Mutex::new(None),
                late_watch: Mutex::new(None),
            }),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.active().is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner
            .active()
            .as_ref()
            .map_or(SessionPhase::Idle, |active| active.state.phase)
    }

    /// Snapshot of the session currently in flight.
    pub fn session(&self) -> Option<SessionState> {
        self.inner.active().as_ref().map(|active| active.state.clone())
    }

    /// The most recently finished session.
    ///
    /// A session that settled as cancelled is updated in place if the
    /// terminal approves it afterwards, before its result timeout.
    pub fn last_session(&self) -> Option<SessionState> {
        self.inner.last().clone()
    }

    /// Runs one payment attempt to completion.
    ///
    /// Terminal-classified outcomes (including declines and cancellations)
    /// come back as `Ok`. Faults come back as errors: `Busy` when another
    /// attempt is in flight (the terminal is not touched), `PendingUnresolved`
    /// and `BridgeRejectedStart` before any money moved, and `Timeout` when
    /// the outcome is unknown.
    pub async fn submit(&self, request: TransactionRequest) -> Result<CanonicalResult> {
        let (flight, mut cancel) = self.begin(&request)?;
        let outcome = self.run(&flight, &request, &mut cancel).await;
        match &outcome {
            Ok(result) => {
                info!(
                    order_id = %request.order_id,
                    status = %result.status,
                    nsu = ?result.nsu,
                    warning = ?result.warning,
                    "payment session settled"
                );
                flight.settle(result.status, Some(result.clone()));
            }
            Err(e) => {
                warn!(order_id = %request.order_id, error = %e, "payment session failed");
                flight.settle(ResultStatus::Error, None);
            }
        }
        outcome
    }

    /// Asks the in-flight session to stop.
    ///
    /// Valid while initiating or awaiting a result. The terminal is asked to
    /// cancel on a best-effort basis and the session settles as cancelled
    /// whether or not it acknowledges, unless it approves in the meantime.
    /// Returns false when there is nothing to cancel.
    pub async fn cancel(&self) -> bool {
        let (signal, order_id) = {
            let active = self.inner.active();
            match active.as_ref() {
                Some(session) if session.state.phase.is_cancellable() => (
                    session.cancel.clone(),
                    session.state.request.order_id.clone(),
                ),
                Some(session) => {
                    debug!(phase = %session.state.phase, "cancel ignored in this phase");
                    return false;
                }
                None => return false,
            }
        };

        if signal.send_replace(true) {
            return true;
        }
        info!(order_id = %order_id, "cancel requested");
        match self.inner.bridge.cancel_transaction().await {
            Ok(true) => info!(order_id = %order_id, "terminal acknowledged cancel"),
            Ok(false) => warn!(order_id = %order_id, "terminal did not acknowledge cancel"),
            Err(e) => warn!(order_id = %order_id, error = %e, "cancel call failed"),
        }
        true
    }

    fn begin(&self, request: &TransactionRequest) -> Result<(Flight<'_>, watch::Receiver<bool>)> {
        let mut active = self.inner.active();
        if let Some(session) = active.as_ref() {
            warn!(
                order_id = %request.order_id,
                in_flight = %session.state.request.order_id,
                phase = %session.state.phase,
                "rejecting concurrent payment"
            );
            return Err(PaymentError::Busy {
                order_id: session.state.request.order_id.clone(),
            });
        }
        if let Some(late_watch) = self.inner.late_watch().take() {
            // The pre-flight check takes over any lock a late approval left.
            late_watch.abort();
        }
        let (tx, rx) = watch::channel(false);
        *active = Some(ActiveSession {
            state: SessionState::new(request.clone()),
            cancel: Arc::new(tx),
        });
        Ok((Flight { inner: &self.inner }, rx))
    }

    async fn run(
        &self,
        flight: &Flight<'_>,
        request: &TransactionRequest,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<CanonicalResult> {
        let inner = &self.inner;
        info!(
            order_id = %request.order_id,
            amount = %request.amount,
            method = %request.method,
            installments = request.installments,
            "payment session started"
        );

        match inner.resolver.resolve_if_pending(&ResolveContext::PreFlight).await {
            ResolveOutcome::None => {}
            ResolveOutcome::Resolved(lock) => info!(
                order_id = %request.order_id,
                strategy = ?lock.resolved_by,
                "stale pending transaction cleared before start"
            ),
            ResolveOutcome::Failed(lock) => {
                error!(order_id = %request.order_id, "terminal locked by unresolved transaction");
                return Err(PaymentError::PendingUnresolved {
                    confirmation_id: lock.confirmation_id,
                });
            }
        }

        tokio::select! {
            biased;
            _ = cancel.wait_for(|cancelled| *cancelled) => {
                info!(order_id = %request.order_id, "cancelled before start");
                return Ok(CanonicalResult::cancelled_by_caller());
            }
            _ = inner.resolver.await_cooldown() => {}
        }

        // Listeners go up before the start call; a fast terminal may answer
        // before it returns.
        let mut listener = inner.multiplexer.arm(request, Utc::now());
        inner.resolver.note_started(&request.order_id);
        let rejection = match inner.bridge.start_transaction(request).await {
            Ok(true) => None,
            Ok(false) => Some("terminal refused to start".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = rejection {
            error!(order_id = %request.order_id, reason = %reason, "start rejected");
            return Err(PaymentError::BridgeRejectedStart {
                order_id: request.order_id.clone(),
                reason,
            });
        }
        flight.enter(SessionPhase::AwaitingResult);
        let deadline = Instant::now() + inner.config.result_timeout;

        let wait = tokio::select! {
            biased;
            accepted = listener.next_result() => Wait::Delivered(accepted),
            _ = tokio::time::sleep_until(deadline) => Wait::TimedOut,
            _ = cancel.wait_for(|cancelled| *cancelled) => Wait::Cancelled,
        };

        let (accepted, cancel_overridden) = match wait {
            Wait::Delivered(accepted) => (accepted, false),
            Wait::TimedOut => {
                drop(listener);
                warn!(
                    order_id = %request.order_id,
                    waited_secs = inner.config.result_timeout.as_secs(),
                    "no result from terminal"
                );
                if let Err(e) = inner.bridge.cancel_transaction().await {
                    warn!(order_id = %request.order_id, error = %e, "cancel after timeout failed");
                }
                return Err(PaymentError::Timeout {
                    order_id: request.order_id.clone(),
                    waited: inner.config.result_timeout,
                });
            }
            Wait::Cancelled => {
                // An approval racing the cancel still has to be confirmed.
                let within_grace =
                    tokio::time::timeout(inner.config.cancel_grace, listener.next_result()).await;
                match within_grace {
                    Ok(late) if late.result.is_approved() => {
                        warn!(order_id = %request.order_id, "terminal approved despite cancel");
                        (late, true)
                    }
                    Ok(late) => {
                        flight.record_key(late.key);
                        return Ok(CanonicalResult {
                            status: ResultStatus::Cancelled,
                            requires_confirmation: false,
                            ..late.result
                        });
                    }
                    Err(_) => {
                        let late_watch = tokio::spawn({
                            let inner = inner.clone();
                            let order_id = request.order_id.clone();
                            async move {
                                inner.watch_after_cancel(listener, order_id, deadline).await
                            }
                        });
                        *inner.late_watch() = Some(late_watch.abort_handle());
                        return Ok(CanonicalResult::cancelled_by_caller());
                    }
                }
            }
        };
        drop(listener);

        flight.record_key(accepted.key);
        let mut result = accepted.result;
        if cancel_overridden {
            result.warning = Some(SettlementWarning::CancelOverridden);
        }

        if result.is_approved() {
            flight.enter(SessionPhase::ConfirmingPending);
            inner.confirm_approval(&request.order_id, &mut result).await;
        }
        Ok(result)
    }
}

/// Ownership of the single-flight slot for one session.
///
/// Dropping it returns the orchestrator to `Idle`, on every exit path.
struct Flight<'a> {
    inner: &'a Inner,
}

impl Flight<'_> {
    fn enter(&self, phase: SessionPhase) {
        if let Some(session) = self.inner.active().as_mut() {
            debug!(
                order_id = %session.state.request.order_id,
                from = %session.state.phase,
                to = %phase,
                "session phase"
            );
            session.state.phase = phase;
        }
    }

    fn record_key(&self, key: DedupKey) {
        if let Some(session) = self.inner.active().as_mut() {
            session.state.dedup_key = Some(key);
        }
    }

    fn settle(&self, status: ResultStatus, result: Option<CanonicalResult>) {
        self.enter(SessionPhase::Settled(status));
        if let Some(session) = self.inner.active().as_mut() {
            session.state.result = result;
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let finished = self.inner.active().take();
        if let Some(session) = finished {
            debug!(order_id = %session.state.request.order_id, "session released");
            *self.inner.last() = Some(session.state);
        }
    }
}
