use super::fields::{CONFIRMATION_ID_FIELDS, ORDER_ID_FIELDS, text};
use crate::domain::pending::{DetectionPath, Disposition, PendingLock, ResolutionStrategy};
use crate::domain::ports::BridgeRef;
use crate::domain::result::RawPayload;
use crate::error::PaymentError;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Where the resolver is being called from.
#[derive(Debug, Clone)]
pub enum ResolveContext {
    /// Before a new transaction is started.
    PreFlight,
    /// Right after the current session received an approval.
    PostApproval {
        order_id: String,
        confirmation_id: Option<String>,
        requires_confirmation: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    None,
    Resolved(PendingLock),
    Failed(PendingLock),
}

/// Detects and clears unconfirmed terminal transactions.
///
/// A terminal that approved a transaction nobody confirmed rejects all new
/// work. Detection asks the bridge directly, then inspects the pending info
/// payload. Clearing walks [`ResolutionStrategy::ORDER`] until the terminal
/// accepts one, since firmwares differ in which handle they take. After a
/// successful resolution no new transaction may start until the cooldown has
/// elapsed; see [`PendingResolver::await_cooldown`].
pub struct PendingResolver {
    bridge: BridgeRef,
    cooldown: Duration,
    preflight_disposition: Disposition,
    last_resolution: Mutex<Option<Instant>>,
    last_order_id: Mutex<Option<String>>,
}

impl PendingResolver {
    pub fn new(bridge: BridgeRef, cooldown: Duration, preflight_disposition: Disposition) -> Self {
        Self {
            bridge,
            cooldown,
            preflight_disposition,
            last_resolution: Mutex::new(None),
            last_order_id: Mutex::new(None),
        }
    }

    /// Remembers the order about to be started, as a fallback handle for a
    /// later pre-flight check.
    pub fn note_started(&self, order_id: &str) {
        *self
            .last_order_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(order_id.to_string());
    }

    pub async fn resolve_if_pending(&self, ctx: &ResolveContext) -> ResolveOutcome {
        let (lock, disposition) = match ctx {
            ResolveContext::PreFlight => {
                let Some(mut lock) = self.detect().await else {
                    debug!("no pending transaction on terminal");
                    return ResolveOutcome::None;
                };
                if lock.order_id.is_none() {
                    lock.order_id = self
                        .last_order_id
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                }
                (lock, self.preflight_disposition)
            }
            ResolveContext::PostApproval {
                order_id,
                confirmation_id,
                requires_confirmation,
            } => {
                let mut lock = if *requires_confirmation {
                    PendingLock::discovered(DetectionPath::ApprovedResult)
                } else {
                    match self.detect().await {
                        Some(lock) => lock,
                        None => {
                            debug!(order_id = %order_id, "approval needs no confirmation");
                            return ResolveOutcome::None;
                        }
                    }
                };
                if confirmation_id.is_some() {
                    lock.confirmation_id = confirmation_id.clone();
                }
                lock.order_id = Some(order_id.clone());
                (lock, Disposition::Confirm)
            }
        };

        if lock.discovered_via == DetectionPath::Unverified {
            error!("terminal state unknown, refusing to treat it as clear");
            return ResolveOutcome::Failed(lock);
        }

        info!(
            via = ?lock.discovered_via,
            confirmation_id = ?lock.confirmation_id,
            order_id = ?lock.order_id,
            ?disposition,
            "pending transaction found"
        );
        self.clear(lock, disposition).await
    }

    /// Sleeps until the post-resolution cooldown has elapsed.
    pub async fn await_cooldown(&self) {
        let Some(ready_at) = self.ready_at() else {
            return;
        };
        let now = Instant::now();
        if ready_at > now {
            info!(
                remaining_ms = (ready_at - now).as_millis() as u64,
                "waiting for terminal cooldown"
            );
            tokio::time::sleep_until(ready_at).await;
        }
    }

    pub fn is_cooling_down(&self) -> bool {
        self.ready_at().is_some_and(|ready_at| ready_at > Instant::now())
    }

    fn ready_at(&self) -> Option<Instant> {
        self.last_resolution
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|resolved| resolved + self.cooldown)
    }

    async fn detect(&self) -> Option<PendingLock> {
        let (mut lock, pending_failed) = match self.bridge.has_pending_transaction().await {
            Ok(true) => (Some(PendingLock::discovered(DetectionPath::HasPendingQuery)), false),
            Ok(false) => (None, false),
            Err(e) => {
                warn!(error = %e, "pending query failed");
                (None, true)
            }
        };

        let info = match self.bridge.get_pending_info().await {
            Ok(info) => info.filter(has_content),
            Err(e) => {
                warn!(error = %e, "pending info query failed");
                if pending_failed {
                    return Some(PendingLock::discovered(DetectionPath::Unverified));
                }
                None
            }
        };

        if let Some(payload) = info {
            let lock = lock.get_or_insert_with(|| {
                PendingLock::discovered(DetectionPath::PendingInfoQuery)
            });
            if let Some(fields) = payload.as_object() {
                lock.confirmation_id = text(fields, CONFIRMATION_ID_FIELDS);
                lock.order_id = text(fields, ORDER_ID_FIELDS);
            }
        }
        lock
    }

    async fn clear(&self, mut lock: PendingLock, disposition: Disposition) -> ResolveOutcome {
        for strategy in ResolutionStrategy::ORDER {
            let attempt = match strategy {
                ResolutionStrategy::ByConfirmationId => match lock.confirmation_id.as_deref() {
                    Some(id) => self.bridge.confirm(id, disposition).await,
                    None => {
                        debug!(%strategy, "skipped, no confirmation id");
                        continue;
                    }
                },
                ResolutionStrategy::ByOrderId => match lock.order_id.as_deref() {
                    Some(id) => self.bridge.confirm(id, disposition).await,
                    None => {
                        debug!(%strategy, "skipped, no order id");
                        continue;
                    }
                },
                ResolutionStrategy::ConfirmLastApproved => {
                    if disposition == Disposition::Undo {
                        debug!(%strategy, "skipped, cannot undo");
                        continue;
                    }
                    self.bridge.confirm_last_approved().await
                }
                ResolutionStrategy::EmptyId => self.bridge.confirm("", disposition).await,
                ResolutionStrategy::ResolvePending => self.bridge.resolve_pending().await,
            };

            match attempt {
                Ok(true) => {
                    lock.mark_resolved(strategy);
                    *self
                        .last_resolution
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
                    info!(
                        %strategy,
                        ?disposition,
                        cooldown_ms = self.cooldown.as_millis() as u64,
                        "pending transaction resolved"
                    );
                    return ResolveOutcome::Resolved(lock);
                }
                Ok(false) => warn!(%strategy, "terminal refused resolution"),
                Err(PaymentError::Unsupported(capability)) => {
                    debug!(%strategy, capability, "not supported by terminal")
                }
                Err(e) => warn!(%strategy, error = %e, "resolution attempt failed"),
            }
        }

        error!(
            confirmation_id = ?lock.confirmation_id,
            order_id = ?lock.order_id,
            "every resolution strategy failed, terminal stays locked"
        );
        ResolveOutcome::Failed(lock)
    }
}

fn has_content(payload: &RawPayload) -> bool {
    match payload {
        RawPayload::Null => false,
        RawPayload::String(s) => !s.trim().is_empty(),
        RawPayload::Array(items) => !items.is_empty(),
        RawPayload::Object(fields) => !fields.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::TerminalBridge;
    use crate::domain::transaction::TransactionRequest;
    use crate::error::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    /// Bridge that reports a pending lock and accepts only `accepted_handle`.
    struct LockedTerminal {
        pending_info: Option<RawPayload>,
        accepted_handle: Option<&'static str>,
        confirms: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TerminalBridge for LockedTerminal {
        async fn start_transaction(&self, _request: &TransactionRequest) -> Result<bool> {
            Ok(true)
        }
        async fn cancel_transaction(&self) -> Result<bool> {
            Ok(true)
        }
        async fn has_pending_transaction(&self) -> Result<bool> {
            Ok(true)
        }
        async fn get_pending_info(&self) -> Result<Option<RawPayload>> {
            Ok(self.pending_info.clone())
        }
        async fn confirm(&self, handle: &str, _disposition: Disposition) -> Result<bool> {
            self.confirms.lock().unwrap().push(handle.to_string());
            Ok(self.accepted_handle == Some(handle))
        }
    }

    fn resolver(bridge: LockedTerminal) -> (Arc<LockedTerminal>, PendingResolver) {
        let bridge = Arc::new(bridge);
        let resolver =
            PendingResolver::new(bridge.clone(), Duration::from_secs(5), Disposition::Confirm);
        (bridge, resolver)
    }

    #[tokio::test(start_paused = true)]
    async fn test_preflight_uses_confirmation_id_from_pending_info() {
        let (bridge, resolver) = resolver(LockedTerminal {
            pending_info: Some(json!({"confirmationId": "C-1"})),
            accepted_handle: Some("C-1"),
            confirms: Mutex::new(Vec::new()),
        });

        let outcome = resolver.resolve_if_pending(&ResolveContext::PreFlight).await;
        let ResolveOutcome::Resolved(lock) = outcome else {
            panic!("expected resolution, got {outcome:?}");
        };
        assert_eq!(lock.discovered_via, DetectionPath::HasPendingQuery);
        assert_eq!(lock.resolved_by, Some(ResolutionStrategy::ByConfirmationId));
        assert_eq!(*bridge.confirms.lock().unwrap(), vec!["C-1".to_string()]);
        assert!(resolver.is_cooling_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preflight_falls_back_to_last_order_id() {
        let (bridge, resolver) = resolver(LockedTerminal {
            pending_info: None,
            accepted_handle: Some("A0"),
            confirms: Mutex::new(Vec::new()),
        });
        resolver.note_started("A0");

        let outcome = resolver.resolve_if_pending(&ResolveContext::PreFlight).await;
        assert!(matches!(outcome, ResolveOutcome::Resolved(ref lock)
            if lock.resolved_by == Some(ResolutionStrategy::ByOrderId)));
        assert_eq!(*bridge.confirms.lock().unwrap(), vec!["A0".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_strategies_fail() {
        let (bridge, resolver) = resolver(LockedTerminal {
            pending_info: Some(json!({"confirmationId": "C-1", "orderId": "A0"})),
            accepted_handle: None,
            confirms: Mutex::new(Vec::new()),
        });

        let outcome = resolver.resolve_if_pending(&ResolveContext::PreFlight).await;
        assert!(matches!(outcome, ResolveOutcome::Failed(_)));
        // confirm_last_approved and resolve_pending are unsupported here.
        assert_eq!(
            *bridge.confirms.lock().unwrap(),
            vec!["C-1".to_string(), "A0".to_string(), String::new()]
        );
        assert!(!resolver.is_cooling_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pending_info_is_not_pending() {
        struct Clean;

        #[async_trait]
        impl TerminalBridge for Clean {
            async fn start_transaction(&self, _request: &TransactionRequest) -> Result<bool> {
                Ok(true)
            }
            async fn cancel_transaction(&self) -> Result<bool> {
                Ok(true)
            }
            async fn has_pending_transaction(&self) -> Result<bool> {
                Ok(false)
            }
            async fn get_pending_info(&self) -> Result<Option<RawPayload>> {
                Ok(Some(json!({})))
            }
            async fn confirm(&self, _handle: &str, _disposition: Disposition) -> Result<bool> {
                panic!("nothing to confirm")
            }
        }

        let resolver = PendingResolver::new(Arc::new(Clean), Duration::from_secs(5), Disposition::Confirm);
        assert_eq!(
            resolver.resolve_if_pending(&ResolveContext::PreFlight).await,
            ResolveOutcome::None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_queries_are_not_treated_as_clear() {
        struct Offline;

        #[async_trait]
        impl TerminalBridge for Offline {
            async fn start_transaction(&self, _request: &TransactionRequest) -> Result<bool> {
                Ok(true)
            }
            async fn cancel_transaction(&self) -> Result<bool> {
                Ok(false)
            }
            async fn has_pending_transaction(&self) -> Result<bool> {
                Err(PaymentError::Bridge("bridge offline".into()))
            }
            async fn get_pending_info(&self) -> Result<Option<RawPayload>> {
                Err(PaymentError::Bridge("bridge offline".into()))
            }
            async fn confirm(&self, _handle: &str, _disposition: Disposition) -> Result<bool> {
                panic!("no resolution is attempted on an unverified terminal")
            }
        }

        let resolver =
            PendingResolver::new(Arc::new(Offline), Duration::from_secs(5), Disposition::Confirm);
        let outcome = resolver.resolve_if_pending(&ResolveContext::PreFlight).await;
        let ResolveOutcome::Failed(lock) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(lock.discovered_via, DetectionPath::Unverified);
        assert!(!resolver.is_cooling_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_elapses() {
        let (_bridge, resolver) = resolver(LockedTerminal {
            pending_info: None,
            accepted_handle: Some("A1"),
            confirms: Mutex::new(Vec::new()),
        });
        let ctx = ResolveContext::PostApproval {
            order_id: "A1".into(),
            confirmation_id: None,
            requires_confirmation: true,
        };
        assert!(matches!(
            resolver.resolve_if_pending(&ctx).await,
            ResolveOutcome::Resolved(_)
        ));

        let before = Instant::now();
        resolver.await_cooldown().await;
        assert!(before.elapsed() >= Duration::from_secs(5));
        assert!(!resolver.is_cooling_down());
    }
}
