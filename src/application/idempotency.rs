use crate::domain::result::{CanonicalResult, DedupKey};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Suppresses repeated deliveries of the same logical result.
///
/// The same terminal answer may reach us through the callback, an event and
/// the polled snapshot. Keys are remembered for `window`; a repeat inside the
/// window is dropped. Sessions filter through [`IdempotencyGuard::session`],
/// which keeps fallback keys out of the shared window.
#[derive(Debug)]
pub struct IdempotencyGuard {
    window: Duration,
    seen: Mutex<HashMap<DedupKey, Instant>>,
}

impl IdempotencyGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Key for `result`: the `(nsu, authorization_code)` pair when both are
    /// known, otherwise a coarse `(time bucket, status, amount)` triple.
    pub fn key_for(&self, result: &CanonicalResult) -> DedupKey {
        match (&result.nsu, &result.authorization_code) {
            (Some(nsu), Some(auth)) => DedupKey::Terminal {
                nsu: nsu.clone(),
                authorization_code: auth.clone(),
            },
            _ => {
                let bucket_ms = self.window.as_millis().max(1) as i64;
                DedupKey::Fallback {
                    bucket: result.received_at.timestamp_millis().div_euclid(bucket_ms),
                    status: result.status,
                    amount_minor_units: result.amount_minor_units,
                }
            }
        }
    }

    /// Records `result` and returns its key, or `None` if it was already seen
    /// within the window.
    pub fn admit(&self, result: &CanonicalResult) -> Option<DedupKey> {
        self.remember(self.key_for(result), result)
    }

    /// A filter for one session, sharing this guard's window.
    pub fn session(self: &Arc<Self>) -> SessionFilter {
        SessionFilter {
            guard: self.clone(),
            seen: HashSet::new(),
        }
    }

    fn remember(&self, key: DedupKey, result: &CanonicalResult) -> Option<DedupKey> {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.retain(|_, at| now.duration_since(*at) < self.window);

        if seen.contains_key(&key) {
            info!(?key, status = %result.status, "duplicate result suppressed");
            return None;
        }
        debug!(?key, status = %result.status, "result admitted");
        seen.insert(key.clone(), now);
        Some(key)
    }

    pub fn should_process(&self, result: &CanonicalResult) -> bool {
        self.admit(result).is_some()
    }
}

/// Duplicate filter scoped to one session.
///
/// Terminal keys go through the shared window: an NSU and authorization code
/// identify one physical transaction, whichever session sees it. Fallback
/// keys only carry a time bucket, a status and an amount, which back-to-back
/// attempts for the same amount share, so they are compared within the
/// session alone.
#[derive(Debug)]
pub struct SessionFilter {
    guard: Arc<IdempotencyGuard>,
    seen: HashSet<DedupKey>,
}

impl SessionFilter {
    pub fn admit(&mut self, result: &CanonicalResult) -> Option<DedupKey> {
        let key = self.guard.key_for(result);
        match key {
            DedupKey::Terminal { .. } => self.guard.remember(key, result),
            DedupKey::Fallback { .. } => {
                if !self.seen.insert(key.clone()) {
                    info!(?key, status = %result.status, "duplicate result suppressed");
                    return None;
                }
                debug!(?key, status = %result.status, "result admitted");
                Some(key)
            }
        }
    }
}
