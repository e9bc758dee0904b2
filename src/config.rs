use crate::domain::pending::Disposition;
use serde::Deserialize;
use std::ops::RangeInclusive;
use std::time::Duration;

/// How raw numeric response codes map onto result statuses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NormalizerRules {
    pub decline_codes: RangeInclusive<i64>,
    pub cancel_sentinel: i64,
}

impl Default for NormalizerRules {
    fn default() -> Self {
        Self {
            decline_codes: 1..=99,
            cancel_sentinel: -1,
        }
    }
}

/// Tunables for the payment orchestrator.
///
/// The cooldown is an empirical firmware requirement: starting a new
/// transaction sooner after a recovery confirm produces a spurious decline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub result_timeout: Duration,
    pub cooldown: Duration,
    pub dedup_window: Duration,
    pub snapshot_poll_interval: Duration,
    pub cancel_grace: Duration,
    pub preflight_disposition: Disposition,
    pub rules: NormalizerRules,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            result_timeout: Duration::from_secs(180),
            cooldown: Duration::from_secs(5),
            dedup_window: Duration::from_secs(3),
            snapshot_poll_interval: Duration::from_millis(250),
            cancel_grace: Duration::from_secs(3),
            preflight_disposition: Disposition::Confirm,
            rules: NormalizerRules::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `PAYTERM_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |key: &str| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
        };
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        let mut cfg = Self::default();
        if let Some(timeout) = secs("PAYTERM_RESULT_TIMEOUT_SECS") {
            cfg.result_timeout = timeout;
        }
        if let Some(cooldown) = millis("PAYTERM_COOLDOWN_MS") {
            cfg.cooldown = cooldown;
        }
        if let Some(window) = millis("PAYTERM_DEDUP_WINDOW_MS") {
            cfg.dedup_window = window;
        }
        if let Some(interval) = millis("PAYTERM_SNAPSHOT_POLL_MS") {
            cfg.snapshot_poll_interval = interval;
        }
        if let Some(grace) = millis("PAYTERM_CANCEL_GRACE_MS") {
            cfg.cancel_grace = grace;
        }
        if let Some(disposition) = lookup("PAYTERM_PREFLIGHT_DISPOSITION") {
            match disposition.trim().to_ascii_lowercase().as_str() {
                "undo" => cfg.preflight_disposition = Disposition::Undo,
                "confirm" => cfg.preflight_disposition = Disposition::Confirm,
                _ => {}
            }
        }
        cfg
    }
}
