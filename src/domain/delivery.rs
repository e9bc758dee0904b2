use super::result::RawPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// The ways a bridge may hand a result back. All channels are peers.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryChannel {
    Callback,
    Event,
    Snapshot,
}

impl fmt::Display for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Callback => "callback",
            Self::Event => "event",
            Self::Snapshot => "snapshot",
        };
        f.write_str(label)
    }
}

/// One raw payload together with the channel that carried it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: DeliveryChannel,
    pub payload: RawPayload,
}

/// A persisted result payload, as left behind by the bridge.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Snapshot {
    pub payload: RawPayload,
    pub written_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn now(payload: RawPayload) -> Self {
        Self {
            payload,
            written_at: Utc::now(),
        }
    }
}

/// The bridge's single global result slot.
///
/// A bridge adapter holds a reference and calls [`CallbackSlot::invoke`]; the
/// multiplexer installs its sink at the start of each session and clears it
/// on teardown. Invoking an empty slot drops the payload.
#[derive(Debug, Default)]
pub struct CallbackSlot {
    sink: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
}

impl CallbackSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn sink(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Delivery>>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs `sink`, replacing whatever was installed before.
    pub fn install(&self, sink: mpsc::UnboundedSender<Delivery>) {
        *self.sink() = Some(sink);
    }

    pub fn clear(&self) {
        *self.sink() = None;
    }

    /// Clears the slot only if `sink` is still the one installed, so a
    /// listener torn down late never unhooks its successor.
    pub fn release(&self, sink: &mpsc::UnboundedSender<Delivery>) {
        let mut slot = self.sink();
        if slot.as_ref().is_some_and(|installed| installed.same_channel(sink)) {
            *slot = None;
        }
    }

    pub fn is_installed(&self) -> bool {
        self.sink().is_some()
    }

    /// Hands `payload` to the installed listener. Returns false if nobody listens.
    pub fn invoke(&self, payload: RawPayload) -> bool {
        match self.sink().as_ref() {
            Some(sink) => sink
                .send(Delivery {
                    channel: DeliveryChannel::Callback,
                    payload,
                })
                .is_ok(),
            None => false,
        }
    }
}
