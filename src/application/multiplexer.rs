use super::fields::ORDER_ID_FIELDS;
use super::idempotency::{IdempotencyGuard, SessionFilter};
use super::normalizer::ResultNormalizer;
use crate::domain::delivery::{CallbackSlot, Delivery, DeliveryChannel, Snapshot};
use crate::domain::ports::SnapshotSourceRef;
use crate::domain::result::{CanonicalResult, DedupKey, RawPayload};
use crate::domain::transaction::TransactionRequest;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// The channels a bridge may use to report results. Any subset may be set.
#[derive(Clone, Default)]
pub struct DeliveryChannels {
    pub callback: Option<Arc<CallbackSlot>>,
    pub events: Option<broadcast::Sender<RawPayload>>,
    pub snapshots: Option<SnapshotSourceRef>,
}

impl DeliveryChannels {
    pub fn with_callback(mut self, slot: Arc<CallbackSlot>) -> Self {
        self.callback = Some(slot);
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<RawPayload>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_snapshots(mut self, source: SnapshotSourceRef) -> Self {
        self.snapshots = Some(source);
        self
    }
}

/// A result that made it through normalization and deduplication.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub result: CanonicalResult,
    pub key: DedupKey,
    pub channel: DeliveryChannel,
}

/// Fans in every delivery channel into a single stream of accepted results.
pub struct ResultMultiplexer {
    channels: DeliveryChannels,
    normalizer: ResultNormalizer,
    guard: Arc<IdempotencyGuard>,
    poll_interval: Duration,
}

impl ResultMultiplexer {
    pub fn new(
        channels: DeliveryChannels,
        normalizer: ResultNormalizer,
        guard: Arc<IdempotencyGuard>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            channels,
            normalizer,
            guard,
            poll_interval,
        }
    }

    /// Registers listeners on every channel for `request`.
    ///
    /// Registration is complete when this returns, so it must be called
    /// before the bridge is asked to start: a fast terminal may answer before
    /// `start_transaction` itself returns. Snapshots written before `since`
    /// belong to earlier attempts and are ignored.
    pub fn arm(&self, request: &TransactionRequest, since: DateTime<Utc>) -> ArmedListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        if let Some(slot) = &self.channels.callback {
            slot.install(tx.clone());
        }

        if let Some(events) = &self.channels.events {
            let receiver = events.subscribe();
            tasks.spawn(forward_events(receiver, tx.clone()));
        }

        if let Some(source) = &self.channels.snapshots {
            tasks.spawn(poll_snapshots(
                source.clone(),
                since,
                self.poll_interval,
                tx.clone(),
            ));
        }

        debug!(
            order_id = %request.order_id,
            callback = self.channels.callback.is_some(),
            events = self.channels.events.is_some(),
            snapshots = self.channels.snapshots.is_some(),
            "result listeners armed"
        );

        ArmedListener {
            order_id: request.order_id.clone(),
            amount_minor_units: request.amount.minor_units(),
            rx,
            sink: tx,
            tasks,
            callback: self.channels.callback.clone(),
            normalizer: self.normalizer.clone(),
            filter: self.guard.session(),
        }
    }
}

/// Listeners registered for one session. Dropping it tears all of them down.
pub struct ArmedListener {
    order_id: String,
    amount_minor_units: u64,
    rx: mpsc::UnboundedReceiver<Delivery>,
    // Also keeps `rx` open when no channel is configured, so waiting is
    // bounded only by the session timeout.
    sink: mpsc::UnboundedSender<Delivery>,
    tasks: JoinSet<()>,
    callback: Option<Arc<CallbackSlot>>,
    normalizer: ResultNormalizer,
    filter: SessionFilter,
}

impl ArmedListener {
    /// Waits for the first delivery that normalizes to a result not seen before.
    pub async fn next_result(&mut self) -> Accepted {
        loop {
            let Some(delivery) = self.rx.recv().await else {
                return std::future::pending().await;
            };

            if let Some(other) = foreign_order(&delivery.payload, &self.order_id) {
                warn!(
                    order_id = %self.order_id,
                    delivered_for = %other,
                    channel = %delivery.channel,
                    "ignoring result for another order"
                );
                continue;
            }

            let mut result = self.normalizer.normalize(&delivery.payload);
            if result.amount_minor_units.is_none() {
                result.amount_minor_units = Some(self.amount_minor_units);
            }
            debug!(
                order_id = %self.order_id,
                channel = %delivery.channel,
                status = %result.status,
                "delivery received"
            );

            if let Some(key) = self.filter.admit(&result) {
                info!(
                    order_id = %self.order_id,
                    channel = %delivery.channel,
                    status = %result.status,
                    "result accepted"
                );
                return Accepted {
                    result,
                    key,
                    channel: delivery.channel,
                };
            }
        }
    }
}

impl Drop for ArmedListener {
    fn drop(&mut self) {
        if let Some(slot) = &self.callback {
            slot.release(&self.sink);
        }
        self.tasks.abort_all();
    }
}

fn foreign_order(payload: &RawPayload, order_id: &str) -> Option<String> {
    let fields = payload.as_object()?;
    ORDER_ID_FIELDS.iter().find_map(|name| {
        let reported = fields.get(*name)?.as_str()?.trim();
        (!reported.is_empty() && reported != order_id).then(|| reported.to_string())
    })
}

async fn forward_events(
    mut receiver: broadcast::Receiver<RawPayload>,
    tx: mpsc::UnboundedSender<Delivery>,
) {
    loop {
        match receiver.recv().await {
            Ok(payload) => {
                let delivery = Delivery {
                    channel: DeliveryChannel::Event,
                    payload,
                };
                if tx.send(delivery).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event listener lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn poll_snapshots(
    source: SnapshotSourceRef,
    since: DateTime<Utc>,
    every: Duration,
    tx: mpsc::UnboundedSender<Delivery>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen: Option<DateTime<Utc>> = None;

    loop {
        ticker.tick().await;
        let snapshot = match source.latest().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "snapshot poll failed");
                continue;
            }
        };
        if !is_fresh(&snapshot, since, last_seen) {
            continue;
        }
        last_seen = Some(snapshot.written_at);
        let delivery = Delivery {
            channel: DeliveryChannel::Snapshot,
            payload: snapshot.payload,
        };
        if tx.send(delivery).is_err() {
            break;
        }
    }
}

fn is_fresh(snapshot: &Snapshot, since: DateTime<Utc>, last_seen: Option<DateTime<Utc>>) -> bool {
    snapshot.written_at >= since && last_seen.is_none_or(|seen| snapshot.written_at > seen)
}
