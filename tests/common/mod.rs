#![allow(dead_code)]

use async_trait::async_trait;
use payterm::application::multiplexer::DeliveryChannels;
use payterm::application::orchestrator::PaymentOrchestrator;
use payterm::config::OrchestratorConfig;
use payterm::domain::delivery::{CallbackSlot, DeliveryChannel, Snapshot};
use payterm::domain::pending::Disposition;
use payterm::domain::ports::{SnapshotSink, TerminalBridge};
use payterm::domain::result::RawPayload;
use payterm::domain::transaction::{Amount, PaymentMethod, TransactionRequest};
use payterm::error::{PaymentError, Result};
use payterm::infrastructure::in_memory::InMemorySnapshotStore;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// How the mock terminal behaves. Tests tweak it before submitting.
#[derive(Debug, Clone)]
pub struct Plan {
    pub accept_start: bool,
    /// Fails the start call itself, as a disconnected bridge would.
    pub start_error: Option<String>,
    /// Payload sent back after each start, on every listed channel.
    pub answer: Option<RawPayload>,
    pub deliveries: Vec<(DeliveryChannel, Duration)>,
    pub pending: bool,
    pub pending_info: Option<RawPayload>,
    /// Makes both pending queries fail, as an unreachable terminal would.
    pub pending_query_error: bool,
    /// Handles `confirm` accepts. `None` accepts any handle.
    pub accepted_handles: Option<Vec<String>>,
    pub confirm_last_approved: bool,
    /// `None` reports the capability as unsupported.
    pub resolve_pending: Option<bool>,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            accept_start: true,
            start_error: None,
            answer: None,
            deliveries: vec![(DeliveryChannel::Callback, Duration::from_millis(200))],
            pending: false,
            pending_info: None,
            pending_query_error: false,
            accepted_handles: None,
            confirm_last_approved: false,
            resolve_pending: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Calls {
    pub starts: Vec<Instant>,
    pub confirms: Vec<(String, Disposition, Instant)>,
    pub confirm_last_approved: usize,
    pub resolve_pending: usize,
    pub cancels: usize,
}

/// A recording bridge that answers from a [`Plan`].
pub struct MockBridge {
    pub callback: Arc<CallbackSlot>,
    pub events: broadcast::Sender<RawPayload>,
    pub snapshots: InMemorySnapshotStore,
    plan: Mutex<Plan>,
    calls: Mutex<Calls>,
}

impl MockBridge {
    pub fn new(plan: Plan) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            callback: Arc::new(CallbackSlot::new()),
            events,
            snapshots: InMemorySnapshotStore::new(),
            plan: Mutex::new(plan),
            calls: Mutex::new(Calls::default()),
        })
    }

    pub fn plan(&self) -> MutexGuard<'_, Plan> {
        self.plan.lock().unwrap()
    }

    pub fn calls(&self) -> MutexGuard<'_, Calls> {
        self.calls.lock().unwrap()
    }

    pub fn channels(&self) -> DeliveryChannels {
        DeliveryChannels::default()
            .with_callback(self.callback.clone())
            .with_events(self.events.clone())
            .with_snapshots(Arc::new(self.snapshots.clone()))
    }

    fn release(&self) {
        let mut plan = self.plan();
        plan.pending = false;
        plan.pending_info = None;
    }
}

#[async_trait]
impl TerminalBridge for MockBridge {
    async fn start_transaction(&self, _request: &TransactionRequest) -> Result<bool> {
        self.calls().starts.push(Instant::now());
        let plan = self.plan().clone();
        if let Some(reason) = plan.start_error {
            return Err(PaymentError::Bridge(reason));
        }
        if !plan.accept_start {
            return Ok(false);
        }
        let Some(answer) = plan.answer else {
            return Ok(true);
        };
        for (channel, delay) in plan.deliveries {
            let payload = answer.clone();
            let callback = self.callback.clone();
            let events = self.events.clone();
            let snapshots = self.snapshots.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match channel {
                    DeliveryChannel::Callback => {
                        callback.invoke(payload);
                    }
                    DeliveryChannel::Event => {
                        let _ = events.send(payload);
                    }
                    DeliveryChannel::Snapshot => {
                        snapshots.write(Snapshot::now(payload)).await.unwrap();
                    }
                }
            });
        }
        Ok(true)
    }

    async fn cancel_transaction(&self) -> Result<bool> {
        self.calls().cancels += 1;
        Ok(false)
    }

    async fn has_pending_transaction(&self) -> Result<bool> {
        let plan = self.plan();
        if plan.pending_query_error {
            return Err(PaymentError::Bridge("terminal unreachable".to_string()));
        }
        Ok(plan.pending)
    }

    async fn get_pending_info(&self) -> Result<Option<RawPayload>> {
        let plan = self.plan();
        if plan.pending_query_error {
            return Err(PaymentError::Bridge("terminal unreachable".to_string()));
        }
        Ok(plan.pending_info.clone())
    }

    async fn confirm(&self, handle: &str, disposition: Disposition) -> Result<bool> {
        self.calls()
            .confirms
            .push((handle.to_string(), disposition, Instant::now()));
        let accepted = match &self.plan().accepted_handles {
            None => true,
            Some(handles) => handles.iter().any(|h| h == handle),
        };
        if accepted {
            self.release();
        }
        Ok(accepted)
    }

    async fn confirm_last_approved(&self) -> Result<bool> {
        self.calls().confirm_last_approved += 1;
        let accepted = self.plan().confirm_last_approved;
        if accepted {
            self.release();
        }
        Ok(accepted)
    }

    async fn resolve_pending(&self) -> Result<bool> {
        self.calls().resolve_pending += 1;
        let planned = self.plan().resolve_pending;
        match planned {
            Some(accepted) => {
                if accepted {
                    self.release();
                }
                Ok(accepted)
            }
            None => Err(PaymentError::Unsupported("resolve_pending")),
        }
    }
}

pub fn orchestrator(bridge: &Arc<MockBridge>, config: OrchestratorConfig) -> PaymentOrchestrator {
    PaymentOrchestrator::new(bridge.clone(), bridge.channels(), config)
}

pub fn request(order_id: &str) -> TransactionRequest {
    TransactionRequest::new(order_id, Amount::new(1000).unwrap(), PaymentMethod::Credit, 1)
        .unwrap()
}
