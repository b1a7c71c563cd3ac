//! Typed event bus.
//!
//! Stage requests travel on one bounded `mpsc` channel per stage, so a slow
//! stage applies backpressure only to its producers. Outcome events are
//! broadcast to whoever subscribed; nobody listening is not an error.

use std::collections::HashMap;
use std::sync::Arc;

use intake_core::{PipelineEvent, PipelineStage, StageRequest};
use tokio::sync::{broadcast, mpsc, Mutex};

const OUTCOME_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("{0} queue is closed")]
    Closed(PipelineStage),
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    senders: HashMap<PipelineStage, mpsc::Sender<StageRequest>>,
    /// Held until a worker pool takes them, so requests published before the
    /// pool starts are buffered rather than lost.
    receivers: Mutex<HashMap<PipelineStage, mpsc::Receiver<StageRequest>>>,
    outcomes: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for stage in PipelineStage::ALL {
            let (tx, rx) = mpsc::channel(capacity);
            senders.insert(stage, tx);
            receivers.insert(stage, rx);
        }
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(BusInner {
                senders,
                receivers: Mutex::new(receivers),
                outcomes,
                capacity,
            }),
        }
    }

    /// Route `event` to its stage queue, or fan it out to observers.
    ///
    /// Waits for room when the stage queue is full.
    pub async fn publish(&self, event: PipelineEvent) -> Result<(), BusError> {
        let kind = event.kind();
        match event.into_stage_request() {
            Ok((stage, request)) => {
                let qid = request.qid;
                let sender = self
                    .inner
                    .senders
                    .get(&stage)
                    .ok_or(BusError::Closed(stage))?;
                sender
                    .send(request)
                    .await
                    .map_err(|_| BusError::Closed(stage))?;
                tracing::debug!(qid = %qid, stage = %stage, event = kind, "Stage request queued");
            }
            Err(outcome) => {
                tracing::debug!(qid = %outcome.qid(), event = kind, "Outcome event published");
                let _ = self.inner.outcomes.send(outcome);
            }
        }
        Ok(())
    }

    /// Hand the receiving end of `stage`'s queue to a consumer. Only the first
    /// caller gets it.
    pub async fn take_receiver(&self, stage: PipelineStage) -> Option<mpsc::Receiver<StageRequest>> {
        self.inner.receivers.lock().await.remove(&stage)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.outcomes.subscribe()
    }

    pub fn queue_depth(&self, stage: PipelineStage) -> usize {
        self.inner
            .senders
            .get(&stage)
            .map(|tx| self.inner.capacity.saturating_sub(tx.capacity()))
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Every stage queue still has a live receiver.
    pub fn is_open(&self) -> bool {
        self.inner.senders.values().all(|tx| !tx.is_closed())
    }
}
