use std::sync::Arc;

use crate::{
    config::DrainConfig,
    pipeline::{BatchAccumulator, BatchSink, SinkForwarder},
    source::{CheckpointStore, DeliveredEvents, NoCheckpoints},
    types::{Event, StopReason},
};

use super::{DrainReport, LifecycleController};

/// Handles one delivered micro-batch per call: every event is processed in
/// order, the buffer is force-flushed once at the end, and there is no watchdog.
///
/// The handler is long-lived; each invocation gets a fresh accumulator.
pub struct TriggerHandler<TSink, TStore = NoCheckpoints> {
    sink: Option<Arc<TSink>>,
    config: DrainConfig,
    store: Arc<TStore>,
}

impl<TSink> TriggerHandler<TSink> {
    /// Forward each invocation's events to `sink`
    pub fn new(sink: TSink, config: DrainConfig) -> Self {
        Self {
            sink: Some(Arc::new(sink)),
            config,
            store: Arc::new(NoCheckpoints),
        }
    }

    /// Decode and count each invocation's events without sending them anywhere
    pub fn log_only(config: DrainConfig) -> Self {
        Self {
            sink: None,
            config,
            store: Arc::new(NoCheckpoints),
        }
    }
}

impl<TSink, TStore> TriggerHandler<TSink, TStore> {
    /// Record checkpoints for every invocation in `store`
    pub fn with_checkpoints<TNewStore>(self, store: TNewStore) -> TriggerHandler<TSink, TNewStore> {
        TriggerHandler {
            sink: self.sink,
            config: self.config,
            store: Arc::new(store),
        }
    }

    /// The settings every invocation uses
    pub fn config(&self) -> &DrainConfig {
        &self.config
    }
}

impl<TSink, TStore> TriggerHandler<TSink, TStore>
where
    TSink: BatchSink,
    TStore: CheckpointStore,
{
    /// Process one delivered micro-batch to completion
    pub async fn handle(&self, events: impl IntoIterator<Item = Event>) -> DrainReport {
        let events: Vec<Event> = events.into_iter().collect();
        if events.is_empty() {
            log::info!("no events to process");
            return DrainReport {
                summary: Default::default(),
                reason: StopReason::Exhausted,
                failure: None,
            };
        }
        log::info!("processing {} events", events.len());

        let accumulator = match &self.sink {
            Some(sink) => BatchAccumulator::new(SinkForwarder::new(sink.clone()), self.config.limits),
            None => BatchAccumulator::log_only(self.config.limits),
        };
        let source = DeliveredEvents::new_with_store(events, self.store.clone());
        let report = LifecycleController::bounded(source, accumulator, self.config.checkpoint_policy)
            .run()
            .await;

        let summary = &report.summary;
        if self.sink.is_some() && summary.sent == 0 && 0 < summary.processed {
            log::error!("no events were forwarded: {summary}");
        } else if 0 < summary.failed {
            log::warn!("{} events failed: {summary}", summary.failed);
        } else {
            log::info!("all events handled: {summary}");
        }
        report
    }
}
