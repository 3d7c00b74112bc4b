use std::collections::BTreeMap;

use crate::{
    config::{CheckpointPolicy, DrainConfig},
    error::{DecodeError, DispatchError, DrainError},
    pipeline::{BatchAccumulator, BatchSink, SerializingAccumulator},
    source::EventSource,
    types::{DrainSummary, Event, LifecycleState, Name, Position, StopReason},
};

use super::{DrainHandle, InactivityWatchdog, PROGRESS_INTERVAL};

/// How a drain ended.
#[derive(Debug)]
pub struct DrainReport {
    /// Final counters
    pub summary: DrainSummary,
    /// Why intake stopped
    pub reason: StopReason,
    /// The first run-ending failure, if any
    pub failure: Option<DrainError>,
}

impl DrainReport {
    /// True when nothing failed: no lost dispatch, no source failure, no failed items
    pub fn is_clean(&self) -> bool {
        self.failure.is_none() && self.summary.failed == 0
    }

    /// The summary, or the failure that ended the run
    pub fn into_result(self) -> Result<DrainSummary, DrainError> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.summary),
        }
    }
}

/// Owns one drain from first event to final flush.
///
/// Events are taken one at a time, decoded, and handed to the accumulator.
/// Bad utf-8 is counted and checkpointed past. Blank bodies are skipped.
/// When intake stops for any reason the source is closed, the buffer is
/// flushed exactly once and the final summary is reported.
pub struct LifecycleController<TSource, TSink> {
    source: TSource,
    accumulator: SerializingAccumulator<TSink>,
    handle: DrainHandle,
    watchdog: Option<InactivityWatchdog>,
    policy: CheckpointPolicy,
    state: LifecycleState,
    counters: IntakeCounters,
    unflushed: BTreeMap<Name, Position>,
    prior_failure: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct IntakeCounters {
    processed: u64,
    skipped: u64,
    undecodable: u64,
}

impl<TSource, TSink> LifecycleController<TSource, TSink>
where
    TSource: EventSource,
    TSink: BatchSink,
{
    /// A drain that runs until closed, inactive for `config.inactivity_timeout`,
    /// or the source runs dry.
    pub fn continuous(
        source: TSource,
        accumulator: BatchAccumulator<TSink>,
        config: &DrainConfig,
    ) -> Self {
        let mut controller = Self::bounded(source, accumulator, config.checkpoint_policy);
        controller.watchdog = Some(InactivityWatchdog::new(
            config.inactivity_timeout,
            config.poll_interval,
        ));
        controller
    }

    /// A drain over a finite source, with no inactivity watchdog
    pub fn bounded(
        source: TSource,
        accumulator: BatchAccumulator<TSink>,
        policy: CheckpointPolicy,
    ) -> Self {
        Self {
            source,
            accumulator: SerializingAccumulator::new(accumulator),
            handle: DrainHandle::new(),
            watchdog: None,
            policy,
            state: LifecycleState::Running,
            counters: IntakeCounters::default(),
            unflushed: BTreeMap::new(),
            prior_failure: None,
        }
    }

    /// A handle for closing this drain from elsewhere
    pub fn handle(&self) -> DrainHandle {
        self.handle.clone()
    }

    /// Where the controller is in its lifecycle
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The shared accumulator, for callers that add or flush alongside the drain
    pub fn accumulator(&self) -> SerializingAccumulator<TSink> {
        self.accumulator.clone()
    }

    /// The source, after or between runs
    pub fn source(&self) -> &TSource {
        &self.source
    }

    /// Take events until something stops intake, then shut down in order.
    ///
    /// Running a stopped controller again reports its prior totals without
    /// touching the source or the sink. A run that failed stays failed.
    pub async fn run(&mut self) -> DrainReport {
        if self.state != LifecycleState::Running {
            log::warn!("drain already {:?}; not running again", self.state);
            let reason = self.handle.reason().unwrap_or(StopReason::Closed);
            return DrainReport {
                summary: self.summary().await,
                reason,
                failure: self
                    .prior_failure
                    .clone()
                    .map(|failure| DrainError::AlreadyFailed { reason, failure }),
            };
        }

        self.handle.activity().touch();
        let watchdog = self
            .watchdog
            .take()
            .map(|watchdog| watchdog.spawn(self.handle.clone()));

        let (reason, mut failure) = self.intake().await;
        self.advance_state();
        log::info!("stopping intake: {reason}");

        self.source.close().await;
        match self.accumulator.flush(true).await {
            Ok(_) => self.commit_unflushed().await,
            Err(error) => {
                if failure.is_none() {
                    failure = Some(error.into());
                }
            }
        }
        self.advance_state();

        if let Some(watchdog) = watchdog {
            if let Err(e) = watchdog.await {
                log::warn!("watchdog task failed: {e}");
            }
        }

        self.prior_failure = failure.as_ref().map(ToString::to_string);
        let summary = self.summary().await;
        log::info!("drain stopped ({reason}): {summary}");
        DrainReport {
            summary,
            reason,
            failure,
        }
    }

    async fn intake(&mut self) -> (StopReason, Option<DrainError>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.handle.closed() => None,
                next = self.source.next_event() => Some(next),
            };
            let Some(next) = next else {
                return (self.handle.reason().unwrap_or(StopReason::Closed), None);
            };
            match next {
                Ok(Some(event)) => {
                    if let Err(error) = self.take(event).await {
                        return (self.stop(StopReason::SinkUnavailable), Some(error.into()));
                    }
                }
                Ok(None) => {
                    log::info!("source has no more events");
                    return (self.stop(StopReason::Exhausted), None);
                }
                Err(error) => {
                    log::error!("source failed: {error}");
                    return (self.stop(StopReason::SourceFailed), Some(error.into()));
                }
            }
        }
    }

    async fn take(&mut self, event: Event) -> Result<(), DispatchError> {
        self.handle.activity().touch();
        let Event { body, position, .. } = event;

        let blank = std::str::from_utf8(&body).map(|text| text.trim().is_empty());
        let flushed = match blank {
            Err(source) => {
                let error = DecodeError {
                    position: position.clone(),
                    source,
                };
                log::warn!("{error}");
                self.counters.undecodable += 1;
                None
            }
            Ok(true) => {
                log::warn!("skipping empty event at {position}");
                self.counters.skipped += 1;
                None
            }
            Ok(false) => {
                log::debug!("event at {position}: {} bytes", body.len());
                let flushed = self.accumulator.add(body).await;
                self.counters.processed += 1;
                if self.counters.processed % PROGRESS_INTERVAL == 0 {
                    log::info!("processed {} events", self.counters.processed);
                }
                Some(flushed)
            }
        };

        self.checkpoint(position).await;
        match flushed {
            Some(Ok(Some(_))) => {
                self.commit_unflushed().await;
                Ok(())
            }
            Some(Err(error)) => {
                // lost events must be redelivered, so nothing past them is committed
                self.unflushed.clear();
                Err(error)
            }
            _ => Ok(()),
        }
    }

    /// Raise `reason` unless something else already stopped the drain, and
    /// return whichever reason won.
    fn stop(&self, reason: StopReason) -> StopReason {
        self.handle.stop(reason);
        self.handle.reason().unwrap_or(reason)
    }

    async fn checkpoint(&mut self, position: Position) {
        match self.policy {
            CheckpointPolicy::OnHandoff => self.store_checkpoint(&position).await,
            CheckpointPolicy::AfterFlush => {
                self.unflushed.insert(position.partition.clone(), position);
            }
        }
    }

    async fn commit_unflushed(&mut self) {
        for (_, position) in std::mem::take(&mut self.unflushed) {
            self.store_checkpoint(&position).await;
        }
    }

    async fn store_checkpoint(&mut self, position: &Position) {
        if let Err(e) = self.source.checkpoint(position).await {
            log::warn!("could not checkpoint {position}: {e}");
        }
    }

    fn advance_state(&mut self) {
        let next = self.state.advance();
        log::debug!("{:?} -> {next:?}", self.state);
        self.state = next;
    }

    async fn summary(&self) -> DrainSummary {
        let totals = self.accumulator.totals().await;
        DrainSummary {
            processed: self.counters.processed,
            skipped: self.counters.skipped,
            sent: totals.sent,
            failed: totals.failed + self.counters.undecodable,
            batches: totals.batches,
        }
    }
}
