use bytes::Bytes;

use crate::{config::BatchLimits, error::DispatchError, types::FlushSummary};

use super::{BatchSink, SinkForwarder, SizeEstimator};

/// Buffers payloads in arrival order and flushes them to a forwarder once the
/// count or size threshold is reached, or when forced.
///
/// Without a forwarder the accumulator runs in log-only mode: flushes are
/// announced and discarded.
#[derive(Debug)]
pub struct BatchAccumulator<TSink> {
    forwarder: Option<SinkForwarder<TSink>>,
    estimator: SizeEstimator,
    limits: BatchLimits,
    buffer: Vec<Bytes>,
    buffered_bytes: usize,
    totals: FlushSummary,
}

impl<TSink> BatchAccumulator<TSink> {
    /// Accumulate for `forwarder` under `limits`
    pub fn new(forwarder: SinkForwarder<TSink>, limits: BatchLimits) -> Self {
        let estimator = *forwarder.estimator();
        Self {
            forwarder: Some(forwarder),
            estimator,
            limits,
            buffer: Vec::with_capacity(limits.max_count),
            buffered_bytes: 0,
            totals: FlushSummary::default(),
        }
    }

    /// Accumulate and discard; nothing is dispatched
    pub fn log_only(limits: BatchLimits) -> Self {
        Self {
            forwarder: None,
            estimator: SizeEstimator::default(),
            limits,
            buffer: Vec::with_capacity(limits.max_count),
            buffered_bytes: 0,
            totals: FlushSummary::default(),
        }
    }

    /// Running totals across every flush so far
    pub fn totals(&self) -> FlushSummary {
        self.totals
    }

    /// Payloads waiting for a flush
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Estimated wire size of the pending payloads
    pub fn pending_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// The configured limits
    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    /// True when flushes are discarded rather than dispatched
    pub fn is_log_only(&self) -> bool {
        self.forwarder.is_none()
    }

    /// The forwarder, when there is one
    pub fn forwarder(&self) -> Option<&SinkForwarder<TSink>> {
        self.forwarder.as_ref()
    }

    fn over_threshold(&self) -> bool {
        self.limits.max_count <= self.buffer.len() || self.limits.max_bytes <= self.buffered_bytes
    }
}

impl<TSink> BatchAccumulator<TSink>
where
    TSink: BatchSink,
{
    /// Buffer one payload, flushing if that crossed a threshold.
    /// Returns the flush outcome when a flush happened.
    pub async fn add(&mut self, payload: Bytes) -> Result<Option<FlushSummary>, DispatchError> {
        self.buffered_bytes += self.estimator.item_cost(&payload);
        self.buffer.push(payload);
        self.flush(false).await
    }

    /// Flush the buffer. Unforced flushes only happen at or over a threshold.
    ///
    /// The buffer is empty afterward whether or not the sink accepted
    /// everything; rejected items are counted, never retried. When a sink call
    /// fails outright, whatever had not been delivered is counted as failed
    /// and the error is returned.
    pub async fn flush(&mut self, force: bool) -> Result<Option<FlushSummary>, DispatchError> {
        if self.buffer.is_empty() || !(force || self.over_threshold()) {
            return Ok(None);
        }
        let payloads = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;

        let Some(forwarder) = self.forwarder.as_ref() else {
            log::info!("would send {} messages (logging only)", payloads.len());
            return Ok(Some(FlushSummary::default()));
        };

        match forwarder.send_bounded(&payloads, self.limits).await {
            Ok(summary) => {
                self.totals += summary;
                log::info!("flushed {} messages: {summary}", payloads.len());
                Ok(Some(summary))
            }
            Err(error) => {
                self.totals += error.partial;
                self.totals.failed += error.undelivered;
                log::error!("flush of {} messages failed: {error}", payloads.len());
                Err(error)
            }
        }
    }
}
