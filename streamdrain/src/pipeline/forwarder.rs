use bytes::Bytes;

use crate::{
    config::BatchLimits,
    error::{DispatchError, SinkError},
    types::{DispatchResult, FlushSummary, ItemResult},
};

use super::{BatchSink, SizeEstimator};

/// Splits a run of payloads into batches that fit the limits and hands each to the sink.
///
/// Packing is greedy and left to right, so order is preserved across batch
/// boundaries and no payload is dropped, duplicated or split.
#[derive(Debug)]
pub struct SinkForwarder<TSink> {
    sink: TSink,
    estimator: SizeEstimator,
}

impl<TSink> SinkForwarder<TSink> {
    /// Forward to `sink`, estimating sizes with the default envelope overhead
    pub fn new(sink: TSink) -> Self {
        Self::new_with_estimator(sink, SizeEstimator::default())
    }

    /// Forward to `sink` with a specific estimator
    pub fn new_with_estimator(sink: TSink, estimator: SizeEstimator) -> Self {
        Self { sink, estimator }
    }

    /// The estimator used for packing decisions
    pub fn estimator(&self) -> &SizeEstimator {
        &self.estimator
    }

    /// The wrapped sink
    pub fn sink(&self) -> &TSink {
        &self.sink
    }
}

impl<TSink> SinkForwarder<TSink>
where
    TSink: BatchSink,
{
    /// Send all of `payloads` in as few valid batches as greedy packing allows.
    ///
    /// A payload that alone exceeds `max_bytes` goes out as a batch of one.
    /// If a sink call fails, the batches already sent are reported in the
    /// error along with how many payloads never reached the sink.
    pub async fn send_bounded(
        &self,
        payloads: &[Bytes],
        limits: BatchLimits,
    ) -> Result<FlushSummary, DispatchError> {
        let mut summary = FlushSummary::default();
        let mut batch_start = 0;
        let mut batch_bytes = 0;

        for (index, payload) in payloads.iter().enumerate() {
            let cost = self.estimator.item_cost(payload);
            let would_hold = index - batch_start + 1;
            if batch_start < index
                && (limits.max_count < would_hold || limits.max_bytes < batch_bytes + cost)
            {
                summary += self
                    .dispatch(&payloads[batch_start..index], summary, payloads.len() - batch_start)
                    .await?;
                batch_start = index;
                batch_bytes = 0;
            }
            batch_bytes += cost;
        }
        if batch_start < payloads.len() {
            summary += self
                .dispatch(&payloads[batch_start..], summary, payloads.len() - batch_start)
                .await?;
        }
        Ok(summary)
    }

    /// One sink call carrying every item of `batch`. Empty batches make no call.
    pub async fn send_one(&self, batch: &[Bytes]) -> Result<DispatchResult, SinkError> {
        if batch.is_empty() {
            return Ok(DispatchResult::default());
        }
        let results = self.sink.put_batch(batch).await?;
        Ok(classify(batch.len(), &results))
    }

    async fn dispatch(
        &self,
        batch: &[Bytes],
        sent_so_far: FlushSummary,
        remaining: usize,
    ) -> Result<DispatchResult, DispatchError> {
        match self.send_one(batch).await {
            Ok(result) => {
                log::debug!(
                    "dispatched batch of {}: sent={}, failed={}",
                    batch.len(),
                    result.sent,
                    result.failed
                );
                Ok(result)
            }
            Err(source) => Err(DispatchError {
                partial: sent_so_far,
                undelivered: remaining as u64,
                source,
            }),
        }
    }
}

fn classify(submitted: usize, results: &[ItemResult]) -> DispatchResult {
    if results.len() != submitted {
        log::warn!(
            "sink returned {} results for {submitted} items",
            results.len()
        );
    }
    let mut outcome = DispatchResult::default();
    for result in results.iter().take(submitted) {
        match result {
            ItemResult::Sent => outcome.sent += 1,
            ItemResult::Failed { code, message } => {
                log::debug!("sink rejected item: {code}: {message}");
                outcome.failed += 1;
            }
        }
    }
    // Items the sink did not account for cannot be assumed delivered
    outcome.failed += submitted.saturating_sub(results.len()) as u64;
    outcome
}
