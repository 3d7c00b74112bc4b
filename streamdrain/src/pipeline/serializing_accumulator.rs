use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::{error::DispatchError, types::FlushSummary};

use super::{BatchAccumulator, BatchSink};

/// An accumulator that provides external synchronization, so concurrent
/// producers and a closing task can share it.
///
/// The lock is held for the whole of an `add` or `flush`, sink call included.
/// The threshold check and the buffer mutation can never interleave with
/// another flush, so nothing is sent twice or left behind.
pub struct SerializingAccumulator<TSink> {
    accumulator: Arc<Mutex<BatchAccumulator<TSink>>>,
}

impl<TSink> Clone for SerializingAccumulator<TSink> {
    fn clone(&self) -> Self {
        Self {
            accumulator: self.accumulator.clone(),
        }
    }
}

impl<TSink> SerializingAccumulator<TSink> {
    /// Wrap an accumulator. The accumulator is moved into a mutex.
    pub fn new(accumulator: BatchAccumulator<TSink>) -> Self {
        Self {
            accumulator: Arc::new(Mutex::new(accumulator)),
        }
    }

    /// Running totals. Waits for any in-flight flush.
    pub async fn totals(&self) -> FlushSummary {
        self.accumulator.lock().await.totals()
    }

    /// Payloads waiting for a flush. Waits for any in-flight flush.
    pub async fn pending(&self) -> usize {
        self.accumulator.lock().await.pending()
    }
}

impl<TSink> SerializingAccumulator<TSink>
where
    TSink: BatchSink,
{
    /// See [`BatchAccumulator::add`]
    pub async fn add(&self, payload: Bytes) -> Result<Option<FlushSummary>, DispatchError> {
        self.accumulator.lock().await.add(payload).await
    }

    /// See [`BatchAccumulator::flush`]
    pub async fn flush(&self, force: bool) -> Result<Option<FlushSummary>, DispatchError> {
        self.accumulator.lock().await.flush(force).await
    }
}
