//! Accumulation and bounded dispatch of payloads to a batching sink

use std::sync::Arc;

use bytes::Bytes;

use crate::{error::SinkError, types::ItemResult};

mod accumulator;
mod estimate;
mod forwarder;
mod serializing_accumulator;

pub use accumulator::BatchAccumulator;
pub use estimate::{encode_payload, SizeEstimator, DEFAULT_PER_ITEM_OVERHEAD, PAYLOAD_ENCODING};
pub use forwarder::SinkForwarder;
pub use serializing_accumulator::SerializingAccumulator;

/// A downstream that accepts batches of payloads in one call.
///
/// Implementations return one result per item, in submission order. An `Err`
/// means the call itself failed and no item can be assumed delivered.
#[async_trait::async_trait]
pub trait BatchSink: Send + Sync {
    /// Deliver `items` in a single call
    async fn put_batch(&self, items: &[Bytes]) -> Result<Vec<ItemResult>, SinkError>;
}

#[async_trait::async_trait]
impl<T> BatchSink for Box<T>
where
    T: BatchSink + ?Sized,
{
    async fn put_batch(&self, items: &[Bytes]) -> Result<Vec<ItemResult>, SinkError> {
        self.as_ref().put_batch(items).await
    }
}

#[async_trait::async_trait]
impl<T> BatchSink for Arc<T>
where
    T: BatchSink + ?Sized,
{
    async fn put_batch(&self, items: &[Bytes]) -> Result<Vec<ItemResult>, SinkError> {
        self.as_ref().put_batch(items).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicBool, Ordering},
            Mutex,
        },
    };

    use bytes::Bytes;

    use crate::{error::SinkError, types::ItemResult};

    use super::BatchSink;

    /// Records every call. Can reject chosen payloads or fail calls outright.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub calls: Mutex<Vec<Vec<String>>>,
        pub rejects: HashSet<String>,
        pub unavailable: AtomicBool,
    }

    impl RecordingSink {
        pub fn rejecting(rejects: impl IntoIterator<Item = &'static str>) -> Self {
            Self {
                rejects: rejects.into_iter().map(String::from).collect(),
                ..Default::default()
            }
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn batches(&self) -> Vec<Vec<String>> {
            self.calls.lock().expect("test mutex").clone()
        }

        pub fn delivered(&self) -> Vec<String> {
            self.batches().into_iter().flatten().collect()
        }
    }

    #[async_trait::async_trait]
    impl BatchSink for RecordingSink {
        async fn put_batch(&self, items: &[Bytes]) -> Result<Vec<ItemResult>, SinkError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(SinkError::Unavailable("test sink is down".to_string()));
            }
            let items: Vec<String> = items
                .iter()
                .map(|item| String::from_utf8_lossy(item).into_owned())
                .collect();
            let results = items
                .iter()
                .map(|item| {
                    if self.rejects.contains(item) {
                        ItemResult::failed("400", "rejected by test")
                    } else {
                        ItemResult::Sent
                    }
                })
                .collect();
            self.calls.lock().expect("test mutex").push(items);
            Ok(results)
        }
    }
}
