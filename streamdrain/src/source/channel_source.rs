use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::{CheckpointError, SourceError},
    types::{Event, Position},
};

use super::{CheckpointStore, EventSource, NoCheckpoints};

/// The producing side of a [`ChannelSource`]. Clone it for each producer.
#[derive(Debug)]
pub struct ChannelSourceSender {
    queue: mpsc::Sender<Event>,
}

impl Clone for ChannelSourceSender {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl ChannelSourceSender {
    /// Queue an event, waiting for room
    pub async fn send(&self, event: Event) -> Result<(), SourceError> {
        self.queue
            .send(event)
            .await
            .map_err(|_| SourceError::Disconnected("drain is no longer receiving".to_string()))
    }

    /// Queue an event if there is room right now. Returns false if it was not queued.
    pub fn try_send(&self, event: Event) -> bool {
        match self.queue.try_send(event) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("could not queue event: {e}");
                false
            }
        }
    }
}

/// An in-process source fed through a bounded channel.
///
/// The source is exhausted once every sender is dropped and the queue is empty.
#[derive(Debug)]
pub struct ChannelSource<TStore = NoCheckpoints> {
    queue: ReceiverStream<Event>,
    store: TStore,
    closed: bool,
}

impl ChannelSource {
    /// A source with room for `capacity` queued events and no checkpointing
    pub fn new(capacity: usize) -> (ChannelSourceSender, Self) {
        Self::new_with_store(capacity, NoCheckpoints)
    }
}

impl<TStore> ChannelSource<TStore> {
    /// A source that records checkpoints in `store`
    pub fn new_with_store(capacity: usize, store: TStore) -> (ChannelSourceSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            ChannelSourceSender { queue: sender },
            Self {
                queue: ReceiverStream::new(receiver),
                store,
                closed: false,
            },
        )
    }

    /// The checkpoint store
    pub fn store(&self) -> &TStore {
        &self.store
    }
}

#[async_trait::async_trait]
impl<TStore> EventSource for ChannelSource<TStore>
where
    TStore: CheckpointStore,
{
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.queue.next().await)
    }

    async fn checkpoint(&mut self, position: &Position) -> Result<(), CheckpointError> {
        self.store.store(position).await
    }

    async fn close(&mut self) {
        self.queue.close();
        self.closed = true;
    }
}
