//! Event sources: where a drain reads from and where it records progress.

use std::sync::Arc;

use crate::{
    error::{CheckpointError, SourceError},
    types::{Event, Name, Position},
};

mod channel_source;
mod checkpoint;
mod delivered;
mod file_source;

pub use channel_source::{ChannelSource, ChannelSourceSender};
pub use checkpoint::{JsonFileCheckpointStore, MemoryCheckpointStore, NoCheckpoints};
pub use delivered::DeliveredEvents;
pub use file_source::{FileSource, FileSourceOptions};

/// An ordered supply of events with resumable positions.
///
/// `next_event` must be cancel safe: a drain stops by dropping an in-flight
/// call, and no event may be lost when that happens.
#[async_trait::async_trait]
pub trait EventSource: Send {
    /// Wait for the next event. `Ok(None)` means the source has nothing more to give.
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError>;

    /// Record that everything up to and including `position` is handled.
    async fn checkpoint(&mut self, position: &Position) -> Result<(), CheckpointError>;

    /// Stop receiving. Called once, as the drain begins its final flush.
    async fn close(&mut self);
}

/// Durable per-partition progress.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The last stored position for `partition`
    async fn load(&self, partition: &Name) -> Result<Option<Position>, CheckpointError>;

    /// Replace the stored position for `position.partition`
    async fn store(&self, position: &Position) -> Result<(), CheckpointError>;
}

#[async_trait::async_trait]
impl<T> CheckpointStore for Arc<T>
where
    T: CheckpointStore + ?Sized,
{
    async fn load(&self, partition: &Name) -> Result<Option<Position>, CheckpointError> {
        self.as_ref().load(partition).await
    }

    async fn store(&self, position: &Position) -> Result<(), CheckpointError> {
        self.as_ref().store(position).await
    }
}
