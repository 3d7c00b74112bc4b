use std::collections::VecDeque;

use crate::{
    error::{CheckpointError, SourceError},
    types::{Event, Position},
};

use super::{CheckpointStore, EventSource, NoCheckpoints};

/// A finite run of events handed over all at once, as a trigger invocation receives them.
#[derive(Debug)]
pub struct DeliveredEvents<TStore = NoCheckpoints> {
    events: VecDeque<Event>,
    store: TStore,
}

impl DeliveredEvents {
    /// Deliver `events` in order without checkpointing
    pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
        Self::new_with_store(events, NoCheckpoints)
    }
}

impl<TStore> DeliveredEvents<TStore> {
    /// Deliver `events` in order, recording checkpoints in `store`
    pub fn new_with_store(events: impl IntoIterator<Item = Event>, store: TStore) -> Self {
        Self {
            events: events.into_iter().collect(),
            store,
        }
    }

    /// Events not yet taken
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait::async_trait]
impl<TStore> EventSource for DeliveredEvents<TStore>
where
    TStore: CheckpointStore,
{
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        Ok(self.events.pop_front())
    }

    async fn checkpoint(&mut self, position: &Position) -> Result<(), CheckpointError> {
        self.store.store(position).await
    }

    async fn close(&mut self) {
        if !self.events.is_empty() {
            log::debug!("closing with {} events untaken", self.events.len());
        }
    }
}
