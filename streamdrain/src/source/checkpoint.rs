use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::{
    error::CheckpointError,
    types::{Name, Position},
};

use super::CheckpointStore;

/// Discards checkpoints. For hosts that manage progress themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCheckpoints;

#[async_trait::async_trait]
impl CheckpointStore for NoCheckpoints {
    async fn load(&self, _partition: &Name) -> Result<Option<Position>, CheckpointError> {
        Ok(None)
    }

    async fn store(&self, _position: &Position) -> Result<(), CheckpointError> {
        Ok(())
    }
}

/// Keeps checkpoints in memory, along with every store in order.
///
/// Panics if a thread panicked while holding one of its locks.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    positions: Mutex<BTreeMap<Name, Position>>,
    history: Mutex<Vec<Position>>,
}

impl MemoryCheckpointStore {
    /// The current position for `partition`
    pub fn get(&self, partition: &Name) -> Option<Position> {
        self.positions
            .lock()
            .expect("checkpoint positions lock poisoned")
            .get(partition)
            .cloned()
    }

    /// Every position stored so far, oldest first
    pub fn history(&self) -> Vec<Position> {
        self.history
            .lock()
            .expect("checkpoint history lock poisoned")
            .clone()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, partition: &Name) -> Result<Option<Position>, CheckpointError> {
        Ok(self.get(partition))
    }

    async fn store(&self, position: &Position) -> Result<(), CheckpointError> {
        self.positions
            .lock()
            .expect("checkpoint positions lock poisoned")
            .insert(position.partition.clone(), position.clone());
        self.history
            .lock()
            .expect("checkpoint history lock poisoned")
            .push(position.clone());
        Ok(())
    }
}

/// Checkpoints in a json file, one entry per partition.
///
/// Every store rewrites the file through a temporary sibling and a rename, so
/// a crash leaves either the old or the new file and never a torn one.
#[derive(Debug)]
pub struct JsonFileCheckpointStore {
    path: PathBuf,
    positions: tokio::sync::Mutex<Option<BTreeMap<String, Position>>>,
}

impl JsonFileCheckpointStore {
    /// Checkpoints live at `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            positions: Default::default(),
        }
    }

    /// Where the checkpoints are kept
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<BTreeMap<String, Position>, CheckpointError> {
        match tokio::fs::read(&self.path).await {
            Ok(contents) if contents.is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_slice(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn load(&self, partition: &Name) -> Result<Option<Position>, CheckpointError> {
        let mut cached = self.positions.lock().await;
        if cached.is_none() {
            *cached = Some(self.read_file().await?);
        }
        Ok(cached
            .as_ref()
            .and_then(|positions| positions.get(partition.as_str()).cloned()))
    }

    async fn store(&self, position: &Position) -> Result<(), CheckpointError> {
        let mut cached = self.positions.lock().await;
        if cached.is_none() {
            *cached = Some(self.read_file().await?);
        }
        let positions = cached.get_or_insert_with(BTreeMap::new);
        positions.insert(position.partition.to_string(), position.clone());

        let encoded = serde_json::to_vec_pretty(positions)?;
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        tokio::fs::write(&staging, encoded).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        log::trace!("checkpointed {position} to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        source::CheckpointStore,
        types::{Name, Position},
    };

    use super::{JsonFileCheckpointStore, MemoryCheckpointStore, NoCheckpoints};

    #[test_log::test(tokio::test)]
    async fn no_checkpoints_remembers_nothing() {
        let store = NoCheckpoints;
        store
            .store(&Position::new("p", 10, 1))
            .await
            .expect("always ok");
        assert_eq!(None, store.load(&Name::Str("p")).await.expect("always ok"));
    }

    #[test_log::test(tokio::test)]
    async fn memory_keeps_the_latest_per_partition() {
        let store = MemoryCheckpointStore::default();
        store.store(&Position::new("a", 1, 1)).await.expect("ok");
        store.store(&Position::new("b", 7, 1)).await.expect("ok");
        store.store(&Position::new("a", 2, 2)).await.expect("ok");

        assert_eq!(
            Some(Position::new("a", 2, 2)),
            store.load(&Name::Str("a")).await.expect("ok")
        );
        assert_eq!(3, store.history().len());
    }

    #[test_log::test(tokio::test)]
    async fn memory_store_panics_after_a_poisoned_lock() {
        let store = std::sync::Arc::new(MemoryCheckpointStore::default());
        let poisoner = store.clone();
        let poisoned = std::thread::spawn(move || {
            let _held = poisoner.positions.lock().expect("first lock");
            panic!("poison the positions");
        })
        .join();
        assert!(poisoned.is_err());

        let attempt = tokio::spawn(async move { store.store(&Position::new("a", 1, 1)).await }).await;
        assert!(attempt.expect_err("store panics").is_panic());
    }

    #[test_log::test(tokio::test)]
    async fn json_file_survives_a_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("checkpoints.json");

        let store = JsonFileCheckpointStore::new(&path);
        assert_eq!(None, store.load(&Name::Str("events.log")).await.expect("ok"));
        store
            .store(&Position::new("events.log", 120, 4))
            .await
            .expect("ok");
        store
            .store(&Position::new("other.log", 9, 1))
            .await
            .expect("ok");
        store
            .store(&Position::new("events.log", 180, 6))
            .await
            .expect("ok");

        let reopened = JsonFileCheckpointStore::new(&path);
        assert_eq!(
            Some(Position::new("events.log", 180, 6)),
            reopened.load(&Name::Str("events.log")).await.expect("ok")
        );
        assert_eq!(
            Some(Position::new("other.log", 9, 1)),
            reopened.load(&Name::Str("other.log")).await.expect("ok")
        );
        assert!(!dir.path().join("checkpoints.json.tmp").exists());
    }

    #[test_log::test(tokio::test)]
    async fn unreadable_json_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("checkpoints.json");
        std::fs::write(&path, b"{not json").expect("write");

        let store = JsonFileCheckpointStore::new(&path);
        assert!(store.load(&Name::Str("x")).await.is_err());
    }
}
