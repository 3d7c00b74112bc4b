use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncSeekExt, BufReader},
};

use crate::{
    error::{CheckpointError, SourceError},
    types::{Event, Name, Position, StartPosition},
};

use super::{CheckpointStore, EventSource, NoCheckpoints};

/// How a [`FileSource`] starts and whether it waits for more lines.
#[derive(Debug, Clone, Copy)]
pub struct FileSourceOptions {
    /// Where to begin when the store has no checkpoint for this file
    pub start: StartPosition,
    /// Keep waiting for appended lines at end of file
    pub follow: bool,
    /// How often to look for appended lines when following
    pub poll_interval: Duration,
}

impl Default for FileSourceOptions {
    fn default() -> Self {
        Self {
            start: StartPosition::Latest,
            follow: true,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Reads newline-delimited events from a file, optionally following appends.
///
/// The partition is the canonical path of the file, so files sharing a name in
/// different directories keep separate checkpoints. The offset is the byte
/// offset just past each line, so a stored checkpoint resumes on the next unread line.
/// A final line without a newline is only emitted when not following, since a
/// writer may still be in the middle of it.
#[derive(Debug)]
pub struct FileSource<TStore = NoCheckpoints> {
    path: PathBuf,
    partition: Name,
    reader: BufReader<File>,
    line: Vec<u8>,
    offset: u64,
    sequence: u64,
    existing_end: u64,
    existing_stamp: Option<SystemTime>,
    options: FileSourceOptions,
    store: TStore,
    closed: bool,
}

impl FileSource {
    /// Open `path` without checkpointing
    pub async fn open(path: impl AsRef<Path>, options: FileSourceOptions) -> Result<Self, SourceError> {
        Self::open_with_store(path, options, NoCheckpoints).await
    }
}

impl<TStore> FileSource<TStore>
where
    TStore: CheckpointStore,
{
    /// Open `path`, resuming from the checkpoint in `store` if there is one
    pub async fn open_with_store(
        path: impl AsRef<Path>,
        options: FileSourceOptions,
        store: TStore,
    ) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await?;
        let metadata = file.metadata().await?;
        let length = metadata.len();
        let modified = metadata.modified().ok();
        let partition = Name::Shared(Arc::new(
            tokio::fs::canonicalize(&path).await?.display().to_string(),
        ));

        let checkpoint = match store.load(&partition).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                log::warn!("ignoring unreadable checkpoint for {partition}: {e}");
                None
            }
        };
        let (mut offset, mut sequence) = match (&checkpoint, options.start) {
            (Some(position), _) => (position.offset, position.sequence),
            (None, StartPosition::Earliest) => (0, 0),
            (None, StartPosition::Latest) => (length, 0),
            (None, StartPosition::Timestamp(since)) => match modified {
                Some(modified) if since <= modified => (0, 0),
                _ => (length, 0),
            },
        };
        if length < offset {
            log::warn!("{partition} is shorter than its checkpoint at {offset}; reading from the start");
            offset = 0;
            sequence = 0;
        }
        file.seek(SeekFrom::Start(offset)).await?;
        log::info!(
            "reading {} from offset {offset}{}",
            path.display(),
            if checkpoint.is_some() { " (checkpoint)" } else { "" }
        );

        Ok(Self {
            path,
            partition,
            reader: BufReader::new(file),
            line: Vec::new(),
            offset,
            sequence,
            existing_end: length,
            existing_stamp: modified,
            options,
            store,
            closed: false,
        })
    }
}

impl<TStore> FileSource<TStore> {
    /// The file being read
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The partition name attached to every event
    pub fn partition(&self) -> &Name {
        &self.partition
    }

    fn take_line(&mut self) -> Event {
        let consumed = self.line.len() as u64;
        let mut body = std::mem::take(&mut self.line);
        if body.last() == Some(&b'\n') {
            body.pop();
            if body.last() == Some(&b'\r') {
                body.pop();
            }
        }
        let enqueued_at = if self.offset < self.existing_end {
            self.existing_stamp
        } else {
            Some(SystemTime::now())
        };
        self.offset += consumed;
        self.sequence += 1;
        Event {
            body: Bytes::from(body),
            position: Position::new(self.partition.clone(), self.offset, self.sequence),
            enqueued_at,
        }
    }
}

#[async_trait::async_trait]
impl<TStore> EventSource for FileSource<TStore>
where
    TStore: CheckpointStore,
{
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        loop {
            if self.closed {
                return Ok(None);
            }
            // read_until keeps partial data in self.line across cancellation
            let read = self.reader.read_until(b'\n', &mut self.line).await?;
            if self.line.last() == Some(&b'\n') {
                return Ok(Some(self.take_line()));
            }
            if read == 0 {
                if !self.options.follow {
                    if self.line.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(self.take_line()));
                }
                tokio::time::sleep(self.options.poll_interval).await;
            }
        }
    }

    async fn checkpoint(&mut self, position: &Position) -> Result<(), CheckpointError> {
        self.store.store(position).await
    }

    async fn close(&mut self) {
        self.closed = true;
        log::debug!(
            "closed {} at offset {} after {} lines",
            self.path.display(),
            self.offset,
            self.sequence
        );
    }
}
