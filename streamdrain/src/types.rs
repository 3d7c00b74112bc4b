use std::{
    fmt::Display,
    ops::AddAssign,
    sync::Arc,
    time::SystemTime,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An identifier for partitions and sources.
///
/// Names compare, order and hash by their text regardless of variant, so a
/// name read back from a checkpoint file matches the one a source produced.
#[derive(Debug, Clone)]
pub enum Name {
    /// A static string Name.
    Str(&'static str),
    /// A String name. Avoid these when you can, because clones can add up.
    String(String),
    /// Partition names are attached to every event a source emits. Sharing one
    /// allocation across them keeps per-event clones cheap.
    Shared(Arc<String>),
}

impl Name {
    /// an &str view of the name
    pub fn as_str(&self) -> &str {
        match self {
            Name::Str(s) => s,
            Name::String(s) => s,
            Name::Shared(s) => s,
        }
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Name {}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        match name {
            Name::Str(s) => s.to_owned(),
            Name::String(s) => s,
            Name::Shared(s) => Arc::<String>::try_unwrap(s).unwrap_or_else(|this| this.to_string()),
        }
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for Name {
    fn from(s: &'static str) -> Self {
        Self::Str(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Arc<String>> for Name {
    fn from(s: Arc<String>) -> Self {
        Self::Shared(s)
    }
}

impl Serialize for Name {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Name::String)
    }
}

/// Where an event sits in its source. Sources resume from the last checkpointed position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// The partition this event was read from
    pub partition: Name,
    /// Source-defined offset. For file sources, the byte offset just past the event.
    pub offset: u64,
    /// Per-partition sequence number
    pub sequence: u64,
}

impl Position {
    /// Make a position
    pub fn new(partition: impl Into<Name>, offset: u64, sequence: u64) -> Self {
        Self {
            partition: partition.into(),
            offset,
            sequence,
        }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}#{}", self.partition, self.offset, self.sequence)
    }
}

/// One event as delivered by a source. Immutable once received.
#[derive(Debug, Clone)]
pub struct Event {
    /// Raw body. Logically utf-8 text; the controller validates it.
    pub body: Bytes,
    /// Source position, used for checkpointing
    pub position: Position,
    /// When the source says this event was enqueued, if it knows
    pub enqueued_at: Option<SystemTime>,
}

impl Event {
    /// Make an event without an enqueued time
    pub fn new(body: impl Into<Bytes>, position: Position) -> Self {
        Self {
            body: body.into(),
            position,
            enqueued_at: None,
        }
    }
}

/// Where a source begins reading when it has no checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// The oldest retained event
    Earliest,
    /// Only events that arrive after the source is opened
    #[default]
    Latest,
    /// Events enqueued at or after this time
    Timestamp(SystemTime),
}

/// Per-item outcome reported by a sink, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResult {
    /// The sink accepted the item
    Sent,
    /// The sink rejected this item; the rest of the batch is unaffected
    Failed {
        /// Sink-specific error code
        code: String,
        /// Human readable detail
        message: String,
    },
}

impl ItemResult {
    /// Convenience for building a failed result
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            code: code.into(),
            message: message.into(),
        }
    }

    /// True when the sink accepted the item
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// Outcome of a single sink call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchResult {
    /// Items the sink accepted
    pub sent: u64,
    /// Items the sink rejected
    pub failed: u64,
}

/// Outcome of one flush, across every batch it dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Items the sink accepted
    pub sent: u64,
    /// Items the sink rejected, or that were lost to a failed dispatch
    pub failed: u64,
    /// Sink calls made
    pub batches: u64,
}

impl AddAssign<DispatchResult> for FlushSummary {
    fn add_assign(&mut self, dispatch: DispatchResult) {
        self.sent += dispatch.sent;
        self.failed += dispatch.failed;
        self.batches += 1;
    }
}

impl AddAssign for FlushSummary {
    fn add_assign(&mut self, other: FlushSummary) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.batches += other.batches;
    }
}

impl Display for FlushSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent={}, failed={}, batches={}",
            self.sent, self.failed, self.batches
        )
    }
}

/// Final counters of one drain or one trigger invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Events decoded and handed to the buffer
    pub processed: u64,
    /// Empty or whitespace-only events that were skipped
    pub skipped: u64,
    /// Items the sink accepted
    pub sent: u64,
    /// Decode failures plus items the sink rejected or never received
    pub failed: u64,
    /// Sink calls made
    pub batches: u64,
}

impl AddAssign for DrainSummary {
    fn add_assign(&mut self, other: DrainSummary) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.sent += other.sent;
        self.failed += other.failed;
        self.batches += other.batches;
    }
}

impl Display for DrainSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed={}, skipped={}, sent={}, failed={}, batches={}",
            self.processed, self.skipped, self.sent, self.failed, self.batches
        )
    }
}

/// Controller lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting events
    Running,
    /// Termination signaled; no more intake, final flush pending
    Draining,
    /// Final flush done
    Stopped,
}

impl LifecycleState {
    /// Move `Running -> Draining -> Stopped`. Any other request keeps the current state.
    pub fn advance(self) -> Self {
        match self {
            Self::Running => Self::Draining,
            Self::Draining | Self::Stopped => Self::Stopped,
        }
    }
}

/// Why a controller left `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Someone called close
    Closed,
    /// The watchdog saw no events for the inactivity threshold
    Inactive,
    /// The source has no more events
    Exhausted,
    /// A sink call failed outright
    SinkUnavailable,
    /// The source reported an unrecoverable error
    SourceFailed,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StopReason::Closed => "closed",
            StopReason::Inactive => "inactivity timeout",
            StopReason::Exhausted => "source exhausted",
            StopReason::SinkUnavailable => "sink unavailable",
            StopReason::SourceFailed => "source failed",
        })
    }
}
