//! Error taxonomy.
//!
//! Per-event and per-item failures are absorbed into counters. Whole-dispatch
//! and source failures end the run but never skip the final summary.

use crate::types::{FlushSummary, Position, StopReason};

pub(crate) type StdError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An event body that is not valid utf-8.
#[derive(Debug, thiserror::Error)]
#[error("event at {position} is not valid utf-8: {source}")]
pub struct DecodeError {
    /// Where the poison event sits; the checkpoint still moves past it
    pub position: Position,
    /// The underlying validation failure
    #[source]
    pub source: std::str::Utf8Error,
}

/// A sink call that failed as a whole. Individual item failures are not errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink could not be reached or refused the call
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    /// Connection, tls or io failure underneath the call
    #[error("sink transport failure: {0}")]
    Transport(#[source] StdError),
    /// The sink answered with a non-success status
    #[error("sink returned {status}: {body}")]
    Status {
        /// http status code
        status: u16,
        /// response body, for diagnosis
        body: String,
    },
    /// The sink answered with something we could not interpret
    #[error("sink response could not be parsed: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// A flush that stopped partway because a sink call failed.
#[derive(Debug, thiserror::Error)]
#[error("dispatch failed after {} batches with {undelivered} items undelivered: {source}", .partial.batches)]
pub struct DispatchError {
    /// What was dispatched before the failure
    pub partial: FlushSummary,
    /// Items from the failed batch onward that never reached the sink
    pub undelivered: u64,
    /// The failure
    #[source]
    pub source: SinkError,
}

/// Failure reading from a source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Reading the underlying medium failed
    #[error("source io failure: {0}")]
    Io(#[from] std::io::Error),
    /// The producing side went away unexpectedly
    #[error("source disconnected: {0}")]
    Disconnected(String),
    /// Anything else a source adapter wants to report
    #[error("source failure: {0}")]
    Other(#[source] StdError),
}

/// Failure persisting a checkpoint. Never fatal to a drain.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Checkpoint storage io failed
    #[error("checkpoint io failure: {0}")]
    Io(#[from] std::io::Error),
    /// Checkpoint storage held something unreadable
    #[error("checkpoint encoding failure: {0}")]
    Json(#[from] serde_json::Error),
}

/// Missing or malformed settings. Fatal before any event is processed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// A required setting is absent
    #[error("missing required setting {0}")]
    Missing(&'static str),
    /// A setting is present but unusable
    #[error("invalid setting {name}: {reason}")]
    Invalid {
        /// The setting
        name: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Failures surfaced to whoever started a drain.
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    /// A flush could not reach the sink
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// The source failed
    #[error(transparent)]
    Source(#[from] SourceError),
    /// Settings were unusable
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// A drain that already ended in failure was run again
    #[error("drain already stopped ({reason}) after: {failure}")]
    AlreadyFailed {
        /// Why the first run stopped
        reason: StopReason,
        /// The first run's failure
        failure: String,
    },
}
