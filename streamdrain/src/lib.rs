//! Count- and size-bounded batch forwarding from ordered event sources.
//!
//! [`streamdrain`](crate) takes events from a source one at a time, buffers
//! their payloads, and forwards them to a batching sink in batches that never
//! exceed a configured item count or estimated wire size. A drain ends when it
//! is closed, when its source runs dry, or when no event has arrived for an
//! inactivity threshold. Whatever is still buffered is flushed exactly once on
//! the way out.
//!
//! # Getting Started
//!
//! Build a [`pipeline::BatchAccumulator`] around a [`pipeline::SinkForwarder`]
//! for your [`pipeline::BatchSink`], pick an [`source::EventSource`], and hand
//! both to a [`lifecycle::LifecycleController`]. For one-shot deliveries use
//! [`lifecycle::TriggerHandler`].
//!
//! The bundled [`downstream::StreamDownstream`] posts base64 payloads to an
//! http streaming service. The `streamdrain` binary wires it to file sources.

pub mod config;
pub mod downstream;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod source;
pub mod types;

pub use config::{BatchLimits, CheckpointPolicy, DrainConfig, StreamTarget};
pub use error::{DrainError, SinkError};
pub use lifecycle::{DrainHandle, DrainReport, LifecycleController, TriggerHandler};
pub use types::{DrainSummary, Event, Name, Position, StartPosition, StopReason};
