//! Settings for accumulation, inactivity handling and the stream sink.
//!
//! Everything here can be built in code; the `from_env` constructors read the
//! same application settings the function host exposes as environment variables.

use std::time::Duration;

use crate::error::ConfigurationError;

/// Default maximum items per outbound batch
pub const DEFAULT_MAX_BATCH_COUNT: usize = 100;
/// Default maximum estimated bytes per outbound batch (1MiB)
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;
/// Default inactivity window for trigger-hosted drains
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10);
/// Default inactivity window for the standalone drain tool
pub const DEFAULT_DRAIN_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);
/// How often the watchdog looks at the last activity time
pub const DEFAULT_WATCHDOG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Hard per-batch limits. Every dispatched batch satisfies both, except a
/// single item that alone exceeds `max_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum items per batch
    pub max_count: usize,
    /// Maximum estimated wire bytes per batch
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_BATCH_COUNT,
            max_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

impl BatchLimits {
    /// Make limits, rejecting zeroes
    pub fn new(max_count: usize, max_bytes: usize) -> Result<Self, ConfigurationError> {
        let limits = Self {
            max_count,
            max_bytes,
        };
        limits.validate()?;
        Ok(limits)
    }

    /// Both limits must be at least 1
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_count == 0 {
            return Err(ConfigurationError::Invalid {
                name: "max_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_bytes == 0 {
            return Err(ConfigurationError::Invalid {
                name: "max_bytes",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// When checkpoints move relative to sink delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointPolicy {
    /// Checkpoint each event as soon as it is in the buffer. A crash between
    /// checkpoint and dispatch loses buffered events (at-most-once).
    #[default]
    OnHandoff,
    /// Checkpoint only after a flush reaches the sink. A crash before the flush
    /// redelivers buffered events on restart (at-least-once).
    AfterFlush,
}

/// Settings for one drain run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainConfig {
    /// Per-batch limits
    pub limits: BatchLimits,
    /// Silence after which a continuous drain stops
    pub inactivity_timeout: Duration,
    /// Watchdog polling cadence
    pub poll_interval: Duration,
    /// Checkpoint advance policy
    pub checkpoint_policy: CheckpointPolicy,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            limits: BatchLimits::default(),
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            poll_interval: DEFAULT_WATCHDOG_POLL_INTERVAL,
            checkpoint_policy: CheckpointPolicy::default(),
        }
    }
}

impl DrainConfig {
    /// Load from process environment: `MaxBatchSize`, `MaxBatchBytes`, `InactivityTimeout` (seconds).
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup. Absent keys take defaults; malformed ones are errors.
    pub fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let defaults = Self::default();
        let config = Self {
            limits: BatchLimits {
                max_count: parse_setting(&lookup, "MaxBatchSize")?
                    .unwrap_or(defaults.limits.max_count),
                max_bytes: parse_setting(&lookup, "MaxBatchBytes")?
                    .unwrap_or(defaults.limits.max_bytes),
            },
            inactivity_timeout: parse_setting(&lookup, "InactivityTimeout")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.inactivity_timeout),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject zero limits and zero durations
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.limits.validate()?;
        if self.inactivity_timeout.is_zero() {
            return Err(ConfigurationError::Invalid {
                name: "inactivity_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigurationError::Invalid {
                name: "poll_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Where the stream sink delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    /// Messages endpoint, like `https://cell-1.streaming.eu-frankfurt-1.oci.oraclecloud.com`
    pub endpoint: String,
    /// Stream identifier
    pub stream_id: String,
}

impl StreamTarget {
    /// Make a validated target
    pub fn new(
        endpoint: impl Into<String>,
        stream_id: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let target = Self {
            endpoint: endpoint.into(),
            stream_id: stream_id.into(),
        };
        target.validate()?;
        Ok(target)
    }

    /// Load from `MessageEndpoint` / `StreamOcid`, falling back to
    /// `OCI_MESSAGE_ENDPOINT` / `OCI_STREAM_OCID`.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup
    pub fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let first_present = |keys: [&'static str; 2]| {
            keys.into_iter()
                .filter_map(&lookup)
                .find(|value| !value.trim().is_empty())
        };
        let endpoint = first_present(["MessageEndpoint", "OCI_MESSAGE_ENDPOINT"])
            .ok_or(ConfigurationError::Missing("MessageEndpoint"))?;
        let stream_id = first_present(["StreamOcid", "OCI_STREAM_OCID"])
            .ok_or(ConfigurationError::Missing("StreamOcid"))?;
        Self::new(endpoint, stream_id)
    }

    /// The endpoint must be http(s) and the stream id must name a stream, not a stream pool.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigurationError::Missing("MessageEndpoint"));
        }
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(ConfigurationError::Invalid {
                name: "MessageEndpoint",
                reason: format!("expected an http(s) url, got {}", mask(&self.endpoint, 8)),
            });
        }
        if self.stream_id.trim().is_empty() {
            return Err(ConfigurationError::Missing("StreamOcid"));
        }
        if self.stream_id.contains("streampool") {
            return Err(ConfigurationError::Invalid {
                name: "StreamOcid",
                reason: "points to a stream pool; use the stream id instead".to_string(),
            });
        }
        Ok(())
    }

    /// `{endpoint}/20180418/streams/{stream_id}/messages`
    pub fn messages_url(&self) -> String {
        format!(
            "{}/20180418/streams/{}/messages",
            self.endpoint.trim_end_matches('/'),
            self.stream_id
        )
    }
}

/// Hide most of a secret for logging: `abcdef...***`, or `***` when it is short.
pub fn mask(value: &str, keep: usize) -> String {
    if value.is_empty() {
        return String::new();
    }
    if value.chars().count() <= keep {
        return "***".to_string();
    }
    let prefix: String = value.chars().take(keep).collect();
    format!("{prefix}...***")
}

fn parse_setting<T>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigurationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigurationError::Invalid {
                name: key,
                reason: format!("{raw:?}: {e}"),
            }),
    }
}
