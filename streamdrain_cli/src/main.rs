#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use streamdrain::{
    config::{mask, DrainConfig, StreamTarget, DEFAULT_DRAIN_INACTIVITY_TIMEOUT},
    downstream::{get_client, parse_header, webpki_trust, StreamDownstream},
    error::ConfigurationError,
    pipeline::{BatchAccumulator, SinkForwarder},
    source::{
        CheckpointStore, EventSource, FileSource, FileSourceOptions, JsonFileCheckpointStore,
        NoCheckpoints,
    },
    CheckpointPolicy, DrainSummary, LifecycleController, StartPosition, StopReason,
    TriggerHandler,
};

#[derive(Debug, Parser)]
#[command(name = "streamdrain", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow input files and forward new lines until each goes quiet
    Drain(DrainArgs),
    /// Forward the current content of one file as a single delivered batch
    Batch(BatchArgs),
}

#[derive(Debug, clap::Args)]
struct DrainArgs {
    /// Newline-delimited event file. Repeat to drain several, one after another.
    #[arg(long = "input", required = true)]
    inputs: Vec<PathBuf>,

    /// Start from the beginning of each file instead of its end
    #[arg(long, conflicts_with = "start_iso")]
    from_beginning: bool,

    /// Start from files modified at or after this RFC 3339 time, e.g. 2024-05-01T12:00:00Z
    #[arg(long)]
    start_iso: Option<String>,

    /// Seconds without a new event before a drain stops [default: 30]
    #[arg(long)]
    inactivity_timeout: Option<u64>,

    /// How often to check for appended lines and for inactivity
    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,

    #[command(flatten)]
    forwarding: ForwardingArgs,
}

#[derive(Debug, clap::Args)]
struct BatchArgs {
    /// Newline-delimited event file
    #[arg(long)]
    input: PathBuf,

    #[command(flatten)]
    forwarding: ForwardingArgs,
}

#[derive(Debug, clap::Args)]
struct ForwardingArgs {
    /// Largest estimated batch size in bytes [env: MaxBatchBytes] [default: 1048576]
    #[arg(long)]
    batch_max_bytes: Option<usize>,

    /// Most messages per batch [env: MaxBatchSize] [default: 100]
    #[arg(long)]
    batch_max_count: Option<usize>,

    /// Keep per-file progress here and resume from it
    #[arg(long)]
    checkpoint_file: Option<PathBuf>,

    /// Only checkpoint lines once their batch reached the stream
    #[arg(long)]
    checkpoint_after_flush: bool,

    /// Log what would be sent instead of sending it
    #[arg(long)]
    no_sink: bool,

    /// Stream messages endpoint [fallback env: OCI_MESSAGE_ENDPOINT]
    #[arg(long, env = "STREAMDRAIN_ENDPOINT")]
    endpoint: Option<String>,

    /// Stream id [fallback env: OCI_STREAM_OCID]
    #[arg(long, env = "STREAMDRAIN_STREAM_ID")]
    stream_id: Option<String>,

    /// Extra request header as `name: value`, usually authorization
    #[arg(long, env = "STREAMDRAIN_AUTH_HEADER", hide_env_values = true)]
    auth_header: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let outcome = match args.command {
        Command::Drain(args) => drain(args).await,
        Command::Batch(args) => batch(args).await,
    };
    ExitCode::from(exit_status(&outcome))
}

/// 0 for a clean drain, 2 for unusable configuration, 1 for anything else
fn exit_status(outcome: &anyhow::Result<bool>) -> u8 {
    match outcome {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(error) => {
            if error.downcast_ref::<ConfigurationError>().is_some() {
                log::error!("configuration error: {error:#}");
                2
            } else {
                log::error!("{error:#}");
                1
            }
        }
    }
}

/// Returns whether every drain finished without a run-ending failure
async fn drain(args: DrainArgs) -> Result<bool> {
    let config = drain_config(&args.forwarding, args.inactivity_timeout, args.poll_interval_ms)?;
    let start = start_position(args.from_beginning, args.start_iso.as_deref())?;
    let sink = stream_sink(&args.forwarding)?;
    let store = checkpoint_store(&args.forwarding);
    let options = FileSourceOptions {
        start,
        follow: true,
        poll_interval: config.poll_interval,
    };

    let mut total = DrainSummary::default();
    let mut clean = true;
    for input in &args.inputs {
        log::info!(
            "draining {} until {}s of silence",
            input.display(),
            config.inactivity_timeout.as_secs()
        );
        let source = FileSource::open_with_store(input, options, store.clone())
            .await
            .with_context(|| format!("opening {}", input.display()))?;
        let accumulator = match &sink {
            Some(sink) => BatchAccumulator::new(SinkForwarder::new(sink.clone()), config.limits),
            None => BatchAccumulator::log_only(config.limits),
        };
        let mut controller = LifecycleController::continuous(source, accumulator, &config);

        let handle = controller.handle();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupted; finishing the current drain");
                handle.close();
            }
        });
        let report = controller.run().await;
        interrupt.abort();

        log::info!("{}: {} ({})", input.display(), report.summary, report.reason);
        total += report.summary;
        let interrupted = report.reason == StopReason::Closed;
        if let Some(failure) = report.failure {
            log::error!("{}: {failure}", input.display());
            clean = false;
        }
        if interrupted {
            break;
        }
    }

    println!("total: {total}");
    Ok(clean)
}

/// Returns whether the batch finished without a run-ending failure
async fn batch(args: BatchArgs) -> Result<bool> {
    let config = drain_config(&args.forwarding, None, 2000)?;
    let store = checkpoint_store(&args.forwarding);
    let handler = match stream_sink(&args.forwarding)? {
        Some(sink) => TriggerHandler::new(sink, config),
        None => TriggerHandler::log_only(config),
    }
    .with_checkpoints(store.clone());

    let mut source = FileSource::open_with_store(
        &args.input,
        FileSourceOptions {
            start: StartPosition::Earliest,
            follow: false,
            ..Default::default()
        },
        store,
    )
    .await
    .with_context(|| format!("opening {}", args.input.display()))?;
    let mut events = Vec::new();
    while let Some(event) = source.next_event().await? {
        events.push(event);
    }
    source.close().await;

    let report = tokio::select! {
        report = handler.handle(events) => report,
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("interrupted before the batch finished");
        }
    };
    println!("total: {}", report.summary);
    Ok(match report.failure {
        Some(failure) => {
            log::error!("{failure}");
            false
        }
        None => true,
    })
}

/// Flags win over the environment, which wins over the drain tool's defaults
fn drain_config(
    forwarding: &ForwardingArgs,
    inactivity_timeout: Option<u64>,
    poll_interval_ms: u64,
) -> Result<DrainConfig, ConfigurationError> {
    let mut config = DrainConfig::from_lookup(|key| {
        let flag = match key {
            "MaxBatchSize" => forwarding.batch_max_count.map(|v| v.to_string()),
            "MaxBatchBytes" => forwarding.batch_max_bytes.map(|v| v.to_string()),
            "InactivityTimeout" => inactivity_timeout.map(|v| v.to_string()),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok()).or_else(|| match key {
            "InactivityTimeout" => Some(DEFAULT_DRAIN_INACTIVITY_TIMEOUT.as_secs().to_string()),
            _ => None,
        })
    })?;
    config.poll_interval = Duration::from_millis(poll_interval_ms);
    if forwarding.checkpoint_after_flush {
        config.checkpoint_policy = CheckpointPolicy::AfterFlush;
    }
    config.validate()?;
    Ok(config)
}

fn start_position(
    from_beginning: bool,
    start_iso: Option<&str>,
) -> Result<StartPosition, ConfigurationError> {
    match (from_beginning, start_iso) {
        (true, _) => Ok(StartPosition::Earliest),
        (false, Some(raw)) => chrono::DateTime::parse_from_rfc3339(raw)
            .map(|time| StartPosition::Timestamp(time.into()))
            .map_err(|e| ConfigurationError::Invalid {
                name: "start-iso",
                reason: format!("{raw:?}: {e}"),
            }),
        (false, None) => Ok(StartPosition::Latest),
    }
}

fn checkpoint_store(forwarding: &ForwardingArgs) -> Arc<dyn CheckpointStore> {
    match &forwarding.checkpoint_file {
        Some(path) => Arc::new(JsonFileCheckpointStore::new(path)),
        None => Arc::new(NoCheckpoints),
    }
}

fn stream_sink(forwarding: &ForwardingArgs) -> Result<Option<Arc<StreamDownstream>>> {
    if forwarding.no_sink {
        log::warn!("no sink: messages will be logged, not sent");
        return Ok(None);
    }
    let target = StreamTarget::from_lookup(|key| {
        let flag = match key {
            "MessageEndpoint" => forwarding.endpoint.clone(),
            "StreamOcid" => forwarding.stream_id.clone(),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    })?;
    let header = forwarding
        .auth_header
        .as_deref()
        .map(parse_header)
        .transpose()?;
    log::info!(
        "forwarding to {} stream {}",
        target.endpoint,
        mask(&target.stream_id, 24)
    );

    let client = get_client(webpki_trust)
        .map_err(|e| anyhow::anyhow!("could not build the http client: {e}"))?;
    Ok(Some(Arc::new(StreamDownstream::new(client, &target, header)?)))
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use clap::Parser;
    use streamdrain::{error::ConfigurationError, CheckpointPolicy, StartPosition};

    use super::{drain_config, exit_status, start_position, stream_sink, Args, Command};

    #[test_log::test]
    fn drain_flags_parse() {
        let args = Args::try_parse_from([
            "streamdrain",
            "drain",
            "--input",
            "a.log",
            "--input",
            "b.log",
            "--from-beginning",
            "--batch-max-count",
            "7",
            "--checkpoint-after-flush",
            "--no-sink",
        ])
        .expect("valid flags");
        let Command::Drain(drain) = args.command else {
            panic!("expected drain");
        };
        assert_eq!(2, drain.inputs.len());
        assert!(drain.forwarding.no_sink);

        let config = drain_config(&drain.forwarding, Some(45), 100).expect("valid config");
        assert_eq!(7, config.limits.max_count);
        assert_eq!(Duration::from_secs(45), config.inactivity_timeout);
        assert_eq!(Duration::from_millis(100), config.poll_interval);
        assert_eq!(CheckpointPolicy::AfterFlush, config.checkpoint_policy);
    }

    #[test_log::test]
    fn start_flags_are_exclusive() {
        assert!(Args::try_parse_from([
            "streamdrain",
            "drain",
            "--input",
            "a.log",
            "--from-beginning",
            "--start-iso",
            "2024-05-01T12:00:00Z",
        ])
        .is_err());
        assert!(Args::try_parse_from(["streamdrain", "drain"]).is_err());
    }

    #[test_log::test]
    fn start_positions() {
        assert_eq!(
            StartPosition::Earliest,
            start_position(true, None).expect("valid")
        );
        assert_eq!(
            StartPosition::Latest,
            start_position(false, None).expect("valid")
        );
        assert!(matches!(
            start_position(false, Some("2024-05-01T12:00:00+02:00")).expect("valid"),
            StartPosition::Timestamp(_)
        ));
        assert!(start_position(false, Some("yesterday")).is_err());
    }

    #[test_log::test]
    fn zero_limits_are_rejected() {
        let args = Args::try_parse_from([
            "streamdrain",
            "batch",
            "--input",
            "a.log",
            "--batch-max-bytes",
            "0",
        ])
        .expect("valid flags");
        let Command::Batch(batch) = args.command else {
            panic!("expected batch");
        };
        assert!(drain_config(&batch.forwarding, None, 2000).is_err());
    }

    #[test_log::test]
    fn exit_status_follows_the_outcome() {
        assert_eq!(0, exit_status(&Ok(true)));
        assert_eq!(1, exit_status(&Ok(false)));
        assert_eq!(1, exit_status(&Err(anyhow::anyhow!("sink went away"))));

        let args = Args::try_parse_from([
            "streamdrain",
            "batch",
            "--input",
            "a.log",
            "--endpoint",
            "ftp://streams.example.com",
            "--stream-id",
            "ocid1.stream.oc1.example",
        ])
        .expect("valid flags");
        let Command::Batch(batch) = args.command else {
            panic!("expected batch");
        };
        let unusable = stream_sink(&batch.forwarding).map(|_| true);
        assert_eq!(2, exit_status(&unusable));

        let wrapped = Err(anyhow::Error::from(ConfigurationError::Missing("StreamOcid"))
            .context("while starting the drain"));
        assert_eq!(2, exit_status(&wrapped));
    }
}
