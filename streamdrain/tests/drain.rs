use std::{
    io::Write,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use streamdrain::{
    config::{BatchLimits, CheckpointPolicy, DrainConfig},
    error::SinkError,
    pipeline::{BatchAccumulator, BatchSink, SinkForwarder, SizeEstimator},
    source::{ChannelSource, FileSource, FileSourceOptions, JsonFileCheckpointStore},
    types::{Event, ItemResult, Position, StartPosition, StopReason},
    LifecycleController, TriggerHandler,
};

/// Keeps every batch it is handed
#[derive(Default)]
struct CollectingSink {
    batches: Mutex<Vec<Vec<String>>>,
}

impl CollectingSink {
    fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().expect("test mutex").clone()
    }

    fn delivered(&self) -> Vec<String> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait::async_trait]
impl BatchSink for CollectingSink {
    async fn put_batch(&self, items: &[Bytes]) -> Result<Vec<ItemResult>, SinkError> {
        // give other tasks a chance to interleave with the call
        tokio::task::yield_now().await;
        self.batches.lock().expect("test mutex").push(
            items
                .iter()
                .map(|item| String::from_utf8_lossy(item).into_owned())
                .collect(),
        );
        Ok(vec![ItemResult::Sent; items.len()])
    }
}

fn quick_drain(max_count: usize, policy: CheckpointPolicy) -> DrainConfig {
    DrainConfig {
        limits: BatchLimits::new(max_count, 1 << 20).expect("valid"),
        inactivity_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(50),
        checkpoint_policy: policy,
    }
}

fn follow_from(start: StartPosition) -> FileSourceOptions {
    FileSourceOptions {
        start,
        follow: true,
        poll_interval: Duration::from_millis(20),
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn file_drain_goes_quiet_and_resumes_from_its_checkpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("events.log");
    let mut log = std::fs::File::create(&log_path).expect("create");
    for i in 0..250 {
        writeln!(log, "event {i}").expect("write");
    }
    let checkpoints = Arc::new(JsonFileCheckpointStore::new(dir.path().join("checkpoints.json")));

    let sink = Arc::new(CollectingSink::default());
    let config = quick_drain(40, CheckpointPolicy::AfterFlush);
    let source = FileSource::open_with_store(
        &log_path,
        follow_from(StartPosition::Earliest),
        checkpoints.clone(),
    )
    .await
    .expect("opens");
    let report = LifecycleController::continuous(
        source,
        BatchAccumulator::new(SinkForwarder::new(sink.clone()), config.limits),
        &config,
    )
    .run()
    .await;

    assert_eq!(StopReason::Inactive, report.reason);
    assert_eq!(250, report.summary.sent);
    assert_eq!(7, report.summary.batches);
    let expected: Vec<String> = (0..250).map(|i| format!("event {i}")).collect();
    assert_eq!(expected, sink.delivered());

    for i in 250..260 {
        writeln!(log, "event {i}").expect("write");
    }
    log.flush().expect("flush");

    // the checkpoint wins over a latest start
    let sink = Arc::new(CollectingSink::default());
    let source = FileSource::open_with_store(
        &log_path,
        follow_from(StartPosition::Latest),
        checkpoints.clone(),
    )
    .await
    .expect("opens");
    let report = LifecycleController::continuous(
        source,
        BatchAccumulator::new(SinkForwarder::new(sink.clone()), config.limits),
        &config,
    )
    .run()
    .await;

    assert_eq!(10, report.summary.processed);
    let expected: Vec<String> = (250..260).map(|i| format!("event {i}")).collect();
    assert_eq!(expected, sink.delivered());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn close_delivers_every_event_taken_in_order() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let bodies: Vec<String> = (0..1000)
        .map(|i| format!("{i:04}:{}", "z".repeat(rng.gen_range(0..300))))
        .collect();

    let sink = Arc::new(CollectingSink::default());
    let limits = BatchLimits::new(25, 4096).expect("valid");
    let (sender, source) = ChannelSource::new(64);
    let mut controller = LifecycleController::continuous(
        source,
        BatchAccumulator::new(SinkForwarder::new(sink.clone()), limits),
        &DrainConfig {
            limits,
            ..DrainConfig::default()
        },
    );
    let handle = controller.handle();

    let producer = {
        let bodies = bodies.clone();
        tokio::spawn(async move {
            for (i, body) in bodies.into_iter().enumerate() {
                sender
                    .send(Event::new(body, Position::new("channel", i as u64, i as u64)))
                    .await
                    .expect("drain is receiving");
            }
            // every event is queued before anyone asks for a close
            handle.close();
        })
    };
    let report = controller.run().await;
    producer.await.expect("producer finishes");

    assert_eq!(StopReason::Closed, report.reason);
    let delivered = sink.delivered();
    let received = report.summary.processed as usize;
    assert_eq!(&bodies[..received], &delivered[..]);
    assert_eq!(received as u64, report.summary.sent);

    let estimator = SizeEstimator::default();
    for batch in sink.batches() {
        assert!(batch.len() <= limits.max_count);
        assert!(batch.len() == 1 || estimator.estimate(&batch) <= limits.max_bytes);
    }
}

#[test_log::test(tokio::test)]
async fn trigger_invocations_share_one_sink() {
    let sink = Arc::new(CollectingSink::default());
    let handler = TriggerHandler::new(
        sink.clone(),
        DrainConfig {
            limits: BatchLimits::new(3, 1 << 20).expect("valid"),
            ..DrainConfig::default()
        },
    );

    for invocation in 0..3u64 {
        let events = (0..4u64).map(|i| {
            Event::new(
                format!("{invocation}-{i}"),
                Position::new("trigger", invocation * 4 + i, i),
            )
        });
        let summary = handler
            .handle(events)
            .await
            .into_result()
            .expect("sink is up");
        assert_eq!(4, summary.sent);
        assert_eq!(2, summary.batches);
    }
    assert_eq!(6, sink.batches().len());
    assert_eq!(12, sink.delivered().len());
}
