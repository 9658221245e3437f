//! Integration tests for the bounded pipeline runtime.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use framepipe::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::test]
async fn basic_pipeline_delivers_everything_without_pressure() {
    init_tracing();

    let sink = CountSink::new();
    let counter = sink.clone();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph.add_stage("source", RangeSource::new(0..100)).unwrap();
    graph
        .add_stage("double", MapStage::new(|x: i64| x * 2))
        .unwrap();
    graph.add_stage("count", sink).unwrap();
    graph.link("source", "double", 100).unwrap();
    graph.link("double", "count", 100).unwrap();

    graph.start().unwrap();
    graph.join(Duration::from_secs(5)).await.unwrap();

    assert_eq!(counter.count(), 100);
    assert_eq!(graph.sequence_count(), 100);

    // Roomy channels: everything delivered, nothing dropped.
    for (name, stats) in graph.channel_stats() {
        assert_eq!(stats.delivered, 100, "channel {name}");
        assert_eq!(stats.dropped, 0, "channel {name}");
        assert_eq!(stats.depth, 0, "channel {name}");
    }
}

#[tokio::test]
async fn scenario_order_survives_backpressure_drops() {
    // Source -> Double -> Sink with capacity-2 channels: drops are
    // permitted, reordering and invented values are not.
    let sink = CollectSink::new();
    let collected = sink.items();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph.add_stage("source", RangeSource::new(0..10)).unwrap();
    graph
        .add_stage("double", MapStage::new(|x: i64| x * 2))
        .unwrap();
    graph.add_stage("sink", sink).unwrap();
    graph.link("source", "double", 2).unwrap();
    graph.link("double", "sink", 2).unwrap();

    graph.start().unwrap();
    graph.join(Duration::from_secs(5)).await.unwrap();

    let values = collected.lock().await.clone();
    assert!(!values.is_empty());

    let expected: Vec<i64> = (0..10).map(|i| i * 2).collect();
    for value in &values {
        assert!(expected.contains(value), "unexpected value {value}");
    }
    for pair in values.windows(2) {
        assert!(pair[0] < pair[1], "out of order: {values:?}");
    }
}

#[tokio::test]
async fn filter_stage_drops_without_forwarding() {
    let sink = CollectSink::new();
    let collected = sink.items();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph.add_stage("source", RangeSource::new(1..11)).unwrap();
    graph
        .add_stage("evens", FilterStage::new(|p: &Payload<i64>| p.data % 2 == 0))
        .unwrap();
    graph.add_stage("sink", sink).unwrap();
    graph.link("source", "evens", 16).unwrap();
    graph.link("evens", "sink", 16).unwrap();

    graph.start().unwrap();
    graph.join(Duration::from_secs(5)).await.unwrap();

    assert_eq!(*collected.lock().await, vec![2, 4, 6, 8, 10]);
}

#[tokio::test]
async fn duplicate_stage_name_is_rejected() {
    let mut graph = PipelineGraph::new();
    graph.add_stage("a", RangeSource::new(0..1)).unwrap();
    let err = graph.add_stage("a", RangeSource::new(0..1)).unwrap_err();
    assert!(matches!(err, Error::DuplicateName { name } if name == "a"));
}

#[tokio::test]
async fn link_validates_names_capacity_and_sides() {
    let mut graph = PipelineGraph::new();
    graph.add_stage("a", RangeSource::new(0..1)).unwrap();
    graph.add_stage("b", CountSink::<i64>::new()).unwrap();

    assert!(matches!(
        graph.link("a", "ghost", 2),
        Err(Error::UnknownStage { name }) if name == "ghost"
    ));
    assert!(matches!(graph.link("a", "b", 0), Err(Error::InvalidCapacity)));
    assert!(matches!(
        graph.link("a", "a", 2),
        Err(Error::InvalidTopology { .. })
    ));

    graph.link("a", "b", 2).unwrap();
    assert!(matches!(
        graph.link("a", "b", 2),
        Err(Error::AlreadyLinked { .. })
    ));
}

#[tokio::test]
async fn fan_in_is_unrepresentable() {
    let mut graph = PipelineGraph::new();
    graph.add_stage("a", RangeSource::new(0..1)).unwrap();
    graph.add_stage("b", RangeSource::new(0..1)).unwrap();
    graph.add_stage("sink", CountSink::<i64>::new()).unwrap();

    graph.link("a", "sink", 2).unwrap();
    let err = graph.link("b", "sink", 2).unwrap_err();
    assert!(
        matches!(&err, Error::AlreadyLinked { name, .. } if name == "sink"),
        "{err}"
    );
}

#[tokio::test]
async fn start_rejects_broken_chain_and_launches_nothing() {
    let mut graph = PipelineGraph::new();
    graph.add_stage("source", RangeSource::new(0..10)).unwrap();
    graph
        .add_stage("mid", MapStage::new(|x: i64| x))
        .unwrap();
    graph.add_stage("sink", CountSink::<i64>::new()).unwrap();
    graph.link("source", "mid", 2).unwrap();
    // "mid" -> "sink" never linked.

    let err = graph.start().unwrap_err();
    assert!(matches!(err, Error::InvalidTopology { .. }));

    for stage in ["source", "mid", "sink"] {
        assert_eq!(graph.state(stage).unwrap(), StageState::Idle);
    }
}

#[tokio::test]
async fn start_twice_fails() {
    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph.add_stage("source", RangeSource::new(0..1)).unwrap();
    graph.add_stage("sink", CountSink::<i64>::new()).unwrap();
    graph.link("source", "sink", 2).unwrap();

    graph.start().unwrap();
    assert!(matches!(graph.start(), Err(Error::AlreadyStarted)));
    assert!(matches!(
        graph.add_stage("late", RangeSource::new(0..1)),
        Err(Error::AlreadyStarted)
    ));

    graph.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn stop_before_start_is_a_no_op() {
    let mut graph: PipelineGraph<i64> = PipelineGraph::new();
    graph.stop(Duration::from_millis(10)).await.unwrap();
}

#[tokio::test]
async fn cooperative_stop_is_bounded_by_poll_interval_and_process_time() {
    init_tracing();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(20));
    graph
        .add_stage(
            "source",
            source_fn(|_ctx: StageContext| async move { Ok(Some(1i64)) }),
        )
        .unwrap();
    graph
        .add_stage(
            "slowish",
            transform_fn(|p: Payload<i64>| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Some(p))
            }),
        )
        .unwrap();
    graph.add_stage("sink", CountSink::<i64>::new()).unwrap();
    graph.link("source", "slowish", 4).unwrap();
    graph.link("slowish", "sink", 4).unwrap();

    graph.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let begin = Instant::now();
    graph.stop(Duration::from_secs(1)).await.unwrap();
    // Bound: one poll interval plus one process call, with scheduler slack.
    assert!(begin.elapsed() < Duration::from_millis(750));

    for stage in ["source", "slowish", "sink"] {
        assert_eq!(graph.state(stage).unwrap(), StageState::Stopped);
    }
}

#[tokio::test]
async fn shutdown_timeout_reports_the_straggler() {
    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph
        .add_stage(
            "source",
            source_fn(|_ctx: StageContext| async move { Ok(Some(1i64)) }),
        )
        .unwrap();
    graph
        .add_stage(
            "stuck",
            transform_fn(|p: Payload<i64>| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Some(p))
            }),
        )
        .unwrap();
    graph.add_stage("sink", CountSink::<i64>::new()).unwrap();
    graph.link("source", "stuck", 4).unwrap();
    graph.link("stuck", "sink", 4).unwrap();

    graph.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = graph.stop(Duration::from_millis(100)).await.unwrap_err();
    match err {
        Error::ShutdownTimeout { stages, .. } => assert_eq!(stages, vec!["stuck".to_string()]),
        other => panic!("expected ShutdownTimeout, got {other}"),
    }
}

#[tokio::test]
async fn recoverable_processing_error_drops_only_that_payload() {
    let sink = CollectSink::new();
    let collected = sink.items();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph.add_stage("source", RangeSource::new(0..6)).unwrap();
    graph
        .add_stage(
            "check",
            transform_fn(|p: Payload<i64>| async move {
                if p.data == 3 {
                    Err(StageError::msg("rejected"))
                } else {
                    Ok(Some(p))
                }
            }),
        )
        .unwrap();
    graph.add_stage("sink", sink).unwrap();
    graph.link("source", "check", 16).unwrap();
    graph.link("check", "sink", 16).unwrap();

    graph.start().unwrap();
    graph.join(Duration::from_secs(5)).await.unwrap();

    assert_eq!(*collected.lock().await, vec![0, 1, 2, 4, 5]);
}

#[tokio::test]
async fn fatal_error_stops_the_stage_and_downstream_sees_eos() {
    let sink = CollectSink::<i64>::new();
    let collected = sink.items();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph.add_stage("source", RangeSource::new(0..5)).unwrap();
    graph
        .add_stage(
            "fail",
            transform_fn(|p: Payload<i64>| async move {
                let _ = p;
                Err(StageError::msg("broken").into_fatal())
            }),
        )
        .unwrap();
    graph.add_stage("sink", sink).unwrap();
    graph.link("source", "fail", 16).unwrap();
    graph.link("fail", "sink", 16).unwrap();

    graph.start().unwrap();
    graph.join(Duration::from_secs(5)).await.unwrap();

    // Downstream observed an ordinary end-of-stream, nothing more.
    assert!(collected.lock().await.is_empty());
    assert_eq!(graph.state("sink").unwrap(), StageState::Stopped);
}

#[tokio::test]
async fn pause_and_resume_gate_progress() {
    let sink = CountSink::<i64>::new();
    let counter = sink.clone();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph
        .add_stage(
            "ticker",
            Paced::new(
                source_fn(|_ctx: StageContext| async move { Ok(Some(1i64)) }),
                Duration::from_millis(5),
            ),
        )
        .unwrap();
    graph.add_stage("count", sink).unwrap();
    graph.link("ticker", "count", 8).unwrap();

    graph.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(counter.count() > 0);

    graph.broadcast(ControlSignal::Pause);
    tokio::time::sleep(Duration::from_millis(50)).await; // let the pause land
    let paused_at = counter.count();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        counter.count() <= paused_at + 1,
        "progress while paused: {} -> {}",
        paused_at,
        counter.count()
    );

    graph.broadcast(ControlSignal::Resume);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(counter.count() > paused_at + 1);

    graph.stop(Duration::from_secs(1)).await.unwrap();
}

struct Buffering {
    held: Vec<Payload<i64>>,
}

#[async_trait]
impl StageLogic for Buffering {
    type Data = i64;

    async fn process(
        &mut self,
        _ctx: &StageContext,
        input: Option<Payload<i64>>,
    ) -> StageResult<Option<Payload<i64>>> {
        self.held.push(input.expect("wired as a transform"));
        Ok(None)
    }

    async fn flush(&mut self, _ctx: &StageContext) -> StageResult<Vec<Payload<i64>>> {
        Ok(std::mem::take(&mut self.held))
    }
}

#[tokio::test]
async fn end_of_stream_flushes_buffered_payloads() {
    let sink = CollectSink::new();
    let collected = sink.items();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph.add_stage("source", RangeSource::new(0..5)).unwrap();
    graph.add_stage("hold", Buffering { held: Vec::new() }).unwrap();
    graph.add_stage("sink", sink).unwrap();
    graph.link("source", "hold", 16).unwrap();
    graph.link("hold", "sink", 16).unwrap();

    graph.start().unwrap();
    graph.join(Duration::from_secs(5)).await.unwrap();

    assert_eq!(*collected.lock().await, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn flush_signal_releases_buffered_payloads_mid_run() {
    let sink = CountSink::<i64>::new();
    let counter = sink.clone();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph
        .add_stage(
            "ticker",
            Paced::new(
                source_fn(|_ctx: StageContext| async move { Ok(Some(1i64)) }),
                Duration::from_millis(5),
            ),
        )
        .unwrap();
    graph.add_stage("hold", Buffering { held: Vec::new() }).unwrap();
    graph.add_stage("count", sink).unwrap();
    graph.link("ticker", "hold", 64).unwrap();
    graph.link("hold", "count", 64).unwrap();

    graph.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.count(), 0);

    graph.broadcast(ControlSignal::Flush);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(counter.count() > 0);

    graph.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn targeted_stop_of_the_source_winds_the_chain_down() {
    let sink = CountSink::<i64>::new();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph
        .add_stage(
            "source",
            source_fn(|_ctx: StageContext| async move { Ok(Some(1i64)) }),
        )
        .unwrap();
    graph.add_stage("sink", sink).unwrap();
    graph.link("source", "sink", 8).unwrap();

    graph.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    graph.request_stop("source").unwrap();
    graph.join(Duration::from_secs(2)).await.unwrap();

    assert_eq!(graph.state("source").unwrap(), StageState::Stopped);
    assert_eq!(graph.state("sink").unwrap(), StageState::Stopped);
}

#[tokio::test]
async fn stop_requested_while_idle_takes_effect_on_start() {
    let sink = CountSink::<i64>::new();
    let counter = sink.clone();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph
        .add_stage(
            "source",
            source_fn(|_ctx: StageContext| async move { Ok(Some(1i64)) }),
        )
        .unwrap();
    graph.add_stage("sink", sink).unwrap();
    graph.link("source", "sink", 8).unwrap();

    // Queued before start: the run loop polls control before touching data.
    graph.request_stop("source").unwrap();
    graph.request_stop("sink").unwrap();

    graph.start().unwrap();
    graph.join(Duration::from_secs(2)).await.unwrap();

    assert_eq!(counter.count(), 0);
}

#[tokio::test]
async fn channel_stats_are_labeled_by_link() {
    let mut graph = PipelineGraph::new();
    graph.add_stage("a", RangeSource::new(0..1)).unwrap();
    graph.add_stage("b", CountSink::<i64>::new()).unwrap();
    graph.link("a", "b", 2).unwrap();

    let stats = graph.channel_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].0, "a->b");
}

#[tokio::test]
async fn single_stage_graph_is_a_valid_chain() {
    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(10));
    graph.add_stage("only", RangeSource::new(0..3)).unwrap();

    graph.start().unwrap();
    graph.join(Duration::from_secs(2)).await.unwrap();
    assert_eq!(graph.state("only").unwrap(), StageState::Stopped);
}
