//! Cooperative shutdown of a free-running pipeline.
//!
//! Run with: cargo run --example shutdown

use std::time::Duration;

use framepipe::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let sink = CountSink::<u64>::new();
    let counter = sink.clone();

    let mut frame_no = 0u64;
    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(50));
    graph.add_stage(
        "camera",
        Paced::new(
            source_fn(move |_ctx: StageContext| {
                frame_no += 1;
                let n = frame_no;
                async move { Ok(Some(n)) }
            }),
            Duration::from_millis(10),
        ),
    )?;
    graph.add_stage(
        "analyze",
        transform_fn(|p: Payload<u64>| async move {
            // Stand-in for per-frame work.
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Some(p))
        }),
    )?;
    graph.add_stage("record", sink)?;
    graph.link("camera", "analyze", 16)?;
    graph.link("analyze", "record", 16)?;

    graph.start()?;
    println!("pipeline running; stopping in 2s");
    tokio::time::sleep(Duration::from_secs(2)).await;

    graph.stop(Duration::from_secs(1)).await?;
    println!("recorded {} frames", counter.count());
    for (name, stats) in graph.channel_stats() {
        println!(
            "{name}: delivered={} dropped={}",
            stats.delivered, stats.dropped
        );
    }
    Ok(())
}
