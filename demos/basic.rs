//! Basic usage walkthrough.
//!
//! Run with: cargo run --example basic

use std::time::Duration;

use framepipe::prelude::*;

/// Example 1: a three-stage chain run to natural completion.
async fn range_example() -> Result<()> {
    println!("=== Range -> Double -> Print ===");

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(20));
    graph.add_stage("range", RangeSource::new(1..11))?;
    graph.add_stage("double", MapStage::new(|x: i64| x * 2))?;
    graph.add_stage(
        "print",
        sink_fn(|p: Payload<i64>| async move {
            println!("#{:>2}  {}", p.sequence_id, p.data);
            Ok(())
        }),
    )?;
    graph.link("range", "double", 4)?;
    graph.link("double", "print", 4)?;

    graph.start()?;
    graph.join(Duration::from_secs(5)).await?;

    println!();
    Ok(())
}

/// Example 2: a fast producer against a tiny channel; drops are counted,
/// order is preserved.
async fn backpressure_example() -> Result<()> {
    println!("=== Backpressure with drop-oldest ===");

    let sink = CollectSink::new();
    let collected = sink.items();

    let mut graph = PipelineGraph::new().control_poll_interval(Duration::from_millis(20));
    graph.add_stage("burst", RangeSource::new(0..1000))?;
    graph.add_stage(
        "slow",
        transform_fn(|p: Payload<i64>| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(Some(p))
        }),
    )?;
    graph.add_stage("collect", sink)?;
    graph.link("burst", "slow", 8)?;
    graph.link("slow", "collect", 8)?;

    graph.start()?;
    graph.join(Duration::from_secs(30)).await?;

    let values = collected.lock().await;
    println!("kept {} of 1000 payloads", values.len());
    for (name, stats) in graph.channel_stats() {
        println!(
            "{name}: delivered={} dropped={}",
            stats.delivered, stats.dropped
        );
    }

    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    range_example().await?;
    backpressure_example().await?;
    Ok(())
}
