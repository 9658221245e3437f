//! Ready-made stage logics.
//!
//! These cover the common ends of a chain (numeric sources, map/filter
//! transforms, collecting and counting sinks) and are what the tests,
//! demos and benches are built from.

use std::marker::PhantomData;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex as TokioMutex;

use crate::error::{StageError, StageResult};
use crate::payload::Payload;
use crate::stage::{StageContext, StageLogic};

fn require_input<T>(input: Option<Payload<T>>) -> StageResult<Payload<T>> {
    input.ok_or_else(|| StageError::msg("stage requires an input channel").into_fatal())
}

/// A source that emits numbers from a range, one per loop iteration.
pub struct RangeSource {
    range: Range<i64>,
}

impl RangeSource {
    /// Create a new range source.
    pub fn new(range: Range<i64>) -> Self {
        Self { range }
    }
}

#[async_trait]
impl StageLogic for RangeSource {
    type Data = i64;

    async fn process(
        &mut self,
        ctx: &StageContext,
        _input: Option<Payload<i64>>,
    ) -> StageResult<Option<Payload<i64>>> {
        Ok(self.range.next().map(|i| ctx.payload(i)))
    }
}

/// A decorator that enforces a minimum interval between emissions of an
/// inner source.
///
/// The pacing sleep races the shutdown token, so a paced source reports
/// exhaustion promptly when the graph stops.
pub struct Paced<S> {
    inner: S,
    interval: Duration,
    last_emitted: Option<Instant>,
}

impl<S> Paced<S> {
    /// Pace `inner` to at most one emission per `interval`.
    pub fn new(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_emitted: None,
        }
    }
}

#[async_trait]
impl<S: StageLogic> StageLogic for Paced<S> {
    type Data = S::Data;

    async fn process(
        &mut self,
        ctx: &StageContext,
        input: Option<Payload<Self::Data>>,
    ) -> StageResult<Option<Payload<Self::Data>>> {
        if let Some(last) = self.last_emitted {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::select! {
                    _ = ctx.shutdown().cancelled() => return Ok(None),
                    _ = tokio::time::sleep(self.interval - elapsed) => {}
                }
            }
        }
        let result = self.inner.process(ctx, input).await;
        self.last_emitted = Some(Instant::now());
        result
    }

    async fn flush(&mut self, ctx: &StageContext) -> StageResult<Vec<Payload<Self::Data>>> {
        self.inner.flush(ctx).await
    }
}

/// A 1-in-1-out transform applying a function to each payload's data.
///
/// The payload envelope (sequence id, creation time, origin) is preserved.
pub struct MapStage<F, T> {
    f: F,
    _phantom: PhantomData<T>,
}

impl<F, T> MapStage<F, T> {
    /// Create a new map stage.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> StageLogic for MapStage<F, T>
where
    F: FnMut(T) -> T + Send,
    T: Send + 'static,
{
    type Data = T;

    async fn process(
        &mut self,
        _ctx: &StageContext,
        input: Option<Payload<T>>,
    ) -> StageResult<Option<Payload<T>>> {
        let payload = require_input(input)?;
        Ok(Some(payload.map(&mut self.f)))
    }
}

/// A stage that forwards only payloads matching a predicate.
pub struct FilterStage<F, T> {
    predicate: F,
    _phantom: PhantomData<T>,
}

impl<F, T> FilterStage<F, T> {
    /// Create a new filter stage.
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> StageLogic for FilterStage<F, T>
where
    F: FnMut(&Payload<T>) -> bool + Send,
    T: Send + 'static,
{
    type Data = T;

    async fn process(
        &mut self,
        _ctx: &StageContext,
        input: Option<Payload<T>>,
    ) -> StageResult<Option<Payload<T>>> {
        let payload = require_input(input)?;
        if (self.predicate)(&payload) {
            Ok(Some(payload))
        } else {
            Ok(None)
        }
    }
}

/// A sink that collects payload data into a shared vector.
pub struct CollectSink<T> {
    items: Arc<TokioMutex<Vec<T>>>,
}

impl<T: Send + 'static> CollectSink<T> {
    /// Create a new collect sink.
    pub fn new() -> Self {
        Self {
            items: Arc::new(TokioMutex::new(Vec::new())),
        }
    }

    /// Get a handle to the collected items for external access.
    pub fn items(&self) -> Arc<TokioMutex<Vec<T>>> {
        self.items.clone()
    }
}

impl<T: Send + 'static> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CollectSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> StageLogic for CollectSink<T> {
    type Data = T;

    async fn process(
        &mut self,
        _ctx: &StageContext,
        input: Option<Payload<T>>,
    ) -> StageResult<Option<Payload<T>>> {
        let payload = require_input(input)?;
        self.items.lock().await.push(payload.data);
        Ok(None)
    }
}

/// A sink that counts consumed payloads.
pub struct CountSink<T> {
    count: Arc<AtomicU64>,
    _phantom: PhantomData<T>,
}

impl<T> CountSink<T> {
    /// Create a new count sink.
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicU64::new(0)),
            _phantom: PhantomData,
        }
    }

    /// Payloads consumed so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl<T> Default for CountSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CountSink<T> {
    fn clone(&self) -> Self {
        Self {
            count: self.count.clone(),
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> StageLogic for CountSink<T> {
    type Data = T;

    async fn process(
        &mut self,
        _ctx: &StageContext,
        input: Option<Payload<T>>,
    ) -> StageResult<Option<Payload<T>>> {
        require_input(input)?;
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }
}
