//! Function-based stage logics.
//!
//! Small adapters for building stages from closures without naming a type.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::{StageError, StageResult};
use crate::payload::Payload;
use crate::stage::{StageContext, StageLogic};

/// Create a source from a function.
///
/// The function receives the stage context and returns the next data item,
/// or `None` once exhausted. Emitted items are stamped into payloads by the
/// runtime.
pub fn source_fn<F, Fut, T>(f: F) -> FnSource<F, Fut, T>
where
    F: FnMut(StageContext) -> Fut + Send,
    Fut: Future<Output = StageResult<Option<T>>> + Send,
    T: Send + 'static,
{
    FnSource {
        f,
        _phantom: PhantomData,
    }
}

/// A source created from a function.
pub struct FnSource<F, Fut, T>
where
    F: FnMut(StageContext) -> Fut + Send,
    Fut: Future<Output = StageResult<Option<T>>> + Send,
    T: Send + 'static,
{
    f: F,
    _phantom: PhantomData<fn() -> (Fut, T)>,
}

#[async_trait]
impl<F, Fut, T> StageLogic for FnSource<F, Fut, T>
where
    F: FnMut(StageContext) -> Fut + Send,
    Fut: Future<Output = StageResult<Option<T>>> + Send,
    T: Send + 'static,
{
    type Data = T;

    async fn process(
        &mut self,
        ctx: &StageContext,
        _input: Option<Payload<T>>,
    ) -> StageResult<Option<Payload<T>>> {
        let data = (self.f)(ctx.clone()).await?;
        Ok(data.map(|d| ctx.payload(d)))
    }
}

/// Create a transform from a function.
///
/// Returning `Ok(None)` drops the payload without forwarding it.
pub fn transform_fn<F, Fut, T>(f: F) -> FnTransform<F, Fut, T>
where
    F: FnMut(Payload<T>) -> Fut + Send,
    Fut: Future<Output = StageResult<Option<Payload<T>>>> + Send,
    T: Send + 'static,
{
    FnTransform {
        f,
        _phantom: PhantomData,
    }
}

/// A transform created from a function.
pub struct FnTransform<F, Fut, T>
where
    F: FnMut(Payload<T>) -> Fut + Send,
    Fut: Future<Output = StageResult<Option<Payload<T>>>> + Send,
    T: Send + 'static,
{
    f: F,
    _phantom: PhantomData<fn() -> (Fut, T)>,
}

#[async_trait]
impl<F, Fut, T> StageLogic for FnTransform<F, Fut, T>
where
    F: FnMut(Payload<T>) -> Fut + Send,
    Fut: Future<Output = StageResult<Option<Payload<T>>>> + Send,
    T: Send + 'static,
{
    type Data = T;

    async fn process(
        &mut self,
        _ctx: &StageContext,
        input: Option<Payload<T>>,
    ) -> StageResult<Option<Payload<T>>> {
        let payload = input
            .ok_or_else(|| StageError::msg("transform requires an input channel").into_fatal())?;
        (self.f)(payload).await
    }
}

/// Create a sink from a function.
pub fn sink_fn<F, Fut, T>(f: F) -> FnSink<F, Fut, T>
where
    F: FnMut(Payload<T>) -> Fut + Send,
    Fut: Future<Output = StageResult<()>> + Send,
    T: Send + 'static,
{
    FnSink {
        f,
        _phantom: PhantomData,
    }
}

/// A sink created from a function.
pub struct FnSink<F, Fut, T>
where
    F: FnMut(Payload<T>) -> Fut + Send,
    Fut: Future<Output = StageResult<()>> + Send,
    T: Send + 'static,
{
    f: F,
    _phantom: PhantomData<fn() -> (Fut, T)>,
}

#[async_trait]
impl<F, Fut, T> StageLogic for FnSink<F, Fut, T>
where
    F: FnMut(Payload<T>) -> Fut + Send,
    Fut: Future<Output = StageResult<()>> + Send,
    T: Send + 'static,
{
    type Data = T;

    async fn process(
        &mut self,
        _ctx: &StageContext,
        input: Option<Payload<T>>,
    ) -> StageResult<Option<Payload<T>>> {
        let payload = input
            .ok_or_else(|| StageError::msg("sink requires an input channel").into_fatal())?;
        (self.f)(payload).await?;
        Ok(None)
    }
}
