//! The unit of data flowing through a pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A payload moving through the pipeline.
///
/// The runtime treats `data` as opaque; everything it needs for ordering,
/// provenance and staleness lives in the envelope. Sequence ids are assigned
/// at creation from the owning graph's counter and are strictly increasing
/// within a single pipeline run.
#[derive(Debug, Clone)]
pub struct Payload<T> {
    /// Monotonic counter assigned at creation, never reused within a run.
    pub sequence_id: u64,
    /// When the payload was created.
    pub created_at: Instant,
    /// Name of the stage that created the payload.
    pub origin_stage: Arc<str>,
    /// Application data, opaque to the runtime.
    pub data: T,
}

impl<T> Payload<T> {
    pub(crate) fn stamped(sequence_id: u64, origin_stage: Arc<str>, data: T) -> Self {
        Self {
            sequence_id,
            created_at: Instant::now(),
            origin_stage,
            data,
        }
    }

    /// Transform the data while keeping the envelope.
    ///
    /// 1-in-1-out transforms use this so sequence ids and creation times
    /// survive to the sink, keeping end-to-end ordering observable.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Payload<U> {
        Payload {
            sequence_id: self.sequence_id,
            created_at: self.created_at,
            origin_stage: self.origin_stage,
            data: f(self.data),
        }
    }

    /// Elapsed time since the payload was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_preserves_envelope() {
        let payload = Payload::stamped(7, Arc::from("camera"), 21i64);
        let created = payload.created_at;

        let doubled = payload.map(|v| v * 2);

        assert_eq!(doubled.sequence_id, 7);
        assert_eq!(doubled.created_at, created);
        assert_eq!(&*doubled.origin_stage, "camera");
        assert_eq!(doubled.data, 42);
    }

    #[test]
    fn age_grows() {
        let payload = Payload::stamped(0, Arc::from("s"), ());
        std::thread::sleep(Duration::from_millis(5));
        assert!(payload.age() >= Duration::from_millis(5));
    }
}
