use biometrics::{Collector, Counter};

pub(crate) static STREAMS_STARTED: Counter = Counter::new("campanile.stream.started");
pub(crate) static STREAMS_COMPLETED: Counter = Counter::new("campanile.stream.completed");
pub(crate) static STREAMS_CANCELLED: Counter = Counter::new("campanile.stream.cancelled");
pub(crate) static STREAMS_ERRORED: Counter = Counter::new("campanile.stream.errored");
pub(crate) static STREAM_CHUNKS: Counter = Counter::new("campanile.stream.chunks");
pub(crate) static STREAM_PAUSES: Counter = Counter::new("campanile.stream.pauses");

pub(crate) static FRAMES_PARSED: Counter = Counter::new("campanile.frame.parsed");
pub(crate) static FRAMES_DROPPED: Counter = Counter::new("campanile.frame.dropped");
pub(crate) static STALE_WRITES: Counter = Counter::new("campanile.log.stale_writes");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&STREAMS_STARTED);
    collector.register_counter(&STREAMS_COMPLETED);
    collector.register_counter(&STREAMS_CANCELLED);
    collector.register_counter(&STREAMS_ERRORED);
    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_PAUSES);

    collector.register_counter(&FRAMES_PARSED);
    collector.register_counter(&FRAMES_DROPPED);
    collector.register_counter(&STALE_WRITES);
}
