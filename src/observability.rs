use biometrics::{Collector, Counter, Moments};

pub(crate) static SESSION_SENDS: Counter = Counter::new("aibot.session.sends");
pub(crate) static SESSION_VETOES: Counter = Counter::new("aibot.session.vetoes");
pub(crate) static SESSION_STOPS: Counter = Counter::new("aibot.session.stops");
pub(crate) static SESSION_DROPPED_CHUNKS: Counter = Counter::new("aibot.session.dropped_chunks");
pub(crate) static THINKING_MERGES: Counter = Counter::new("aibot.session.thinking_merges");

pub(crate) static STREAM_OPENS: Counter = Counter::new("aibot.stream.opens");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("aibot.stream.errors");
pub(crate) static STREAM_CHUNKS: Counter = Counter::new("aibot.stream.chunks");
pub(crate) static STREAM_BYTES: Counter = Counter::new("aibot.stream.bytes");
pub(crate) static STREAM_DECODE_FALLBACKS: Counter =
    Counter::new("aibot.stream.decode_fallbacks");
pub(crate) static STREAM_DURATION: Moments = Moments::new("aibot.stream.duration_seconds");

pub(crate) static PUSH_CONNECT_ATTEMPTS: Counter = Counter::new("aibot.push.connect_attempts");
pub(crate) static PUSH_RECONNECTS: Counter = Counter::new("aibot.push.reconnects");
pub(crate) static PUSH_EXHAUSTED: Counter = Counter::new("aibot.push.exhausted");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SESSION_SENDS);
    collector.register_counter(&SESSION_VETOES);
    collector.register_counter(&SESSION_STOPS);
    collector.register_counter(&SESSION_DROPPED_CHUNKS);
    collector.register_counter(&THINKING_MERGES);

    collector.register_counter(&STREAM_OPENS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_DECODE_FALLBACKS);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&PUSH_CONNECT_ATTEMPTS);
    collector.register_counter(&PUSH_RECONNECTS);
    collector.register_counter(&PUSH_EXHAUSTED);
}
