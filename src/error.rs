//! Error taxonomy for the profiler pipeline.
//!
//! Only programmer misuse surfaces as `Err`: invalid sink assignment and
//! malformed records handed to `emit`. Capacity conditions (ring buffer
//! full, oversized strings) are reported as booleans or best-effort
//! substitutions because the hot path must never throw into the monitored
//! program, and transport failures are swallowed at the sink boundary.

use thiserror::Error;

/// Fatal, synchronous errors raised by configuration-time API calls.
#[derive(Debug, Error)]
pub enum Error {
    /// Sink misuse: a second, different sink kind on a tracer that already
    /// has one, or a sink that could not be constructed.
    #[error("profiler configuration error: {0}")]
    Config(String),

    /// An event handed to `emit` that is not a recognized, fully-populated
    /// record within protocol domain limits.
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

/// Frame validation failures reported by the decoder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame truncated: needed {needed} bytes, had {have}")]
    Truncated { needed: usize, have: usize },

    #[error("declared frame length {declared} does not match buffer length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown event type tag {0:#04x}")]
    UnknownEventType(u8),

    #[error("unknown value type tag {0:#04x}")]
    UnknownValueType(u8),

    #[error("unknown method source tag {0:#04x}")]
    UnknownMethodSource(u8),

    #[error("invalid string payload: {0}")]
    InvalidString(&'static str),
}
