//! Wire protocol constants and tags.
//!
//! Data layout of the wire protocol shared with the local agent. Frames are
//! little-endian and self-length-prefixed; the numeric tags below are fixed
//! by the agent and must never be renumbered.

/// Maximum encoded byte length of a regular (2-byte length prefixed) string.
pub const MAX_STRING_SIZE: usize = 4096;
/// Maximum encoded byte length of a short (1-byte length prefixed) string.
pub const MAX_SHORT_STRING_SIZE: usize = 127;
/// Byte length of the common frame header: length + type + pid + tid + timestamp.
pub const MIN_PAYLOAD: usize = 19;
/// Maximum byte length of an argument/return value name.
pub const MAX_VARIABLE_NAME: usize = 200;
/// Maximum number of arguments carried by a Begin frame.
pub const MAX_ARGS: usize = 16;
/// Hard ceiling on a single encoded frame. Encoders substitute a trimmed
/// largestring placeholder rather than ever exceeding this.
pub const MAX_FRAME_SIZE: usize = 4608;

/// Shadow stack depth after which Begin emission stops for deeper frames.
pub const SHADOW_STACK_LIMIT: usize = 256;
/// Default transport ring buffer capacity in bytes.
pub const RING_BUFFER_SIZE: usize = 10 * 1024 * 1024;
/// UDP datagram budget; also used as the socket send-buffer size.
pub const BATCH_PACKET_SIZE: usize = 1400;
/// How long the flusher thread sleeps when the ring buffer is empty.
pub const SINK_THREAD_TICK: std::time::Duration = std::time::Duration::from_micros(100);
/// Grace period for draining buffered frames on shutdown.
pub const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Timestamp resolution reported to the agent via ProcessFrequency.
pub const TIMESTAMP_UNITS_PER_SECOND: u64 = 1_000_000;

/// Event type tags as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    Begin = 0x01,
    End = 0x02,
    ThreadEnded = 0x08,
    ProcessEnded = 0x0A,
    ProcessFrequency = 0x0B,
    ProcessType = 0x0C,
    Methodinfo = 0x0F,
    BeginTransaction = 0x10,
    EndTransaction = 0x11,
    ExceptionThrown = 0x12,
    ThreadStarted = 0x13,
    Sql = 0x64,
    HttpIn = 0x65,
    HttpOut = 0x66,
}

impl EventType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => Self::Begin,
            0x02 => Self::End,
            0x08 => Self::ThreadEnded,
            0x0A => Self::ProcessEnded,
            0x0B => Self::ProcessFrequency,
            0x0C => Self::ProcessType,
            0x0F => Self::Methodinfo,
            0x10 => Self::BeginTransaction,
            0x11 => Self::EndTransaction,
            0x12 => Self::ExceptionThrown,
            0x13 => Self::ThreadStarted,
            0x64 => Self::Sql,
            0x65 => Self::HttpIn,
            0x66 => Self::HttpOut,
            _ => return None,
        })
    }
}

/// Value type tags for argument/return value blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Void = 0x01,
    Boolean = 0x02,
    Int16 = 0x04,
    UInt16 = 0x05,
    Int32 = 0x06,
    UInt32 = 0x07,
    Int64 = 0x08,
    UInt64 = 0x09,
    String = 0x0C,
    LargeString = 0x13,
}

/// String encoding tags. Only UTF-8 (event field strings) and UTF-16LE
/// (argument/return value strings) are produced by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StringEncoding {
    Utf16Le = 0x01,
    Utf16Be = 0x02,
    Ascii = 0x03,
    Utf7 = 0x04,
    Utf8 = 0x05,
    Utf32Le = 0x06,
}

/// Classification of an instrumented method, carried by Methodinfo frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MethodSource {
    #[default]
    UserCode = 0x0,
    System = 0x1,
    KnownLibrary = 0x2,
    WaitForUserInput = 0x3,
    WaitForSynchronization = 0x4,
    JitCompilation = 0x5,
    GarbageCollection = 0x6,
}

impl MethodSource {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x0 => Self::UserCode,
            0x1 => Self::System,
            0x2 => Self::KnownLibrary,
            0x3 => Self::WaitForUserInput,
            0x4 => Self::WaitForSynchronization,
            0x5 => Self::JitCompilation,
            0x6 => Self::GarbageCollection,
            _ => return None,
        })
    }
}
