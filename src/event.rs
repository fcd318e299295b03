//! Typed event records.
//!
//! Every record shares a common header (pid, tid, monotonic timestamp) and
//! carries kind-specific fields. These are observed events of interest fed
//! to the agent, not commands: the tracer builds them on the hot path and
//! the codec turns them into self-length-prefixed frames.

use crate::protocol::{EventType, MethodSource};
use crate::value::Argument;

/// One trace event: common header plus kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub pid: u32,
    pub tid: u32,
    /// Monotonic, implementation-defined epoch. Signed 64-bit.
    pub timestamp: i64,
    pub kind: EventKind,
}

/// The closed set of record kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    ProcessFrequency {
        frequency: u64,
    },
    ProcessType {
        technology_type: String,
        process_type: String,
    },
    BeginTransaction {
        api_key: String,
        technology_type: String,
        process_type: String,
    },
    EndTransaction,
    ProcessEnded,
    ThreadStarted {
        parent_tid: u32,
    },
    ThreadEnded,
    Methodinfo {
        function_id: u32,
        class_name: String,
        method_name: String,
        method_source: MethodSource,
    },
    Begin {
        function_id: u32,
        instance_id: u64,
        arguments: Vec<Argument>,
    },
    End {
        function_id: u32,
        tailcall: bool,
        return_value: Option<Argument>,
    },
    ExceptionThrown {
        exception_id: u64,
        class_name: String,
        correlation_id: String,
    },
    Sql {
        provider: String,
        host: String,
        database: String,
        query: String,
        duration: i64,
    },
    HttpIn {
        url: String,
        verb: String,
        status: u16,
        duration: i64,
    },
    HttpOut {
        url: String,
        verb: String,
        status: u16,
        duration: i64,
    },
}

impl Event {
    pub fn new(pid: u32, tid: u32, timestamp: i64, kind: EventKind) -> Self {
        Self {
            pid,
            tid,
            timestamp,
            kind,
        }
    }

    /// The wire tag for this event's kind.
    pub fn event_type(&self) -> EventType {
        match self.kind {
            EventKind::ProcessFrequency { .. } => EventType::ProcessFrequency,
            EventKind::ProcessType { .. } => EventType::ProcessType,
            EventKind::BeginTransaction { .. } => EventType::BeginTransaction,
            EventKind::EndTransaction => EventType::EndTransaction,
            EventKind::ProcessEnded => EventType::ProcessEnded,
            EventKind::ThreadStarted { .. } => EventType::ThreadStarted,
            EventKind::ThreadEnded => EventType::ThreadEnded,
            EventKind::Methodinfo { .. } => EventType::Methodinfo,
            EventKind::Begin { .. } => EventType::Begin,
            EventKind::End { .. } => EventType::End,
            EventKind::ExceptionThrown { .. } => EventType::ExceptionThrown,
            EventKind::Sql { .. } => EventType::Sql,
            EventKind::HttpIn { .. } => EventType::HttpIn,
            EventKind::HttpOut { .. } => EventType::HttpOut,
        }
    }
}
