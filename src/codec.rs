//! Binary event codec.
//!
//! Serializes typed event records into self-describing frames and back.
//!
//! # Frame layout
//!
//! ```text
//! [length: u16 LE][type: u8][pid: u32 LE][tid: u32 LE][timestamp: i64 LE]
//! [kind-specific fields...]
//! ```
//!
//! The 19-byte header is common to every kind. `length` is the exact total
//! byte length of the frame: the header never lies about payload size, so a
//! consumer can walk a concatenated stream (TCP) or validate a datagram
//! (UDP) without an external length table.
//!
//! # Strings
//!
//! Event field strings are UTF-8 with a 2-byte length prefix, capped at
//! [`MAX_STRING_SIZE`] and at the remaining frame budget, truncated at a
//! char boundary. SQL fields carry a leading encoding tag byte. HTTP verbs are short strings with a 1-byte
//! length prefix capped at [`MAX_SHORT_STRING_SIZE`]. Argument and return
//! value strings travel as UTF-16LE inside variable blocks; a value string
//! that would push the whole frame over [`MAX_FRAME_SIZE`] is substituted
//! with a trimmed largestring placeholder instead.
//!
//! Encoding is infallible for events within their declared domains; the
//! orchestrator's `emit` boundary is where out-of-domain records are
//! rejected (see [`validate`]).

use crate::error::DecodeError;
use crate::event::{Event, EventKind};
use crate::protocol::{
    EventType, MethodSource, StringEncoding, ValueType, MAX_ARGS, MAX_FRAME_SIZE,
    MAX_SHORT_STRING_SIZE, MAX_STRING_SIZE, MAX_VARIABLE_NAME, MIN_PAYLOAD,
};
use crate::value::{from_utf16le, to_utf16le, Argument, Value};

/// Encode an event into one wire frame.
///
/// Never exceeds [`MAX_FRAME_SIZE`]: oversized field strings are truncated
/// and oversized value strings become largestring placeholders. Argument
/// lists are capped at [`MAX_ARGS`] (longer lists are a programmer error
/// caught by [`validate`] at the `emit` boundary).
pub fn encode(event: &Event) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&[0, 0]); // length backpatched below
    buf.push(event.event_type() as u8);
    buf.extend_from_slice(&event.pid.to_le_bytes());
    buf.extend_from_slice(&event.tid.to_le_bytes());
    buf.extend_from_slice(&event.timestamp.to_le_bytes());

    match &event.kind {
        EventKind::ProcessFrequency { frequency } => {
            buf.extend_from_slice(&frequency.to_le_bytes());
        }
        EventKind::ProcessType {
            technology_type,
            process_type,
        } => {
            // Each tail reserves the length prefixes of the fields after it.
            put_string(&mut buf, technology_type, 2);
            put_string(&mut buf, process_type, 0);
        }
        EventKind::BeginTransaction {
            api_key,
            technology_type,
            process_type,
        } => {
            put_string(&mut buf, api_key, 4);
            put_string(&mut buf, technology_type, 2);
            put_string(&mut buf, process_type, 0);
        }
        EventKind::EndTransaction | EventKind::ProcessEnded | EventKind::ThreadEnded => {}
        EventKind::ThreadStarted { parent_tid } => {
            buf.extend_from_slice(&parent_tid.to_le_bytes());
        }
        EventKind::Methodinfo {
            function_id,
            class_name,
            method_name,
            method_source,
        } => {
            buf.extend_from_slice(&function_id.to_le_bytes());
            put_string(&mut buf, class_name, 3);
            put_string(&mut buf, method_name, 1);
            buf.push(*method_source as u8);
        }
        EventKind::Begin {
            function_id,
            instance_id,
            arguments,
        } => {
            buf.extend_from_slice(&function_id.to_le_bytes());
            buf.extend_from_slice(&instance_id.to_le_bytes());
            let argc = arguments.len().min(MAX_ARGS);
            buf.push(argc as u8);
            for argument in &arguments[..argc] {
                put_variable(&mut buf, argument);
            }
        }
        EventKind::End {
            function_id,
            tailcall,
            return_value,
        } => {
            buf.extend_from_slice(&function_id.to_le_bytes());
            buf.push(u8::from(*tailcall));
            match return_value {
                Some(argument) => put_variable(&mut buf, argument),
                None => put_void_return(&mut buf),
            }
        }
        EventKind::ExceptionThrown {
            exception_id,
            class_name,
            correlation_id,
        } => {
            buf.extend_from_slice(&exception_id.to_le_bytes());
            put_string(&mut buf, class_name, 2);
            put_string(&mut buf, correlation_id, 0);
        }
        EventKind::Sql {
            provider,
            host,
            database,
            query,
            duration,
        } => {
            // Tails reserve the remaining tagged-string scaffolding plus
            // the trailing duration.
            put_tagged_string(&mut buf, provider, 17);
            put_tagged_string(&mut buf, host, 14);
            put_tagged_string(&mut buf, database, 11);
            put_tagged_string(&mut buf, query, 8);
            buf.extend_from_slice(&duration.to_le_bytes());
        }
        EventKind::HttpIn {
            url,
            verb,
            status,
            duration,
        }
        | EventKind::HttpOut {
            url,
            verb,
            status,
            duration,
        } => {
            put_string(&mut buf, url, 1 + MAX_SHORT_STRING_SIZE + 10);
            put_short_string(&mut buf, verb);
            buf.extend_from_slice(&status.to_le_bytes());
            buf.extend_from_slice(&duration.to_le_bytes());
        }
    }

    debug_assert!(buf.len() >= MIN_PAYLOAD && buf.len() <= MAX_FRAME_SIZE);
    let length = buf.len() as u16;
    buf[0..2].copy_from_slice(&length.to_le_bytes());
    buf
}

/// Validate that an event is a recognized, fully-populated record within
/// protocol domain limits. This is the structural-error boundary used by
/// the orchestrator's `emit`.
pub fn validate(event: &Event) -> Result<(), String> {
    match &event.kind {
        EventKind::Begin { arguments, .. } => {
            if arguments.len() > MAX_ARGS {
                return Err(format!(
                    "Begin carries {} arguments, protocol maximum is {}",
                    arguments.len(),
                    MAX_ARGS
                ));
            }
            for argument in arguments {
                validate_argument(argument)?;
            }
        }
        EventKind::End {
            return_value: Some(argument),
            ..
        } => validate_argument(argument)?,
        EventKind::HttpIn { verb, .. } | EventKind::HttpOut { verb, .. } => {
            if verb.is_empty() {
                return Err("HTTP event with empty verb".to_string());
            }
        }
        EventKind::Sql { provider, .. } => {
            if provider.is_empty() {
                return Err("SQL event with empty provider".to_string());
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_argument(argument: &Argument) -> Result<(), String> {
    if argument.name.len() > MAX_VARIABLE_NAME {
        return Err(format!(
            "variable name '{}...' exceeds {} bytes",
            &argument.name[..32.min(argument.name.len())],
            MAX_VARIABLE_NAME
        ));
    }
    Ok(())
}

// --- encoding helpers ---

/// Truncate to at most `max` bytes without splitting a UTF-8 char.
fn utf8_prefix(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// `[len: u16 LE][UTF-8 bytes]`, capped at MAX_STRING_SIZE and at the
/// remaining frame budget. `tail` reserves room for the fixed bytes of the
/// fields still to be written, so a frame with several long fields stays
/// under MAX_FRAME_SIZE.
fn put_string(buf: &mut Vec<u8>, s: &str, tail: usize) {
    let budget = MAX_FRAME_SIZE
        .saturating_sub(buf.len() + 2 + tail)
        .min(MAX_STRING_SIZE);
    let bytes = utf8_prefix(s, budget).as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// `[encoding: u8][len: u16 LE][UTF-8 bytes]` for SQL fields.
fn put_tagged_string(buf: &mut Vec<u8>, s: &str, tail: usize) {
    buf.push(StringEncoding::Utf8 as u8);
    put_string(buf, s, tail);
}

/// `[len: u8][UTF-8 bytes]`, capped at MAX_SHORT_STRING_SIZE.
fn put_short_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = utf8_prefix(s, MAX_SHORT_STRING_SIZE).as_bytes();
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
}

/// The void return value block emitted when a frame exits without a
/// representable return value.
fn put_void_return(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.push(ValueType::Void as u8);
    buf.push(0); // name length
}

/// One variable block: `[block_len: u16][type: u8][name_len: u8][name][value]`.
/// `block_len` counts everything after itself.
fn put_variable(buf: &mut Vec<u8>, argument: &Argument) {
    let name = utf8_prefix(&argument.name, MAX_VARIABLE_NAME).as_bytes();

    let (value_type, value_bytes): (ValueType, Vec<u8>) = match &argument.value {
        Value::Bool(v) => (ValueType::Boolean, vec![u8::from(*v)]),
        Value::I16(v) => (ValueType::Int16, v.to_le_bytes().to_vec()),
        Value::U16(v) => (ValueType::UInt16, v.to_le_bytes().to_vec()),
        Value::I32(v) => (ValueType::Int32, v.to_le_bytes().to_vec()),
        Value::U32(v) => (ValueType::UInt32, v.to_le_bytes().to_vec()),
        Value::I64(v) => (ValueType::Int64, v.to_le_bytes().to_vec()),
        Value::U64(v) => (ValueType::UInt64, v.to_le_bytes().to_vec()),
        Value::Str(s) | Value::Symbol(s) | Value::Unrepresentable(s) => {
            let wide = to_utf16le(s);
            // Frame budget left once the block scaffolding is written:
            // block_len(2) + type(1) + name_len(1) + name + string prefix.
            let overhead = 2 + 1 + 1 + name.len();
            let budget = MAX_FRAME_SIZE.saturating_sub(buf.len() + overhead);
            if wide.len() >= MAX_STRING_SIZE || wide.len() + 2 > budget {
                // Largestring placeholder: u32 length prefix, payload trimmed
                // to the frame budget and to an even (code unit) boundary.
                let mut keep = wide.len().min(MAX_STRING_SIZE);
                keep = keep.min(budget.saturating_sub(4));
                keep &= !1;
                let mut bytes = Vec::with_capacity(4 + keep);
                bytes.extend_from_slice(&(keep as u32).to_le_bytes());
                bytes.extend_from_slice(&wide[..keep]);
                (ValueType::LargeString, bytes)
            } else {
                let mut bytes = Vec::with_capacity(2 + wide.len());
                bytes.extend_from_slice(&(wide.len() as u16).to_le_bytes());
                bytes.extend_from_slice(&wide);
                (ValueType::String, bytes)
            }
        }
    };

    let block_len = 1 + 1 + name.len() + value_bytes.len();
    buf.extend_from_slice(&(block_len as u16).to_le_bytes());
    buf.push(value_type as u8);
    buf.push(name.len() as u8);
    buf.extend_from_slice(name);
    buf.extend_from_slice(&value_bytes);
}

// --- decoding ---

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() - self.pos < n {
            return Err(DecodeError::Truncated {
                needed: n,
                have: self.buf.len() - self.pos,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(u64::from_le_bytes(bytes))
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        Ok(self.u64()? as i64)
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DecodeError::InvalidString("event field is not valid UTF-8"))
    }

    fn tagged_string(&mut self) -> Result<String, DecodeError> {
        let _encoding = self.u8()?;
        self.string()
    }

    fn short_string(&mut self) -> Result<String, DecodeError> {
        let len = self.u8()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DecodeError::InvalidString("short string is not valid UTF-8"))
    }

    /// One variable block. Returns None for a void return value block.
    fn variable(&mut self) -> Result<Option<Argument>, DecodeError> {
        let block_len = self.u16()? as usize;
        let mut block = Reader::new(self.take(block_len)?);
        let tag = block.u8()?;
        let name_len = block.u8()? as usize;
        let name_bytes = block.take(name_len)?;
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|_| DecodeError::InvalidString("variable name is not valid UTF-8"))?;

        let value = match tag {
            t if t == ValueType::Void as u8 => return Ok(None),
            t if t == ValueType::Boolean as u8 => Value::Bool(block.u8()? != 0),
            t if t == ValueType::Int16 as u8 => Value::I16(block.u16()? as i16),
            t if t == ValueType::UInt16 as u8 => Value::U16(block.u16()?),
            t if t == ValueType::Int32 as u8 => Value::I32(block.u32()? as i32),
            t if t == ValueType::UInt32 as u8 => Value::U32(block.u32()?),
            t if t == ValueType::Int64 as u8 => Value::I64(block.i64()?),
            t if t == ValueType::UInt64 as u8 => Value::U64(block.u64()?),
            t if t == ValueType::String as u8 => {
                let len = block.u16()? as usize;
                Value::Str(from_utf16le(block.take(len)?))
            }
            t if t == ValueType::LargeString as u8 => {
                let len = block.u32()? as usize;
                Value::Str(from_utf16le(block.take(len)?))
            }
            other => return Err(DecodeError::UnknownValueType(other)),
        };
        Ok(Some(Argument { name, value }))
    }
}

/// Decode one wire frame back into a typed event.
///
/// The buffer must contain exactly one frame; the declared length is
/// checked against the buffer length. Symbols and unrepresentable values
/// come back as plain strings since the wire format does not distinguish
/// them.
pub fn decode(buf: &[u8]) -> Result<Event, DecodeError> {
    let mut r = Reader::new(buf);
    let declared = r.u16()? as usize;
    if declared != buf.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: buf.len(),
        });
    }
    let tag = r.u8()?;
    let event_type = EventType::from_tag(tag).ok_or(DecodeError::UnknownEventType(tag))?;
    let pid = r.u32()?;
    let tid = r.u32()?;
    let timestamp = r.i64()?;

    let kind = match event_type {
        EventType::ProcessFrequency => EventKind::ProcessFrequency {
            frequency: r.u64()?,
        },
        EventType::ProcessType => EventKind::ProcessType {
            technology_type: r.string()?,
            process_type: r.string()?,
        },
        EventType::BeginTransaction => EventKind::BeginTransaction {
            api_key: r.string()?,
            technology_type: r.string()?,
            process_type: r.string()?,
        },
        EventType::EndTransaction => EventKind::EndTransaction,
        EventType::ProcessEnded => EventKind::ProcessEnded,
        EventType::ThreadStarted => EventKind::ThreadStarted {
            parent_tid: r.u32()?,
        },
        EventType::ThreadEnded => EventKind::ThreadEnded,
        EventType::Methodinfo => {
            let function_id = r.u32()?;
            let class_name = r.string()?;
            let method_name = r.string()?;
            let source_tag = r.u8()?;
            EventKind::Methodinfo {
                function_id,
                class_name,
                method_name,
                method_source: MethodSource::from_tag(source_tag)
                    .ok_or(DecodeError::UnknownMethodSource(source_tag))?,
            }
        }
        EventType::Begin => {
            let function_id = r.u32()?;
            let instance_id = r.u64()?;
            let argc = r.u8()? as usize;
            let mut arguments = Vec::with_capacity(argc);
            for _ in 0..argc {
                if let Some(argument) = r.variable()? {
                    arguments.push(argument);
                }
            }
            EventKind::Begin {
                function_id,
                instance_id,
                arguments,
            }
        }
        EventType::End => EventKind::End {
            function_id: r.u32()?,
            tailcall: r.u8()? != 0,
            return_value: r.variable()?,
        },
        EventType::ExceptionThrown => EventKind::ExceptionThrown {
            exception_id: r.u64()?,
            class_name: r.string()?,
            correlation_id: r.string()?,
        },
        EventType::Sql => EventKind::Sql {
            provider: r.tagged_string()?,
            host: r.tagged_string()?,
            database: r.tagged_string()?,
            query: r.tagged_string()?,
            duration: r.i64()?,
        },
        EventType::HttpIn => EventKind::HttpIn {
            url: r.string()?,
            verb: r.short_string()?,
            status: r.u16()?,
            duration: r.i64()?,
        },
        EventType::HttpOut => EventKind::HttpOut {
            url: r.string()?,
            verb: r.short_string()?,
            status: r.u16()?,
            duration: r.i64()?,
        },
    };

    if r.pos != buf.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: r.pos,
        });
    }

    Ok(Event {
        pid,
        tid,
        timestamp,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02X}")).collect()
    }

    #[test]
    fn test_begin_no_arguments_is_32_bytes() {
        let event = Event::new(
            0x4268,
            0x2614,
            0x0000_0293_F830_8E56,
            EventKind::Begin {
                function_id: 2,
                instance_id: 0x02FE_24DC,
                arguments: vec![],
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), 32);
        assert_eq!(
            hex(&frame),
            "2000016842000014260000568E30F89302000002000000DC24FE020000000000"
        );
    }

    #[test]
    fn test_begin_with_arguments() {
        let event = Event::new(
            0x4268,
            0x2614,
            0x0000_0293_F830_8E56,
            EventKind::Begin {
                function_id: 2,
                instance_id: 0x02FE_24DC,
                arguments: vec![
                    Argument::new("host", "localhost"),
                    Argument::new("port", Value::from_u64(6379)),
                ],
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), 70);
        assert_eq!(
            hex(&frame),
            "4600016842000014260000568E30F89302000002000000DC24FE020000000002\
             1A000C04686F737412006C006F00630061006C0068006F007300740008000504706F7274EB18"
                .replace(' ', "")
        );
    }

    #[test]
    fn test_end_uint32_return_value() {
        let event = Event::new(
            0x4268,
            0x2614,
            0x0000_0293_F830_D78D,
            EventKind::End {
                function_id: 2,
                tailcall: false,
                return_value: Some(Argument::return_value(Value::from_i64(50_216_688))),
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), 43);
        assert_eq!(
            hex(&frame),
            "2B000268420000142600008DD730F89302000002000000001100070B72657475726E56616C7565F03EFE02"
        );
    }

    #[test]
    fn test_end_smallest_fit_boundaries() {
        let cases: &[(i64, &str, usize)] = &[
            (-32768, "0F00040B72657475726E56616C75650080", 41),
            (0, "0F00050B72657475726E56616C75650000", 41),
            (65535, "0F00050B72657475726E56616C7565FFFF", 41),
            (
                i64::from(i32::MIN),
                "1100060B72657475726E56616C756500000080",
                43,
            ),
            (
                i64::from(u32::MAX),
                "1100070B72657475726E56616C7565FFFFFFFF",
                43,
            ),
            (
                i64::MIN,
                "1500080B72657475726E56616C75650000000000000080",
                47,
            ),
        ];
        for (value, block_hex, frame_len) in cases {
            let event = Event::new(
                0x4268,
                0x2614,
                0x0000_0293_F830_D78D,
                EventKind::End {
                    function_id: 2,
                    tailcall: false,
                    return_value: Some(Argument::return_value(Value::from_i64(*value))),
                },
            );
            let frame = encode(&event);
            assert_eq!(frame.len(), *frame_len, "frame length for {value}");
            assert!(hex(&frame).ends_with(block_hex), "block bytes for {value}");
        }
    }

    #[test]
    fn test_end_void_return_value() {
        let event = Event::new(
            1,
            1,
            0,
            EventKind::End {
                function_id: 7,
                tailcall: true,
                return_value: None,
            },
        );
        let frame = encode(&event);
        // header + function_id + tailcall + [0200][01][00]
        assert_eq!(frame.len(), 28);
        assert!(hex(&frame).ends_with("020001 00".replace(' ', "").as_str()));
        let decoded = decode(&frame).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_begin_transaction_frame() {
        let event = Event::new(
            39441,
            12,
            1_547_463_470_598_444,
            EventKind::BeginTransaction {
                api_key: "sekrit".to_string(),
                technology_type: "Rust".to_string(),
                process_type: "Standalone".to_string(),
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), 45);
        assert_eq!(
            hex(&frame),
            "2D0010119A00000C0000002CC977EA687F0500060073656B7269740400527573740A005374616E64616C6F6E65"
        );
    }

    #[test]
    fn test_sql_frame() {
        let event = Event::new(
            39441,
            0,
            1_547_463_470_598_444,
            EventKind::Sql {
                provider: "postgres".to_string(),
                host: "localhost".to_string(),
                database: "rails".to_string(),
                query: "SELECT * from FOO;".to_string(),
                duration: 1000,
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), 79);
        assert_eq!(
            hex(&frame),
            "4F0064119A0000000000002CC977EA687F0500050800706F73746772657305\
             09006C6F63616C686F73740505007261696C7305120053454C454354202A2066726F6D20464F4F3BE803000000000000"
                .replace(' ', "")
        );
    }

    #[test]
    fn test_sql_oversized_query_truncated() {
        for query_len in [5_000usize, 40_000] {
            let event = Event::new(
                39441,
                0,
                1_547_463_470_598_444,
                EventKind::Sql {
                    provider: "postgres".to_string(),
                    host: "localhost".to_string(),
                    database: "rails".to_string(),
                    query: "a".repeat(query_len),
                    duration: 1000,
                },
            );
            let frame = encode(&event);
            // 19 header + 11 provider + 12 host + 8 database + (3 + 4096) query + 8 duration
            assert_eq!(frame.len(), 4157);
            assert!(frame.len() <= MAX_FRAME_SIZE);
        }
    }

    #[test]
    fn test_sql_with_every_field_long_stays_under_ceiling() {
        // Several maximum-length fields must share the frame budget, not
        // stack up past it.
        let event = Event::new(
            39441,
            0,
            1_547_463_470_598_444,
            EventKind::Sql {
                provider: "p".repeat(MAX_STRING_SIZE),
                host: "h".repeat(MAX_STRING_SIZE),
                database: "d".repeat(MAX_STRING_SIZE),
                query: "q".repeat(MAX_STRING_SIZE),
                duration: 1000,
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), MAX_FRAME_SIZE);
        let declared = u16::from_le_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(declared, frame.len());
        match decode(&frame).unwrap().kind {
            EventKind::Sql {
                provider,
                host,
                database,
                query,
                duration,
            } => {
                // First field keeps its full cap, later ones get what is left.
                assert_eq!(provider.len(), MAX_STRING_SIZE);
                assert_eq!(host.len(), 473);
                assert_eq!(database.len(), 0);
                assert_eq!(query.len(), 0);
                assert_eq!(duration, 1000);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_exception_with_two_long_fields_stays_under_ceiling() {
        let event = Event::new(
            39441,
            0,
            1_547_463_470_598_444,
            EventKind::ExceptionThrown {
                exception_id: 7,
                class_name: "C".repeat(MAX_STRING_SIZE),
                correlation_id: "c".repeat(MAX_STRING_SIZE),
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), MAX_FRAME_SIZE);
        match decode(&frame).unwrap().kind {
            EventKind::ExceptionThrown {
                class_name,
                correlation_id,
                ..
            } => {
                assert_eq!(class_name.len(), MAX_STRING_SIZE);
                assert_eq!(correlation_id.len(), 481);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_http_out_frame() {
        let event = Event::new(
            39441,
            0,
            1_547_463_470_598_444,
            EventKind::HttpOut {
                url: "https://google.com/".to_string(),
                verb: "GET".to_string(),
                status: 200,
                duration: 1000,
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), 54);
        assert_eq!(
            hex(&frame),
            "360066119A0000000000002CC977EA687F0500130068747470733A2F2F676F6F676C652E636F6D2F03474554C800E803000000000000"
        );
    }

    #[test]
    fn test_http_verb_capped_at_short_string_limit() {
        let event = Event::new(
            39441,
            0,
            1_547_463_470_598_444,
            EventKind::HttpIn {
                url: "https://google.com/".to_string(),
                verb: "a".repeat(200),
                status: 200,
                duration: 1000,
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), 178);
    }

    #[test]
    fn test_exception_thrown_frame() {
        let event = Event::new(
            63646,
            4_294_551_376,
            1_547_628_571_609_110,
            EventKind::ExceptionThrown {
                exception_id: 140_575_228_800_480,
                class_name: "RuntimeError".to_string(),
                correlation_id: "123-123-123".to_string(),
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), 54);
        assert_eq!(
            hex(&frame),
            "3600129EF8000050A7F9FF1648415B8F7F0500E0AD9338DA7F00000C0052756E74696D654572726F720B003132332D3132332D313233"
        );
    }

    #[test]
    fn test_methodinfo_frame() {
        let event = Event::new(
            33061,
            4_294_551_416,
            1_548_385_998_725_660,
            EventKind::Methodinfo {
                function_id: 5_959_948,
                class_name: "Rastro::Apm::Tracer".to_string(),
                method_name: "stop".to_string(),
                method_source: MethodSource::UserCode,
            },
        );
        let frame = encode(&event);
        assert_eq!(frame.len(), 51);
        assert_eq!(
            hex(&frame),
            "33000F2581000078A7F9FF1CE26DB53F8005000CF15A00130052617374726F3A3A41706D3A3A547261636572040073746F7000"
        );
    }

    #[test]
    fn test_header_only_frames_are_19_bytes() {
        for kind in [
            EventKind::EndTransaction,
            EventKind::ProcessEnded,
            EventKind::ThreadEnded,
        ] {
            let frame = encode(&Event::new(39441, 0, 1_547_463_470_598_444, kind));
            assert_eq!(frame.len(), MIN_PAYLOAD);
        }
    }

    #[test]
    fn test_value_string_over_budget_becomes_largestring() {
        let event = Event::new(
            1,
            1,
            0,
            EventKind::End {
                function_id: 1,
                tailcall: false,
                return_value: Some(Argument::return_value(Value::Str("x".repeat(10_000)))),
            },
        );
        let frame = encode(&event);
        assert!(frame.len() <= MAX_FRAME_SIZE);
        // Largestring tag right after block length, name length, name.
        let tag_offset = MIN_PAYLOAD + 4 + 1 + 2;
        assert_eq!(frame[tag_offset], ValueType::LargeString as u8);
        // Header still tells the truth.
        let declared = u16::from_le_bytes([frame[0], frame[1]]) as usize;
        assert_eq!(declared, frame.len());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode(&[0x03, 0x00, 0x01]),
            Err(DecodeError::Truncated { .. })
        ));
        let mut frame = encode(&Event::new(1, 1, 0, EventKind::EndTransaction));
        frame[2] = 0xEE;
        assert_eq!(decode(&frame), Err(DecodeError::UnknownEventType(0xEE)));
        let frame = encode(&Event::new(1, 1, 0, EventKind::EndTransaction));
        assert!(matches!(
            decode(&frame[..frame.len() - 1]),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let kinds = vec![
            EventKind::ProcessFrequency { frequency: 1_000_000 },
            EventKind::ProcessType {
                technology_type: "Rust".to_string(),
                process_type: "Standalone".to_string(),
            },
            EventKind::BeginTransaction {
                api_key: "key".to_string(),
                technology_type: "Rust".to_string(),
                process_type: "Web".to_string(),
            },
            EventKind::EndTransaction,
            EventKind::ProcessEnded,
            EventKind::ThreadStarted { parent_tid: 12 },
            EventKind::ThreadEnded,
            EventKind::Methodinfo {
                function_id: 42,
                class_name: "Subject".to_string(),
                method_name: "observe".to_string(),
                method_source: MethodSource::KnownLibrary,
            },
            EventKind::Begin {
                function_id: 42,
                instance_id: u64::MAX,
                arguments: vec![
                    Argument::new("flag", true),
                    Argument::new("count", Value::from_i64(-40_000)),
                    Argument::new("label", "wide \u{2603} text"),
                ],
            },
            EventKind::End {
                function_id: 42,
                tailcall: true,
                return_value: Some(Argument::return_value(Value::from_u64(0))),
            },
            EventKind::ExceptionThrown {
                exception_id: 7,
                class_name: "Timeout".to_string(),
                correlation_id: "abc-1".to_string(),
            },
            EventKind::Sql {
                provider: "mysql".to_string(),
                host: "db.internal".to_string(),
                database: "orders".to_string(),
                query: "SELECT 1".to_string(),
                duration: i64::MAX,
            },
            EventKind::HttpIn {
                url: "/status".to_string(),
                verb: "HEAD".to_string(),
                status: 204,
                duration: 12,
            },
            EventKind::HttpOut {
                url: "https://api.example.com".to_string(),
                verb: "POST".to_string(),
                status: 503,
                duration: 900,
            },
        ];
        for kind in kinds {
            let event = Event::new(u32::MAX, u32::MAX, i64::MIN, kind);
            let decoded = decode(&encode(&event)).unwrap();
            assert_eq!(decoded, event);
        }
    }
}
