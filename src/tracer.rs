//! Tracer orchestrator.
//!
//! Owns session state, thread and instance identity, the filter engine and
//! the sink, and drives the per-call hot path: filter the call site, assign
//! a function id (announcing it once per transaction), emit Begin/End with
//! per-thread stack discipline, and hand encoded frames to the sink.
//!
//! One orchestrator is shared by every thread of the monitored process.
//! Nothing on the hot path blocks beyond short mutex sections, and nothing
//! here ever panics into the monitored program: capacity problems drop
//! data, only configuration misuse surfaces as `Err`.

use crate::codec;
use crate::config::{Config, NetworkMode};
use crate::error::Error;
use crate::event::{Event, EventKind};
use crate::filter::FilterEngine;
use crate::protocol::{MethodSource, SHADOW_STACK_LIMIT, TIMESTAMP_UNITS_PER_SECOND};
use crate::sink::{Callback, Sink, SinkKind};
use crate::value::{Argument, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::thread::ThreadId;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Technology identifier reported in BeginTransaction frames.
pub const TECHNOLOGY_TYPE: &str = "Rust";
/// Default process classification reported to the agent.
pub const PROCESS_TYPE: &str = "Standalone";

/// Monotonic timestamp source, microsecond units. Pluggable so tests can
/// pin timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall-clock-anchored monotonic clock. Anchored once at construction so
/// timestamps are comparable across threads and never go backwards.
pub struct MonotonicClock {
    anchor: Instant,
    epoch_micros: i64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        let epoch_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Self {
            anchor: Instant::now(),
            epoch_micros,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> i64 {
        self.epoch_micros + self.anchor.elapsed().as_micros() as i64
    }
}

/// Per-call-site entry in the method table. `announced` is reset on every
/// `start_trace` so each transaction re-announces the sites it touches.
struct MethodEntry {
    function_id: u32,
    announced: bool,
}

struct MethodTable {
    entries: HashMap<(String, String), MethodEntry>,
    next_function_id: u32,
}

/// Registered thread. `announced` stays false until a ThreadStarted frame
/// has actually gone out, so threads first seen outside a transaction are
/// introduced to the agent before their first in-transaction event.
struct ThreadRecord {
    tid: u32,
    announced: bool,
}

struct ThreadRegistry {
    threads: HashMap<ThreadId, ThreadRecord>,
    next_tid: u32,
    root_tid: u32,
}

/// One open call frame on a thread's shadow stack.
struct Frame {
    function_id: u32,
}

#[derive(Default)]
struct ThreadStack {
    frames: Vec<Frame>,
    /// Calls deeper than the shadow stack limit: counted, not emitted.
    overflow: u32,
}

/// The profiler's process-wide orchestrator.
pub struct Tracer {
    config: Config,
    pid: u32,
    clock: Box<dyn Clock>,
    enabled: AtomicBool,
    nooped: AtomicBool,
    sink: RwLock<Option<Sink>>,
    filter: FilterEngine,
    methods: Mutex<MethodTable>,
    threads: Mutex<ThreadRegistry>,
    stacks: Mutex<HashMap<u32, ThreadStack>>,
    next_instance_id: AtomicU64,
    next_exception_id: AtomicU64,
}

impl Tracer {
    /// Build an orchestrator from configuration: built-in filter defaults,
    /// then the configured rule file. The constructing thread becomes the
    /// root thread (tid 1).
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Box::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: Config, clock: Box<dyn Clock>) -> Self {
        let filter = FilterEngine::new();
        if let Err(err) = filter.load_rule_file(config.rule_file()) {
            warn!(error = %err, "could not load filter rule file");
        }
        let tracer = Self {
            config,
            pid: std::process::id(),
            clock,
            enabled: AtomicBool::new(false),
            nooped: AtomicBool::new(false),
            sink: RwLock::new(None),
            filter,
            methods: Mutex::new(MethodTable {
                entries: HashMap::new(),
                next_function_id: 1,
            }),
            threads: Mutex::new(ThreadRegistry {
                threads: HashMap::new(),
                next_tid: 1,
                root_tid: 1,
            }),
            stacks: Mutex::new(HashMap::new()),
            next_instance_id: AtomicU64::new(1),
            next_exception_id: AtomicU64::new(1),
        };
        // Root thread registers without a ThreadStarted event.
        tracer.with_threads(|registry| {
            registry.threads.insert(
                std::thread::current().id(),
                ThreadRecord {
                    tid: 1,
                    announced: true,
                },
            );
            registry.next_tid = 2;
        });
        tracer
    }

    /// The filter engine, for direct rule manipulation.
    pub fn filter(&self) -> &FilterEngine {
        &self.filter
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // --- sink assignment (write-once) ---

    /// Attach a synchronous callback sink. Re-assigning a callback sink
    /// replaces the callback; assigning over a network sink is a fatal
    /// configuration error.
    pub fn set_callback_sink(&self, callback: Callback) -> Result<(), Error> {
        let mut slot = self.sink_slot();
        match slot.as_ref().map(Sink::kind) {
            None | Some(SinkKind::Callback) => {
                *slot = Some(Sink::callback(callback));
                Ok(())
            }
            Some(other) => Err(Error::Config(format!(
                "tracer already has a {other:?} sink, cannot assign a callback sink"
            ))),
        }
    }

    /// Attach a UDP sink sending one frame per datagram.
    pub fn set_udp_sink(&self, host: &str, port: u16) -> Result<(), Error> {
        self.set_network_sink(SinkKind::Udp, || Sink::udp(host, port))
    }

    /// Attach a TCP sink streaming concatenated frames.
    pub fn set_tcp_sink(&self, host: &str, port: u16) -> Result<(), Error> {
        self.set_network_sink(SinkKind::Tcp, || Sink::tcp(host, port))
    }

    /// Attach the network sink selected by configuration.
    pub fn enable_network_sink(&self) -> Result<(), Error> {
        match self.config.network_mode {
            NetworkMode::Udp => {
                let host = self.config.udp_host().to_string();
                self.set_udp_sink(&host, self.config.udp_port)
            }
            NetworkMode::Tcp => {
                let host = self.config.tcp_host.clone();
                self.set_tcp_sink(&host, self.config.tcp_port)
            }
        }
    }

    fn set_network_sink(
        &self,
        kind: SinkKind,
        build: impl FnOnce() -> Result<Sink, Error>,
    ) -> Result<(), Error> {
        let mut slot = self.sink_slot();
        match slot.as_ref().map(Sink::kind) {
            None => {
                *slot = Some(build()?);
                Ok(())
            }
            Some(existing) => Err(Error::Config(format!(
                "tracer already has a {existing:?} sink, cannot assign a {kind:?} sink"
            ))),
        }
    }

    // --- session state ---

    /// Disabled → Enabled. Emits ProcessFrequency and BeginTransaction on
    /// the transition and re-arms per-transaction method announcements.
    /// Returns false without side effects when already enabled or nooped.
    pub fn start_trace(&self) -> bool {
        if self.nooped.load(Ordering::Acquire) {
            return false;
        }
        if self
            .enabled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.with_methods(|methods| {
            for entry in methods.entries.values_mut() {
                entry.announced = false;
            }
        });
        self.deliver(EventKind::ProcessFrequency {
            frequency: TIMESTAMP_UNITS_PER_SECOND,
        });
        self.deliver(EventKind::BeginTransaction {
            api_key: self.config.api_key.clone(),
            technology_type: TECHNOLOGY_TYPE.to_string(),
            process_type: PROCESS_TYPE.to_string(),
        });
        true
    }

    /// Enabled → Disabled. Emits EndTransaction on the transition.
    pub fn end_trace(&self) -> bool {
        if self
            .enabled
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.deliver(EventKind::EndTransaction);
        true
    }

    /// Permanently disable emission for the rest of this orchestrator's
    /// lifetime.
    pub fn noop(&self) {
        self.nooped.store(true, Ordering::Release);
        debug!("tracer nooped, emission permanently disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire) && !self.nooped.load(Ordering::Acquire)
    }

    /// Emit ProcessEnded, drain the sink and join its flusher thread.
    /// After this the tracer has no sink; further emissions go nowhere.
    pub fn close(&self) {
        self.end_trace();
        if !self.nooped.load(Ordering::Acquire) {
            // ProcessEnded goes out even though the session is disabled.
            self.deliver(EventKind::ProcessEnded);
        }
        let sink = self.sink_slot().take();
        if let Some(sink) = sink {
            sink.close();
        }
    }

    // --- event injection ---

    /// Public injection point for externally observed events (library
    /// adapters push Sql/HttpIn/HttpOut/... through here).
    ///
    /// Returns Ok(false) without emitting when the orchestrator is
    /// disabled, nooped, or has no sink. A malformed record is programmer
    /// misuse and fails loudly.
    pub fn emit(&self, kind: EventKind) -> Result<bool, Error> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let event = Event::new(self.pid, self.current_tid(), self.clock.now(), kind);
        codec::validate(&event).map_err(Error::MalformedEvent)?;
        Ok(self.send(event))
    }

    // --- per-call hot path ---

    /// Call notification. Filters the call site, announces its Methodinfo
    /// once per transaction, and emits Begin with a fresh instance id.
    pub fn on_call_begin(&self, class_name: &str, method_name: &str, arguments: Vec<Argument>) {
        if !self.is_enabled() || !self.filter.is_traceable(class_name, method_name) {
            return;
        }
        let tid = self.current_tid();

        // Depth check before any allocation.
        {
            let mut stacks = self.lock_stacks();
            let stack = stacks.entry(tid).or_default();
            if stack.frames.len() >= SHADOW_STACK_LIMIT {
                stack.overflow += 1;
                return;
            }
        }

        let (function_id, announce) = self.ensure_function_id(class_name, method_name);
        if announce {
            self.deliver(EventKind::Methodinfo {
                function_id,
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
                method_source: MethodSource::UserCode,
            });
        }
        let instance_id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
        self.deliver(EventKind::Begin {
            function_id,
            instance_id,
            arguments,
        });
        self.lock_stacks()
            .entry(tid)
            .or_default()
            .frames
            .push(Frame { function_id });
    }

    /// Return notification. Emits the matching End, preserving per-thread
    /// stack discipline; frames suppressed by the depth limit consume
    /// their overflow ticket instead.
    pub fn on_call_end(
        &self,
        class_name: &str,
        method_name: &str,
        return_value: Option<Value>,
        tailcall: bool,
    ) {
        if !self.is_enabled() || !self.filter.is_traceable(class_name, method_name) {
            return;
        }
        let tid = self.current_tid();
        let function_id = {
            let mut stacks = self.lock_stacks();
            let Some(stack) = stacks.get_mut(&tid) else {
                return;
            };
            if stack.overflow > 0 {
                stack.overflow -= 1;
                return;
            }
            match stack.frames.pop() {
                Some(frame) => frame.function_id,
                None => return, // unbalanced notification, ignore
            }
        };
        self.deliver(EventKind::End {
            function_id,
            tailcall,
            return_value: return_value.map(Argument::return_value),
        });
    }

    /// Exception notification. The unwinding frames still get their
    /// `on_call_end` notifications from the runtime afterwards.
    pub fn on_exception(&self, class_name: &str, correlation_id: &str) {
        if !self.is_enabled() {
            return;
        }
        let exception_id = self.next_exception_id.fetch_add(1, Ordering::Relaxed);
        self.deliver(EventKind::ExceptionThrown {
            exception_id,
            class_name: class_name.to_string(),
            correlation_id: correlation_id.to_string(),
        });
    }

    /// The current thread is terminating: emit ThreadEnded and retire its
    /// shadow stack.
    pub fn on_thread_end(&self) {
        let tid = self.current_tid();
        self.lock_stacks().remove(&tid);
        if self.is_enabled() {
            self.deliver(EventKind::ThreadEnded);
        }
    }

    // --- rule API ---

    /// Append an allow rule and flush the method table so re-observed call
    /// sites are re-announced under the new rule set.
    pub fn add_whitelist(&self, path: Option<&str>, method: Option<&str>) {
        self.filter.add_allow(path, method);
        self.flush_methods();
    }

    /// Append a deny rule.
    pub fn add_blacklist(&self, path: Option<&str>, method: Option<&str>) {
        self.filter.add_deny(path, method);
        self.flush_methods();
    }

    fn flush_methods(&self) {
        self.with_methods(|methods| {
            // function id counter survives so ids stay process-unique
            methods.entries.clear();
        });
    }

    // --- internals ---

    fn sink_slot(&self) -> std::sync::RwLockWriteGuard<'_, Option<Sink>> {
        match self.sink.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn with_methods<R>(&self, f: impl FnOnce(&mut MethodTable) -> R) -> R {
        match self.methods.lock() {
            Ok(mut table) => f(&mut table),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn with_threads<R>(&self, f: impl FnOnce(&mut ThreadRegistry) -> R) -> R {
        match self.threads.lock() {
            Ok(mut registry) => f(&mut registry),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn lock_stacks(&self) -> std::sync::MutexGuard<'_, HashMap<u32, ThreadStack>> {
        match self.stacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Sequential tid for the calling thread, registering it lazily. The
    /// thread gets a ThreadStarted event parented to the root thread before
    /// its first event inside an enabled session, even when it was first
    /// observed while the session was disabled.
    fn current_tid(&self) -> u32 {
        let handle = std::thread::current().id();
        let enabled = self.is_enabled();
        let (tid, announce) = self.with_threads(|registry| {
            let root_tid = registry.root_tid;
            let next = &mut registry.next_tid;
            let record = registry.threads.entry(handle).or_insert_with(|| {
                let tid = *next;
                *next += 1;
                ThreadRecord {
                    tid,
                    announced: false,
                }
            });
            let announce = enabled && !record.announced;
            if announce {
                record.announced = true;
            }
            (record.tid, announce.then_some(root_tid))
        });
        if let Some(parent_tid) = announce {
            self.send(Event::new(
                self.pid,
                tid,
                self.clock.now(),
                EventKind::ThreadStarted { parent_tid },
            ));
        }
        tid
    }

    /// Function id for a call site, allocating on first sight. The bool is
    /// true when the site still needs its Methodinfo announcement for the
    /// current transaction.
    fn ensure_function_id(&self, class_name: &str, method_name: &str) -> (u32, bool) {
        self.with_methods(|methods| {
            let next = &mut methods.next_function_id;
            let entry = methods
                .entries
                .entry((class_name.to_string(), method_name.to_string()))
                .or_insert_with(|| {
                    let function_id = *next;
                    *next += 1;
                    MethodEntry {
                        function_id,
                        announced: false,
                    }
                });
            let announce = !entry.announced;
            entry.announced = true;
            (entry.function_id, announce)
        })
    }

    fn deliver(&self, kind: EventKind) {
        let event = Event::new(self.pid, self.current_tid(), self.clock.now(), kind);
        self.send(event);
    }

    fn send(&self, event: Event) -> bool {
        let guard = match self.sink.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(sink) = guard.as_ref() else {
            return false;
        };
        let frame = codec::encode(&event);
        sink.deliver(&event, &frame);
        true
    }
}
