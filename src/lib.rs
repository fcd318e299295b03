//! Rastro - always-on application profiler pipeline
//!
//! This library provides the trace-event pipeline of an always-on
//! profiler: a per-call filtering engine, a binary event codec, a bounded
//! transport ring buffer, and a tracer orchestrator that streams compact
//! frames to a local monitoring agent over UDP or TCP (or hands decoded
//! events to an in-process callback).
//!
//! The runtime hook mechanism that produces call/return/exception
//! notifications is external; [`tracer::Tracer`]'s `on_call_begin`,
//! `on_call_end` and `on_exception` entry points are the boundary.
//!
//! ```no_run
//! use rastro::config::Config;
//! use rastro::tracer::Tracer;
//!
//! let tracer = Tracer::new(Config::from_env()?);
//! tracer.enable_network_sink()?;
//! tracer.start_trace();
//! tracer.on_call_begin("Checkout", "total", vec![]);
//! tracer.on_call_end("Checkout", "total", None, false);
//! tracer.end_trace();
//! tracer.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod filter;
pub mod protocol;
pub mod ring_buffer;
pub mod sink;
pub mod tracer;
pub mod value;

pub use error::{DecodeError, Error};
pub use event::{Event, EventKind};
pub use value::{Argument, Value};
