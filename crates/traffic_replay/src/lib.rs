//! # Traffic Replay
//!
//! Replays captured HTTP traffic against a target host, reproducing the
//! recorded inter-request timing.
//!
//! This crate provides:
//! - A bounded producer/scheduler pipeline over a framed traffic log
//! - Timing relative to a configurable start, with fast-forward
//! - Session cookie translation between recorded and replayed sessions
//! - Request processors that rewrite records before they are sent
//! - A validate-only mode that checks a log without sending anything
//! - HTTP/1.1 transport over TCP and TLS, plus a mock for tests
//!
//! ## Architecture
//!
//! ```text
//! log file ──► Producer ──► RecordQueue ──► Scheduler ──► Dispatcher ──► Transport
//!              (decode,      (bounded)      (waits for                  │
//!               process)                     time_delta)    response handlers
//!                                                            (session capture)
//! ```
//!
//! The producer and scheduler run as two futures joined on one task.
//! Responses are handled in spawned tasks, so a slow target never delays
//! the next scheduled request.
//!
//! ## Key Invariants
//!
//! - Requests are dispatched in file order
//! - The queue never holds more than `queue_size` records
//! - A record is never sent before `run_start + time_delta - fastforward`
//! - Decode and request failures are reported, never fatal

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dispatcher;
mod engine;
mod error;
mod http;
mod processor;
mod producer;
mod queue;
mod report;
mod scheduler;
mod session;
mod tls;
mod transport;

pub use config::ReplayConfig;
pub use dispatcher::{Dispatcher, RequestContext};
pub use engine::{replay, ReplayEngine};
pub use error::{ReplayError, ReplayResult};
pub use http::TcpTransport;
pub use processor::{JsonDateForwarding, Processor, ProcessorChain, ProcessorError};
pub use queue::RecordQueue;
pub use report::{Diagnostic, DiagnosticKind, ReplayReport, ReplayStats};
pub use session::{cookie_value, replace_cookie_value, SessionMutator, SessionRewrite, SessionTable};
pub use transport::{InFlight, MockTransport, OutboundRequest, ReplayResponse, SentRequest, Transport};
pub use traffic_codec::{Headers, LogRecord, Protocol};
