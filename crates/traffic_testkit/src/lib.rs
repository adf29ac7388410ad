//! # Traffic Testkit
//!
//! Test utilities for traffic replay.
//!
//! This crate provides:
//! - Log file fixtures with line tracking
//! - Property-based test generators using proptest
//! - A scriptable local HTTP target that records what it receives
//!
//! ## Usage
//!
//! ```rust,ignore
//! use traffic_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn replays_against_local_target() {
//!     let server = TargetServer::start().await;
//!     let log = LogFileBuilder::new().record(request("GET", "/", 0)).write();
//!     // ... run the engine against 127.0.0.1:server.port()
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
