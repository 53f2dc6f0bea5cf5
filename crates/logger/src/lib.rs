//! Process-wide log output for Pulse binaries.
//!
//! Library crates only emit `tracing` events; binaries call [`init`] once at
//! startup to decide where and how those events are written.

mod subscriber;

pub use subscriber::{LogFormat, init, init_with_level};
