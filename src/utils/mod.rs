//! Cross-cutting helpers for the estate client.
//!
//! # Submodules
//!
//! - `clock`: Injectable time source so expiry can be driven by tests.
//! - `logging`: Tracing initialization with token redaction.
//! - `retry`: Opt-in retry wrapper with bounded attempts and stepped backoff.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod clock;
pub mod logging;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
