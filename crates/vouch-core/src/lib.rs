//! Foundational low-level utilities shared across vouch crates.
//!
//! Provides atomic file-write helpers and the unix-time utilities used by
//! capability expiry checks and directory state persistence.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{write_json_atomic, write_text_atomic};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, is_expired_unix};
