//! # CoderVerse Common
//!
//! Logging configuration and small shared helpers for the CoderVerse
//! offline agent crates.
//!
//! ## Features
//!
//! - Logging configuration and setup on `tracing-subscriber`
//! - Wall-clock timestamps in the millisecond form the page scripts expect

use std::time::{SystemTime, UNIX_EPOCH};

pub mod logging;

pub use logging::{init_logging, try_init_logging, LogConfig, LogError, LogFormat};

/// Milliseconds since the Unix epoch.
///
/// A clock set before 1970 yields `0` rather than an error.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 1_600_000_000_000);
        assert!(b >= a);
    }
}
