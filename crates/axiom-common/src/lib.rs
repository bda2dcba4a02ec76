//! # Axiom Common
//!
//! Logging configuration and shared utilities for the Axiom offline worker.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Wall-clock helpers shared by the cache and notification crates

use std::time::{SystemTime, UNIX_EPOCH};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Milliseconds since the Unix epoch.
///
/// Used for cache-entry timestamps and notification arrival times. Falls
/// back to zero if the system clock reads before the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_nonzero() {
        assert!(now_millis() > 0);
    }

    #[test]
    fn test_now_millis_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }
}
