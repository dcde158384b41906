//! Telemetry: structured logging and metric descriptions.
//!
//! The library records metrics through the `metrics` facade and never
//! installs an exporter; the embedding service picks one.
//!
//! | Metric                               | Labels              |
//! |--------------------------------------|---------------------|
//! | `warden_decisions_total`             | `guard`, `outcome`  |
//! | `warden_override_writes_total`       | `op`                |
//! | `warden_override_cache_total`        | `result`            |
//! | `warden_sweep_expired_total`         |                     |
//! | `warden_errors_total`                | `code`, `category`  |

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};

use metrics::{describe_counter, Unit};

pub const DECISIONS_TOTAL: &str = "warden_decisions_total";
pub const OVERRIDE_WRITES_TOTAL: &str = "warden_override_writes_total";
pub const OVERRIDE_CACHE_TOTAL: &str = "warden_override_cache_total";
pub const SWEEP_EXPIRED_TOTAL: &str = "warden_sweep_expired_total";
pub const ERRORS_TOTAL: &str = "warden_errors_total";

/// Register descriptions for every Warden metric with the installed recorder.
///
/// Call after installing a recorder; without one this is a no-op.
pub fn describe_metrics() {
    describe_counter!(DECISIONS_TOTAL, Unit::Count, "Guard decisions by guard and outcome");
    describe_counter!(OVERRIDE_WRITES_TOTAL, Unit::Count, "Permission override grants and revokes");
    describe_counter!(OVERRIDE_CACHE_TOTAL, Unit::Count, "Override cache hits and misses");
    describe_counter!(SWEEP_EXPIRED_TOTAL, Unit::Count, "Overrides flipped to not granted by the expiry sweep");
    describe_counter!(ERRORS_TOTAL, Unit::Count, "Errors raised by the authorization core");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_without_recorder_is_noop() {
        describe_metrics();
    }
}
